// crates/runner-fleet-watcher/tests/watcher.rs
// ============================================================================
// Module: Watcher Integration Tests
// Description: Registration, fan-out, filtering, and closing behavior.
// Purpose: Validate the change bus contract seen by store producers.
// Dependencies: runner-fleet-watcher, runner-fleet-core, tokio
// ============================================================================

//! ## Overview
//! Exercises [`runner_fleet_watcher::Watcher`] end to end.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use runner_fleet_core::ChangeEvent;
use runner_fleet_core::ChangePayload;
use runner_fleet_core::EntityType;
use runner_fleet_core::Job;
use runner_fleet_core::JobStatus;
use runner_fleet_core::Operation;
use runner_fleet_watcher::Watcher;
use runner_fleet_watcher::WatcherError;
use runner_fleet_watcher::filters;

fn job_event(id: i64, status: JobStatus) -> ChangeEvent {
    ChangeEvent::new(Operation::Update, ChangePayload::Job(Job::new(id, status)))
}

// ============================================================================
// SECTION: Registration
// ============================================================================

#[test]
fn duplicate_ids_are_rejected() {
    let watcher = Watcher::new();
    let _producer = watcher.register_producer("database").unwrap();
    let _consumer = watcher.register_consumer("api", Vec::new()).unwrap();
    assert_eq!(
        watcher.register_producer("database").unwrap_err(),
        WatcherError::DuplicateProducer("database".to_string())
    );
    assert_eq!(
        watcher.register_consumer("api", Vec::new()).unwrap_err(),
        WatcherError::DuplicateConsumer("api".to_string())
    );
}

#[test]
fn dropped_producer_frees_its_id() {
    let watcher = Watcher::new();
    let producer = watcher.register_producer("database").unwrap();
    drop(producer);
    watcher.register_producer("database").unwrap();
}

// ============================================================================
// SECTION: Delivery
// ============================================================================

#[test]
fn events_fan_out_to_every_accepting_consumer_in_order() {
    let watcher = Watcher::new();
    let producer = watcher.register_producer("database").unwrap();
    let mut all = watcher.register_consumer("all", Vec::new()).unwrap();
    let mut completed = watcher
        .register_consumer("completed", vec![filters::with_job_status(JobStatus::Completed)])
        .unwrap();
    let mut pools =
        watcher.register_consumer("pools", vec![filters::with_entity_type(EntityType::Pool)]).unwrap();

    producer.notify(job_event(1, JobStatus::Queued)).unwrap();
    producer.notify(job_event(2, JobStatus::Completed)).unwrap();
    producer.notify(job_event(3, JobStatus::InProgress)).unwrap();

    let ids: Vec<i64> = all
        .drain()
        .into_iter()
        .map(|event| match event.payload {
            ChangePayload::Job(job) => job.id,
            other => panic!("unexpected payload {other:?}"),
        })
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(completed.drain().len(), 1);
    assert!(pools.try_recv().is_none());
}

#[test]
fn full_consumer_drops_events_without_failing_producer() {
    let watcher = Watcher::with_capacity(2);
    let producer = watcher.register_producer("database").unwrap();
    let mut slow = watcher.register_consumer("slow", Vec::new()).unwrap();
    for id in 1 ..= 5 {
        producer.notify(job_event(id, JobStatus::Queued)).unwrap();
    }
    assert_eq!(slow.drain().len(), 2);
    producer.notify(job_event(6, JobStatus::Queued)).unwrap();
    assert_eq!(slow.drain().len(), 1);
}

#[test]
fn closed_consumer_is_pruned_and_reports_closed() {
    let watcher = Watcher::new();
    let producer = watcher.register_producer("database").unwrap();
    let mut consumer = watcher.register_consumer("api", Vec::new()).unwrap();
    producer.notify(job_event(1, JobStatus::Queued)).unwrap();
    consumer.close();
    assert!(consumer.is_closed());
    assert_eq!(watcher.consumer_count(), 0);
    producer.notify(job_event(2, JobStatus::Queued)).unwrap();
    assert_eq!(consumer.drain().len(), 1);
}

// ============================================================================
// SECTION: Closing
// ============================================================================

#[test]
fn closing_the_watcher_closes_both_ends() {
    let watcher = Watcher::new();
    let producer = watcher.register_producer("database").unwrap();
    let mut consumer = watcher.register_consumer("api", Vec::new()).unwrap();
    producer.notify(job_event(1, JobStatus::Queued)).unwrap();
    watcher.close();
    assert!(watcher.is_closed());
    assert!(producer.is_closed());
    assert!(consumer.is_closed());
    assert_eq!(producer.notify(job_event(2, JobStatus::Queued)), Err(WatcherError::WatcherClosed));
    assert!(consumer.blocking_recv().is_some());
    assert!(consumer.blocking_recv().is_none());
    assert_eq!(watcher.register_consumer("late", Vec::new()).unwrap_err(), WatcherError::WatcherClosed);
}

#[test]
fn closed_producer_refuses_notify() {
    let watcher = Watcher::new();
    let producer = watcher.register_producer("database").unwrap();
    producer.close();
    assert!(producer.is_closed());
    assert_eq!(
        producer.notify(job_event(1, JobStatus::Queued)),
        Err(WatcherError::ProducerClosed("database".to_string()))
    );
}

#[tokio::test]
async fn async_consumers_receive_events() {
    let watcher = Watcher::new();
    let producer = watcher.register_producer("database").unwrap();
    let mut consumer = watcher.register_consumer("async", Vec::new()).unwrap();
    producer.notify(job_event(9, JobStatus::Completed)).unwrap();
    let event = consumer.recv().await.unwrap();
    assert_eq!(event.job_status(), Some(JobStatus::Completed));
}
