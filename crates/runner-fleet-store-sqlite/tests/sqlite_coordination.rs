// crates/runner-fleet-store-sqlite/tests/sqlite_coordination.rs
// ============================================================================
// Module: SQLite Coordination Tests
// Description: Admission control, job claims, upserts, sweeps, and events.
// Purpose: Validate exactness under racing writers and the change stream.
// Dependencies: runner-fleet-store-sqlite, runner-fleet-watcher, tempfile
// ============================================================================

//! ## Overview
//! Concurrency-facing tests:
//! - N racing admissions into a pool of capacity K yield exactly K instances
//! - Job claims are exclusive and idempotent for the holder
//! - Upserts merge deliveries and link instances by runner name
//! - Reconciliation sweeps keep only actionable jobs
//! - Every committed mutation is published once; failures publish nothing

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::sync::Arc;
use std::sync::Barrier;
use std::thread;

use runner_fleet_core::AuthType;
use runner_fleet_core::CreateCredentialsParams;
use runner_fleet_core::CreateInstanceParams;
use runner_fleet_core::CreateOwnerParams;
use runner_fleet_core::CreatePoolParams;
use runner_fleet_core::CreateScaleSetParams;
use runner_fleet_core::DEFAULT_PAGE_SIZE;
use runner_fleet_core::EntityId;
use runner_fleet_core::EntityType;
use runner_fleet_core::ErrorKind;
use runner_fleet_core::Job;
use runner_fleet_core::JobStatus;
use runner_fleet_core::Operation;
use runner_fleet_core::Owner;
use runner_fleet_core::OwnerKind;
use runner_fleet_core::PageRequest;
use runner_fleet_core::Passphrase;
use runner_fleet_core::Pool;
use runner_fleet_core::PoolBalancer;
use runner_fleet_core::RunnerCoordinator;
use runner_fleet_store_sqlite::SqliteStore;
use runner_fleet_store_sqlite::SqliteStoreConfig;
use runner_fleet_watcher::Watcher;
use runner_fleet_watcher::filters;
use rusqlite::Connection;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn fresh_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let config = SqliteStoreConfig::new(
        dir.path().join("fleet.db"),
        Passphrase::new("0123456789abcdef0123456789abcdef"),
    );
    (dir, SqliteStore::open(config).unwrap())
}

fn seed_org(store: &SqliteStore) -> Owner {
    store
        .create_credentials(CreateCredentialsParams {
            name: "main".to_string(),
            description: String::new(),
            endpoint: "https://forge.example".to_string(),
            auth_type: AuthType::Pat,
            secret: "ghp_secret".to_string(),
        })
        .unwrap();
    store
        .create_owner(CreateOwnerParams {
            kind: OwnerKind::Organization,
            name: "acme".to_string(),
            namespace: None,
            credentials_name: "main".to_string(),
            webhook_secret: "hook".to_string(),
            pool_balancer: PoolBalancer::default(),
        })
        .unwrap()
}

fn seed_pool(store: &SqliteStore, owner: &Owner, max_runners: u32) -> Pool {
    store
        .create_pool(&owner.owner_ref(), CreatePoolParams {
            provider_name: "lxd".to_string(),
            image: "ubuntu:24.04".to_string(),
            flavor: "default".to_string(),
            tags: vec!["linux".to_string()],
            max_runners,
            ..CreatePoolParams::default()
        })
        .unwrap()
}

fn queued_job(id: i64, owner: &Owner) -> Job {
    Job {
        name: format!("build-{id}"),
        labels: vec!["linux".to_string()],
        ..Job::new(id, JobStatus::Queued).with_owner(owner.owner_ref())
    }
}

// ============================================================================
// SECTION: Admission Control
// ============================================================================

#[test]
fn racing_admissions_never_exceed_capacity() {
    const CAPACITY: u32 = 3;
    const RACERS: usize = 12;

    let (_dir, store) = fresh_store();
    let org = seed_org(&store);
    let pool = seed_pool(&store, &org, CAPACITY);
    let pool_id = pool.id.to_key();
    let barrier = Arc::new(Barrier::new(RACERS));

    let handles: Vec<_> = (0 .. RACERS)
        .map(|index| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            let pool_id = pool_id.clone();
            thread::spawn(move || {
                barrier.wait();
                store.create_instance(&pool_id, CreateInstanceParams::named(format!("runner-{index}")))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    let admitted = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(admitted, CAPACITY as usize);
    for err in results.into_iter().filter_map(Result::err) {
        assert_eq!(err.kind(), ErrorKind::Conflict, "unexpected error: {err}");
    }
    let listed = store.list_pool_instances(&pool_id, PageRequest::default()).unwrap();
    assert_eq!(listed.total_count, u64::from(CAPACITY));
}

#[test]
fn racing_admissions_across_store_handles_stay_exact() {
    const CAPACITY: u32 = 2;
    const RACERS: usize = 6;

    let (dir, store) = fresh_store();
    let org = seed_org(&store);
    let pool = seed_pool(&store, &org, CAPACITY);
    let pool_id = pool.id.to_key();
    let path = dir.path().join("fleet.db");
    let barrier = Arc::new(Barrier::new(RACERS));

    let handles: Vec<_> = (0 .. RACERS)
        .map(|index| {
            let handle = SqliteStore::open(SqliteStoreConfig::new(
                path.clone(),
                Passphrase::new("0123456789abcdef0123456789abcdef"),
            ))
            .unwrap();
            let barrier = Arc::clone(&barrier);
            let pool_id = pool_id.clone();
            thread::spawn(move || {
                barrier.wait();
                handle.create_instance(&pool_id, CreateInstanceParams::named(format!("runner-{index}")))
            })
        })
        .collect();
    let admitted = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|result| result.as_ref().is_ok())
        .count();
    assert_eq!(admitted, CAPACITY as usize);
    let listed = store.list_pool_instances(&pool_id, PageRequest::default()).unwrap();
    assert_eq!(listed.total_count, u64::from(CAPACITY));
}

#[test]
fn held_write_lock_is_retryable_but_full_pool_is_not() {
    let dir = TempDir::new().unwrap();
    let mut config = SqliteStoreConfig::new(
        dir.path().join("fleet.db"),
        Passphrase::new("0123456789abcdef0123456789abcdef"),
    );
    config.busy_timeout_ms = 50;
    let store = SqliteStore::open(config).unwrap();
    let org = seed_org(&store);
    let pool = seed_pool(&store, &org, 1);
    let pool_id = pool.id.to_key();

    let holder = Connection::open(dir.path().join("fleet.db")).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();
    let err = store.create_instance(&pool_id, CreateInstanceParams::named("runner-1")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend, "unexpected error: {err}");
    assert!(err.is_retryable());
    holder.execute_batch("ROLLBACK;").unwrap();

    store.create_instance(&pool_id, CreateInstanceParams::named("runner-1")).unwrap();
    let err = store.create_instance(&pool_id, CreateInstanceParams::named("runner-2")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict, "unexpected error: {err}");
    assert!(!err.is_retryable());
}

#[test]
fn scale_set_admission_honors_capacity() {
    let (_dir, store) = fresh_store();
    let org = seed_org(&store);
    let set = store
        .create_scale_set(&org.owner_ref(), CreateScaleSetParams {
            name: "default".to_string(),
            provider_name: "lxd".to_string(),
            image: "ubuntu:24.04".to_string(),
            flavor: "default".to_string(),
            max_runners: 1,
            ..CreateScaleSetParams::default()
        })
        .unwrap();
    let set_id = set.id.to_key();
    store.create_scale_set_instance(&set_id, CreateInstanceParams::named("set-1")).unwrap();
    let err =
        store.create_scale_set_instance(&set_id, CreateInstanceParams::named("set-2")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let missing = EntityId::generate().to_key();
    let err = store.create_scale_set_instance(&missing, CreateInstanceParams::named("x")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn deleted_instances_free_capacity() {
    let (_dir, store) = fresh_store();
    let org = seed_org(&store);
    let pool = seed_pool(&store, &org, 1);
    let pool_id = pool.id.to_key();
    let first = store.create_instance(&pool_id, CreateInstanceParams::named("runner-1")).unwrap();
    assert!(store.create_instance(&pool_id, CreateInstanceParams::named("runner-2")).is_err());
    store.delete_instance(&first.id.to_key()).unwrap();
    store.create_instance(&pool_id, CreateInstanceParams::named("runner-2")).unwrap();
}

// ============================================================================
// SECTION: Job Claims
// ============================================================================

#[test]
fn job_locks_are_exclusive() {
    let (_dir, store) = fresh_store();
    let org = seed_org(&store);
    store.create_or_update_job(queued_job(42, &org)).unwrap();
    let alice = EntityId::generate();
    let bob = EntityId::generate();

    store.lock_job(42, &alice).unwrap();
    store.lock_job(42, &alice).unwrap();
    assert_eq!(store.lock_job(42, &bob).unwrap_err().kind(), ErrorKind::Conflict);
    assert_eq!(store.unlock_job(42, &bob).unwrap_err().kind(), ErrorKind::Conflict);

    store.unlock_job(42, &alice).unwrap();
    store.unlock_job(42, &alice).unwrap();
    store.lock_job(42, &bob).unwrap();
    assert_eq!(store.get_job(42).unwrap().locked_by, Some(bob));

    assert_eq!(store.lock_job(7, &alice).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(store.unlock_job(7, &alice).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn racing_claims_have_one_winner() {
    const RACERS: usize = 8;

    let (_dir, store) = fresh_store();
    let org = seed_org(&store);
    store.create_or_update_job(queued_job(1, &org)).unwrap();
    let barrier = Arc::new(Barrier::new(RACERS));
    let handles: Vec<_> = (0 .. RACERS)
        .map(|_| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let holder = EntityId::generate();
                barrier.wait();
                store.lock_job(1, &holder).map(|()| holder)
            })
        })
        .collect();
    let winners: Vec<EntityId> = handles
        .into_iter()
        .filter_map(|handle| handle.join().unwrap().ok())
        .collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(store.get_job(1).unwrap().locked_by, Some(winners[0]));
}

#[test]
fn breaking_locks_only_touches_queued_jobs() {
    let (_dir, store) = fresh_store();
    let org = seed_org(&store);
    let holder = EntityId::generate();
    store.create_or_update_job(queued_job(1, &org)).unwrap();
    store.create_or_update_job(queued_job(2, &org)).unwrap();
    store.lock_job(1, &holder).unwrap();
    store.lock_job(2, &holder).unwrap();
    store.create_or_update_job(Job::new(2, JobStatus::InProgress)).unwrap();

    store.break_lock_job_is_queued(1).unwrap();
    store.break_lock_job_is_queued(2).unwrap();
    assert_eq!(store.get_job(1).unwrap().locked_by, None);
    assert_eq!(store.get_job(2).unwrap().locked_by, Some(holder));
    assert_eq!(store.break_lock_job_is_queued(9).unwrap_err().kind(), ErrorKind::NotFound);
}

// ============================================================================
// SECTION: Upserts and Sweeps
// ============================================================================

#[test]
fn upserts_merge_deliveries_and_link_instances() {
    let (_dir, store) = fresh_store();
    let org = seed_org(&store);
    let pool = seed_pool(&store, &org, 2);
    let instance =
        store.create_instance(&pool.id.to_key(), CreateInstanceParams::named("runner-7")).unwrap();

    let created = store.create_or_update_job(queued_job(10, &org)).unwrap();
    assert_eq!(created.org_id, Some(org.id));

    let started = store
        .create_or_update_job(Job {
            runner_name: "runner-7".to_string(),
            ..Job::new(10, JobStatus::InProgress)
        })
        .unwrap();
    assert_eq!(started.status, JobStatus::InProgress);
    assert_eq!(started.name, "build-10");
    assert_eq!(started.labels, vec!["linux".to_string()]);
    assert_eq!(started.org_id, Some(org.id));
    assert_eq!(started.instance_id, Some(instance.id));
    assert_eq!(store.get_job(10).unwrap(), started);
}

#[test]
fn upserts_reject_unknown_owners() {
    let (_dir, store) = fresh_store();
    let ghost = Job::new(5, JobStatus::Queued)
        .with_owner(runner_fleet_core::OwnerRef::repository(EntityId::generate()));
    assert_eq!(store.create_or_update_job(ghost).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        store.create_or_update_job(Job::new(0, JobStatus::Queued)).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

#[test]
fn sweep_keeps_queued_and_instance_bound_jobs() {
    let (_dir, store) = fresh_store();
    let org = seed_org(&store);
    let pool = seed_pool(&store, &org, 1);
    store.create_instance(&pool.id.to_key(), CreateInstanceParams::named("runner-1")).unwrap();

    store.create_or_update_job(queued_job(1, &org)).unwrap();
    store.create_or_update_job(Job::new(2, JobStatus::InProgress)).unwrap();
    store.create_or_update_job(Job::new(3, JobStatus::Completed)).unwrap();
    store
        .create_or_update_job(Job {
            runner_name: "runner-1".to_string(),
            ..Job::new(4, JobStatus::InProgress)
        })
        .unwrap();

    assert_eq!(store.delete_inactionable_jobs().unwrap(), 2);
    let remaining: Vec<i64> =
        store.list_jobs(PageRequest::default()).unwrap().items.iter().map(|job| job.id).collect();
    assert_eq!(remaining, vec![1, 4]);
    assert_eq!(store.delete_inactionable_jobs().unwrap(), 0);
}

#[test]
fn job_listings_page_by_id() {
    let (_dir, store) = fresh_store();
    let org = seed_org(&store);
    for id in 1 ..= 5 {
        store.create_or_update_job(queued_job(id, &org)).unwrap();
    }
    store.create_or_update_job(Job::new(6, JobStatus::Completed)).unwrap();

    let defaults = store.list_jobs(PageRequest::new(0, 0)).unwrap();
    assert_eq!((defaults.page, defaults.page_size), (1, DEFAULT_PAGE_SIZE));
    assert_eq!((defaults.total_count, defaults.total_pages, defaults.items.len()), (6, 1, 6));

    let second = store.list_jobs_by_status(JobStatus::Queued, PageRequest::new(2, 2)).unwrap();
    assert_eq!(second.items.iter().map(|job| job.id).collect::<Vec<_>>(), vec![3, 4]);
    assert_eq!((second.total_count, second.total_pages), (5, 3));

    let last = store
        .list_owner_jobs_by_status(&org.owner_ref(), JobStatus::Queued, PageRequest::new(3, 2))
        .unwrap();
    assert_eq!(last.items.iter().map(|job| job.id).collect::<Vec<_>>(), vec![5]);

    let beyond = store.list_jobs(PageRequest::new(u64::MAX, u64::MAX)).unwrap();
    assert!(beyond.items.is_empty());
    assert_eq!((beyond.total_count, beyond.total_pages), (6, 1));
}

#[test]
fn completed_jobs_can_be_purged_and_listed_by_status() {
    let (_dir, store) = fresh_store();
    let org = seed_org(&store);
    store.create_or_update_job(queued_job(1, &org)).unwrap();
    store.create_or_update_job(queued_job(2, &org)).unwrap();
    store.create_or_update_job(Job::new(2, JobStatus::Completed)).unwrap();

    let queued = store
        .list_owner_jobs_by_status(&org.owner_ref(), JobStatus::Queued, PageRequest::default())
        .unwrap();
    assert_eq!(queued.items.iter().map(|job| job.id).collect::<Vec<_>>(), vec![1]);
    assert_eq!(
        store.list_jobs_by_status(JobStatus::Completed, PageRequest::default()).unwrap().total_count,
        1
    );

    assert_eq!(store.delete_completed_jobs().unwrap(), 1);
    store.delete_job(1).unwrap();
    store.delete_job(1).unwrap();
    assert_eq!(store.list_jobs(PageRequest::default()).unwrap().total_count, 0);
}

#[test]
fn coordinator_trait_drives_the_store() {
    let (_dir, store) = fresh_store();
    let org = seed_org(&store);
    let pool = seed_pool(&store, &org, 1);
    let coordinator: &dyn RunnerCoordinator = &store;
    let holder = EntityId::generate();

    coordinator.create_instance(&pool.id.to_key(), CreateInstanceParams::named("runner-1")).unwrap();
    coordinator.create_or_update_job(queued_job(3, &org)).unwrap();
    coordinator.lock_job(3, &holder).unwrap();
    coordinator.unlock_job(3, &holder).unwrap();
    assert_eq!(coordinator.delete_inactionable_jobs().unwrap(), 0);
}

// ============================================================================
// SECTION: Change Events
// ============================================================================

#[test]
fn committed_mutations_publish_one_event_each() {
    let (_dir, store) = fresh_store();
    let watcher = Watcher::new();
    let store = store.with_watcher(&watcher).unwrap();
    let mut jobs = watcher
        .register_consumer("jobs", vec![filters::with_entity_type(EntityType::Job)])
        .unwrap();
    let org = seed_org(&store);
    let holder = EntityId::generate();

    store.create_or_update_job(queued_job(1, &org)).unwrap();
    store.lock_job(1, &holder).unwrap();
    store.lock_job(1, &holder).unwrap();
    store.unlock_job(1, &holder).unwrap();
    store.unlock_job(1, &holder).unwrap();
    store.delete_job(1).unwrap();
    store.delete_job(1).unwrap();

    let operations: Vec<Operation> = jobs.drain().iter().map(|event| event.operation).collect();
    assert_eq!(operations, vec![
        Operation::Create,
        Operation::Update,
        Operation::Update,
        Operation::Delete
    ]);
}

#[test]
fn failed_writes_publish_nothing() {
    let (_dir, store) = fresh_store();
    let watcher = Watcher::new();
    let store = store.with_watcher(&watcher).unwrap();
    let org = seed_org(&store);
    let pool = seed_pool(&store, &org, 1);
    store.create_instance(&pool.id.to_key(), CreateInstanceParams::named("runner-1")).unwrap();

    let mut consumer = watcher.register_consumer("all", Vec::new()).unwrap();
    assert!(store.create_instance(&pool.id.to_key(), CreateInstanceParams::named("runner-2")).is_err());
    assert!(store.lock_job(99, &EntityId::generate()).is_err());
    assert!(consumer.try_recv().is_none());
}

#[test]
fn events_carry_owner_and_pool_for_filtering() {
    let (_dir, store) = fresh_store();
    let watcher = Watcher::new();
    let store = store.with_watcher(&watcher).unwrap();
    let org = seed_org(&store);
    let pool = seed_pool(&store, &org, 2);
    let other = seed_pool(&store, &org, 2);

    let mut by_pool = watcher.register_consumer("pool", vec![filters::with_pool(pool.id)]).unwrap();
    let mut by_owner =
        watcher.register_consumer("owner", vec![filters::with_owner(org.owner_ref())]).unwrap();
    store.create_instance(&pool.id.to_key(), CreateInstanceParams::named("a")).unwrap();
    store.create_instance(&other.id.to_key(), CreateInstanceParams::named("b")).unwrap();
    store.create_or_update_job(queued_job(1, &org)).unwrap();

    assert_eq!(by_pool.drain().len(), 1);
    let owner_types: Vec<EntityType> =
        by_owner.drain().iter().map(|event| event.entity_type).collect();
    assert!(owner_types.contains(&EntityType::Job));
}

#[test]
fn attaching_two_stores_to_one_watcher_conflicts() {
    let (_dir, store) = fresh_store();
    let watcher = Watcher::new();
    let _attached = store.clone().with_watcher(&watcher).unwrap();
    let err = store.with_watcher(&watcher).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}
