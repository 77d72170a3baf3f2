// crates/runner-fleet-watcher/src/lib.rs
// ============================================================================
// Module: Runner Fleet Watcher Library
// Description: In-process change bus for committed store mutations.
// Purpose: Fan change events out from producers to filtered consumers.
// Dependencies: runner-fleet-core, tokio, tracing
// ============================================================================

//! ## Overview
//! The watcher is a registry of named producers and filtered consumers.
//! Producers publish [`runner_fleet_core::ChangeEvent`]s; every open consumer
//! whose filters accept an event receives it through a bounded channel.
//! Delivery never blocks a producer: events for a full consumer are dropped
//! and closed consumers are pruned.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod filters;
pub mod watcher;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use filters::ChangeFilter;
pub use watcher::Consumer;
pub use watcher::DEFAULT_CONSUMER_CAPACITY;
pub use watcher::Producer;
pub use watcher::Watcher;
pub use watcher::WatcherError;
