// crates/runner-fleet-watcher/src/filters.rs
// ============================================================================
// Module: Runner Fleet Change Filters
// Description: Composable predicates over change events.
// Purpose: Let consumers subscribe to a slice of the change stream.
// Dependencies: runner-fleet-core
// ============================================================================

//! ## Overview
//! A filter is a shared predicate over [`ChangeEvent`]. A consumer receives an
//! event only when every one of its filters accepts it; a consumer with no
//! filters receives everything.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use runner_fleet_core::ChangeEvent;
use runner_fleet_core::EntityId;
use runner_fleet_core::EntityType;
use runner_fleet_core::JobStatus;
use runner_fleet_core::Operation;
use runner_fleet_core::OwnerRef;

// ============================================================================
// SECTION: Filter Type
// ============================================================================

/// Shared predicate deciding whether a consumer sees an event.
pub type ChangeFilter = Arc<dyn Fn(&ChangeEvent) -> bool + Send + Sync>;

/// Returns true when every filter accepts the event.
pub(crate) fn accepts(filters: &[ChangeFilter], event: &ChangeEvent) -> bool {
    filters.iter().all(|filter| filter(event))
}

// ============================================================================
// SECTION: Constructors
// ============================================================================

/// Accepts every event.
#[must_use]
pub fn everything() -> ChangeFilter {
    Arc::new(|_: &ChangeEvent| true)
}

/// Accepts events for one entity type.
#[must_use]
pub fn with_entity_type(entity_type: EntityType) -> ChangeFilter {
    Arc::new(move |event: &ChangeEvent| event.entity_type == entity_type)
}

/// Accepts events for one mutation kind.
#[must_use]
pub fn with_operation(operation: Operation) -> ChangeFilter {
    Arc::new(move |event: &ChangeEvent| event.operation == operation)
}

/// Accepts an event when any inner filter does. An empty set accepts nothing.
#[must_use]
pub fn with_any(filters: Vec<ChangeFilter>) -> ChangeFilter {
    Arc::new(move |event: &ChangeEvent| filters.iter().any(|filter| filter(event)))
}

/// Accepts an event when all inner filters do. An empty set accepts everything.
#[must_use]
pub fn with_all(filters: Vec<ChangeFilter>) -> ChangeFilter {
    Arc::new(move |event: &ChangeEvent| accepts(&filters, event))
}

/// Accepts events about, or visible to, one owner.
#[must_use]
pub fn with_owner(owner: OwnerRef) -> ChangeFilter {
    Arc::new(move |event: &ChangeEvent| event.owners().contains(&owner))
}

/// Accepts events for one pool and the instances admitted under it.
#[must_use]
pub fn with_pool(pool_id: EntityId) -> ChangeFilter {
    Arc::new(move |event: &ChangeEvent| event.pool_id() == Some(pool_id))
}

/// Accepts job events whose job has the given status.
#[must_use]
pub fn with_job_status(status: JobStatus) -> ChangeFilter {
    Arc::new(move |event: &ChangeEvent| event.job_status() == Some(status))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
