// crates/runner-fleet-core/src/lib.rs
// ============================================================================
// Module: Runner Fleet Core Library
// Description: Public API surface for the runner fleet persistence core.
// Purpose: Expose entity types, identifiers, errors, and coordination traits.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runner fleet core defines the durable data model of a CI-runner fleet
//! manager: owners, credentials, pools, scale sets, instances, jobs, file
//! objects, and the controller singleton. It also carries the identity and
//! secret-encryption helper, the change-event model shared with the watcher,
//! and the error kinds every store backend reports. It is backend-agnostic;
//! persistence lives in `runner-fleet-store-sqlite`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::ErrorKind;
pub use interfaces::RunnerCoordinator;
pub use interfaces::StoreError;
