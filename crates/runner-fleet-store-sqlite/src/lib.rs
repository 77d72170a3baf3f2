// crates/runner-fleet-store-sqlite/src/lib.rs
// ============================================================================
// Module: Runner Fleet SQLite Store
// Description: Durable fleet state backend using SQLite.
// Purpose: Persist fleet entities, coordinate concurrent writers, store blobs.
// Dependencies: runner-fleet-core, runner-fleet-watcher, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides [`SqliteStore`], the persistence and coordination core
//! of the runner fleet. Writers are serialized through one connection and run
//! in `IMMEDIATE` transactions, which makes capacity-checked instance
//! admission and job claims exact under any number of racing callers. Every
//! committed mutation is published to an optional
//! [`runner_fleet_watcher::Watcher`]. File payloads are staged on local disk,
//! streamed into preallocated blobs, and read back through
//! [`FileObjectReader`] without ever being buffered whole.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod controller;
mod files;
mod instances;
mod jobs;
mod owners;
mod pools;
pub mod schema;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use files::FileObjectReader;
pub use schema::SCHEMA_VERSION;
pub use store::SqliteStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
