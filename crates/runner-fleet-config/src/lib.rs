// crates/runner-fleet-config/src/lib.rs
// ============================================================================
// Module: Runner Fleet Config Library
// Description: Canonical config model and validation.
// Purpose: Single source of truth for runner-fleet.toml semantics.
// Dependencies: runner-fleet-store-sqlite, runner-fleet-watcher, serde, toml
// ============================================================================

//! ## Overview
//! `runner-fleet-config` defines the configuration model for the fleet
//! store. Loading is strict and fails closed; the loaded sections build the
//! store config, the change bus, and the logging filter.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
