// crates/runner-fleet-store-sqlite/src/controller.rs
// ============================================================================
// Module: SQLite Controller Info
// Description: The singleton installation record.
// Purpose: Create the controller identity once and tune it afterwards.
// Dependencies: runner-fleet-core, rusqlite, tracing
// ============================================================================

//! ## Overview
//! `controller_info` holds at most one row, pinned by a `CHECK` on its
//! primary key. A second initialization hits the primary key and surfaces as
//! [`StoreError::Conflict`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use runner_fleet_core::ChangePayload;
use runner_fleet_core::ControllerInfo;
use runner_fleet_core::EntityId;
use runner_fleet_core::Operation;
use runner_fleet_core::StoreError;
use runner_fleet_core::UpdateControllerParams;
use runner_fleet_core::core::controller::DEFAULT_MINIMUM_JOB_AGE_BACKOFF;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use tracing::debug;

use crate::store::SqliteStore;
use crate::store::column_id;
use crate::store::db_error;
use crate::store::unix_millis;

// ============================================================================
// SECTION: Operations
// ============================================================================

impl SqliteStore {
    /// Creates the controller record with a fresh identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the record already exists.
    pub fn init_controller(&self) -> Result<ControllerInfo, StoreError> {
        let op = "init_controller";
        let now = unix_millis();
        let info = ControllerInfo {
            controller_id: EntityId::generate(),
            minimum_job_age_backoff: DEFAULT_MINIMUM_JOB_AGE_BACKOFF,
            callback_url: None,
            metadata_url: None,
            webhook_url: None,
            created_at: now,
            updated_at: now,
        };
        self.write_tx(op, |tx| {
            if load_controller(tx, op)?.is_some() {
                return Err(StoreError::conflict(op, "controller already initialized"));
            }
            tx.execute(
                "INSERT INTO controller_info (singleton, controller_id, minimum_job_age_backoff, \
                 created_at, updated_at) VALUES (1, ?1, ?2, ?3, ?4)",
                params![info.controller_id.to_key(), info.minimum_job_age_backoff, now, now],
            )
            .map_err(|err| db_error(op, &err))?;
            Ok(())
        })?;
        debug!(controller_id = %info.controller_id, "initialized controller");
        self.publish(Operation::Create, ChangePayload::Controller(info.clone()));
        Ok(info)
    }

    /// Returns the controller record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] before [`SqliteStore::init_controller`].
    pub fn controller_info(&self) -> Result<ControllerInfo, StoreError> {
        let op = "controller_info";
        self.read(op, |connection| {
            load_controller(connection, op)?
                .ok_or_else(|| StoreError::not_found(op, "controller not initialized"))
        })
    }

    /// Updates controller tunables.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for malformed URLs and
    /// [`StoreError::NotFound`] before initialization.
    pub fn update_controller(
        &self,
        params: UpdateControllerParams,
    ) -> Result<ControllerInfo, StoreError> {
        let op = "update_controller";
        params.validate().map_err(|err| err.with_operation(op))?;
        let info = self.write_tx(op, |tx| {
            let mut info = load_controller(tx, op)?
                .ok_or_else(|| StoreError::not_found(op, "controller not initialized"))?;
            if let Some(backoff) = params.minimum_job_age_backoff {
                info.minimum_job_age_backoff = backoff;
            }
            if params.callback_url.is_some() {
                info.callback_url = params.callback_url;
            }
            if params.metadata_url.is_some() {
                info.metadata_url = params.metadata_url;
            }
            if params.webhook_url.is_some() {
                info.webhook_url = params.webhook_url;
            }
            info.updated_at = unix_millis();
            tx.execute(
                "UPDATE controller_info SET minimum_job_age_backoff = ?1, callback_url = ?2, \
                 metadata_url = ?3, webhook_url = ?4, updated_at = ?5 WHERE singleton = 1",
                params![
                    info.minimum_job_age_backoff,
                    info.callback_url,
                    info.metadata_url,
                    info.webhook_url,
                    info.updated_at
                ],
            )
            .map_err(|err| db_error(op, &err))?;
            Ok(info)
        })?;
        debug!(controller_id = %info.controller_id, "updated controller");
        self.publish(Operation::Update, ChangePayload::Controller(info.clone()));
        Ok(info)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads the singleton row, if present.
fn load_controller(
    connection: &Connection,
    operation: &'static str,
) -> Result<Option<ControllerInfo>, StoreError> {
    let row = connection
        .query_row(
            "SELECT controller_id, minimum_job_age_backoff, callback_url, metadata_url, \
             webhook_url, created_at, updated_at FROM controller_info WHERE singleton = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            },
        )
        .optional()
        .map_err(|err| db_error(operation, &err))?;
    let Some((id, backoff, callback_url, metadata_url, webhook_url, created_at, updated_at)) = row
    else {
        return Ok(None);
    };
    Ok(Some(ControllerInfo {
        controller_id: column_id(operation, &id)?,
        minimum_job_age_backoff: backoff,
        callback_url,
        metadata_url,
        webhook_url,
        created_at,
        updated_at,
    }))
}
