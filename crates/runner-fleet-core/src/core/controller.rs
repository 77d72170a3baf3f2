// crates/runner-fleet-core/src/core/controller.rs
// ============================================================================
// Module: Runner Fleet Controller Info
// Description: Singleton installation record.
// Purpose: Hold the stable controller identifier and scaling tunables.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Exactly one controller record exists per database. It is created once and
//! afterwards only its tunables change.

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::EntityId;
use crate::core::owner::require_non_empty;
use crate::interfaces::StoreError;

/// Default seconds a job must wait before it triggers scaling.
pub const DEFAULT_MINIMUM_JOB_AGE_BACKOFF: u32 = 30;

/// Installation singleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInfo {
    /// Stable installation identifier.
    pub controller_id: EntityId,
    /// Seconds a queued job must age before the autoscaler reacts.
    pub minimum_job_age_backoff: u32,
    /// Base URL runners report status to.
    pub callback_url: Option<String>,
    /// Base URL runners fetch metadata from.
    pub metadata_url: Option<String>,
    /// Base URL the forge delivers webhooks to.
    pub webhook_url: Option<String>,
    /// Creation time in unix milliseconds.
    pub created_at: i64,
    /// Last update time in unix milliseconds.
    pub updated_at: i64,
}

/// Partial update of controller tunables.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateControllerParams {
    /// New job-age backoff in seconds.
    pub minimum_job_age_backoff: Option<u32>,
    /// New callback base URL.
    pub callback_url: Option<String>,
    /// New metadata base URL.
    pub metadata_url: Option<String>,
    /// New webhook base URL.
    pub webhook_url: Option<String>,
}

impl UpdateControllerParams {
    /// Validates supplied URLs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when a supplied URL is empty or
    /// not http(s).
    pub fn validate(&self) -> Result<(), StoreError> {
        for (field, value) in [
            ("callback_url", &self.callback_url),
            ("metadata_url", &self.metadata_url),
            ("webhook_url", &self.webhook_url),
        ] {
            let Some(url) = value else {
                continue;
            };
            require_non_empty("update_controller", field, url)?;
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(StoreError::invalid(
                    "update_controller",
                    format!("{field} must be an http or https url"),
                ));
            }
        }
        Ok(())
    }
}
