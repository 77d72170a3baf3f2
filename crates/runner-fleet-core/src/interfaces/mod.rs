// crates/runner-fleet-core/src/interfaces/mod.rs
// ============================================================================
// Module: Runner Fleet Interfaces
// Description: Error kinds and coordination traits implemented by backends.
// Purpose: Define the seam between the store and its collaborators.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define the error surface shared by every store operation and
//! the coordination protocol the autoscaling loop relies on: capacity-checked
//! instance admission, exclusive job claims, idempotent job upserts, and the
//! reconciliation sweep.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use thiserror::Error;

use crate::core::CreateInstanceParams;
use crate::core::EntityId;
use crate::core::Instance;
use crate::core::Job;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Stable classification of store failures.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The identifier is well formed but no row matches it.
    NotFound,
    /// The identifier is malformed or input validation failed.
    InvalidArgument,
    /// Capacity exhausted, lock held by another, duplicate, or double init.
    Conflict,
    /// Secret encryption or decryption failed.
    Encoding,
    /// The storage engine failed (transport, transaction, lock wait).
    Backend,
    /// The caller canceled the operation before it committed.
    Canceled,
}

impl ErrorKind {
    /// Returns a stable label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidArgument => "invalid_argument",
            Self::Conflict => "conflict",
            Self::Encoding => "encoding",
            Self::Backend => "backend",
            Self::Canceled => "canceled",
        }
    }
}

/// Errors reported by store operations.
///
/// # Invariants
/// - Every variant names the operation that produced it.
/// - Messages never embed decrypted secrets or blob payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested entity does not exist.
    #[error("{operation}: not found: {message}")]
    NotFound {
        /// Operation that failed.
        operation: &'static str,
        /// Human-readable detail.
        message: String,
    },
    /// Malformed identifier or failed validation.
    #[error("{operation}: invalid argument: {message}")]
    InvalidArgument {
        /// Operation that failed.
        operation: &'static str,
        /// Human-readable detail.
        message: String,
    },
    /// Capacity, lock ownership, uniqueness, or initialization conflict.
    #[error("{operation}: conflict: {message}")]
    Conflict {
        /// Operation that failed.
        operation: &'static str,
        /// Human-readable detail.
        message: String,
    },
    /// Secret encryption or decryption failure.
    #[error("{operation}: encoding error: {message}")]
    Encoding {
        /// Operation that failed.
        operation: &'static str,
        /// Human-readable detail.
        message: String,
    },
    /// Storage engine failure.
    #[error("{operation}: backend error: {message}")]
    Backend {
        /// Operation that failed.
        operation: &'static str,
        /// Human-readable detail.
        message: String,
        /// True when the failure was lock contention and a retry may succeed.
        retryable: bool,
    },
    /// The operation was canceled and rolled back.
    #[error("{operation}: canceled")]
    Canceled {
        /// Operation that was canceled.
        operation: &'static str,
    },
}

impl StoreError {
    /// Builds a [`StoreError::NotFound`].
    #[must_use]
    pub fn not_found(operation: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound {
            operation,
            message: message.into(),
        }
    }

    /// Builds a [`StoreError::InvalidArgument`].
    #[must_use]
    pub fn invalid(operation: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operation,
            message: message.into(),
        }
    }

    /// Builds a [`StoreError::Conflict`].
    #[must_use]
    pub fn conflict(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict {
            operation,
            message: message.into(),
        }
    }

    /// Builds a [`StoreError::Encoding`].
    #[must_use]
    pub fn encoding(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Encoding {
            operation,
            message: message.into(),
        }
    }

    /// Builds a non-retryable [`StoreError::Backend`].
    #[must_use]
    pub fn backend(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            operation,
            message: message.into(),
            retryable: false,
        }
    }

    /// Builds a retryable [`StoreError::Backend`] for lock contention.
    #[must_use]
    pub fn contention(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            operation,
            message: message.into(),
            retryable: true,
        }
    }

    /// Builds a [`StoreError::Canceled`].
    #[must_use]
    pub const fn canceled(operation: &'static str) -> Self {
        Self::Canceled {
            operation,
        }
    }

    /// Returns the stable kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound {
                ..
            } => ErrorKind::NotFound,
            Self::InvalidArgument {
                ..
            } => ErrorKind::InvalidArgument,
            Self::Conflict {
                ..
            } => ErrorKind::Conflict,
            Self::Encoding {
                ..
            } => ErrorKind::Encoding,
            Self::Backend {
                ..
            } => ErrorKind::Backend,
            Self::Canceled {
                ..
            } => ErrorKind::Canceled,
        }
    }

    /// Returns the operation name carried by the error.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::NotFound {
                operation, ..
            }
            | Self::InvalidArgument {
                operation, ..
            }
            | Self::Conflict {
                operation, ..
            }
            | Self::Encoding {
                operation, ..
            }
            | Self::Backend {
                operation, ..
            }
            | Self::Canceled {
                operation,
            } => operation,
        }
    }

    /// Returns true when the caller may retry the operation unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Backend {
                retryable: true,
                ..
            }
        )
    }

    /// Re-attributes the error to another operation, keeping kind and detail.
    #[must_use]
    pub fn with_operation(self, operation: &'static str) -> Self {
        match self {
            Self::NotFound {
                message, ..
            } => Self::NotFound {
                operation,
                message,
            },
            Self::InvalidArgument {
                message, ..
            } => Self::InvalidArgument {
                operation,
                message,
            },
            Self::Conflict {
                message, ..
            } => Self::Conflict {
                operation,
                message,
            },
            Self::Encoding {
                message, ..
            } => Self::Encoding {
                operation,
                message,
            },
            Self::Backend {
                message,
                retryable,
                ..
            } => Self::Backend {
                operation,
                message,
                retryable,
            },
            Self::Canceled {
                ..
            } => Self::Canceled {
                operation,
            },
        }
    }
}

// ============================================================================
// SECTION: Coordination
// ============================================================================

/// Concurrency-sensitive protocol consumed by the autoscaling loop and the
/// webhook ingestors.
///
/// # Invariants
/// - `create_instance` never admits more instances than the parent pool's
///   `max_runners`, regardless of how many callers race.
/// - A job has at most one lock holder at any time.
pub trait RunnerCoordinator {
    /// Creates an instance in a pool after an atomic capacity check.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the pool is at capacity,
    /// [`StoreError::NotFound`] when the pool is absent, and a retryable
    /// [`StoreError::Backend`] on lock contention.
    fn create_instance(
        &self,
        pool_id: &str,
        params: CreateInstanceParams,
    ) -> Result<Instance, StoreError>;

    /// Claims a job for `holder`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown jobs and
    /// [`StoreError::Conflict`] when another holder owns the lock.
    fn lock_job(&self, job_id: i64, holder: &EntityId) -> Result<(), StoreError>;

    /// Releases a job claim held by `holder`; releasing an unlocked job is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when another holder owns the lock.
    fn unlock_job(&self, job_id: i64, holder: &EntityId) -> Result<(), StoreError>;

    /// Inserts or merges a job keyed by its external identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when validation or persistence fails.
    fn create_or_update_job(&self, job: Job) -> Result<Job, StoreError>;

    /// Deletes jobs that left the queued state without ever being linked to
    /// an instance. Returns the number of deleted jobs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn delete_inactionable_jobs(&self) -> Result<u64, StoreError>;
}
