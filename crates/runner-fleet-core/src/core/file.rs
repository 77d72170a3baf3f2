// crates/runner-fleet-core/src/core/file.rs
// ============================================================================
// Module: Runner Fleet File Objects
// Description: Metadata for stored binary payloads.
// Purpose: Describe file objects independently of their immutable blobs.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A file object's metadata is mutable; its payload is written once at
//! creation and never rewritten. File object identifiers are assigned by the
//! database and are always positive.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::owner::require_non_empty;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Metadata of one stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileObject {
    /// Database-assigned identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Content type sniffed from the first bytes.
    pub file_type: String,
    /// Payload size in bytes.
    pub size: u64,
    /// Lowercase hex SHA-256 of the payload.
    pub sha256: String,
    /// Normalized tag set.
    pub tags: Vec<String>,
    /// Creation time in unix milliseconds.
    pub created_at: i64,
    /// Last update time in unix milliseconds.
    pub updated_at: i64,
}

/// Input for creating a file object; the payload travels separately.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreateFileObjectParams {
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Declared payload size; must match the streamed length.
    pub size: u64,
    /// Tags; normalized by the store.
    pub tags: Vec<String>,
}

impl CreateFileObjectParams {
    /// Validates the name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when the name is empty.
    pub fn validate(&self) -> Result<(), StoreError> {
        require_non_empty("create_file_object", "name", &self.name)
    }
}

/// Metadata-only update; `None` leaves a field unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateFileObjectParams {
    /// New display name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// Replacement tag set.
    pub tags: Option<Vec<String>>,
}

impl UpdateFileObjectParams {
    /// Validates supplied fields.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when a supplied name is empty.
    pub fn validate(&self) -> Result<(), StoreError> {
        if let Some(name) = &self.name {
            require_non_empty("update_file_object", "name", name)?;
        }
        Ok(())
    }
}

/// Rejects non-positive file object identifiers.
///
/// # Errors
///
/// Returns [`StoreError::InvalidArgument`] when `id <= 0`.
pub fn validate_file_object_id(operation: &'static str, id: i64) -> Result<(), StoreError> {
    if id <= 0 {
        return Err(StoreError::invalid(operation, format!("invalid file object id: {id}")));
    }
    Ok(())
}
