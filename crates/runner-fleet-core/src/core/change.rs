// crates/runner-fleet-core/src/core/change.rs
// ============================================================================
// Module: Runner Fleet Change Events
// Description: Immutable records of committed mutations.
// Purpose: Carry post-commit entity snapshots to change-bus consumers.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`ChangeEvent`] is built from the state a mutation left behind and is
//! published only after the write committed. Delete events carry the last
//! snapshot of the removed entity. Events are never persisted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Serialize;

use crate::core::controller::ControllerInfo;
use crate::core::file::FileObject;
use crate::core::identifiers::EntityId;
use crate::core::identifiers::OwnerKind;
use crate::core::identifiers::OwnerRef;
use crate::core::instance::Instance;
use crate::core::job::Job;
use crate::core::job::JobStatus;
use crate::core::owner::Credentials;
use crate::core::owner::Owner;
use crate::core::pool::Pool;
use crate::core::pool::ScaleSet;

// ============================================================================
// SECTION: Tags
// ============================================================================

/// Kind of entity an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Repository owner.
    Repository,
    /// Organization owner.
    Organization,
    /// Enterprise owner.
    Enterprise,
    /// Credentials record.
    Credentials,
    /// Pool.
    Pool,
    /// Scale set.
    ScaleSet,
    /// Instance.
    Instance,
    /// Job.
    Job,
    /// Controller singleton.
    Controller,
    /// File object.
    FileObject,
}

impl EntityType {
    /// Returns the event entity type for an owner kind.
    #[must_use]
    pub const fn for_owner(kind: OwnerKind) -> Self {
        match kind {
            OwnerKind::Repository => Self::Repository,
            OwnerKind::Organization => Self::Organization,
            OwnerKind::Enterprise => Self::Enterprise,
        }
    }

    /// Returns a stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Organization => "organization",
            Self::Enterprise => "enterprise",
            Self::Credentials => "credentials",
            Self::Pool => "pool",
            Self::ScaleSet => "scale_set",
            Self::Instance => "instance",
            Self::Job => "job",
            Self::Controller => "controller",
            Self::FileObject => "file_object",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Entity created.
    Create,
    /// Entity updated.
    Update,
    /// Entity deleted.
    Delete,
}

impl Operation {
    /// Returns a stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Events
// ============================================================================

/// Entity snapshot carried by an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "entity", rename_all = "snake_case")]
pub enum ChangePayload {
    /// Owner snapshot.
    Owner(Owner),
    /// Credentials snapshot.
    Credentials(Credentials),
    /// Pool snapshot.
    Pool(Pool),
    /// Scale set snapshot.
    ScaleSet(ScaleSet),
    /// Instance snapshot.
    Instance(Instance),
    /// Job snapshot.
    Job(Job),
    /// Controller snapshot.
    Controller(ControllerInfo),
    /// File object snapshot.
    FileObject(FileObject),
}

impl ChangePayload {
    /// Returns the entity type of the snapshot.
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::Owner(owner) => EntityType::for_owner(owner.kind),
            Self::Credentials(_) => EntityType::Credentials,
            Self::Pool(_) => EntityType::Pool,
            Self::ScaleSet(_) => EntityType::ScaleSet,
            Self::Instance(_) => EntityType::Instance,
            Self::Job(_) => EntityType::Job,
            Self::Controller(_) => EntityType::Controller,
            Self::FileObject(_) => EntityType::FileObject,
        }
    }
}

/// One committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    /// Entity type, derived from the payload.
    pub entity_type: EntityType,
    /// Mutation kind.
    pub operation: Operation,
    /// Post-mutation snapshot, or the last snapshot for deletes.
    pub payload: ChangePayload,
}

impl ChangeEvent {
    /// Builds an event from a mutation kind and snapshot.
    #[must_use]
    pub fn new(operation: Operation, payload: ChangePayload) -> Self {
        Self {
            entity_type: payload.entity_type(),
            operation,
            payload,
        }
    }

    /// Returns the owners the changed entity belongs to or is visible to.
    #[must_use]
    pub fn owners(&self) -> Vec<OwnerRef> {
        match &self.payload {
            ChangePayload::Owner(owner) => vec![owner.owner_ref()],
            ChangePayload::Pool(pool) => vec![pool.owner],
            ChangePayload::ScaleSet(scale_set) => vec![scale_set.owner],
            ChangePayload::Job(job) => job.owners(),
            ChangePayload::Credentials(_)
            | ChangePayload::Instance(_)
            | ChangePayload::Controller(_)
            | ChangePayload::FileObject(_) => Vec::new(),
        }
    }

    /// Returns the pool the changed entity is, or belongs to.
    #[must_use]
    pub const fn pool_id(&self) -> Option<EntityId> {
        match &self.payload {
            ChangePayload::Pool(pool) => Some(pool.id),
            ChangePayload::Instance(instance) => instance.parent.pool_id(),
            _ => None,
        }
    }

    /// Returns the job status when the event describes a job.
    #[must_use]
    pub const fn job_status(&self) -> Option<JobStatus> {
        match &self.payload {
            ChangePayload::Job(job) => Some(job.status),
            _ => None,
        }
    }
}
