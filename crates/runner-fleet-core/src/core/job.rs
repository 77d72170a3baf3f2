// crates/runner-fleet-core/src/core/job.rs
// ============================================================================
// Module: Runner Fleet Jobs
// Description: Externally observed workflow jobs and their merge rule.
// Purpose: Model job lifecycle, claims, and owner visibility.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A job is keyed by the forge's own job identifier. Webhook deliveries upsert
//! it; [`Job::merge_from`] defines how a delivery folds into the stored row.
//! The three owner columns are independent: a job announced to a repository
//! and later to its organization stays visible to both.
//!
//! ## Invariants
//! - A single delivery names at most one owner.
//! - Empty incoming values never erase stored ones.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::EntityId;
use crate::core::identifiers::OwnerKind;
use crate::core::identifiers::OwnerRef;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Job lifecycle as reported by the forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a runner.
    #[default]
    Queued,
    /// Running on a runner.
    InProgress,
    /// Finished.
    Completed,
}

impl JobStatus {
    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    /// Parses a stored label.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for unknown labels.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => {
                Err(StoreError::invalid("parse_job_status", format!("unknown job status: {other}")))
            }
        }
    }
}

// ============================================================================
// SECTION: Job
// ============================================================================

/// One workflow job observed through webhooks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Job {
    /// External job identifier.
    pub id: i64,
    /// External workflow run identifier.
    pub run_id: i64,
    /// Last webhook action name.
    pub action: String,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Final conclusion once completed.
    pub conclusion: String,
    /// Job display name.
    pub name: String,
    /// Repository the workflow runs in.
    pub repository_name: String,
    /// Owner of that repository.
    pub repository_owner: String,
    /// Labels requested by the job.
    pub labels: Vec<String>,
    /// Name of the runner that picked up the job.
    pub runner_name: String,
    /// Runner group of that runner.
    pub runner_group_name: String,
    /// Instance servicing the job, resolved from `runner_name`.
    pub instance_id: Option<EntityId>,
    /// Repository the job is visible to.
    pub repo_id: Option<EntityId>,
    /// Organization the job is visible to.
    pub org_id: Option<EntityId>,
    /// Enterprise the job is visible to.
    pub enterprise_id: Option<EntityId>,
    /// Current exclusive claim holder.
    pub locked_by: Option<EntityId>,
    /// Start time in unix milliseconds.
    pub started_at: Option<i64>,
    /// Completion time in unix milliseconds.
    pub completed_at: Option<i64>,
    /// Creation time in unix milliseconds.
    pub created_at: i64,
    /// Last update time in unix milliseconds.
    pub updated_at: i64,
}

impl Job {
    /// Creates a job with the given identifier and status.
    #[must_use]
    pub fn new(id: i64, status: JobStatus) -> Self {
        Self {
            id,
            status,
            ..Self::default()
        }
    }

    /// Returns the job with `owner` set as its visibility owner.
    #[must_use]
    pub fn with_owner(mut self, owner: OwnerRef) -> Self {
        match owner.kind {
            OwnerKind::Repository => self.repo_id = Some(owner.id),
            OwnerKind::Organization => self.org_id = Some(owner.id),
            OwnerKind::Enterprise => self.enterprise_id = Some(owner.id),
        }
        self
    }

    /// Returns every owner the job is visible to.
    #[must_use]
    pub fn owners(&self) -> Vec<OwnerRef> {
        let mut owners = Vec::new();
        if let Some(id) = self.repo_id {
            owners.push(OwnerRef::repository(id));
        }
        if let Some(id) = self.org_id {
            owners.push(OwnerRef::organization(id));
        }
        if let Some(id) = self.enterprise_id {
            owners.push(OwnerRef::enterprise(id));
        }
        owners
    }

    /// Validates an incoming delivery.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for non-positive identifiers or
    /// when the delivery names more than one owner.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.id <= 0 {
            return Err(StoreError::invalid("create_or_update_job", "job id must be positive"));
        }
        if self.owners().len() > 1 {
            return Err(StoreError::invalid(
                "create_or_update_job",
                "a job delivery may reference at most one owner",
            ));
        }
        Ok(())
    }

    /// Folds an incoming delivery into this stored job.
    ///
    /// Status always follows the delivery. Strings, labels, timestamps, and
    /// owner links follow it only when non-empty. The lock holder changes
    /// only when the delivery names a holder.
    pub fn merge_from(&mut self, incoming: &Self) {
        self.status = incoming.status;
        merge_string(&mut self.action, &incoming.action);
        merge_string(&mut self.conclusion, &incoming.conclusion);
        merge_string(&mut self.name, &incoming.name);
        merge_string(&mut self.repository_name, &incoming.repository_name);
        merge_string(&mut self.repository_owner, &incoming.repository_owner);
        merge_string(&mut self.runner_name, &incoming.runner_name);
        merge_string(&mut self.runner_group_name, &incoming.runner_group_name);
        if incoming.run_id != 0 {
            self.run_id = incoming.run_id;
        }
        if !incoming.labels.is_empty() {
            self.labels.clone_from(&incoming.labels);
        }
        merge_option(&mut self.instance_id, incoming.instance_id);
        merge_option(&mut self.repo_id, incoming.repo_id);
        merge_option(&mut self.org_id, incoming.org_id);
        merge_option(&mut self.enterprise_id, incoming.enterprise_id);
        merge_option(&mut self.locked_by, incoming.locked_by);
        merge_option(&mut self.started_at, incoming.started_at);
        merge_option(&mut self.completed_at, incoming.completed_at);
    }
}

/// Replaces `current` when `incoming` is non-empty.
fn merge_string(current: &mut String, incoming: &str) {
    if !incoming.is_empty() {
        incoming.clone_into(current);
    }
}

/// Replaces `current` when `incoming` is set.
fn merge_option<T>(current: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *current = incoming;
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests unwrap deterministic fixtures.")]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_existing_values_for_empty_input() {
        let holder = EntityId::generate();
        let mut stored = Job {
            conclusion: String::new(),
            runner_name: "runner-1".to_string(),
            labels: vec!["linux".to_string()],
            locked_by: Some(holder),
            ..Job::new(7, JobStatus::Queued)
        };
        let incoming = Job {
            conclusion: "success".to_string(),
            ..Job::new(7, JobStatus::Completed)
        };
        stored.merge_from(&incoming);
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.conclusion, "success");
        assert_eq!(stored.runner_name, "runner-1");
        assert_eq!(stored.labels, vec!["linux".to_string()]);
        assert_eq!(stored.locked_by, Some(holder));
    }

    #[test]
    fn deliveries_accumulate_owner_links() {
        let repo = OwnerRef::repository(EntityId::generate());
        let org = OwnerRef::organization(EntityId::generate());
        let mut stored = Job::new(1, JobStatus::Queued).with_owner(repo);
        stored.merge_from(&Job::new(1, JobStatus::Queued).with_owner(org));
        assert_eq!(stored.owners(), vec![repo, org]);
    }

    #[test]
    fn delivery_naming_two_owners_is_invalid() {
        let job = Job::new(1, JobStatus::Queued)
            .with_owner(OwnerRef::repository(EntityId::generate()))
            .with_owner(OwnerRef::enterprise(EntityId::generate()));
        assert!(job.validate().is_err());
        assert!(Job::new(0, JobStatus::Queued).validate().is_err());
        Job::new(3, JobStatus::Queued).validate().unwrap();
    }
}
