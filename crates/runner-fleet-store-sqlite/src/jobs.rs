// crates/runner-fleet-store-sqlite/src/jobs.rs
// ============================================================================
// Module: SQLite Jobs
// Description: Job upserts, exclusive claims, and reconciliation sweeps.
// Purpose: Implement the job half of the runner coordination protocol.
// Dependencies: runner-fleet-core, rusqlite, serde_json, tracing
// ============================================================================

//! ## Overview
//! Jobs are keyed by the forge's job id. Every claim and upsert runs inside
//! an `IMMEDIATE` transaction, so the read of `locked_by` and the write that
//! follows cannot interleave with another writer.
//!
//! Events are emitted only for real changes: re-locking by the current holder
//! and unlocking an unlocked job commit nothing and publish nothing. Sweeps
//! publish one delete event per removed job.

// ============================================================================
// SECTION: Imports
// ============================================================================

use runner_fleet_core::ChangePayload;
use runner_fleet_core::CreateInstanceParams;
use runner_fleet_core::EntityId;
use runner_fleet_core::Instance;
use runner_fleet_core::Job;
use runner_fleet_core::JobStatus;
use runner_fleet_core::Operation;
use runner_fleet_core::OwnerRef;
use runner_fleet_core::Page;
use runner_fleet_core::PageRequest;
use runner_fleet_core::RunnerCoordinator;
use runner_fleet_core::StoreError;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use tracing::debug;

use crate::instances::instance_id_by_name;
use crate::owners::owner_column;
use crate::owners::require_owner;
use crate::pools::stored_label;
use crate::store::SqliteStore;
use crate::store::column_opt_id;
use crate::store::db_error;
use crate::store::read_page;
use crate::store::unix_millis;

// ============================================================================
// SECTION: Rows
// ============================================================================

/// Column list matching [`read_job_row`].
const JOB_COLUMNS: &str = "id, run_id, action, status, conclusion, name, repository_name, \
     repository_owner, labels, runner_name, runner_group_name, instance_id, repo_id, org_id, \
     enterprise_id, locked_by, started_at, completed_at, created_at, updated_at";

/// Job columns as stored.
struct JobRow {
    /// External job id.
    id: i64,
    /// Workflow run id.
    run_id: i64,
    /// Last webhook action.
    action: String,
    /// Status label.
    status: String,
    /// Conclusion.
    conclusion: String,
    /// Job name.
    name: String,
    /// Repository name.
    repository_name: String,
    /// Repository owner.
    repository_owner: String,
    /// Labels as a JSON array.
    labels: String,
    /// Runner name.
    runner_name: String,
    /// Runner group name.
    runner_group_name: String,
    /// Linked instance.
    instance_id: Option<String>,
    /// Repository owner link.
    repo_id: Option<String>,
    /// Organization owner link.
    org_id: Option<String>,
    /// Enterprise owner link.
    enterprise_id: Option<String>,
    /// Lock holder.
    locked_by: Option<String>,
    /// Start time.
    started_at: Option<i64>,
    /// Completion time.
    completed_at: Option<i64>,
    /// Creation time.
    created_at: i64,
    /// Update time.
    updated_at: i64,
}

/// Reads one job row.
fn read_job_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        run_id: row.get(1)?,
        action: row.get(2)?,
        status: row.get(3)?,
        conclusion: row.get(4)?,
        name: row.get(5)?,
        repository_name: row.get(6)?,
        repository_owner: row.get(7)?,
        labels: row.get(8)?,
        runner_name: row.get(9)?,
        runner_group_name: row.get(10)?,
        instance_id: row.get(11)?,
        repo_id: row.get(12)?,
        org_id: row.get(13)?,
        enterprise_id: row.get(14)?,
        locked_by: row.get(15)?,
        started_at: row.get(16)?,
        completed_at: row.get(17)?,
        created_at: row.get(18)?,
        updated_at: row.get(19)?,
    })
}

/// Converts a job row into a [`Job`].
fn job_from_row(operation: &'static str, row: JobRow) -> Result<Job, StoreError> {
    let labels: Vec<String> = serde_json::from_str(&row.labels)
        .map_err(|err| StoreError::backend(operation, format!("stored labels are invalid: {err}")))?;
    Ok(Job {
        id: row.id,
        run_id: row.run_id,
        action: row.action,
        status: stored_label(operation, &row.status, JobStatus::parse)?,
        conclusion: row.conclusion,
        name: row.name,
        repository_name: row.repository_name,
        repository_owner: row.repository_owner,
        labels,
        runner_name: row.runner_name,
        runner_group_name: row.runner_group_name,
        instance_id: column_opt_id(operation, row.instance_id.as_deref())?,
        repo_id: column_opt_id(operation, row.repo_id.as_deref())?,
        org_id: column_opt_id(operation, row.org_id.as_deref())?,
        enterprise_id: column_opt_id(operation, row.enterprise_id.as_deref())?,
        locked_by: column_opt_id(operation, row.locked_by.as_deref())?,
        started_at: row.started_at,
        completed_at: row.completed_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

/// Loads one job, if present.
fn find_job(
    connection: &Connection,
    operation: &'static str,
    job_id: i64,
) -> Result<Option<Job>, StoreError> {
    connection
        .query_row(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"), params![job_id], read_job_row)
        .optional()
        .map_err(|err| db_error(operation, &err))?
        .map(|row| job_from_row(operation, row))
        .transpose()
}

/// Loads one job or fails with [`StoreError::NotFound`].
fn load_job(connection: &Connection, operation: &'static str, job_id: i64) -> Result<Job, StoreError> {
    find_job(connection, operation, job_id)?
        .ok_or_else(|| StoreError::not_found(operation, format!("job not found: {job_id}")))
}

/// Runs a job query with positional text and integer parameters.
fn query_jobs(
    connection: &Connection,
    operation: &'static str,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Job>, StoreError> {
    let mut stmt = connection.prepare(sql).map_err(|err| db_error(operation, &err))?;
    let rows = stmt
        .query_map(params, read_job_row)
        .map_err(|err| db_error(operation, &err))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| db_error(operation, &err))?;
    rows.into_iter().map(|row| job_from_row(operation, row)).collect()
}

/// Writes every mutable column of `job`.
fn write_job(
    connection: &Connection,
    operation: &'static str,
    job: &Job,
    insert: bool,
) -> Result<(), StoreError> {
    let labels = serde_json::to_string(&job.labels)
        .map_err(|err| StoreError::invalid(operation, format!("labels are not serializable: {err}")))?;
    let sql = if insert {
        format!(
            "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, \
             ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
        )
    } else {
        "UPDATE jobs SET run_id = ?2, action = ?3, status = ?4, conclusion = ?5, name = ?6, \
         repository_name = ?7, repository_owner = ?8, labels = ?9, runner_name = ?10, \
         runner_group_name = ?11, instance_id = ?12, repo_id = ?13, org_id = ?14, \
         enterprise_id = ?15, locked_by = ?16, started_at = ?17, completed_at = ?18, \
         created_at = ?19, updated_at = ?20 WHERE id = ?1"
            .to_string()
    };
    connection
        .execute(
            &sql,
            params![
                job.id,
                job.run_id,
                job.action,
                job.status.as_str(),
                job.conclusion,
                job.name,
                job.repository_name,
                job.repository_owner,
                labels,
                job.runner_name,
                job.runner_group_name,
                job.instance_id.map(|id| id.to_key()),
                job.repo_id.map(|id| id.to_key()),
                job.org_id.map(|id| id.to_key()),
                job.enterprise_id.map(|id| id.to_key()),
                job.locked_by.map(|id| id.to_key()),
                job.started_at,
                job.completed_at,
                job.created_at,
                job.updated_at
            ],
        )
        .map_err(|err| db_error(operation, &err))?;
    Ok(())
}

/// Rejects non-positive job ids.
fn validate_job_id(operation: &'static str, job_id: i64) -> Result<(), StoreError> {
    if job_id <= 0 {
        return Err(StoreError::invalid(operation, format!("invalid job id: {job_id}")));
    }
    Ok(())
}

// ============================================================================
// SECTION: Claims
// ============================================================================

impl SqliteStore {
    /// Claims a job for `holder`; re-locking by the same holder is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown jobs and
    /// [`StoreError::Conflict`] when another holder owns the lock.
    pub fn lock_job(&self, job_id: i64, holder: &EntityId) -> Result<(), StoreError> {
        let op = "lock_job";
        validate_job_id(op, job_id)?;
        let locked = self.write_tx(op, |tx| {
            let mut job = load_job(tx, op, job_id)?;
            match job.locked_by {
                Some(current) if current == *holder => return Ok(None),
                Some(_) => return Err(StoreError::conflict(op, "job is locked by another entity")),
                None => {}
            }
            job.locked_by = Some(*holder);
            job.updated_at = unix_millis();
            tx.execute(
                "UPDATE jobs SET locked_by = ?1, updated_at = ?2 WHERE id = ?3",
                params![holder.to_key(), job.updated_at, job_id],
            )
            .map_err(|err| db_error(op, &err))?;
            Ok(Some(job))
        })?;
        if let Some(job) = locked {
            debug!(job_id, holder = %holder, "locked job");
            self.publish(Operation::Update, ChangePayload::Job(job));
        }
        Ok(())
    }

    /// Releases a claim held by `holder`; unlocking an unlocked job is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown jobs and
    /// [`StoreError::Conflict`] when another holder owns the lock.
    pub fn unlock_job(&self, job_id: i64, holder: &EntityId) -> Result<(), StoreError> {
        let op = "unlock_job";
        validate_job_id(op, job_id)?;
        let unlocked = self.write_tx(op, |tx| {
            let mut job = load_job(tx, op, job_id)?;
            match job.locked_by {
                None => return Ok(None),
                Some(current) if current != *holder => {
                    return Err(StoreError::conflict(op, "job is locked by another entity"));
                }
                Some(_) => {}
            }
            job.locked_by = None;
            job.updated_at = unix_millis();
            tx.execute(
                "UPDATE jobs SET locked_by = NULL, updated_at = ?1 WHERE id = ?2",
                params![job.updated_at, job_id],
            )
            .map_err(|err| db_error(op, &err))?;
            Ok(Some(job))
        })?;
        if let Some(job) = unlocked {
            debug!(job_id, holder = %holder, "unlocked job");
            self.publish(Operation::Update, ChangePayload::Job(job));
        }
        Ok(())
    }

    /// Clears any claim on a job that is still queued.
    ///
    /// Jobs that moved past queued, or carry no claim, are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown jobs.
    pub fn break_lock_job_is_queued(&self, job_id: i64) -> Result<(), StoreError> {
        let op = "break_lock_job_is_queued";
        validate_job_id(op, job_id)?;
        let broken = self.write_tx(op, |tx| {
            let mut job = load_job(tx, op, job_id)?;
            if job.status != JobStatus::Queued || job.locked_by.is_none() {
                return Ok(None);
            }
            job.locked_by = None;
            job.updated_at = unix_millis();
            tx.execute(
                "UPDATE jobs SET locked_by = NULL, updated_at = ?1 WHERE id = ?2",
                params![job.updated_at, job_id],
            )
            .map_err(|err| db_error(op, &err))?;
            Ok(Some(job))
        })?;
        if let Some(job) = broken {
            debug!(job_id, "broke lock on queued job");
            self.publish(Operation::Update, ChangePayload::Job(job));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Upsert
    // ------------------------------------------------------------------------

    /// Inserts a job or merges a delivery into the stored row.
    ///
    /// Empty incoming fields keep stored values; the lock holder is kept
    /// unless the delivery names one. When an instance is named after the
    /// job's runner, the job is linked to it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for a bad id or several owners
    /// and [`StoreError::NotFound`] when the named owner is absent.
    pub fn create_or_update_job(&self, job: Job) -> Result<Job, StoreError> {
        let op = "create_or_update_job";
        job.validate().map_err(|err| err.with_operation(op))?;
        let (stored, operation) = self.write_tx(op, |tx| {
            for owner in job.owners() {
                require_owner(tx, op, &owner)?;
            }
            let mut incoming = job;
            if incoming.instance_id.is_none() && !incoming.runner_name.is_empty() {
                incoming.instance_id = instance_id_by_name(tx, op, &incoming.runner_name)?
                    .map(|id| EntityId::parse(&id))
                    .transpose()
                    .map_err(|err| StoreError::backend(op, err.to_string()))?;
            }
            let now = unix_millis();
            match find_job(tx, op, incoming.id)? {
                Some(mut current) => {
                    current.merge_from(&incoming);
                    current.updated_at = now;
                    write_job(tx, op, &current, false)?;
                    Ok((current, Operation::Update))
                }
                None => {
                    incoming.created_at = now;
                    incoming.updated_at = now;
                    write_job(tx, op, &incoming, true)?;
                    Ok((incoming, Operation::Create))
                }
            }
        })?;
        debug!(job_id = stored.id, status = stored.status.as_str(), %operation, "upserted job");
        self.publish(operation, ChangePayload::Job(stored.clone()));
        Ok(stored)
    }

    // ------------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------------

    /// Deletes jobs that left the queued state without an instance.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    pub fn delete_inactionable_jobs(&self) -> Result<u64, StoreError> {
        self.delete_jobs_where(
            "delete_inactionable_jobs",
            "status <> 'queued' AND instance_id IS NULL",
        )
    }

    /// Deletes every completed job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    pub fn delete_completed_jobs(&self) -> Result<u64, StoreError> {
        self.delete_jobs_where("delete_completed_jobs", "status = 'completed'")
    }

    /// Deletes one job; absent jobs are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for a non-positive id.
    pub fn delete_job(&self, job_id: i64) -> Result<(), StoreError> {
        let op = "delete_job";
        validate_job_id(op, job_id)?;
        let deleted = self.write_tx(op, |tx| {
            let Some(job) = find_job(tx, op, job_id)? else {
                return Ok(None);
            };
            tx.execute("DELETE FROM jobs WHERE id = ?1", params![job_id])
                .map_err(|err| db_error(op, &err))?;
            Ok(Some(job))
        })?;
        if let Some(job) = deleted {
            debug!(job_id, "deleted job");
            self.publish(Operation::Delete, ChangePayload::Job(job));
        }
        Ok(())
    }

    /// Deletes every job matching `predicate` and publishes one event each.
    fn delete_jobs_where(&self, operation: &'static str, predicate: &str) -> Result<u64, StoreError> {
        let deleted = self.write_tx(operation, |tx| {
            let jobs = query_jobs(
                tx,
                operation,
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE {predicate} ORDER BY id"),
                [],
            )?;
            tx.execute(&format!("DELETE FROM jobs WHERE {predicate}"), [])
                .map_err(|err| db_error(operation, &err))?;
            Ok(jobs)
        })?;
        let count = u64::try_from(deleted.len()).unwrap_or(u64::MAX);
        if count > 0 {
            debug!(operation, count, "swept jobs");
        }
        for job in deleted {
            self.publish(Operation::Delete, ChangePayload::Job(job));
        }
        Ok(count)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Returns a job by its external id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for a non-positive id and
    /// [`StoreError::NotFound`] when absent.
    pub fn get_job(&self, job_id: i64) -> Result<Job, StoreError> {
        let op = "get_job";
        validate_job_id(op, job_id)?;
        self.read(op, |connection| load_job(connection, op, job_id))
    }

    /// Returns one page of jobs ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn list_jobs(&self, request: PageRequest) -> Result<Page<Job>, StoreError> {
        let op = "list_jobs";
        self.job_page(op, "1 = 1", Vec::new(), request)
    }

    /// Returns one page of jobs with the given status, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn list_jobs_by_status(
        &self,
        status: JobStatus,
        request: PageRequest,
    ) -> Result<Page<Job>, StoreError> {
        let op = "list_jobs_by_status";
        self.job_page(op, "status = ?", vec![Value::Text(status.as_str().to_string())], request)
    }

    /// Returns one page of the jobs visible to one owner with the given status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn list_owner_jobs_by_status(
        &self,
        owner: &OwnerRef,
        status: JobStatus,
        request: PageRequest,
    ) -> Result<Page<Job>, StoreError> {
        let op = "list_owner_jobs_by_status";
        self.job_page(
            op,
            &format!("{} = ? AND status = ?", owner_column(owner.kind)),
            vec![Value::Text(owner.id.to_key()), Value::Text(status.as_str().to_string())],
            request,
        )
    }

    /// Counts and fetches one page of jobs matching `predicate`.
    fn job_page(
        &self,
        operation: &'static str,
        predicate: &str,
        values: Vec<Value>,
        request: PageRequest,
    ) -> Result<Page<Job>, StoreError> {
        self.read(operation, |connection| {
            read_page(
                connection,
                operation,
                &format!("SELECT COUNT(*) FROM jobs WHERE {predicate}"),
                values,
                request,
                |paged| {
                    query_jobs(
                        connection,
                        operation,
                        &format!(
                            "SELECT {JOB_COLUMNS} FROM jobs WHERE {predicate} \
                             ORDER BY id LIMIT ? OFFSET ?"
                        ),
                        params_from_iter(paged),
                    )
                },
            )
        })
    }
}

// ============================================================================
// SECTION: Coordinator
// ============================================================================

impl RunnerCoordinator for SqliteStore {
    fn create_instance(
        &self,
        pool_id: &str,
        params: CreateInstanceParams,
    ) -> Result<Instance, StoreError> {
        Self::create_instance(self, pool_id, params)
    }

    fn lock_job(&self, job_id: i64, holder: &EntityId) -> Result<(), StoreError> {
        Self::lock_job(self, job_id, holder)
    }

    fn unlock_job(&self, job_id: i64, holder: &EntityId) -> Result<(), StoreError> {
        Self::unlock_job(self, job_id, holder)
    }

    fn create_or_update_job(&self, job: Job) -> Result<Job, StoreError> {
        Self::create_or_update_job(self, job)
    }

    fn delete_inactionable_jobs(&self) -> Result<u64, StoreError> {
        Self::delete_inactionable_jobs(self)
    }
}
