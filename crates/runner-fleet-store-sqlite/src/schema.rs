// crates/runner-fleet-store-sqlite/src/schema.rs
// ============================================================================
// Module: SQLite Fleet Schema
// Description: Table definitions and the startup schema evolution pipeline.
// Purpose: Bring any earlier database up to the current shape, idempotently.
// Dependencies: rusqlite, tracing
// ============================================================================

//! ## Overview
//! Schema history:
//! - v1: instances belong to pools only; no generation counters, no job locks.
//! - v2: `generation` on pools and instances, `locked_by` on jobs.
//! - v3: scale sets; `instances` rebuilt with a nullable `pool_id` and a
//!   `scale_set_id`, exactly one of which is set.
//!
//! The pipeline never trusts the version row to decide what to do. Each step
//! inspects `PRAGMA table_info` and skips itself when already applied, so a
//! rerun after a crash picks up where the previous run stopped. `SQLite`
//! cannot relax a `NOT NULL` column in place, so the v3 step renames the old
//! table, creates the new one, copies the shared columns, and drops the old
//! table inside one transaction. A leftover `instances_old` table from an
//! interrupted run is moved back before anything else happens.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use runner_fleet_core::StoreError;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use tracing::debug;
use tracing::warn;

use crate::store::db_error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 3;

/// Operation name used for schema errors.
const OPERATION: &str = "initialize_schema";

/// Current table shapes; every statement is idempotent.
const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS credentials (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    auth_type TEXT NOT NULL,
    secret BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS repositories (
    id TEXT PRIMARY KEY,
    namespace TEXT NOT NULL,
    name TEXT NOT NULL,
    credentials_id TEXT NOT NULL REFERENCES credentials(id),
    webhook_secret BLOB NOT NULL,
    pool_balancer TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (namespace, name)
);
CREATE TABLE IF NOT EXISTS organizations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    credentials_id TEXT NOT NULL REFERENCES credentials(id),
    webhook_secret BLOB NOT NULL,
    pool_balancer TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS enterprises (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    credentials_id TEXT NOT NULL REFERENCES credentials(id),
    webhook_secret BLOB NOT NULL,
    pool_balancer TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS pools (
    id TEXT PRIMARY KEY,
    repo_id TEXT REFERENCES repositories(id) ON DELETE CASCADE,
    org_id TEXT REFERENCES organizations(id) ON DELETE CASCADE,
    enterprise_id TEXT REFERENCES enterprises(id) ON DELETE CASCADE,
    provider_name TEXT NOT NULL,
    image TEXT NOT NULL,
    flavor TEXT NOT NULL,
    os_type TEXT NOT NULL,
    os_arch TEXT NOT NULL,
    enabled INTEGER NOT NULL,
    max_runners INTEGER NOT NULL,
    min_idle_runners INTEGER NOT NULL,
    runner_prefix TEXT NOT NULL,
    runner_bootstrap_timeout INTEGER NOT NULL,
    priority INTEGER NOT NULL,
    extra_specs TEXT,
    generation INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS pool_tags (
    pool_id TEXT NOT NULL REFERENCES pools(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (pool_id, tag)
);
CREATE TABLE IF NOT EXISTS scale_sets (
    id TEXT PRIMARY KEY,
    repo_id TEXT REFERENCES repositories(id) ON DELETE CASCADE,
    org_id TEXT REFERENCES organizations(id) ON DELETE CASCADE,
    enterprise_id TEXT REFERENCES enterprises(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    provider_name TEXT NOT NULL,
    image TEXT NOT NULL,
    flavor TEXT NOT NULL,
    os_type TEXT NOT NULL,
    os_arch TEXT NOT NULL,
    enabled INTEGER NOT NULL,
    max_runners INTEGER NOT NULL,
    min_idle_runners INTEGER NOT NULL,
    runner_prefix TEXT NOT NULL,
    generation INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS instances (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    pool_id TEXT REFERENCES pools(id) ON DELETE CASCADE,
    scale_set_id TEXT REFERENCES scale_sets(id) ON DELETE CASCADE,
    provider_id TEXT,
    agent_id INTEGER,
    os_type TEXT NOT NULL,
    os_arch TEXT NOT NULL,
    os_name TEXT,
    os_version TEXT,
    status TEXT NOT NULL,
    runner_status TEXT NOT NULL,
    create_attempt INTEGER NOT NULL DEFAULT 0,
    token_fetched INTEGER NOT NULL DEFAULT 0,
    jit_configuration BLOB,
    generation INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK ((pool_id IS NULL) <> (scale_set_id IS NULL))
);
CREATE TABLE IF NOT EXISTS addresses (
    instance_id TEXT NOT NULL REFERENCES instances(id) ON DELETE CASCADE,
    address TEXT NOT NULL,
    kind TEXT NOT NULL,
    PRIMARY KEY (instance_id, address)
);
CREATE TABLE IF NOT EXISTS instance_status_updates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    instance_id TEXT NOT NULL REFERENCES instances(id) ON DELETE CASCADE,
    message TEXT NOT NULL,
    event_type TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY,
    run_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    status TEXT NOT NULL,
    conclusion TEXT NOT NULL,
    name TEXT NOT NULL,
    repository_name TEXT NOT NULL,
    repository_owner TEXT NOT NULL,
    labels TEXT NOT NULL,
    runner_name TEXT NOT NULL,
    runner_group_name TEXT NOT NULL,
    instance_id TEXT REFERENCES instances(id) ON DELETE SET NULL,
    repo_id TEXT REFERENCES repositories(id) ON DELETE SET NULL,
    org_id TEXT REFERENCES organizations(id) ON DELETE SET NULL,
    enterprise_id TEXT REFERENCES enterprises(id) ON DELETE SET NULL,
    locked_by TEXT,
    started_at INTEGER,
    completed_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS controller_info (
    singleton INTEGER PRIMARY KEY CHECK (singleton = 1),
    controller_id TEXT NOT NULL,
    minimum_job_age_backoff INTEGER NOT NULL,
    callback_url TEXT,
    metadata_url TEXT,
    webhook_url TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS file_objects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    file_type TEXT NOT NULL,
    size INTEGER NOT NULL,
    sha256 TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS file_object_tags (
    file_object_id INTEGER NOT NULL REFERENCES file_objects(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (file_object_id, tag)
);
CREATE TABLE IF NOT EXISTS file_blobs (
    file_object_id INTEGER PRIMARY KEY REFERENCES file_objects(id) ON DELETE CASCADE,
    content BLOB NOT NULL
);
";

/// Current `instances` shape, used by the rebuild step.
const CREATE_INSTANCES: &str = "
CREATE TABLE instances (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    pool_id TEXT REFERENCES pools(id) ON DELETE CASCADE,
    scale_set_id TEXT REFERENCES scale_sets(id) ON DELETE CASCADE,
    provider_id TEXT,
    agent_id INTEGER,
    os_type TEXT NOT NULL,
    os_arch TEXT NOT NULL,
    os_name TEXT,
    os_version TEXT,
    status TEXT NOT NULL,
    runner_status TEXT NOT NULL,
    create_attempt INTEGER NOT NULL DEFAULT 0,
    token_fetched INTEGER NOT NULL DEFAULT 0,
    jit_configuration BLOB,
    generation INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK ((pool_id IS NULL) <> (scale_set_id IS NULL))
);";

/// Indexes; created after every structural step.
const CREATE_INDEXES: &str = "
CREATE INDEX IF NOT EXISTS idx_pools_repo ON pools (repo_id);
CREATE INDEX IF NOT EXISTS idx_pools_org ON pools (org_id);
CREATE INDEX IF NOT EXISTS idx_pools_enterprise ON pools (enterprise_id);
CREATE INDEX IF NOT EXISTS idx_pool_tags_tag ON pool_tags (tag);
CREATE INDEX IF NOT EXISTS idx_instances_pool ON instances (pool_id);
CREATE INDEX IF NOT EXISTS idx_instances_scale_set ON instances (scale_set_id);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status);
CREATE INDEX IF NOT EXISTS idx_jobs_instance ON jobs (instance_id);
CREATE INDEX IF NOT EXISTS idx_file_object_tags_tag ON file_object_tags (tag);
";

/// Columns added in place by the v2 step: `(table, column, definition)`.
const ADDED_COLUMNS: [(&str, &str, &str); 3] = [
    ("pools", "generation", "INTEGER NOT NULL DEFAULT 0"),
    ("instances", "generation", "INTEGER NOT NULL DEFAULT 0"),
    ("jobs", "locked_by", "TEXT"),
];

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Creates or evolves the schema to [`SCHEMA_VERSION`].
///
/// # Errors
///
/// Returns [`StoreError::Backend`] when the database is newer than this
/// build or any step fails.
pub fn initialize_schema(connection: &mut Connection) -> Result<(), StoreError> {
    connection
        .execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| db_error(OPERATION, &err))?;
    let version = stored_version(connection)?;
    if let Some(version) = version
        && version > SCHEMA_VERSION
    {
        return Err(StoreError::backend(
            OPERATION,
            format!("unsupported schema version: {version} (newest known {SCHEMA_VERSION})"),
        ));
    }
    recover_interrupted_rebuild(connection)?;

    let tx = connection
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|err| db_error(OPERATION, &err))?;
    tx.execute_batch(CREATE_TABLES).map_err(|err| db_error(OPERATION, &err))?;
    for (table, column, definition) in ADDED_COLUMNS {
        if !has_column(&tx, table, column)? {
            tx.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {definition};"))
                .map_err(|err| db_error(OPERATION, &err))?;
            debug!(table, column, "added column");
        }
    }
    tx.commit().map_err(|err| db_error(OPERATION, &err))?;

    if !has_column(connection, "instances", "scale_set_id")? {
        rebuild_instances(connection)?;
    }

    let tx = connection
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|err| db_error(OPERATION, &err))?;
    tx.execute_batch(CREATE_INDEXES).map_err(|err| db_error(OPERATION, &err))?;
    tx.execute("DELETE FROM store_meta", []).map_err(|err| db_error(OPERATION, &err))?;
    tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
        .map_err(|err| db_error(OPERATION, &err))?;
    tx.commit().map_err(|err| db_error(OPERATION, &err))?;
    if version != Some(SCHEMA_VERSION) {
        debug!(from = ?version, to = SCHEMA_VERSION, "schema evolved");
    }
    Ok(())
}

/// Reads the recorded schema version.
///
/// # Errors
///
/// Returns [`StoreError::Backend`] when the version table cannot be read.
pub fn stored_version(connection: &Connection) -> Result<Option<i64>, StoreError> {
    connection
        .query_row("SELECT MAX(version) FROM store_meta", [], |row| row.get::<_, Option<i64>>(0))
        .optional()
        .map(Option::flatten)
        .map_err(|err| db_error(OPERATION, &err))
}

// ============================================================================
// SECTION: Instances Rebuild
// ============================================================================

/// Moves a leftover `instances_old` back into place.
///
/// The rebuild runs in one transaction, so a leftover old table means the
/// rename was committed without the rest. The old table is authoritative:
/// any partial replacement is discarded before the old one is restored.
fn recover_interrupted_rebuild(connection: &mut Connection) -> Result<(), StoreError> {
    if !has_table(connection, "instances_old")? {
        return Ok(());
    }
    warn!("found instances_old from an interrupted rebuild; restoring it");
    with_foreign_keys_off(connection, |connection| {
        let tx = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_error(OPERATION, &err))?;
        if has_table(&tx, "instances")? {
            tx.execute_batch("DROP TABLE instances;").map_err(|err| db_error(OPERATION, &err))?;
        }
        tx.execute_batch("ALTER TABLE instances_old RENAME TO instances;")
            .map_err(|err| db_error(OPERATION, &err))?;
        tx.commit().map_err(|err| db_error(OPERATION, &err))
    })
}

/// Rebuilds `instances` into the v3 shape.
fn rebuild_instances(connection: &mut Connection) -> Result<(), StoreError> {
    rebuild_instances_as(connection, CREATE_INSTANCES)
}

/// Parks `instances`, creates the replacement with `create_sql`, and copies
/// the shared columns. A failed create restores the parked table.
fn rebuild_instances_as(connection: &mut Connection, create_sql: &str) -> Result<(), StoreError> {
    with_foreign_keys_off(connection, |connection| {
        let tx = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_error(OPERATION, &err))?;
        tx.execute_batch("ALTER TABLE instances RENAME TO instances_old;")
            .map_err(|err| db_error(OPERATION, &err))?;
        if let Err(err) = tx.execute_batch(create_sql) {
            let cause = db_error(OPERATION, &err);
            tx.execute_batch("ALTER TABLE instances_old RENAME TO instances;")
                .map_err(|err| db_error(OPERATION, &err))?;
            tx.commit().map_err(|err| db_error(OPERATION, &err))?;
            return Err(cause);
        }
        let old_columns = table_columns(&tx, "instances_old")?;
        let new_columns = table_columns(&tx, "instances")?;
        let shared: Vec<&str> =
            new_columns.iter().filter(|column| old_columns.contains(*column)).map(String::as_str).collect();
        let column_list = shared.join(", ");
        tx.execute_batch(&format!(
            "INSERT INTO instances ({column_list}) SELECT {column_list} FROM instances_old;"
        ))
        .map_err(|err| db_error(OPERATION, &err))?;
        tx.execute_batch("DROP TABLE instances_old;").map_err(|err| db_error(OPERATION, &err))?;
        tx.commit().map_err(|err| db_error(OPERATION, &err))?;
        debug!(columns = shared.len(), "rebuilt instances table");
        Ok(())
    })
}

/// Runs `body` with foreign keys off and legacy rename semantics on, then
/// restores both and verifies referential integrity.
///
/// Legacy rename keeps references in other tables pointing at `instances`
/// while the old table is parked under another name.
fn with_foreign_keys_off(
    connection: &mut Connection,
    body: impl FnOnce(&mut Connection) -> Result<(), StoreError>,
) -> Result<(), StoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = OFF; PRAGMA legacy_alter_table = ON;")
        .map_err(|err| db_error(OPERATION, &err))?;
    let result = body(connection);
    let restored = connection
        .execute_batch("PRAGMA legacy_alter_table = OFF; PRAGMA foreign_keys = ON;")
        .map_err(|err| db_error(OPERATION, &err));
    result?;
    restored?;
    let violations: i64 = connection
        .prepare("PRAGMA foreign_key_check")
        .and_then(|mut stmt| {
            let mut rows = stmt.query([])?;
            let mut count = 0_i64;
            while rows.next()?.is_some() {
                count += 1;
            }
            Ok(count)
        })
        .map_err(|err| db_error(OPERATION, &err))?;
    if violations > 0 {
        return Err(StoreError::backend(
            OPERATION,
            format!("foreign key check found {violations} violations after rebuild"),
        ));
    }
    Ok(())
}

// ============================================================================
// SECTION: Introspection
// ============================================================================

/// Returns true when `table` exists.
fn has_table(connection: &Connection, table: &str) -> Result<bool, StoreError> {
    connection
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(|err| db_error(OPERATION, &err))
}

/// Returns the column names of `table`; empty when it does not exist.
fn table_columns(connection: &Connection, table: &str) -> Result<BTreeSet<String>, StoreError> {
    let mut stmt = connection
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(|err| db_error(OPERATION, &err))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|err| db_error(OPERATION, &err))?;
    rows.collect::<Result<BTreeSet<_>, _>>().map_err(|err| db_error(OPERATION, &err))
}

/// Returns true when `table` has `column`.
fn has_column(connection: &Connection, table: &str, column: &str) -> Result<bool, StoreError> {
    Ok(table_columns(connection, table)?.contains(column))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
