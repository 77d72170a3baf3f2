// crates/runner-fleet-store-sqlite/tests/sqlite_schema.rs
// ============================================================================
// Module: SQLite Schema Evolution Tests
// Description: Upgrades from hand-written legacy layouts and crash recovery.
// Purpose: Validate that every opening converges on the current schema.
// Dependencies: runner-fleet-store-sqlite, rusqlite, tempfile
// ============================================================================

//! ## Overview
//! Legacy databases are written with raw `rusqlite` so the tests do not
//! depend on the store to produce old shapes.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::Path;

use runner_fleet_core::EntityId;
use runner_fleet_core::ErrorKind;
use runner_fleet_core::InstanceParent;
use runner_fleet_core::InstanceStatus;
use runner_fleet_core::Passphrase;
use runner_fleet_store_sqlite::SqliteStore;
use runner_fleet_store_sqlite::SqliteStoreConfig;
use rusqlite::Connection;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const POOL_ID: &str = "6f1c9a52-3d0e-4b7a-9c1d-0a2b3c4d5e6f";
const INSTANCE_ID: &str = "1a2b3c4d-5e6f-4a1b-8c2d-3e4f5a6b7c8d";

/// Version 1 layout: pool-only instances, no generations, no job locks.
const V1_SCHEMA: &str = "
CREATE TABLE store_meta (version INTEGER NOT NULL);
INSERT INTO store_meta (version) VALUES (1);
CREATE TABLE credentials (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    auth_type TEXT NOT NULL,
    secret BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE organizations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    credentials_id TEXT NOT NULL REFERENCES credentials(id),
    webhook_secret BLOB NOT NULL,
    pool_balancer TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE pools (
    id TEXT PRIMARY KEY,
    repo_id TEXT,
    org_id TEXT REFERENCES organizations(id) ON DELETE CASCADE,
    enterprise_id TEXT,
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
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE instances (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    pool_id TEXT NOT NULL REFERENCES pools(id) ON DELETE CASCADE,
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
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE jobs (
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
    repo_id TEXT,
    org_id TEXT REFERENCES organizations(id) ON DELETE SET NULL,
    enterprise_id TEXT,
    started_at INTEGER,
    completed_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
";

/// Rows that hang off one legacy instance.
const V1_ROWS: &str = "
INSERT INTO credentials VALUES
    ('0c7e1b2a-4d5f-4e6a-8b9c-1d2e3f4a5b6c', 'forge', '', 'https://forge.example', 'pat', x'00', 1, 1);
INSERT INTO organizations VALUES
    ('9e8d7c6b-5a4f-4e3d-8c2b-1a0f9e8d7c6b', 'acme', '0c7e1b2a-4d5f-4e6a-8b9c-1d2e3f4a5b6c', x'00', 'round_robin', 1, 1);
INSERT INTO pools VALUES
    ('6f1c9a52-3d0e-4b7a-9c1d-0a2b3c4d5e6f', NULL, '9e8d7c6b-5a4f-4e3d-8c2b-1a0f9e8d7c6b', NULL,
     'lxd', 'ubuntu:24.04', 'small', 'linux', 'amd64', 1, 4, 0, 'runner', 20, 0, NULL, 1, 1);
INSERT INTO instances
    (id, name, pool_id, os_type, os_arch, status, runner_status, created_at, updated_at)
VALUES
    ('1a2b3c4d-5e6f-4a1b-8c2d-3e4f5a6b7c8d', 'runner-legacy', '6f1c9a52-3d0e-4b7a-9c1d-0a2b3c4d5e6f',
     'linux', 'amd64', 'running', 'idle', 1, 1);
INSERT INTO jobs VALUES
    (7, 70, 'queued', 'in_progress', '', 'build', 'app', 'acme', '[]', 'runner-legacy', 'default',
     '1a2b3c4d-5e6f-4a1b-8c2d-3e4f5a6b7c8d', NULL, '9e8d7c6b-5a4f-4e3d-8c2b-1a0f9e8d7c6b', NULL,
     NULL, NULL, 1, 1);
";

fn config(path: &Path) -> SqliteStoreConfig {
    SqliteStoreConfig::new(path, Passphrase::new("0123456789abcdef0123456789abcdef"))
}

fn write_v1(path: &Path) {
    let connection = Connection::open(path).unwrap();
    connection.execute_batch(V1_SCHEMA).unwrap();
    connection.execute_batch(V1_ROWS).unwrap();
}

fn columns(connection: &Connection, table: &str) -> Vec<String> {
    let mut stmt = connection.prepare(&format!("PRAGMA table_info({table})")).unwrap();
    stmt.query_map([], |row| row.get::<_, String>(1)).unwrap().map(Result::unwrap).collect()
}

fn tables(connection: &Connection) -> Vec<String> {
    let mut stmt =
        connection.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name").unwrap();
    stmt.query_map([], |row| row.get::<_, String>(0)).unwrap().map(Result::unwrap).collect()
}

fn version(connection: &Connection) -> i64 {
    connection.query_row("SELECT MAX(version) FROM store_meta", [], |row| row.get(0)).unwrap()
}

fn assert_legacy_instance_survived(store: &SqliteStore) {
    let instance = store.get_instance(INSTANCE_ID).unwrap();
    assert_eq!(instance.name, "runner-legacy");
    assert_eq!(instance.parent, InstanceParent::Pool(EntityId::parse(POOL_ID).unwrap()));
    assert_eq!(instance.status, InstanceStatus::Running);
    assert_eq!(instance.generation, 0);
}

/// Parks `instances` as `instances_old` the way an interrupted rebuild would.
fn simulate_interrupted_rebuild(path: &Path) {
    let connection = Connection::open(path).unwrap();
    connection
        .execute_batch(
            "PRAGMA foreign_keys = OFF;
             PRAGMA legacy_alter_table = ON;
             ALTER TABLE instances RENAME TO instances_old;
             CREATE TABLE instances (id TEXT PRIMARY KEY, name TEXT NOT NULL);
             INSERT INTO instances VALUES ('stray', 'half-copied');",
        )
        .unwrap();
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn fresh_database_starts_at_current_version() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fleet.db");
    drop(SqliteStore::open(config(&path)).unwrap());

    let connection = Connection::open(&path).unwrap();
    assert_eq!(version(&connection), 3);
    let names = tables(&connection);
    for table in ["file_blobs", "file_objects", "instances", "jobs", "pools", "scale_sets"] {
        assert!(names.iter().any(|name| name == table), "missing table {table}");
    }
}

#[test]
fn version_one_database_is_upgraded_in_place() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fleet.db");
    write_v1(&path);

    let store = SqliteStore::open(config(&path)).unwrap();
    assert_legacy_instance_survived(&store);
    drop(store);

    let connection = Connection::open(&path).unwrap();
    assert_eq!(version(&connection), 3);
    assert!(columns(&connection, "instances").contains(&"scale_set_id".to_string()));
    assert!(columns(&connection, "instances").contains(&"generation".to_string()));
    assert!(columns(&connection, "pools").contains(&"generation".to_string()));
    assert!(columns(&connection, "jobs").contains(&"locked_by".to_string()));
    assert!(!tables(&connection).contains(&"instances_old".to_string()));
    let job_instance: String = connection
        .query_row("SELECT instance_id FROM jobs WHERE id = 7", [], |row| row.get(0))
        .unwrap();
    assert_eq!(job_instance, INSTANCE_ID);
}

#[test]
fn reopening_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fleet.db");
    write_v1(&path);
    drop(SqliteStore::open(config(&path)).unwrap());
    let store = SqliteStore::open(config(&path)).unwrap();
    assert_legacy_instance_survived(&store);
    drop(store);

    let connection = Connection::open(&path).unwrap();
    let rows: i64 =
        connection.query_row("SELECT COUNT(*) FROM store_meta", [], |row| row.get(0)).unwrap();
    assert_eq!(rows, 1);
    assert_eq!(version(&connection), 3);
}

#[test]
fn interrupted_rebuild_is_rolled_back_on_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fleet.db");
    write_v1(&path);
    drop(SqliteStore::open(config(&path)).unwrap());
    simulate_interrupted_rebuild(&path);

    let store = SqliteStore::open(config(&path)).unwrap();
    assert_legacy_instance_survived(&store);
    drop(store);

    let connection = Connection::open(&path).unwrap();
    assert!(!tables(&connection).contains(&"instances_old".to_string()));
    let rows: i64 =
        connection.query_row("SELECT COUNT(*) FROM instances", [], |row| row.get(0)).unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn interrupted_legacy_rebuild_is_finished_on_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fleet.db");
    write_v1(&path);
    simulate_interrupted_rebuild(&path);

    let store = SqliteStore::open(config(&path)).unwrap();
    assert_legacy_instance_survived(&store);
    drop(store);

    let connection = Connection::open(&path).unwrap();
    assert!(columns(&connection, "instances").contains(&"scale_set_id".to_string()));
    assert_eq!(version(&connection), 3);
}

#[test]
fn newer_schema_is_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fleet.db");
    drop(SqliteStore::open(config(&path)).unwrap());
    Connection::open(&path).unwrap().execute("UPDATE store_meta SET version = 99", []).unwrap();

    let err = SqliteStore::open(config(&path)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert!(err.to_string().contains("99"));
}
