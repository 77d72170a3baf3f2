//! Config load validation tests for runner-fleet-config.
// crates/runner-fleet-config/tests/load_validation.rs
// =============================================================================
// Module: Config Load Validation Tests
// Description: Validate config loading guards, defaults, and section checks.
// Purpose: Ensure config input handling is strict and fail-closed.
// =============================================================================

use std::io::Write;
use std::path::Path;

use runner_fleet_config::ConfigError;
use runner_fleet_config::FleetConfig;
use runner_fleet_store_sqlite::SqliteStoreMode;
use runner_fleet_store_sqlite::SqliteSyncMode;
use tempfile::NamedTempFile;
use tempfile::TempDir;

type TestResult = Result<(), String>;

const PASSPHRASE: &str = "0123456789abcdef0123456789abcdef";

fn assert_invalid(result: Result<FleetConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config load".to_string()),
    }
}

fn minimal(extra: &str) -> String {
    format!("[database]\npath = \"fleet.db\"\npassphrase = \"{PASSPHRASE}\"\n{extra}")
}

fn write_config(content: &str) -> Result<NamedTempFile, String> {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(content.as_bytes()).map_err(|err| err.to_string())?;
    Ok(file)
}

// ============================================================================
// SECTION: Loading
// ============================================================================

#[test]
fn load_applies_section_defaults() -> TestResult {
    let file = write_config(&minimal(""))?;
    let config = FleetConfig::load(Some(file.path())).map_err(|err| err.to_string())?;
    if config.database.journal_mode != SqliteStoreMode::Wal
        || config.database.sync_mode != SqliteSyncMode::Full
        || config.database.read_pool_size != 4
        || config.database.busy_timeout_ms != 5_000
        || config.database.blob_temp_dir.is_some()
    {
        return Err(format!("unexpected database defaults: {:?}", config.database.path));
    }
    if config.watcher.consumer_capacity != 256 || config.logging.level != "info" {
        return Err("unexpected watcher or logging defaults".to_string());
    }
    Ok(())
}

#[test]
fn load_reads_every_section() -> TestResult {
    let file = write_config(&minimal(
        "busy_timeout_ms = 250\njournal_mode = \"delete\"\nsync_mode = \"normal\"\n\
         read_pool_size = 2\nblob_temp_dir = \"/tmp/fleet\"\n\n[watcher]\n\
         consumer_capacity = 8\n\n[logging]\nlevel = \"runner_fleet_store_sqlite=debug,warn\"\n",
    ))?;
    let config = FleetConfig::load(Some(file.path())).map_err(|err| err.to_string())?;
    if config.database.journal_mode != SqliteStoreMode::Delete
        || config.database.sync_mode != SqliteSyncMode::Normal
        || config.database.read_pool_size != 2
        || config.database.busy_timeout_ms != 250
        || config.database.blob_temp_dir.as_deref() != Some(Path::new("/tmp/fleet"))
    {
        return Err("database section not applied".to_string());
    }
    if config.watcher.consumer_capacity != 8 {
        return Err("watcher section not applied".to_string());
    }
    config.logging.env_filter().map_err(|err| err.to_string())?;
    Ok(())
}

#[test]
fn load_rejects_path_too_long() -> TestResult {
    let long_path = "a".repeat(5_000);
    assert_invalid(FleetConfig::load(Some(Path::new(&long_path))), "config path exceeds max length")
}

#[test]
fn load_rejects_path_component_too_long() -> TestResult {
    let long_component = "a".repeat(300);
    assert_invalid(
        FleetConfig::load(Some(Path::new(&long_component))),
        "config path component too long",
    )
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let file = write_config(&"a".repeat(1_048_577))?;
    assert_invalid(FleetConfig::load(Some(file.path())), "config file exceeds size limit")
}

#[test]
fn load_rejects_non_utf8_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(&[0xFF, 0xFE, 0xFF]).map_err(|err| err.to_string())?;
    assert_invalid(FleetConfig::load(Some(file.path())), "config file must be utf-8")
}

#[test]
fn load_reports_missing_file_as_io() -> TestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    match FleetConfig::load(Some(&dir.path().join("absent.toml"))) {
        Err(ConfigError::Io(_)) => Ok(()),
        other => Err(format!("expected io error, got {:?}", other.map(|_| ()))),
    }
}

// ============================================================================
// SECTION: Validation
// ============================================================================

#[test]
fn missing_database_section_is_a_parse_error() -> TestResult {
    match FleetConfig::from_toml("[logging]\nlevel = \"info\"\n") {
        Err(ConfigError::Parse(_)) => Ok(()),
        other => Err(format!("expected parse error, got {:?}", other.map(|_| ()))),
    }
}

#[test]
fn short_passphrase_is_rejected() -> TestResult {
    assert_invalid(
        FleetConfig::from_toml("[database]\npath = \"fleet.db\"\npassphrase = \"short\"\n"),
        "database:",
    )
}

#[test]
fn zero_read_pool_is_rejected() -> TestResult {
    assert_invalid(FleetConfig::from_toml(&minimal("read_pool_size = 0\n")), "read_pool_size")
}

#[test]
fn zero_busy_timeout_is_rejected() -> TestResult {
    assert_invalid(FleetConfig::from_toml(&minimal("busy_timeout_ms = 0\n")), "busy_timeout_ms")
}

#[test]
fn zero_consumer_capacity_is_rejected() -> TestResult {
    assert_invalid(
        FleetConfig::from_toml(&minimal("\n[watcher]\nconsumer_capacity = 0\n")),
        "watcher.consumer_capacity",
    )
}

#[test]
fn malformed_log_level_is_rejected() -> TestResult {
    assert_invalid(
        FleetConfig::from_toml(&minimal("\n[logging]\nlevel = \"runner_fleet=loud\"\n")),
        "logging.level",
    )?;
    assert_invalid(FleetConfig::from_toml(&minimal("\n[logging]\nlevel = \" \"\n")), "logging.level")
}

#[test]
fn loaded_config_opens_an_attached_store() -> TestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    let db_path = dir.path().join("fleet.db");
    let content = format!(
        "[database]\npath = {:?}\npassphrase = \"{PASSPHRASE}\"\n",
        db_path.to_string_lossy()
    );
    let config = FleetConfig::from_toml(&content).map_err(|err| err.to_string())?;
    let (_watcher, store) = config.open().map_err(|err| err.to_string())?;
    store.readiness().map_err(|err| err.to_string())?;
    if !db_path.exists() {
        return Err("database file was not created".to_string());
    }
    Ok(())
}
