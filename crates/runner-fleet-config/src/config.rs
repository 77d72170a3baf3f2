// crates/runner-fleet-config/src/config.rs
// ============================================================================
// Module: Runner Fleet Configuration
// Description: Configuration loading and validation for the fleet store.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: runner-fleet-store-sqlite, runner-fleet-watcher, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! The database section embeds [`SqliteStoreConfig`] directly, so its
//! defaults and validation are the store's own. Missing or invalid
//! configuration fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use runner_fleet_store_sqlite::SqliteStore;
use runner_fleet_store_sqlite::SqliteStoreConfig;
use runner_fleet_watcher::DEFAULT_CONSUMER_CAPACITY;
use runner_fleet_watcher::Watcher;
use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "runner-fleet.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "RUNNER_FLEET_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default log filter directive.
const DEFAULT_LOG_LEVEL: &str = "info";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Top-level fleet configuration.
///
/// # Invariants
/// - A loaded value has passed [`FleetConfig::validate`].
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Store settings.
    pub database: SqliteStoreConfig,
    /// Change bus settings.
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Log filter settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FleetConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// The path argument wins, then [`CONFIG_ENV_VAR`], then
    /// `runner-fleet.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first failing setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate().map_err(|err| ConfigError::Invalid(format!("database: {err}")))?;
        self.watcher.validate()?;
        self.logging.validate()
    }

    /// Builds the change bus and opens a store attached to it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the store cannot be opened.
    pub fn open(&self) -> Result<(Watcher, SqliteStore), ConfigError> {
        let watcher = self.watcher.build();
        let store = SqliteStore::open(self.database.clone())
            .and_then(|store| store.with_watcher(&watcher))
            .map_err(|err| ConfigError::Invalid(format!("database: {err}")))?;
        Ok((watcher, store))
    }
}

/// Change bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WatcherConfig {
    /// Events buffered per consumer before it counts as slow.
    #[serde(default = "default_consumer_capacity")]
    pub consumer_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            consumer_capacity: DEFAULT_CONSUMER_CAPACITY,
        }
    }
}

impl WatcherConfig {
    /// Validates the mailbox capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the capacity is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consumer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "watcher.consumer_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Creates a watcher with the configured capacity.
    #[must_use]
    pub fn build(&self) -> Watcher {
        Watcher::with_capacity(self.consumer_capacity)
    }
}

/// Log filter settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `runner_fleet_store_sqlite=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// Validates that the level parses as a filter directive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the directive is malformed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.env_filter().map(|_| ())
    }

    /// Builds the filter a process installs into its subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the directive is malformed.
    pub fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        let level = self.level.trim();
        if level.is_empty() {
            return Err(ConfigError::Invalid("logging.level must be non-empty".to_string()));
        }
        EnvFilter::try_new(level)
            .map_err(|err| ConfigError::Invalid(format!("logging.level is malformed: {err}")))
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the default consumer capacity.
const fn default_consumer_capacity() -> usize {
    DEFAULT_CONSUMER_CAPACITY
}

/// Returns the default log directive.
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// Resolves the config path from the argument or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}
