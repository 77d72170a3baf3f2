// crates/runner-fleet-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Fleet Store
// Description: Connection management, transactions, and change publishing.
// Purpose: Give every entity module one disciplined way to read and write.
// Dependencies: runner-fleet-core, runner-fleet-watcher, rusqlite, tracing
// ============================================================================

//! ## Overview
//! [`SqliteStore`] owns one mutex-guarded write connection and a round-robin
//! pool of read connections. All mutations go through [`SqliteStore::write_tx`],
//! which opens an `IMMEDIATE` transaction so the database write lock is taken
//! before the first read. That makes every lock-read-write sequence atomic.
//! Change events are published only after the transaction commits.
//!
//! Cancellation is checked before a transaction starts and again before it
//! commits; a cancelled write is rolled back and reported as
//! [`StoreError::Canceled`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use runner_fleet_core::ChangeEvent;
use runner_fleet_core::ChangePayload;
use runner_fleet_core::EntityId;
use runner_fleet_core::Operation;
use runner_fleet_core::Page;
use runner_fleet_core::PageRequest;
use runner_fleet_core::Passphrase;
use runner_fleet_core::SecretCipher;
use runner_fleet_core::StoreError;
use runner_fleet_watcher::Producer;
use runner_fleet_watcher::Watcher;
use runner_fleet_watcher::WatcherError;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::schema::initialize_schema;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default number of read connections.
const DEFAULT_READ_POOL_SIZE: usize = 4;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Producer id the store registers with a watcher.
pub const PRODUCER_ID: &str = "database";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode.
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` fleet store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `passphrase` is exactly 32 bytes.
/// - `busy_timeout_ms` and `read_pool_size` are greater than zero.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Passphrase used to seal secrets at rest.
    pub passphrase: Passphrase,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Number of read connections.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
    /// Directory for staging uploaded blobs; the system temp dir when unset.
    #[serde(default)]
    pub blob_temp_dir: Option<PathBuf>,
}

impl SqliteStoreConfig {
    /// Creates a config with default tunables.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, passphrase: Passphrase) -> Self {
        Self {
            path: path.into(),
            passphrase,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            read_pool_size: DEFAULT_READ_POOL_SIZE,
            blob_temp_dir: None,
        }
    }

    /// Validates paths, passphrase, and tunables.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when any setting is out of range.
    pub fn validate(&self) -> Result<(), StoreError> {
        validate_store_path(&self.path)?;
        self.passphrase.validate().map_err(|err| err.with_operation("open_store"))?;
        if self.busy_timeout_ms == 0 {
            return Err(StoreError::invalid(
                "open_store",
                "busy_timeout_ms must be greater than zero",
            ));
        }
        if self.read_pool_size == 0 {
            return Err(StoreError::invalid(
                "open_store",
                "read_pool_size must be greater than zero",
            ));
        }
        if let Some(dir) = &self.blob_temp_dir
            && dir.as_os_str().is_empty()
        {
            return Err(StoreError::invalid("open_store", "blob_temp_dir must not be empty"));
        }
        Ok(())
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default read pool size.
const fn default_read_pool_size() -> usize {
    DEFAULT_READ_POOL_SIZE
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed fleet store.
///
/// Clones share connections, cipher, and producer; each clone carries its own
/// cancellation token.
///
/// # Invariants
/// - All writes are serialized through the write connection mutex.
/// - Change events are published only after commit.
#[derive(Clone)]
pub struct SqliteStore {
    /// Store configuration.
    pub(crate) config: Arc<SqliteStoreConfig>,
    /// Shared writer connection guarded by a mutex.
    write_connection: Arc<Mutex<Connection>>,
    /// Read connection pool.
    read_connections: Arc<Vec<Mutex<Connection>>>,
    /// Round-robin cursor for read connection selection.
    read_cursor: Arc<AtomicUsize>,
    /// Secret cipher keyed by the configured passphrase.
    pub(crate) cipher: Arc<SecretCipher>,
    /// Change bus producer, when a watcher is attached.
    producer: Option<Arc<Producer>>,
    /// Cancellation token checked around every transaction.
    cancel: CancellationToken,
}

impl SqliteStore {
    /// Opens the store, bringing the schema up to date first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for bad configuration and
    /// [`StoreError::Backend`] when the database cannot be opened or migrated.
    pub fn open(config: SqliteStoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        ensure_parent_dir(&config.path)?;
        let cipher = SecretCipher::new(&config.passphrase)?;
        let mut write_connection = open_connection(&config)?;
        initialize_schema(&mut write_connection)?;
        reclaim_incomplete_files(&write_connection)?;
        let mut read_connections = Vec::with_capacity(config.read_pool_size);
        for _ in 0 .. config.read_pool_size {
            read_connections.push(Mutex::new(open_connection(&config)?));
        }
        debug!(path = %config.path.display(), readers = config.read_pool_size, "opened fleet store");
        Ok(Self {
            config: Arc::new(config),
            write_connection: Arc::new(Mutex::new(write_connection)),
            read_connections: Arc::new(read_connections),
            read_cursor: Arc::new(AtomicUsize::new(0)),
            cipher: Arc::new(cipher),
            producer: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Registers the store as producer [`PRODUCER_ID`] on `watcher`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the producer id is taken or the
    /// watcher is closed.
    pub fn with_watcher(mut self, watcher: &Watcher) -> Result<Self, StoreError> {
        let producer = watcher.register_producer(PRODUCER_ID).map_err(|err| match err {
            WatcherError::DuplicateProducer(_) | WatcherError::WatcherClosed => {
                StoreError::conflict("attach_watcher", err.to_string())
            }
            WatcherError::DuplicateConsumer(_) | WatcherError::ProducerClosed(_) => {
                StoreError::backend("attach_watcher", err.to_string())
            }
        })?;
        self.producer = Some(Arc::new(producer));
        Ok(self)
    }

    /// Returns a handle whose operations observe `token`.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..self.clone()
        }
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Verifies the store can execute a trivial statement.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the read path is unusable.
    pub fn readiness(&self) -> Result<(), StoreError> {
        self.read("readiness", |connection| {
            connection
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|err| db_error("readiness", &err))?;
            Ok(())
        })
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    /// Fails with [`StoreError::Canceled`] once the token fired.
    pub(crate) fn check_cancel(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.cancel.is_cancelled() {
            return Err(StoreError::canceled(operation));
        }
        Ok(())
    }

    /// Runs `body` inside an `IMMEDIATE` write transaction.
    ///
    /// The transaction rolls back when `body` fails or the token fires before
    /// commit.
    pub(crate) fn write_tx<T>(
        &self,
        operation: &'static str,
        body: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.check_cancel(operation)?;
        let mut guard = self
            .write_connection
            .lock()
            .map_err(|_| StoreError::backend(operation, "sqlite write mutex poisoned"))?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_error(operation, &err))?;
        let value = body(&tx)?;
        if self.cancel.is_cancelled() {
            tx.rollback().map_err(|err| db_error(operation, &err))?;
            return Err(StoreError::canceled(operation));
        }
        tx.commit().map_err(|err| db_error(operation, &err))?;
        Ok(value)
    }

    /// Runs `body` against a read connection inside one snapshot.
    pub(crate) fn read<T>(
        &self,
        operation: &'static str,
        body: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.check_cancel(operation)?;
        let mut guard = self
            .read_connection()
            .lock()
            .map_err(|_| StoreError::backend(operation, "sqlite read mutex poisoned"))?;
        let tx = guard.transaction().map_err(|err| db_error(operation, &err))?;
        let value = body(&tx)?;
        tx.commit().map_err(|err| db_error(operation, &err))?;
        Ok(value)
    }

    /// Runs `body` with the locked write connection outside any transaction.
    ///
    /// Cancellation is left to `body`, which may need to clean up after it.
    pub(crate) fn with_write_connection<T>(
        &self,
        operation: &'static str,
        body: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .write_connection
            .lock()
            .map_err(|_| StoreError::backend(operation, "sqlite write mutex poisoned"))?;
        body(&mut guard)
    }

    /// Opens a dedicated connection outside the pools.
    pub(crate) fn open_dedicated_connection(&self) -> Result<Connection, StoreError> {
        open_connection(&self.config)
    }

    /// Returns the next read connection using round-robin selection.
    fn read_connection(&self) -> &Mutex<Connection> {
        let len = self.read_connections.len();
        let index = self.read_cursor.fetch_add(1, Ordering::Relaxed) % len;
        &self.read_connections[index]
    }

    // ------------------------------------------------------------------------
    // Change publishing
    // ------------------------------------------------------------------------

    /// Publishes one committed mutation; delivery failures are logged only.
    pub(crate) fn publish(&self, operation: Operation, payload: ChangePayload) {
        let Some(producer) = &self.producer else {
            return;
        };
        let event = ChangeEvent::new(operation, payload);
        let entity_type = event.entity_type;
        if let Err(err) = producer.notify(event) {
            warn!(%entity_type, %operation, error = %err, "change event not published");
        }
    }
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.config.path)
            .field("readers", &self.read_connections.len())
            .field("watched", &self.producer.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Error Mapping
// ============================================================================

/// Classifies a `rusqlite` error into a store error kind.
pub(crate) fn db_error(operation: &'static str, err: &rusqlite::Error) -> StoreError {
    if matches!(err, rusqlite::Error::QueryReturnedNoRows) {
        return StoreError::not_found(operation, "no matching row");
    }
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            StoreError::contention(operation, err.to_string())
        }
        Some(ErrorCode::ConstraintViolation) => StoreError::conflict(operation, err.to_string()),
        _ => StoreError::backend(operation, err.to_string()),
    }
}

/// Parses an identifier argument, attributing failures to `operation`.
pub(crate) fn parse_id(operation: &'static str, value: &str) -> Result<EntityId, StoreError> {
    EntityId::parse(value).map_err(|err| err.with_operation(operation))
}

/// Parses an identifier read back from a column.
pub(crate) fn column_id(operation: &'static str, value: &str) -> Result<EntityId, StoreError> {
    EntityId::parse(value).map_err(|_| {
        StoreError::backend(operation, format!("stored identifier is malformed: {value}"))
    })
}

/// Parses an optional identifier column.
pub(crate) fn column_opt_id(
    operation: &'static str,
    value: Option<&str>,
) -> Result<Option<EntityId>, StoreError> {
    value.map(|value| column_id(operation, value)).transpose()
}

/// Converts an unsigned counter into an `SQLite` integer.
pub(crate) fn to_sql_u64(operation: &'static str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::invalid(operation, format!("value {value} exceeds storage range")))
}

/// Converts a stored integer back into an unsigned counter.
pub(crate) fn from_sql_u64(operation: &'static str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::backend(operation, format!("stored counter is negative: {value}")))
}

/// Returns the `LIMIT` and `OFFSET` of a page, clamped to the `SQLite` integer range.
pub(crate) fn page_window(request: PageRequest) -> (i64, i64) {
    let clamp = |value: u64| i64::try_from(value).unwrap_or(i64::MAX);
    (clamp(request.normalized().page_size), clamp(request.offset()))
}

/// Counts the rows matched by `count_sql`, then fetches one page of them.
///
/// `fetch` receives `values` followed by the limit and offset, so its query
/// must end in `LIMIT ? OFFSET ?`.
pub(crate) fn read_page<T>(
    connection: &Connection,
    operation: &'static str,
    count_sql: &str,
    values: Vec<Value>,
    request: PageRequest,
    fetch: impl FnOnce(Vec<Value>) -> Result<Vec<T>, StoreError>,
) -> Result<Page<T>, StoreError> {
    let total: i64 = connection
        .query_row(count_sql, params_from_iter(values.iter()), |row| row.get(0))
        .map_err(|err| db_error(operation, &err))?;
    let (limit, offset) = page_window(request);
    let mut paged = values;
    paged.push(Value::Integer(limit));
    paged.push(Value::Integer(offset));
    let items = fetch(paged)?;
    Ok(Page::new(items, request, from_sql_u64(operation, total)?))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Deletes file objects whose upload never finished; blobs and tags cascade.
fn reclaim_incomplete_files(connection: &Connection) -> Result<(), StoreError> {
    let reclaimed = connection
        .execute("DELETE FROM file_objects WHERE sha256 = ''", [])
        .map_err(|err| db_error("open_store", &err))?;
    if reclaimed > 0 {
        debug!(reclaimed, "reclaimed incomplete file objects");
    }
    Ok(())
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), StoreError> {
    let Some(parent) = path.parent() else {
        return Err(StoreError::invalid("open_store", "store path missing parent directory"));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| StoreError::backend("open_store", err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), StoreError> {
    if path.as_os_str().is_empty() {
        return Err(StoreError::invalid("open_store", "store path must not be empty"));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(StoreError::invalid("open_store", "store path exceeds length limit"));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(StoreError::invalid(
                "open_store",
                "store path contains an overlong component",
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(StoreError::invalid("open_store", "store path must be a file, not a directory"));
    }
    Ok(())
}

/// Opens an `SQLite` connection with the configured pragmas.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, StoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| db_error("open_store", &err))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for integrity and durability.
fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), StoreError> {
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| db_error("open_store", &err))?;
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| db_error("open_store", &err))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| db_error("open_store", &err))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| db_error("open_store", &err))?;
    Ok(())
}

/// Returns the current unix epoch in milliseconds.
pub(crate) fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
