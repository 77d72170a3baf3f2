// crates/runner-fleet-store-sqlite/src/instances.rs
// ============================================================================
// Module: SQLite Instances
// Description: Instance admission, lifecycle updates, and status history.
// Purpose: Enforce per-pool capacity ceilings under concurrent callers.
// Dependencies: runner-fleet-core, rusqlite, tracing
// ============================================================================

//! ## Overview
//! Admission runs inside one `IMMEDIATE` transaction: the parent row is read,
//! its instances are counted, and the new row is inserted only while the count
//! is below `max_runners`. The database write lock is held from the first read
//! to commit, so N racing callers against capacity K see exactly K successes.
//! Waiting past the busy timeout yields a retryable backend error, never a
//! capacity conflict.
//!
//! Instances are hard-deleted; addresses and status messages cascade.

// ============================================================================
// SECTION: Imports
// ============================================================================

use runner_fleet_core::Address;
use runner_fleet_core::AddressKind;
use runner_fleet_core::ChangePayload;
use runner_fleet_core::CreateInstanceParams;
use runner_fleet_core::EntityId;
use runner_fleet_core::Instance;
use runner_fleet_core::InstanceParent;
use runner_fleet_core::InstanceStatus;
use runner_fleet_core::Operation;
use runner_fleet_core::OsArch;
use runner_fleet_core::OsType;
use runner_fleet_core::Page;
use runner_fleet_core::PageRequest;
use runner_fleet_core::RunnerStatus;
use runner_fleet_core::StatusMessage;
use runner_fleet_core::StoreError;
use runner_fleet_core::UpdateInstanceParams;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use tracing::debug;

use crate::pools::load_pool;
use crate::pools::load_scale_set;
use crate::pools::stored_label;
use crate::store::SqliteStore;
use crate::store::column_id;
use crate::store::column_opt_id;
use crate::store::db_error;
use crate::store::from_sql_u64;
use crate::store::parse_id;
use crate::store::read_page;
use crate::store::to_sql_u64;
use crate::store::unix_millis;

// ============================================================================
// SECTION: Rows
// ============================================================================

/// Column list matching [`read_instance_row`].
const INSTANCE_COLUMNS: &str = "id, name, pool_id, scale_set_id, provider_id, agent_id, os_type, \
     os_arch, os_name, os_version, status, runner_status, create_attempt, token_fetched, \
     jit_configuration, generation, created_at, updated_at";

/// Instance columns as stored.
struct InstanceRow {
    /// Identifier column.
    id: String,
    /// Unique name.
    name: String,
    /// Parent pool column.
    pool_id: Option<String>,
    /// Parent scale set column.
    scale_set_id: Option<String>,
    /// Provider-assigned id.
    provider_id: Option<String>,
    /// Forge agent id.
    agent_id: Option<i64>,
    /// OS type label.
    os_type: String,
    /// OS arch label.
    os_arch: String,
    /// OS name.
    os_name: Option<String>,
    /// OS version.
    os_version: Option<String>,
    /// Instance status label.
    status: String,
    /// Runner status label.
    runner_status: String,
    /// Create attempts.
    create_attempt: u32,
    /// Token fetched flag.
    token_fetched: bool,
    /// Sealed JIT configuration.
    jit_configuration: Option<Vec<u8>>,
    /// Generation copied from the parent.
    generation: i64,
    /// Creation time.
    created_at: i64,
    /// Update time.
    updated_at: i64,
}

/// Reads one instance row.
fn read_instance_row(row: &Row<'_>) -> rusqlite::Result<InstanceRow> {
    Ok(InstanceRow {
        id: row.get(0)?,
        name: row.get(1)?,
        pool_id: row.get(2)?,
        scale_set_id: row.get(3)?,
        provider_id: row.get(4)?,
        agent_id: row.get(5)?,
        os_type: row.get(6)?,
        os_arch: row.get(7)?,
        os_name: row.get(8)?,
        os_version: row.get(9)?,
        status: row.get(10)?,
        runner_status: row.get(11)?,
        create_attempt: row.get(12)?,
        token_fetched: row.get(13)?,
        jit_configuration: row.get(14)?,
        generation: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

/// An instance row with its child rows, before secrets are opened.
struct InstanceRecord {
    /// Main row.
    row: InstanceRow,
    /// Address rows.
    addresses: Vec<Address>,
    /// Status history, oldest first.
    status_messages: Vec<StatusMessage>,
}

/// Loads the child rows for one instance row.
fn attach_children(
    connection: &Connection,
    operation: &'static str,
    row: InstanceRow,
) -> Result<InstanceRecord, StoreError> {
    let mut stmt = connection
        .prepare_cached("SELECT address, kind FROM addresses WHERE instance_id = ?1 ORDER BY address")
        .map_err(|err| db_error(operation, &err))?;
    let raw_addresses = stmt
        .query_map(params![row.id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(|err| db_error(operation, &err))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| db_error(operation, &err))?;
    let addresses = raw_addresses
        .into_iter()
        .map(|(address, kind)| {
            Ok(Address {
                address,
                kind: stored_label(operation, &kind, AddressKind::parse)?,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;
    let mut stmt = connection
        .prepare_cached(
            "SELECT message, event_type, created_at FROM instance_status_updates \
             WHERE instance_id = ?1 ORDER BY id",
        )
        .map_err(|err| db_error(operation, &err))?;
    let status_messages = stmt
        .query_map(params![row.id], |row| {
            Ok(StatusMessage {
                message: row.get(0)?,
                event_type: row.get(1)?,
                created_at: row.get(2)?,
            })
        })
        .map_err(|err| db_error(operation, &err))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| db_error(operation, &err))?;
    Ok(InstanceRecord {
        row,
        addresses,
        status_messages,
    })
}

/// Loads one instance matching `column = value`, if present.
fn find_instance(
    connection: &Connection,
    operation: &'static str,
    column: &str,
    value: &str,
) -> Result<Option<InstanceRecord>, StoreError> {
    let row = connection
        .query_row(
            &format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE {column} = ?1"),
            params![value],
            read_instance_row,
        )
        .optional()
        .map_err(|err| db_error(operation, &err))?;
    row.map(|row| attach_children(connection, operation, row)).transpose()
}

/// Loads one instance by id.
fn load_instance(
    connection: &Connection,
    operation: &'static str,
    instance_id: &EntityId,
) -> Result<InstanceRecord, StoreError> {
    find_instance(connection, operation, "id", &instance_id.to_key())?
        .ok_or_else(|| StoreError::not_found(operation, format!("instance not found: {instance_id}")))
}

/// Loads the instances matching `predicate`, oldest first; `values` ends with the limit and offset.
fn query_instances(
    connection: &Connection,
    operation: &'static str,
    predicate: &str,
    values: Vec<Value>,
) -> Result<Vec<InstanceRecord>, StoreError> {
    let mut stmt = connection
        .prepare(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE {predicate} \
             ORDER BY created_at, name LIMIT ? OFFSET ?"
        ))
        .map_err(|err| db_error(operation, &err))?;
    let rows = stmt
        .query_map(params_from_iter(values), read_instance_row)
        .map_err(|err| db_error(operation, &err))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| db_error(operation, &err))?;
    rows.into_iter().map(|row| attach_children(connection, operation, row)).collect()
}

/// Returns the id of the instance named `name`, if any.
pub(crate) fn instance_id_by_name(
    connection: &Connection,
    operation: &'static str,
    name: &str,
) -> Result<Option<String>, StoreError> {
    connection
        .query_row("SELECT id FROM instances WHERE name = ?1", params![name], |row| row.get(0))
        .optional()
        .map_err(|err| db_error(operation, &err))
}

/// Replaces the address set of one instance.
fn write_addresses(
    connection: &Connection,
    operation: &'static str,
    instance_id: &str,
    addresses: &[Address],
) -> Result<(), StoreError> {
    connection
        .execute("DELETE FROM addresses WHERE instance_id = ?1", params![instance_id])
        .map_err(|err| db_error(operation, &err))?;
    let mut stmt = connection
        .prepare_cached("INSERT OR IGNORE INTO addresses (instance_id, address, kind) VALUES (?1, ?2, ?3)")
        .map_err(|err| db_error(operation, &err))?;
    for address in addresses {
        stmt.execute(params![instance_id, address.address, address.kind.as_str()])
            .map_err(|err| db_error(operation, &err))?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Operations
// ============================================================================

impl SqliteStore {
    /// Admits a new instance into a pool if it has spare capacity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the pool is at `max_runners` or
    /// the name is taken, [`StoreError::NotFound`] when the pool is absent,
    /// and a retryable [`StoreError::Backend`] on lock contention.
    pub fn create_instance(
        &self,
        pool_id: &str,
        params: CreateInstanceParams,
    ) -> Result<Instance, StoreError> {
        let op = "create_instance";
        let id = parse_id(op, pool_id)?;
        self.admit_instance(op, InstanceParent::Pool(id), params)
    }

    /// Admits a new instance into a scale set if it has spare capacity.
    ///
    /// # Errors
    ///
    /// Same as [`SqliteStore::create_instance`], for scale sets.
    pub fn create_scale_set_instance(
        &self,
        scale_set_id: &str,
        params: CreateInstanceParams,
    ) -> Result<Instance, StoreError> {
        let op = "create_scale_set_instance";
        let id = parse_id(op, scale_set_id)?;
        self.admit_instance(op, InstanceParent::ScaleSet(id), params)
    }

    /// Shared admission protocol: read parent, count, insert, commit.
    fn admit_instance(
        &self,
        operation: &'static str,
        parent: InstanceParent,
        params: CreateInstanceParams,
    ) -> Result<Instance, StoreError> {
        params.validate().map_err(|err| err.with_operation(operation))?;
        let sealed_jit = params
            .jit_configuration
            .as_deref()
            .map(|config| self.cipher.seal_str(config))
            .transpose()
            .map_err(|err| err.with_operation(operation))?;
        let instance = self.write_tx(operation, |tx| {
            let (parent_key, column, max_runners, generation, os_type, os_arch) = match parent {
                InstanceParent::Pool(id) => {
                    let pool = load_pool(tx, operation, &id)?;
                    (id.to_key(), "pool_id", pool.max_runners, pool.generation, pool.os_type, pool.os_arch)
                }
                InstanceParent::ScaleSet(id) => {
                    let set = load_scale_set(tx, operation, &id)?;
                    (id.to_key(), "scale_set_id", set.max_runners, set.generation, set.os_type, set.os_arch)
                }
            };
            let count: i64 = tx
                .query_row(
                    &format!("SELECT COUNT(*) FROM instances WHERE {column} = ?1"),
                    params![parent_key],
                    |row| row.get(0),
                )
                .map_err(|err| db_error(operation, &err))?;
            if count >= i64::from(max_runners) {
                return Err(StoreError::conflict(operation, "max runners reached"));
            }
            let now = unix_millis();
            let instance = Instance {
                id: EntityId::generate(),
                name: params.name,
                parent,
                provider_id: None,
                agent_id: None,
                os_type,
                os_arch,
                os_name: None,
                os_version: None,
                status: params.status,
                runner_status: params.runner_status,
                addresses: Vec::new(),
                status_messages: Vec::new(),
                create_attempt: 0,
                token_fetched: false,
                jit_configuration: params.jit_configuration,
                generation,
                created_at: now,
                updated_at: now,
            };
            tx.execute(
                &format!(
                    "INSERT INTO instances ({INSTANCE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, \
                     ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
                ),
                params![
                    instance.id.to_key(),
                    instance.name,
                    parent.pool_id().map(|id| id.to_key()),
                    parent.scale_set_id().map(|id| id.to_key()),
                    instance.provider_id,
                    instance.agent_id,
                    instance.os_type.as_str(),
                    instance.os_arch.as_str(),
                    instance.os_name,
                    instance.os_version,
                    instance.status.as_str(),
                    instance.runner_status.as_str(),
                    instance.create_attempt,
                    instance.token_fetched,
                    sealed_jit,
                    to_sql_u64(operation, instance.generation)?,
                    now,
                    now
                ],
            )
            .map_err(|err| db_error(operation, &err))?;
            Ok(instance)
        })?;
        debug!(instance = %instance.name, instance_id = %instance.id, "admitted instance");
        self.publish(Operation::Create, ChangePayload::Instance(instance.clone()));
        Ok(instance)
    }

    /// Returns an instance by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for a malformed id and
    /// [`StoreError::NotFound`] when absent.
    pub fn get_instance(&self, instance_id: &str) -> Result<Instance, StoreError> {
        let op = "get_instance";
        let id = parse_id(op, instance_id)?;
        let record = self.read(op, |connection| load_instance(connection, op, &id))?;
        self.instance_from_record(op, record)
    }

    /// Returns an instance by its unique name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when absent.
    pub fn get_instance_by_name(&self, name: &str) -> Result<Instance, StoreError> {
        let op = "get_instance_by_name";
        let record = self.read(op, |connection| {
            find_instance(connection, op, "name", name)?
                .ok_or_else(|| StoreError::not_found(op, format!("instance not found: {name}")))
        })?;
        self.instance_from_record(op, record)
    }

    /// Applies a provisioning callback to an instance.
    ///
    /// Addresses, when supplied, replace the stored set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for invalid input and
    /// [`StoreError::NotFound`] when absent.
    pub fn update_instance(
        &self,
        instance_id: &str,
        params: UpdateInstanceParams,
    ) -> Result<Instance, StoreError> {
        let op = "update_instance";
        let id = parse_id(op, instance_id)?;
        params.validate().map_err(|err| err.with_operation(op))?;
        let sealed_jit = params
            .jit_configuration
            .as_deref()
            .map(|config| self.cipher.seal_str(config))
            .transpose()
            .map_err(|err| err.with_operation(op))?;
        let instance = self.write_tx(op, |tx| {
            let record = load_instance(tx, op, &id)?;
            let mut instance = self.instance_from_record(op, record)?;
            if params.provider_id.is_some() {
                instance.provider_id = params.provider_id;
            }
            if params.agent_id.is_some() {
                instance.agent_id = params.agent_id;
            }
            if params.os_name.is_some() {
                instance.os_name = params.os_name;
            }
            if params.os_version.is_some() {
                instance.os_version = params.os_version;
            }
            if let Some(status) = params.status {
                instance.status = status;
            }
            if let Some(runner_status) = params.runner_status {
                instance.runner_status = runner_status;
            }
            if let Some(create_attempt) = params.create_attempt {
                instance.create_attempt = create_attempt;
            }
            if let Some(token_fetched) = params.token_fetched {
                instance.token_fetched = token_fetched;
            }
            if params.jit_configuration.is_some() {
                instance.jit_configuration = params.jit_configuration;
            }
            instance.updated_at = unix_millis();
            let key = id.to_key();
            tx.execute(
                "UPDATE instances SET provider_id = ?1, agent_id = ?2, os_name = ?3, \
                 os_version = ?4, status = ?5, runner_status = ?6, create_attempt = ?7, \
                 token_fetched = ?8, jit_configuration = COALESCE(?9, jit_configuration), \
                 updated_at = ?10 WHERE id = ?11",
                params![
                    instance.provider_id,
                    instance.agent_id,
                    instance.os_name,
                    instance.os_version,
                    instance.status.as_str(),
                    instance.runner_status.as_str(),
                    instance.create_attempt,
                    instance.token_fetched,
                    sealed_jit,
                    instance.updated_at,
                    key
                ],
            )
            .map_err(|err| db_error(op, &err))?;
            if let Some(addresses) = params.addresses {
                write_addresses(tx, op, &key, &addresses)?;
                let mut addresses = addresses;
                addresses.sort_by(|left, right| left.address.cmp(&right.address));
                addresses.dedup_by(|left, right| left.address == right.address);
                instance.addresses = addresses;
            }
            Ok(instance)
        })?;
        debug!(instance_id = %instance.id, status = instance.status.as_str(), "updated instance");
        self.publish(Operation::Update, ChangePayload::Instance(instance.clone()));
        Ok(instance)
    }

    /// Appends a status message to an instance's history.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for an empty message and
    /// [`StoreError::NotFound`] when the instance is absent.
    pub fn add_instance_status_message(
        &self,
        instance_id: &str,
        message: &str,
        event_type: &str,
    ) -> Result<Instance, StoreError> {
        let op = "add_instance_status_message";
        let id = parse_id(op, instance_id)?;
        if message.trim().is_empty() {
            return Err(StoreError::invalid(op, "message must not be empty"));
        }
        let instance = self.write_tx(op, |tx| {
            let key = id.to_key();
            let now = unix_millis();
            load_instance(tx, op, &id)?;
            tx.execute(
                "INSERT INTO instance_status_updates (instance_id, message, event_type, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![key, message, event_type, now],
            )
            .map_err(|err| db_error(op, &err))?;
            tx.execute("UPDATE instances SET updated_at = ?1 WHERE id = ?2", params![now, key])
                .map_err(|err| db_error(op, &err))?;
            let record = load_instance(tx, op, &id)?;
            self.instance_from_record(op, record)
        })?;
        self.publish(Operation::Update, ChangePayload::Instance(instance.clone()));
        Ok(instance)
    }

    /// Hard-deletes an instance; absent instances are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for a malformed id.
    pub fn delete_instance(&self, instance_id: &str) -> Result<(), StoreError> {
        let op = "delete_instance";
        let id = parse_id(op, instance_id)?;
        let deleted = self.write_tx(op, |tx| {
            let Some(record) = find_instance(tx, op, "id", &id.to_key())? else {
                return Ok(None);
            };
            let snapshot = self.instance_from_record(op, record)?;
            tx.execute("DELETE FROM instances WHERE id = ?1", params![id.to_key()])
                .map_err(|err| db_error(op, &err))?;
            Ok(Some(snapshot))
        })?;
        if let Some(instance) = deleted {
            debug!(instance_id = %instance.id, "deleted instance");
            self.publish(Operation::Delete, ChangePayload::Instance(instance));
        }
        Ok(())
    }

    /// Returns one page of the instances admitted under a pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for a malformed id.
    pub fn list_pool_instances(
        &self,
        pool_id: &str,
        request: PageRequest,
    ) -> Result<Page<Instance>, StoreError> {
        let op = "list_pool_instances";
        let id = parse_id(op, pool_id)?;
        self.instance_page(op, "pool_id = ?", vec![Value::Text(id.to_key())], request)
    }

    /// Returns one page of the instances admitted under a scale set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for a malformed id.
    pub fn list_scale_set_instances(
        &self,
        scale_set_id: &str,
        request: PageRequest,
    ) -> Result<Page<Instance>, StoreError> {
        let op = "list_scale_set_instances";
        let id = parse_id(op, scale_set_id)?;
        self.instance_page(op, "scale_set_id = ?", vec![Value::Text(id.to_key())], request)
    }

    /// Returns one page of every instance.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn list_all_instances(&self, request: PageRequest) -> Result<Page<Instance>, StoreError> {
        self.instance_page("list_all_instances", "1 = 1", Vec::new(), request)
    }

    /// Counts and fetches one page of instances, then opens each record.
    fn instance_page(
        &self,
        operation: &'static str,
        predicate: &str,
        values: Vec<Value>,
        request: PageRequest,
    ) -> Result<Page<Instance>, StoreError> {
        let records = self.read(operation, |connection| {
            read_page(
                connection,
                operation,
                &format!("SELECT COUNT(*) FROM instances WHERE {predicate}"),
                values,
                request,
                |paged| query_instances(connection, operation, predicate, paged),
            )
        })?;
        records.try_map(|record| self.instance_from_record(operation, record))
    }

    /// Opens the JIT configuration and parses stored labels.
    fn instance_from_record(
        &self,
        operation: &'static str,
        record: InstanceRecord,
    ) -> Result<Instance, StoreError> {
        let InstanceRecord {
            row,
            addresses,
            status_messages,
        } = record;
        let parent = match (
            column_opt_id(operation, row.pool_id.as_deref())?,
            column_opt_id(operation, row.scale_set_id.as_deref())?,
        ) {
            (Some(pool_id), None) => InstanceParent::Pool(pool_id),
            (None, Some(scale_set_id)) => InstanceParent::ScaleSet(scale_set_id),
            _ => {
                return Err(StoreError::backend(
                    operation,
                    format!("instance {} must have exactly one parent", row.name),
                ));
            }
        };
        let jit_configuration = row
            .jit_configuration
            .as_deref()
            .map(|sealed| self.cipher.open_str(sealed))
            .transpose()
            .map_err(|err| err.with_operation(operation))?;
        Ok(Instance {
            id: column_id(operation, &row.id)?,
            name: row.name,
            parent,
            provider_id: row.provider_id,
            agent_id: row.agent_id,
            os_type: stored_label(operation, &row.os_type, OsType::parse)?,
            os_arch: stored_label(operation, &row.os_arch, OsArch::parse)?,
            os_name: row.os_name,
            os_version: row.os_version,
            status: stored_label(operation, &row.status, InstanceStatus::parse)?,
            runner_status: stored_label(operation, &row.runner_status, RunnerStatus::parse)?,
            addresses,
            status_messages,
            create_attempt: row.create_attempt,
            token_fetched: row.token_fetched,
            jit_configuration,
            generation: from_sql_u64(operation, row.generation)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
