// crates/runner-fleet-store-sqlite/src/pools.rs
// ============================================================================
// Module: SQLite Pools and Scale Sets
// Description: Runner templates, their tags, and capacity ceilings.
// Purpose: Persist pools and scale sets scoped to one owner each.
// Dependencies: runner-fleet-core, rusqlite, serde_json, tracing
// ============================================================================

//! ## Overview
//! Pools and scale sets reference their owner through one of three nullable
//! foreign keys; [`OwnerRef`] decides which column is set. Pool tags live in
//! `pool_tags` and are matched with AND semantics: a pool matches only when it
//! carries every requested tag.
//!
//! Deleting a pool or scale set cascades to its instances.

// ============================================================================
// SECTION: Imports
// ============================================================================

use runner_fleet_core::ChangePayload;
use runner_fleet_core::CreatePoolParams;
use runner_fleet_core::CreateScaleSetParams;
use runner_fleet_core::EntityId;
use runner_fleet_core::Operation;
use runner_fleet_core::OsArch;
use runner_fleet_core::OsType;
use runner_fleet_core::OwnerRef;
use runner_fleet_core::Page;
use runner_fleet_core::PageRequest;
use runner_fleet_core::Pool;
use runner_fleet_core::ScaleSet;
use runner_fleet_core::StoreError;
use runner_fleet_core::UpdatePoolParams;
use runner_fleet_core::UpdateScaleSetParams;
use runner_fleet_core::normalize_tags;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use tracing::debug;

use crate::owners::owner_column;
use crate::owners::require_owner;
use crate::store::SqliteStore;
use crate::store::column_id;
use crate::store::db_error;
use crate::store::from_sql_u64;
use crate::store::parse_id;
use crate::store::read_page;
use crate::store::to_sql_u64;
use crate::store::unix_millis;

// ============================================================================
// SECTION: Pool Rows
// ============================================================================

/// Column list matching [`read_pool_row`].
const POOL_COLUMNS: &str = "id, repo_id, org_id, enterprise_id, provider_name, image, flavor, \
     os_type, os_arch, enabled, max_runners, min_idle_runners, runner_prefix, \
     runner_bootstrap_timeout, priority, extra_specs, generation, created_at, updated_at";

/// Pool columns as stored.
struct PoolRow {
    /// Identifier column.
    id: String,
    /// Repository owner column.
    repo_id: Option<String>,
    /// Organization owner column.
    org_id: Option<String>,
    /// Enterprise owner column.
    enterprise_id: Option<String>,
    /// Provider name.
    provider_name: String,
    /// Image.
    image: String,
    /// Flavor.
    flavor: String,
    /// OS type label.
    os_type: String,
    /// OS arch label.
    os_arch: String,
    /// Enabled flag.
    enabled: bool,
    /// Capacity ceiling.
    max_runners: u32,
    /// Idle floor.
    min_idle_runners: u32,
    /// Runner name prefix.
    runner_prefix: String,
    /// Bootstrap timeout in minutes.
    runner_bootstrap_timeout: u32,
    /// Selection priority.
    priority: u32,
    /// Extra specs as JSON text.
    extra_specs: Option<String>,
    /// Generation counter.
    generation: i64,
    /// Creation time.
    created_at: i64,
    /// Update time.
    updated_at: i64,
}

/// Reads one pool row.
fn read_pool_row(row: &Row<'_>) -> rusqlite::Result<PoolRow> {
    Ok(PoolRow {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        org_id: row.get(2)?,
        enterprise_id: row.get(3)?,
        provider_name: row.get(4)?,
        image: row.get(5)?,
        flavor: row.get(6)?,
        os_type: row.get(7)?,
        os_arch: row.get(8)?,
        enabled: row.get(9)?,
        max_runners: row.get(10)?,
        min_idle_runners: row.get(11)?,
        runner_prefix: row.get(12)?,
        runner_bootstrap_timeout: row.get(13)?,
        priority: row.get(14)?,
        extra_specs: row.get(15)?,
        generation: row.get(16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

/// Rebuilds the owner reference from the three stored columns.
pub(crate) fn stored_owner(
    operation: &'static str,
    repo_id: Option<&str>,
    org_id: Option<&str>,
    enterprise_id: Option<&str>,
) -> Result<OwnerRef, StoreError> {
    OwnerRef::from_columns(repo_id, org_id, enterprise_id)
        .map_err(|err| StoreError::backend(operation, err.to_string()))?
        .ok_or_else(|| StoreError::backend(operation, "stored row references no owner"))
}

/// Parses a stored label, treating bad data as a backend failure.
pub(crate) fn stored_label<T>(
    operation: &'static str,
    value: &str,
    parse: fn(&str) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    parse(value).map_err(|err| StoreError::backend(operation, err.to_string()))
}

/// Converts a pool row and its tags into a [`Pool`].
fn pool_from_row(operation: &'static str, row: PoolRow, tags: Vec<String>) -> Result<Pool, StoreError> {
    let extra_specs = row
        .extra_specs
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|err| StoreError::backend(operation, format!("stored extra specs are invalid: {err}")))?;
    Ok(Pool {
        id: column_id(operation, &row.id)?,
        owner: stored_owner(
            operation,
            row.repo_id.as_deref(),
            row.org_id.as_deref(),
            row.enterprise_id.as_deref(),
        )?,
        provider_name: row.provider_name,
        image: row.image,
        flavor: row.flavor,
        os_type: stored_label(operation, &row.os_type, OsType::parse)?,
        os_arch: stored_label(operation, &row.os_arch, OsArch::parse)?,
        tags,
        enabled: row.enabled,
        max_runners: row.max_runners,
        min_idle_runners: row.min_idle_runners,
        runner_prefix: row.runner_prefix,
        runner_bootstrap_timeout: row.runner_bootstrap_timeout,
        priority: row.priority,
        extra_specs,
        generation: from_sql_u64(operation, row.generation)?,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

/// Loads the sorted tag set of one pool.
fn pool_tags(connection: &Connection, operation: &'static str, pool_id: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = connection
        .prepare_cached("SELECT tag FROM pool_tags WHERE pool_id = ?1 ORDER BY tag")
        .map_err(|err| db_error(operation, &err))?;
    let rows = stmt.query_map(params![pool_id], |row| row.get(0)).map_err(|err| db_error(operation, &err))?;
    rows.collect::<Result<Vec<String>, _>>().map_err(|err| db_error(operation, &err))
}

/// Replaces the tag set of one pool.
fn write_pool_tags(
    connection: &Connection,
    operation: &'static str,
    pool_id: &str,
    tags: &[String],
) -> Result<(), StoreError> {
    connection
        .execute("DELETE FROM pool_tags WHERE pool_id = ?1", params![pool_id])
        .map_err(|err| db_error(operation, &err))?;
    let mut stmt = connection
        .prepare_cached("INSERT INTO pool_tags (pool_id, tag) VALUES (?1, ?2)")
        .map_err(|err| db_error(operation, &err))?;
    for tag in tags {
        stmt.execute(params![pool_id, tag]).map_err(|err| db_error(operation, &err))?;
    }
    Ok(())
}

/// Runs a pool query and attaches each pool's tags.
fn query_pools(
    connection: &Connection,
    operation: &'static str,
    sql: &str,
    values: Vec<Value>,
) -> Result<Vec<Pool>, StoreError> {
    let mut stmt = connection.prepare(sql).map_err(|err| db_error(operation, &err))?;
    let rows = stmt
        .query_map(params_from_iter(values), read_pool_row)
        .map_err(|err| db_error(operation, &err))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| db_error(operation, &err))?;
    rows.into_iter()
        .map(|row| {
            let tags = pool_tags(connection, operation, &row.id)?;
            pool_from_row(operation, row, tags)
        })
        .collect()
}

/// Loads one pool by id.
pub(crate) fn load_pool(
    connection: &Connection,
    operation: &'static str,
    pool_id: &EntityId,
) -> Result<Pool, StoreError> {
    let key = pool_id.to_key();
    let row = connection
        .query_row(&format!("SELECT {POOL_COLUMNS} FROM pools WHERE id = ?1"), params![key], read_pool_row)
        .optional()
        .map_err(|err| db_error(operation, &err))?
        .ok_or_else(|| StoreError::not_found(operation, format!("pool not found: {pool_id}")))?;
    let tags = pool_tags(connection, operation, &key)?;
    pool_from_row(operation, row, tags)
}

/// Serializes extra specs for storage.
fn extra_specs_text(operation: &'static str, pool: &Pool) -> Result<Option<String>, StoreError> {
    pool.extra_specs
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|err| StoreError::invalid(operation, format!("extra specs are not serializable: {err}")))
}

// ============================================================================
// SECTION: Scale Set Rows
// ============================================================================

/// Column list matching [`read_scale_set_row`].
const SCALE_SET_COLUMNS: &str = "id, repo_id, org_id, enterprise_id, name, provider_name, image, \
     flavor, os_type, os_arch, enabled, max_runners, min_idle_runners, runner_prefix, generation, \
     created_at, updated_at";

/// Scale set columns as stored.
struct ScaleSetRow {
    /// Identifier column.
    id: String,
    /// Repository owner column.
    repo_id: Option<String>,
    /// Organization owner column.
    org_id: Option<String>,
    /// Enterprise owner column.
    enterprise_id: Option<String>,
    /// Scale set name.
    name: String,
    /// Provider name.
    provider_name: String,
    /// Image.
    image: String,
    /// Flavor.
    flavor: String,
    /// OS type label.
    os_type: String,
    /// OS arch label.
    os_arch: String,
    /// Enabled flag.
    enabled: bool,
    /// Capacity ceiling.
    max_runners: u32,
    /// Idle floor.
    min_idle_runners: u32,
    /// Runner name prefix.
    runner_prefix: String,
    /// Generation counter.
    generation: i64,
    /// Creation time.
    created_at: i64,
    /// Update time.
    updated_at: i64,
}

/// Reads one scale set row.
fn read_scale_set_row(row: &Row<'_>) -> rusqlite::Result<ScaleSetRow> {
    Ok(ScaleSetRow {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        org_id: row.get(2)?,
        enterprise_id: row.get(3)?,
        name: row.get(4)?,
        provider_name: row.get(5)?,
        image: row.get(6)?,
        flavor: row.get(7)?,
        os_type: row.get(8)?,
        os_arch: row.get(9)?,
        enabled: row.get(10)?,
        max_runners: row.get(11)?,
        min_idle_runners: row.get(12)?,
        runner_prefix: row.get(13)?,
        generation: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

/// Converts a scale set row into a [`ScaleSet`].
fn scale_set_from_row(operation: &'static str, row: ScaleSetRow) -> Result<ScaleSet, StoreError> {
    Ok(ScaleSet {
        id: column_id(operation, &row.id)?,
        owner: stored_owner(
            operation,
            row.repo_id.as_deref(),
            row.org_id.as_deref(),
            row.enterprise_id.as_deref(),
        )?,
        name: row.name,
        provider_name: row.provider_name,
        image: row.image,
        flavor: row.flavor,
        os_type: stored_label(operation, &row.os_type, OsType::parse)?,
        os_arch: stored_label(operation, &row.os_arch, OsArch::parse)?,
        enabled: row.enabled,
        max_runners: row.max_runners,
        min_idle_runners: row.min_idle_runners,
        runner_prefix: row.runner_prefix,
        generation: from_sql_u64(operation, row.generation)?,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

/// Loads one scale set by id.
pub(crate) fn load_scale_set(
    connection: &Connection,
    operation: &'static str,
    scale_set_id: &EntityId,
) -> Result<ScaleSet, StoreError> {
    let row = connection
        .query_row(
            &format!("SELECT {SCALE_SET_COLUMNS} FROM scale_sets WHERE id = ?1"),
            params![scale_set_id.to_key()],
            read_scale_set_row,
        )
        .optional()
        .map_err(|err| db_error(operation, &err))?
        .ok_or_else(|| StoreError::not_found(operation, format!("scale set not found: {scale_set_id}")))?;
    scale_set_from_row(operation, row)
}

/// Fails with [`StoreError::Conflict`] when the owner already has a scale set
/// named `name` other than `except`.
fn require_unique_scale_set_name(
    connection: &Connection,
    operation: &'static str,
    owner: &OwnerRef,
    name: &str,
    except: Option<&EntityId>,
) -> Result<(), StoreError> {
    let existing: Option<String> = connection
        .query_row(
            &format!("SELECT id FROM scale_sets WHERE {} = ?1 AND name = ?2", owner_column(owner.kind)),
            params![owner.id.to_key(), name],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| db_error(operation, &err))?;
    match existing {
        Some(id) if except.map(EntityId::to_key).as_deref() != Some(id.as_str()) => Err(
            StoreError::conflict(operation, format!("scale set {name} already exists for {owner}")),
        ),
        _ => Ok(()),
    }
}

// ============================================================================
// SECTION: Pools
// ============================================================================

impl SqliteStore {
    /// Creates a pool under `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for invalid settings and
    /// [`StoreError::NotFound`] when the owner is absent.
    pub fn create_pool(&self, owner: &OwnerRef, params: CreatePoolParams) -> Result<Pool, StoreError> {
        let op = "create_pool";
        params.validate().map_err(|err| err.with_operation(op))?;
        let now = unix_millis();
        let pool = Pool {
            id: EntityId::generate(),
            owner: *owner,
            provider_name: params.provider_name,
            image: params.image,
            flavor: params.flavor,
            os_type: params.os_type,
            os_arch: params.os_arch,
            tags: normalize_tags(&params.tags),
            enabled: params.enabled,
            max_runners: params.max_runners,
            min_idle_runners: params.min_idle_runners,
            runner_prefix: params.runner_prefix,
            runner_bootstrap_timeout: params.runner_bootstrap_timeout,
            priority: params.priority,
            extra_specs: params.extra_specs,
            generation: 0,
            created_at: now,
            updated_at: now,
        };
        let extra_specs = extra_specs_text(op, &pool)?;
        self.write_tx(op, |tx| {
            require_owner(tx, op, owner)?;
            let key = pool.id.to_key();
            let (repo_id, org_id, enterprise_id) = owner.to_columns();
            tx.execute(
                &format!(
                    "INSERT INTO pools ({POOL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, \
                     ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
                ),
                params![
                    key,
                    repo_id,
                    org_id,
                    enterprise_id,
                    pool.provider_name,
                    pool.image,
                    pool.flavor,
                    pool.os_type.as_str(),
                    pool.os_arch.as_str(),
                    pool.enabled,
                    pool.max_runners,
                    pool.min_idle_runners,
                    pool.runner_prefix,
                    pool.runner_bootstrap_timeout,
                    pool.priority,
                    extra_specs,
                    0_i64,
                    now,
                    now
                ],
            )
            .map_err(|err| db_error(op, &err))?;
            write_pool_tags(tx, op, &key, &pool.tags)
        })?;
        debug!(pool_id = %pool.id, owner = %owner, "created pool");
        self.publish(Operation::Create, ChangePayload::Pool(pool.clone()));
        Ok(pool)
    }

    /// Returns a pool by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for a malformed id and
    /// [`StoreError::NotFound`] when absent.
    pub fn get_pool(&self, pool_id: &str) -> Result<Pool, StoreError> {
        let op = "get_pool";
        let id = parse_id(op, pool_id)?;
        self.read(op, |connection| load_pool(connection, op, &id))
    }

    /// Returns one page of an owner's pools, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn list_owner_pools(
        &self,
        owner: &OwnerRef,
        request: PageRequest,
    ) -> Result<Page<Pool>, StoreError> {
        let op = "list_owner_pools";
        let predicate = format!("{} = ?", owner_column(owner.kind));
        self.pool_page(op, &predicate, vec![Value::Text(owner.id.to_key())], request)
    }

    /// Returns one page of every pool, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn list_all_pools(&self, request: PageRequest) -> Result<Page<Pool>, StoreError> {
        let op = "list_all_pools";
        self.pool_page(op, "1 = 1", Vec::new(), request)
    }

    /// Counts and fetches one page of pools matching `predicate`.
    fn pool_page(
        &self,
        operation: &'static str,
        predicate: &str,
        values: Vec<Value>,
        request: PageRequest,
    ) -> Result<Page<Pool>, StoreError> {
        self.read(operation, |connection| {
            read_page(
                connection,
                operation,
                &format!("SELECT COUNT(*) FROM pools WHERE {predicate}"),
                values,
                request,
                |paged| {
                    query_pools(
                        connection,
                        operation,
                        &format!(
                            "SELECT {POOL_COLUMNS} FROM pools WHERE {predicate} \
                             ORDER BY created_at, id LIMIT ? OFFSET ?"
                        ),
                        paged,
                    )
                },
            )
        })
    }

    /// Applies a partial update, bumping the generation when provisioning
    /// settings change.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when the result is invalid and
    /// [`StoreError::NotFound`] when absent.
    pub fn update_pool(&self, pool_id: &str, params: UpdatePoolParams) -> Result<Pool, StoreError> {
        let op = "update_pool";
        let id = parse_id(op, pool_id)?;
        let (pool, bumped) = self.write_tx(op, |tx| {
            let current = load_pool(tx, op, &id)?;
            let (mut next, bumped) = params.apply(&current).map_err(|err| err.with_operation(op))?;
            next.updated_at = unix_millis();
            let extra_specs = extra_specs_text(op, &next)?;
            let key = id.to_key();
            tx.execute(
                "UPDATE pools SET provider_name = ?1, image = ?2, flavor = ?3, os_type = ?4, \
                 os_arch = ?5, enabled = ?6, max_runners = ?7, min_idle_runners = ?8, \
                 runner_prefix = ?9, runner_bootstrap_timeout = ?10, priority = ?11, \
                 extra_specs = ?12, generation = ?13, updated_at = ?14 WHERE id = ?15",
                params![
                    next.provider_name,
                    next.image,
                    next.flavor,
                    next.os_type.as_str(),
                    next.os_arch.as_str(),
                    next.enabled,
                    next.max_runners,
                    next.min_idle_runners,
                    next.runner_prefix,
                    next.runner_bootstrap_timeout,
                    next.priority,
                    extra_specs,
                    to_sql_u64(op, next.generation)?,
                    next.updated_at,
                    key
                ],
            )
            .map_err(|err| db_error(op, &err))?;
            if next.tags != current.tags {
                write_pool_tags(tx, op, &key, &next.tags)?;
            }
            Ok((next, bumped))
        })?;
        debug!(pool_id = %pool.id, generation = pool.generation, bumped, "updated pool");
        self.publish(Operation::Update, ChangePayload::Pool(pool.clone()));
        Ok(pool)
    }

    /// Deletes a pool and its instances; absent pools are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for a malformed id.
    pub fn delete_pool(&self, pool_id: &str) -> Result<(), StoreError> {
        let op = "delete_pool";
        let id = parse_id(op, pool_id)?;
        let deleted = self.write_tx(op, |tx| {
            let pool = match load_pool(tx, op, &id) {
                Ok(pool) => pool,
                Err(StoreError::NotFound {
                    ..
                }) => return Ok(None),
                Err(err) => return Err(err),
            };
            tx.execute("DELETE FROM pools WHERE id = ?1", params![id.to_key()])
                .map_err(|err| db_error(op, &err))?;
            Ok(Some(pool))
        })?;
        if let Some(pool) = deleted {
            debug!(pool_id = %pool.id, "deleted pool");
            self.publish(Operation::Delete, ChangePayload::Pool(pool));
        }
        Ok(())
    }

    /// Returns the owner's enabled pools carrying every tag in `tags`,
    /// highest priority first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when `tags` is empty after
    /// normalization.
    pub fn find_pools_matching_all_tags(
        &self,
        owner: &OwnerRef,
        tags: &[String],
    ) -> Result<Vec<Pool>, StoreError> {
        let op = "find_pools_matching_all_tags";
        let tags = normalize_tags(tags);
        if tags.is_empty() {
            return Err(StoreError::invalid(op, "at least one tag is required"));
        }
        let placeholders = vec!["?"; tags.len()].join(", ");
        let sql = format!(
            "SELECT {POOL_COLUMNS} FROM pools WHERE {} = ? AND enabled = 1 AND id IN (\
             SELECT pool_id FROM pool_tags WHERE tag IN ({placeholders}) \
             GROUP BY pool_id HAVING COUNT(DISTINCT tag) = ?) \
             ORDER BY priority DESC, created_at, id",
            owner_column(owner.kind)
        );
        let count = i64::try_from(tags.len()).map_err(|_| StoreError::invalid(op, "too many tags"))?;
        let mut values = Vec::with_capacity(tags.len() + 2);
        values.push(Value::Text(owner.id.to_key()));
        values.extend(tags.into_iter().map(Value::Text));
        values.push(Value::Integer(count));
        self.read(op, |connection| query_pools(connection, op, &sql, values))
    }

    // ------------------------------------------------------------------------
    // Scale sets
    // ------------------------------------------------------------------------

    /// Creates a scale set under `owner`; names are unique per owner.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for invalid settings,
    /// [`StoreError::NotFound`] when the owner is absent, and
    /// [`StoreError::Conflict`] when the name is taken.
    pub fn create_scale_set(
        &self,
        owner: &OwnerRef,
        params: CreateScaleSetParams,
    ) -> Result<ScaleSet, StoreError> {
        let op = "create_scale_set";
        params.validate().map_err(|err| err.with_operation(op))?;
        let now = unix_millis();
        let scale_set = ScaleSet {
            id: EntityId::generate(),
            owner: *owner,
            name: params.name,
            provider_name: params.provider_name,
            image: params.image,
            flavor: params.flavor,
            os_type: params.os_type,
            os_arch: params.os_arch,
            enabled: params.enabled,
            max_runners: params.max_runners,
            min_idle_runners: params.min_idle_runners,
            runner_prefix: params.runner_prefix,
            generation: 0,
            created_at: now,
            updated_at: now,
        };
        self.write_tx(op, |tx| {
            require_owner(tx, op, owner)?;
            require_unique_scale_set_name(tx, op, owner, &scale_set.name, None)?;
            let (repo_id, org_id, enterprise_id) = owner.to_columns();
            tx.execute(
                &format!(
                    "INSERT INTO scale_sets ({SCALE_SET_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, \
                     ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
                ),
                params![
                    scale_set.id.to_key(),
                    repo_id,
                    org_id,
                    enterprise_id,
                    scale_set.name,
                    scale_set.provider_name,
                    scale_set.image,
                    scale_set.flavor,
                    scale_set.os_type.as_str(),
                    scale_set.os_arch.as_str(),
                    scale_set.enabled,
                    scale_set.max_runners,
                    scale_set.min_idle_runners,
                    scale_set.runner_prefix,
                    0_i64,
                    now,
                    now
                ],
            )
            .map_err(|err| db_error(op, &err))?;
            Ok(())
        })?;
        debug!(scale_set_id = %scale_set.id, owner = %owner, "created scale set");
        self.publish(Operation::Create, ChangePayload::ScaleSet(scale_set.clone()));
        Ok(scale_set)
    }

    /// Returns a scale set by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for a malformed id and
    /// [`StoreError::NotFound`] when absent.
    pub fn get_scale_set(&self, scale_set_id: &str) -> Result<ScaleSet, StoreError> {
        let op = "get_scale_set";
        let id = parse_id(op, scale_set_id)?;
        self.read(op, |connection| load_scale_set(connection, op, &id))
    }

    /// Returns one page of an owner's scale sets ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn list_owner_scale_sets(
        &self,
        owner: &OwnerRef,
        request: PageRequest,
    ) -> Result<Page<ScaleSet>, StoreError> {
        let op = "list_owner_scale_sets";
        let column = owner_column(owner.kind);
        let rows = self.read(op, |connection| {
            read_page(
                connection,
                op,
                &format!("SELECT COUNT(*) FROM scale_sets WHERE {column} = ?"),
                vec![Value::Text(owner.id.to_key())],
                request,
                |paged| {
                    let mut stmt = connection
                        .prepare(&format!(
                            "SELECT {SCALE_SET_COLUMNS} FROM scale_sets WHERE {column} = ? \
                             ORDER BY name LIMIT ? OFFSET ?"
                        ))
                        .map_err(|err| db_error(op, &err))?;
                    let rows = stmt
                        .query_map(params_from_iter(paged), read_scale_set_row)
                        .map_err(|err| db_error(op, &err))?;
                    rows.collect::<Result<Vec<_>, _>>().map_err(|err| db_error(op, &err))
                },
            )
        })?;
        rows.try_map(|row| scale_set_from_row(op, row))
    }

    /// Applies a partial update to a scale set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when the result is invalid,
    /// [`StoreError::NotFound`] when absent, and [`StoreError::Conflict`] when
    /// a rename collides.
    pub fn update_scale_set(
        &self,
        scale_set_id: &str,
        params: UpdateScaleSetParams,
    ) -> Result<ScaleSet, StoreError> {
        let op = "update_scale_set";
        let id = parse_id(op, scale_set_id)?;
        let scale_set = self.write_tx(op, |tx| {
            let current = load_scale_set(tx, op, &id)?;
            let mut next = params.apply(&current).map_err(|err| err.with_operation(op))?;
            if next.name != current.name {
                require_unique_scale_set_name(tx, op, &next.owner, &next.name, Some(&id))?;
            }
            next.updated_at = unix_millis();
            tx.execute(
                "UPDATE scale_sets SET name = ?1, image = ?2, flavor = ?3, os_type = ?4, \
                 os_arch = ?5, enabled = ?6, max_runners = ?7, min_idle_runners = ?8, \
                 runner_prefix = ?9, generation = ?10, updated_at = ?11 WHERE id = ?12",
                params![
                    next.name,
                    next.image,
                    next.flavor,
                    next.os_type.as_str(),
                    next.os_arch.as_str(),
                    next.enabled,
                    next.max_runners,
                    next.min_idle_runners,
                    next.runner_prefix,
                    to_sql_u64(op, next.generation)?,
                    next.updated_at,
                    id.to_key()
                ],
            )
            .map_err(|err| db_error(op, &err))?;
            Ok(next)
        })?;
        debug!(scale_set_id = %scale_set.id, generation = scale_set.generation, "updated scale set");
        self.publish(Operation::Update, ChangePayload::ScaleSet(scale_set.clone()));
        Ok(scale_set)
    }

    /// Deletes a scale set and its instances; absent scale sets are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for a malformed id.
    pub fn delete_scale_set(&self, scale_set_id: &str) -> Result<(), StoreError> {
        let op = "delete_scale_set";
        let id = parse_id(op, scale_set_id)?;
        let deleted = self.write_tx(op, |tx| {
            let scale_set = match load_scale_set(tx, op, &id) {
                Ok(scale_set) => scale_set,
                Err(StoreError::NotFound {
                    ..
                }) => return Ok(None),
                Err(err) => return Err(err),
            };
            tx.execute("DELETE FROM scale_sets WHERE id = ?1", params![id.to_key()])
                .map_err(|err| db_error(op, &err))?;
            Ok(Some(scale_set))
        })?;
        if let Some(scale_set) = deleted {
            debug!(scale_set_id = %scale_set.id, "deleted scale set");
            self.publish(Operation::Delete, ChangePayload::ScaleSet(scale_set));
        }
        Ok(())
    }
}
