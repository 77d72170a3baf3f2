// crates/runner-fleet-store-sqlite/src/owners.rs
// ============================================================================
// Module: SQLite Owners and Credentials
// Description: Credentials records and the three owner tables.
// Purpose: Persist ownership roots with secrets sealed at rest.
// Dependencies: runner-fleet-core, rusqlite, tracing
// ============================================================================

//! ## Overview
//! Owners are one logical type stored in three tables (`repositories`,
//! `organizations`, `enterprises`). Callers name credentials by name; rows
//! reference them by id. Webhook secrets and credential payloads are sealed
//! before insert and opened after select, so a mismatched passphrase surfaces
//! as [`StoreError::Encoding`] on read.

// ============================================================================
// SECTION: Imports
// ============================================================================

use runner_fleet_core::AuthType;
use runner_fleet_core::ChangePayload;
use runner_fleet_core::CreateCredentialsParams;
use runner_fleet_core::CreateOwnerParams;
use runner_fleet_core::Credentials;
use runner_fleet_core::EntityId;
use runner_fleet_core::Operation;
use runner_fleet_core::Owner;
use runner_fleet_core::OwnerKind;
use runner_fleet_core::OwnerRef;
use runner_fleet_core::Page;
use runner_fleet_core::PageRequest;
use runner_fleet_core::PoolBalancer;
use runner_fleet_core::StoreError;
use runner_fleet_core::UpdateCredentialsParams;
use runner_fleet_core::UpdateOwnerParams;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use rusqlite::params_from_iter;
use tracing::debug;

use crate::store::SqliteStore;
use crate::store::column_id;
use crate::store::db_error;
use crate::store::read_page;
use crate::store::unix_millis;

// ============================================================================
// SECTION: Rows
// ============================================================================

/// Credentials columns as stored.
struct CredentialsRow {
    /// Identifier column.
    id: String,
    /// Unique name.
    name: String,
    /// Description.
    description: String,
    /// Endpoint URL.
    endpoint: String,
    /// Auth type label.
    auth_type: String,
    /// Sealed secret.
    secret: Vec<u8>,
    /// Creation time.
    created_at: i64,
    /// Update time.
    updated_at: i64,
}

/// Column list matching [`read_credentials_row`].
const CREDENTIALS_COLUMNS: &str =
    "id, name, description, endpoint, auth_type, secret, created_at, updated_at";

/// Reads one credentials row.
fn read_credentials_row(row: &Row<'_>) -> rusqlite::Result<CredentialsRow> {
    Ok(CredentialsRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        endpoint: row.get(3)?,
        auth_type: row.get(4)?,
        secret: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Owner columns as stored, with the credentials name joined in.
struct OwnerRow {
    /// Identifier column.
    id: String,
    /// Namespace; `NULL` outside `repositories`.
    namespace: Option<String>,
    /// Owner name.
    name: String,
    /// Joined credentials name.
    credentials_name: String,
    /// Sealed webhook secret.
    webhook_secret: Vec<u8>,
    /// Balancer label.
    pool_balancer: String,
    /// Creation time.
    created_at: i64,
    /// Update time.
    updated_at: i64,
}

/// Reads one owner row selected with [`owner_select`].
fn read_owner_row(row: &Row<'_>) -> rusqlite::Result<OwnerRow> {
    Ok(OwnerRow {
        id: row.get(0)?,
        namespace: row.get(1)?,
        name: row.get(2)?,
        credentials_name: row.get(3)?,
        webhook_secret: row.get(4)?,
        pool_balancer: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Returns the physical table for an owner kind.
pub(crate) const fn owner_table(kind: OwnerKind) -> &'static str {
    match kind {
        OwnerKind::Repository => "repositories",
        OwnerKind::Organization => "organizations",
        OwnerKind::Enterprise => "enterprises",
    }
}

/// Returns the foreign-key column that references an owner kind.
pub(crate) const fn owner_column(kind: OwnerKind) -> &'static str {
    match kind {
        OwnerKind::Repository => "repo_id",
        OwnerKind::Organization => "org_id",
        OwnerKind::Enterprise => "enterprise_id",
    }
}

/// Builds the owner select, aliased `o`, joined to its credentials.
fn owner_select(kind: OwnerKind) -> String {
    let namespace = if kind == OwnerKind::Repository { "o.namespace" } else { "NULL" };
    format!(
        "SELECT o.id, {namespace}, o.name, c.name, o.webhook_secret, o.pool_balancer, \
         o.created_at, o.updated_at FROM {} o JOIN credentials c ON c.id = o.credentials_id",
        owner_table(kind)
    )
}

/// Returns true when the referenced owner row exists.
pub(crate) fn owner_exists(connection: &Connection, owner: &OwnerRef) -> rusqlite::Result<bool> {
    connection
        .query_row(
            &format!("SELECT 1 FROM {} WHERE id = ?1", owner_table(owner.kind)),
            params![owner.id.to_key()],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
}

/// Fails with [`StoreError::NotFound`] unless the owner exists.
pub(crate) fn require_owner(
    connection: &Connection,
    operation: &'static str,
    owner: &OwnerRef,
) -> Result<(), StoreError> {
    if owner_exists(connection, owner).map_err(|err| db_error(operation, &err))? {
        Ok(())
    } else {
        Err(StoreError::not_found(operation, format!("owner not found: {owner}")))
    }
}

/// Resolves a credentials name to its id.
fn credentials_id(
    connection: &Connection,
    operation: &'static str,
    name: &str,
) -> Result<String, StoreError> {
    connection
        .query_row("SELECT id FROM credentials WHERE name = ?1", params![name], |row| row.get(0))
        .optional()
        .map_err(|err| db_error(operation, &err))?
        .ok_or_else(|| StoreError::not_found(operation, format!("credentials not found: {name}")))
}

// ============================================================================
// SECTION: Credentials
// ============================================================================

impl SqliteStore {
    /// Creates a credentials record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for invalid input and
    /// [`StoreError::Conflict`] when the name is taken.
    pub fn create_credentials(
        &self,
        params: CreateCredentialsParams,
    ) -> Result<Credentials, StoreError> {
        let op = "create_credentials";
        params.validate().map_err(|err| err.with_operation(op))?;
        let sealed = self.cipher.seal_str(&params.secret).map_err(|err| err.with_operation(op))?;
        let now = unix_millis();
        let credentials = Credentials {
            id: EntityId::generate(),
            name: params.name,
            description: params.description,
            endpoint: params.endpoint,
            auth_type: params.auth_type,
            secret: params.secret,
            created_at: now,
            updated_at: now,
        };
        self.write_tx(op, |tx| {
            tx.execute(
                &format!("INSERT INTO credentials ({CREDENTIALS_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    credentials.id.to_key(),
                    credentials.name,
                    credentials.description,
                    credentials.endpoint,
                    credentials.auth_type.as_str(),
                    sealed,
                    now,
                    now
                ],
            )
            .map_err(|err| db_error(op, &err))?;
            Ok(())
        })?;
        debug!(credentials = %credentials.name, "created credentials");
        self.publish(Operation::Create, ChangePayload::Credentials(credentials.clone()));
        Ok(credentials)
    }

    /// Returns credentials by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when absent and
    /// [`StoreError::Encoding`] when the secret cannot be opened.
    pub fn get_credentials(&self, name: &str) -> Result<Credentials, StoreError> {
        let op = "get_credentials";
        let row = self.read(op, |connection| load_credentials(connection, op, name))?;
        self.credentials_from_row(op, row)
    }

    /// Returns one page of credentials ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query or decryption fails.
    pub fn list_credentials(&self, request: PageRequest) -> Result<Page<Credentials>, StoreError> {
        let op = "list_credentials";
        let rows = self.read(op, |connection| {
            read_page(connection, op, "SELECT COUNT(*) FROM credentials", Vec::new(), request, |paged| {
                let mut stmt = connection
                    .prepare(&format!(
                        "SELECT {CREDENTIALS_COLUMNS} FROM credentials ORDER BY name LIMIT ? OFFSET ?"
                    ))
                    .map_err(|err| db_error(op, &err))?;
                let rows = stmt
                    .query_map(params_from_iter(paged), read_credentials_row)
                    .map_err(|err| db_error(op, &err))?;
                rows.collect::<Result<Vec<_>, _>>().map_err(|err| db_error(op, &err))
            })
        })?;
        rows.try_map(|row| self.credentials_from_row(op, row))
    }

    /// Updates credentials in place.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when absent.
    pub fn update_credentials(
        &self,
        name: &str,
        params: UpdateCredentialsParams,
    ) -> Result<Credentials, StoreError> {
        let op = "update_credentials";
        params.validate().map_err(|err| err.with_operation(op))?;
        let sealed = params
            .secret
            .as_deref()
            .map(|secret| self.cipher.seal_str(secret))
            .transpose()
            .map_err(|err| err.with_operation(op))?;
        let credentials = self.write_tx(op, |tx| {
            let row = load_credentials(tx, op, name)?;
            let mut credentials = self.credentials_from_row(op, row)?;
            if let Some(description) = params.description {
                credentials.description = description;
            }
            if let Some(endpoint) = params.endpoint {
                credentials.endpoint = endpoint;
            }
            if let Some(secret) = params.secret {
                credentials.secret = secret;
            }
            credentials.updated_at = unix_millis();
            tx.execute(
                "UPDATE credentials SET description = ?1, endpoint = ?2, \
                 secret = COALESCE(?3, secret), updated_at = ?4 WHERE id = ?5",
                params![
                    credentials.description,
                    credentials.endpoint,
                    sealed,
                    credentials.updated_at,
                    credentials.id.to_key()
                ],
            )
            .map_err(|err| db_error(op, &err))?;
            Ok(credentials)
        })?;
        debug!(credentials = %credentials.name, "updated credentials");
        self.publish(Operation::Update, ChangePayload::Credentials(credentials.clone()));
        Ok(credentials)
    }

    /// Deletes credentials by name; absent credentials are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] while any owner references them.
    pub fn delete_credentials(&self, name: &str) -> Result<(), StoreError> {
        let op = "delete_credentials";
        let deleted = self.write_tx(op, |tx| {
            let row = match load_credentials(tx, op, name) {
                Ok(row) => row,
                Err(StoreError::NotFound {
                    ..
                }) => return Ok(None),
                Err(err) => return Err(err),
            };
            let mut references = 0_i64;
            for kind in OwnerKind::ALL {
                references += tx
                    .query_row(
                        &format!("SELECT COUNT(*) FROM {} WHERE credentials_id = ?1", owner_table(kind)),
                        params![row.id],
                        |row| row.get::<_, i64>(0),
                    )
                    .map_err(|err| db_error(op, &err))?;
            }
            if references > 0 {
                return Err(StoreError::conflict(
                    op,
                    format!("credentials {name} are referenced by {references} owners"),
                ));
            }
            tx.execute("DELETE FROM credentials WHERE id = ?1", params![row.id])
                .map_err(|err| db_error(op, &err))?;
            self.credentials_from_row(op, row).map(Some)
        })?;
        if let Some(credentials) = deleted {
            debug!(credentials = %credentials.name, "deleted credentials");
            self.publish(Operation::Delete, ChangePayload::Credentials(credentials));
        }
        Ok(())
    }

    /// Opens the sealed secret and parses stored labels.
    fn credentials_from_row(
        &self,
        operation: &'static str,
        row: CredentialsRow,
    ) -> Result<Credentials, StoreError> {
        Ok(Credentials {
            id: column_id(operation, &row.id)?,
            name: row.name,
            description: row.description,
            endpoint: row.endpoint,
            auth_type: AuthType::parse(&row.auth_type)
                .map_err(|err| StoreError::backend(operation, err.to_string()))?,
            secret: self.cipher.open_str(&row.secret).map_err(|err| err.with_operation(operation))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    // ------------------------------------------------------------------------
    // Owners
    // ------------------------------------------------------------------------

    /// Creates a repository, organization, or enterprise.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the credentials are unknown and
    /// [`StoreError::Conflict`] when the name is taken.
    pub fn create_owner(&self, params: CreateOwnerParams) -> Result<Owner, StoreError> {
        let op = "create_owner";
        params.validate().map_err(|err| err.with_operation(op))?;
        let sealed =
            self.cipher.seal_str(&params.webhook_secret).map_err(|err| err.with_operation(op))?;
        let now = unix_millis();
        let owner = Owner {
            id: EntityId::generate(),
            kind: params.kind,
            name: params.name,
            namespace: params.namespace,
            credentials_name: params.credentials_name,
            webhook_secret: params.webhook_secret,
            pool_balancer: params.pool_balancer,
            created_at: now,
            updated_at: now,
        };
        self.write_tx(op, |tx| {
            let credentials = credentials_id(tx, op, &owner.credentials_name)?;
            let table = owner_table(owner.kind);
            let result = if owner.kind == OwnerKind::Repository {
                tx.execute(
                    &format!(
                        "INSERT INTO {table} (id, namespace, name, credentials_id, webhook_secret, \
                         pool_balancer, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                    ),
                    params![
                        owner.id.to_key(),
                        owner.namespace,
                        owner.name,
                        credentials,
                        sealed,
                        owner.pool_balancer.as_str(),
                        now,
                        now
                    ],
                )
            } else {
                tx.execute(
                    &format!(
                        "INSERT INTO {table} (id, name, credentials_id, webhook_secret, \
                         pool_balancer, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                    ),
                    params![
                        owner.id.to_key(),
                        owner.name,
                        credentials,
                        sealed,
                        owner.pool_balancer.as_str(),
                        now,
                        now
                    ],
                )
            };
            result.map_err(|err| db_error(op, &err))?;
            Ok(())
        })?;
        debug!(owner = %owner.owner_ref(), name = %owner.name, "created owner");
        self.publish(Operation::Create, ChangePayload::Owner(owner.clone()));
        Ok(owner)
    }

    /// Returns an owner by reference.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when absent.
    pub fn get_owner(&self, owner: &OwnerRef) -> Result<Owner, StoreError> {
        let op = "get_owner";
        let row = self.read(op, |connection| load_owner(connection, op, owner))?;
        self.owner_from_row(op, owner.kind, row)
    }

    /// Returns an owner by name; repositories also need their namespace.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when the namespace does not fit
    /// the kind and [`StoreError::NotFound`] when absent.
    pub fn get_owner_by_name(
        &self,
        kind: OwnerKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Owner, StoreError> {
        let op = "get_owner_by_name";
        let select = owner_select(kind);
        let row = self.read(op, |connection| {
            let found = match (kind, namespace) {
                (OwnerKind::Repository, Some(namespace)) => connection.query_row(
                    &format!("{select} WHERE o.namespace = ?1 AND o.name = ?2"),
                    params![namespace, name],
                    read_owner_row,
                ),
                (OwnerKind::Repository, None) => {
                    return Err(StoreError::invalid(op, "repository lookups require a namespace"));
                }
                (_, Some(_)) => {
                    return Err(StoreError::invalid(op, format!("{kind} owners have no namespace")));
                }
                (_, None) => {
                    connection.query_row(&format!("{select} WHERE o.name = ?1"), params![name], read_owner_row)
                }
            };
            found
                .optional()
                .map_err(|err| db_error(op, &err))?
                .ok_or_else(|| StoreError::not_found(op, format!("{kind} not found: {name}")))
        })?;
        self.owner_from_row(op, kind, row)
    }

    /// Returns one page of owners of one kind ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query or decryption fails.
    pub fn list_owners(&self, kind: OwnerKind, request: PageRequest) -> Result<Page<Owner>, StoreError> {
        let op = "list_owners";
        let count_sql = format!("SELECT COUNT(*) FROM {}", owner_table(kind));
        let rows = self.read(op, |connection| {
            read_page(connection, op, &count_sql, Vec::new(), request, |paged| {
                let mut stmt = connection
                    .prepare(&format!("{} ORDER BY o.name, o.id LIMIT ? OFFSET ?", owner_select(kind)))
                    .map_err(|err| db_error(op, &err))?;
                let rows = stmt
                    .query_map(params_from_iter(paged), read_owner_row)
                    .map_err(|err| db_error(op, &err))?;
                rows.collect::<Result<Vec<_>, _>>().map_err(|err| db_error(op, &err))
            })
        })?;
        rows.try_map(|row| self.owner_from_row(op, kind, row))
    }

    /// Updates an owner's credentials, webhook secret, or balancer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the owner or the new credentials
    /// are absent.
    pub fn update_owner(
        &self,
        owner: &OwnerRef,
        params: UpdateOwnerParams,
    ) -> Result<Owner, StoreError> {
        let op = "update_owner";
        params.validate().map_err(|err| err.with_operation(op))?;
        let sealed = params
            .webhook_secret
            .as_deref()
            .map(|secret| self.cipher.seal_str(secret))
            .transpose()
            .map_err(|err| err.with_operation(op))?;
        let updated = self.write_tx(op, |tx| {
            let row = load_owner(tx, op, owner)?;
            let mut current = self.owner_from_row(op, owner.kind, row)?;
            let credentials = match &params.credentials_name {
                Some(name) => {
                    let id = credentials_id(tx, op, name)?;
                    current.credentials_name.clone_from(name);
                    Some(id)
                }
                None => None,
            };
            if let Some(secret) = params.webhook_secret {
                current.webhook_secret = secret;
            }
            if let Some(balancer) = params.pool_balancer {
                current.pool_balancer = balancer;
            }
            current.updated_at = unix_millis();
            tx.execute(
                &format!(
                    "UPDATE {} SET credentials_id = COALESCE(?1, credentials_id), \
                     webhook_secret = COALESCE(?2, webhook_secret), pool_balancer = ?3, \
                     updated_at = ?4 WHERE id = ?5",
                    owner_table(owner.kind)
                ),
                params![
                    credentials,
                    sealed,
                    current.pool_balancer.as_str(),
                    current.updated_at,
                    owner.id.to_key()
                ],
            )
            .map_err(|err| db_error(op, &err))?;
            Ok(current)
        })?;
        debug!(owner = %owner, "updated owner");
        self.publish(Operation::Update, ChangePayload::Owner(updated.clone()));
        Ok(updated)
    }

    /// Deletes an owner; pools and scale sets cascade, jobs are unlinked.
    ///
    /// Absent owners are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    pub fn delete_owner(&self, owner: &OwnerRef) -> Result<(), StoreError> {
        let op = "delete_owner";
        let deleted = self.write_tx(op, |tx| {
            let row = match load_owner(tx, op, owner) {
                Ok(row) => row,
                Err(StoreError::NotFound {
                    ..
                }) => return Ok(None),
                Err(err) => return Err(err),
            };
            let snapshot = self.owner_from_row(op, owner.kind, row)?;
            tx.execute(
                &format!("DELETE FROM {} WHERE id = ?1", owner_table(owner.kind)),
                params![owner.id.to_key()],
            )
            .map_err(|err| db_error(op, &err))?;
            Ok(Some(snapshot))
        })?;
        if let Some(snapshot) = deleted {
            debug!(owner = %owner, "deleted owner");
            self.publish(Operation::Delete, ChangePayload::Owner(snapshot));
        }
        Ok(())
    }

    /// Opens the webhook secret and parses stored labels.
    fn owner_from_row(
        &self,
        operation: &'static str,
        kind: OwnerKind,
        row: OwnerRow,
    ) -> Result<Owner, StoreError> {
        Ok(Owner {
            id: column_id(operation, &row.id)?,
            kind,
            name: row.name,
            namespace: row.namespace,
            credentials_name: row.credentials_name,
            webhook_secret: self
                .cipher
                .open_str(&row.webhook_secret)
                .map_err(|err| err.with_operation(operation))?,
            pool_balancer: PoolBalancer::parse(&row.pool_balancer)
                .map_err(|err| StoreError::backend(operation, err.to_string()))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ============================================================================
// SECTION: Loaders
// ============================================================================

/// Loads a credentials row by name.
fn load_credentials(
    connection: &Connection,
    operation: &'static str,
    name: &str,
) -> Result<CredentialsRow, StoreError> {
    connection
        .query_row(
            &format!("SELECT {CREDENTIALS_COLUMNS} FROM credentials WHERE name = ?1"),
            params![name],
            read_credentials_row,
        )
        .optional()
        .map_err(|err| db_error(operation, &err))?
        .ok_or_else(|| StoreError::not_found(operation, format!("credentials not found: {name}")))
}

/// Loads an owner row by reference.
fn load_owner(
    connection: &Connection,
    operation: &'static str,
    owner: &OwnerRef,
) -> Result<OwnerRow, StoreError> {
    connection
        .query_row(
            &format!("{} WHERE o.id = ?1", owner_select(owner.kind)),
            params![owner.id.to_key()],
            read_owner_row,
        )
        .optional()
        .map_err(|err| db_error(operation, &err))?
        .ok_or_else(|| StoreError::not_found(operation, format!("owner not found: {owner}")))
}
