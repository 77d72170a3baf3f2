// crates/runner-fleet-core/src/core/owner.rs
// ============================================================================
// Module: Runner Fleet Owners
// Description: Repositories, organizations, enterprises, and their credentials.
// Purpose: Model the ownership roots that pools, scale sets, and jobs hang off.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The three owner kinds share one logical shape: a name, a reference to a
//! credentials record, an encrypted webhook secret, and a pool-balancing
//! policy. Repositories are additionally scoped by a namespace (the
//! organization or user that owns them). Secrets appear here in plaintext;
//! the store seals them before they reach disk.

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
// SECTION: Credentials
// ============================================================================

/// How the fleet authenticates against the forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// Personal access token.
    #[default]
    Pat,
    /// App installation credentials.
    App,
}

impl AuthType {
    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pat => "pat",
            Self::App => "app",
        }
    }

    /// Parses a stored label.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for unknown labels.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "pat" => Ok(Self::Pat),
            "app" => Ok(Self::App),
            other => Err(StoreError::invalid("parse_auth_type", format!("unknown auth type: {other}"))),
        }
    }
}

/// Named forge credentials referenced by owners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Credentials identifier.
    pub id: EntityId,
    /// Unique credentials name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Forge API endpoint.
    pub endpoint: String,
    /// Authentication scheme.
    pub auth_type: AuthType,
    /// Decrypted secret payload.
    #[serde(skip_serializing)]
    pub secret: String,
    /// Creation time in unix milliseconds.
    pub created_at: i64,
    /// Last update time in unix milliseconds.
    pub updated_at: i64,
}

/// Input for creating credentials.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreateCredentialsParams {
    /// Unique credentials name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Forge API endpoint.
    pub endpoint: String,
    /// Authentication scheme.
    pub auth_type: AuthType,
    /// Secret payload, sealed before storage.
    pub secret: String,
}

impl CreateCredentialsParams {
    /// Validates required fields.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when a required field is empty.
    pub fn validate(&self) -> Result<(), StoreError> {
        require_non_empty("create_credentials", "name", &self.name)?;
        require_non_empty("create_credentials", "endpoint", &self.endpoint)?;
        require_non_empty("create_credentials", "secret", &self.secret)
    }
}

/// Partial update for credentials; `None` leaves a field unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateCredentialsParams {
    /// New description.
    pub description: Option<String>,
    /// New endpoint.
    pub endpoint: Option<String>,
    /// New secret payload.
    pub secret: Option<String>,
}

impl UpdateCredentialsParams {
    /// Validates supplied fields.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when a supplied field is empty.
    pub fn validate(&self) -> Result<(), StoreError> {
        if let Some(endpoint) = &self.endpoint {
            require_non_empty("update_credentials", "endpoint", endpoint)?;
        }
        if let Some(secret) = &self.secret {
            require_non_empty("update_credentials", "secret", secret)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Owners
// ============================================================================

/// Strategy used to pick a pool when several match a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolBalancer {
    /// Spread jobs across matching pools.
    #[default]
    RoundRobin,
    /// Fill the highest-priority pool first.
    Pack,
}

impl PoolBalancer {
    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Pack => "pack",
        }
    }

    /// Parses a stored label.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for unknown labels.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "round_robin" => Ok(Self::RoundRobin),
            "pack" => Ok(Self::Pack),
            other => {
                Err(StoreError::invalid("parse_pool_balancer", format!("unknown balancer: {other}")))
            }
        }
    }
}

/// A repository, organization, or enterprise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Owner identifier.
    pub id: EntityId,
    /// Owner kind.
    pub kind: OwnerKind,
    /// Owner name.
    pub name: String,
    /// Namespace for repositories; `None` for organizations and enterprises.
    pub namespace: Option<String>,
    /// Name of the credentials record used for forge calls.
    pub credentials_name: String,
    /// Decrypted webhook secret.
    #[serde(skip_serializing)]
    pub webhook_secret: String,
    /// Pool selection policy.
    pub pool_balancer: PoolBalancer,
    /// Creation time in unix milliseconds.
    pub created_at: i64,
    /// Last update time in unix milliseconds.
    pub updated_at: i64,
}

impl Owner {
    /// Returns the typed reference to this owner.
    #[must_use]
    pub const fn owner_ref(&self) -> OwnerRef {
        OwnerRef {
            kind: self.kind,
            id: self.id,
        }
    }
}

/// Input for creating an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOwnerParams {
    /// Owner kind.
    pub kind: OwnerKind,
    /// Owner name.
    pub name: String,
    /// Repository namespace; required for repositories only.
    pub namespace: Option<String>,
    /// Existing credentials name.
    pub credentials_name: String,
    /// Webhook secret, sealed before storage.
    pub webhook_secret: String,
    /// Pool selection policy.
    #[serde(default)]
    pub pool_balancer: PoolBalancer,
}

impl CreateOwnerParams {
    /// Validates required fields and namespace placement.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when a required field is empty
    /// or the namespace does not match the owner kind.
    pub fn validate(&self) -> Result<(), StoreError> {
        require_non_empty("create_owner", "name", &self.name)?;
        require_non_empty("create_owner", "credentials_name", &self.credentials_name)?;
        require_non_empty("create_owner", "webhook_secret", &self.webhook_secret)?;
        match (self.kind, self.namespace.as_deref()) {
            (OwnerKind::Repository, Some(namespace)) => {
                require_non_empty("create_owner", "namespace", namespace)
            }
            (OwnerKind::Repository, None) => {
                Err(StoreError::invalid("create_owner", "repositories require a namespace"))
            }
            (_, Some(_)) => Err(StoreError::invalid(
                "create_owner",
                format!("{} owners do not take a namespace", self.kind),
            )),
            (_, None) => Ok(()),
        }
    }
}

/// Partial update for an owner; `None` leaves a field unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateOwnerParams {
    /// New credentials name.
    pub credentials_name: Option<String>,
    /// New webhook secret.
    pub webhook_secret: Option<String>,
    /// New pool selection policy.
    pub pool_balancer: Option<PoolBalancer>,
}

impl UpdateOwnerParams {
    /// Validates supplied fields.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when a supplied field is empty.
    pub fn validate(&self) -> Result<(), StoreError> {
        if let Some(name) = &self.credentials_name {
            require_non_empty("update_owner", "credentials_name", name)?;
        }
        if let Some(secret) = &self.webhook_secret {
            require_non_empty("update_owner", "webhook_secret", secret)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Rejects empty or whitespace-only values.
pub(crate) fn require_non_empty(
    operation: &'static str,
    field: &str,
    value: &str,
) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::invalid(operation, format!("{field} must not be empty")));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
