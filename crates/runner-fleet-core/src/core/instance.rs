// crates/runner-fleet-core/src/core/instance.rs
// ============================================================================
// Module: Runner Fleet Instances
// Description: Ephemeral compute units provisioned to service jobs.
// Purpose: Model instance lifecycle, addresses, and status history.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! An instance belongs to exactly one pool or one scale set, recorded as an
//! [`InstanceParent`]. Instances are hard-deleted on teardown; their addresses
//! and status messages go with them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::EntityId;
use crate::core::owner::require_non_empty;
use crate::core::pool::OsArch;
use crate::core::pool::OsType;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Provider-side lifecycle of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Admitted but not yet handed to a provider.
    #[default]
    PendingCreate,
    /// Provider is creating the machine.
    Creating,
    /// Machine is running.
    Running,
    /// Machine is stopped.
    Stopped,
    /// Provisioning failed.
    Error,
    /// Scheduled for teardown.
    PendingDelete,
    /// Provider is tearing the machine down.
    Deleting,
}

impl InstanceStatus {
    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingCreate => "pending_create",
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::PendingDelete => "pending_delete",
            Self::Deleting => "deleting",
        }
    }

    /// Parses a stored label.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for unknown labels.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "pending_create" => Ok(Self::PendingCreate),
            "creating" => Ok(Self::Creating),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            "pending_delete" => Ok(Self::PendingDelete),
            "deleting" => Ok(Self::Deleting),
            other => Err(StoreError::invalid(
                "parse_instance_status",
                format!("unknown instance status: {other}"),
            )),
        }
    }
}

/// Runner-agent lifecycle inside an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    /// Agent not yet installed.
    #[default]
    Pending,
    /// Agent is installing.
    Installing,
    /// Agent is registered and waiting for work.
    Idle,
    /// Agent is running a job.
    Active,
    /// Agent failed to install or register.
    Failed,
    /// Agent finished and exited.
    Terminated,
}

impl RunnerStatus {
    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Installing => "installing",
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }

    /// Parses a stored label.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for unknown labels.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "pending" => Ok(Self::Pending),
            "installing" => Ok(Self::Installing),
            "idle" => Ok(Self::Idle),
            "active" => Ok(Self::Active),
            "failed" => Ok(Self::Failed),
            "terminated" => Ok(Self::Terminated),
            other => Err(StoreError::invalid(
                "parse_runner_status",
                format!("unknown runner status: {other}"),
            )),
        }
    }
}

// ============================================================================
// SECTION: Addresses and Messages
// ============================================================================

/// Network reachability of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressKind {
    /// Publicly routable.
    Public,
    /// Private network only.
    Private,
}

impl AddressKind {
    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    /// Parses a stored label.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for unknown labels.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(StoreError::invalid(
                "parse_address_kind",
                format!("unknown address kind: {other}"),
            )),
        }
    }
}

/// One network address of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Address literal.
    pub address: String,
    /// Reachability.
    pub kind: AddressKind,
}

/// Append-only status history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Message text.
    pub message: String,
    /// Event category reported by the provisioner.
    pub event_type: String,
    /// Record time in unix milliseconds.
    pub created_at: i64,
}

// ============================================================================
// SECTION: Instances
// ============================================================================

/// Template an instance was admitted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum InstanceParent {
    /// Admitted under a pool.
    Pool(EntityId),
    /// Admitted under a scale set.
    ScaleSet(EntityId),
}

impl InstanceParent {
    /// Returns the pool identifier when the parent is a pool.
    #[must_use]
    pub const fn pool_id(&self) -> Option<EntityId> {
        match self {
            Self::Pool(id) => Some(*id),
            Self::ScaleSet(_) => None,
        }
    }

    /// Returns the scale set identifier when the parent is a scale set.
    #[must_use]
    pub const fn scale_set_id(&self) -> Option<EntityId> {
        match self {
            Self::Pool(_) => None,
            Self::ScaleSet(id) => Some(*id),
        }
    }
}

/// One ephemeral runner machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance identifier.
    pub id: EntityId,
    /// Unique runner name.
    pub name: String,
    /// Pool or scale set the instance belongs to.
    pub parent: InstanceParent,
    /// Provider-assigned machine identifier.
    pub provider_id: Option<String>,
    /// Forge-assigned runner agent identifier.
    pub agent_id: Option<i64>,
    /// Operating system family, copied from the parent.
    pub os_type: OsType,
    /// CPU architecture, copied from the parent.
    pub os_arch: OsArch,
    /// Reported OS name.
    pub os_name: Option<String>,
    /// Reported OS version.
    pub os_version: Option<String>,
    /// Provider-side lifecycle.
    pub status: InstanceStatus,
    /// Runner-agent lifecycle.
    pub runner_status: RunnerStatus,
    /// Network addresses.
    pub addresses: Vec<Address>,
    /// Status history, oldest first.
    pub status_messages: Vec<StatusMessage>,
    /// Number of provisioning attempts.
    pub create_attempt: u32,
    /// Whether the agent already fetched its registration token.
    pub token_fetched: bool,
    /// Decrypted just-in-time runner configuration.
    #[serde(skip_serializing)]
    pub jit_configuration: Option<String>,
    /// Parent generation at admission time.
    pub generation: u64,
    /// Creation time in unix milliseconds.
    pub created_at: i64,
    /// Last update time in unix milliseconds.
    pub updated_at: i64,
}

/// Input for admitting a new instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreateInstanceParams {
    /// Unique runner name.
    pub name: String,
    /// Initial provider-side status.
    pub status: InstanceStatus,
    /// Initial runner-agent status.
    pub runner_status: RunnerStatus,
    /// Just-in-time runner configuration, sealed before storage.
    pub jit_configuration: Option<String>,
}

impl CreateInstanceParams {
    /// Creates parameters with default statuses.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Validates the runner name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when the name is empty.
    pub fn validate(&self) -> Result<(), StoreError> {
        require_non_empty("create_instance", "name", &self.name)
    }
}

/// Partial update from provisioning callbacks; `None` leaves a field unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateInstanceParams {
    /// Provider-assigned machine identifier.
    pub provider_id: Option<String>,
    /// Forge-assigned agent identifier.
    pub agent_id: Option<i64>,
    /// Reported OS name.
    pub os_name: Option<String>,
    /// Reported OS version.
    pub os_version: Option<String>,
    /// New provider-side status.
    pub status: Option<InstanceStatus>,
    /// New runner-agent status.
    pub runner_status: Option<RunnerStatus>,
    /// Replacement address set.
    pub addresses: Option<Vec<Address>>,
    /// New provisioning attempt count.
    pub create_attempt: Option<u32>,
    /// New token-fetched flag.
    pub token_fetched: Option<bool>,
    /// Replacement just-in-time configuration.
    pub jit_configuration: Option<String>,
}

impl UpdateInstanceParams {
    /// Validates supplied fields.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for empty identifiers or addresses.
    pub fn validate(&self) -> Result<(), StoreError> {
        if let Some(provider_id) = &self.provider_id {
            require_non_empty("update_instance", "provider_id", provider_id)?;
        }
        if let Some(addresses) = &self.addresses {
            for address in addresses {
                require_non_empty("update_instance", "address", &address.address)?;
            }
        }
        Ok(())
    }
}
