// crates/runner-fleet-core/src/core/pool.rs
// ============================================================================
// Module: Runner Fleet Pools
// Description: Pool and scale set templates for ephemeral runner instances.
// Purpose: Describe provisioning settings, capacity ceilings, and generations.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Pools and scale sets are templates plus a capacity ceiling. Both carry a
//! `generation` counter that the store bumps whenever a provisioning-relevant
//! setting changes; instances copy it at creation so stale runners can be
//! detected later.
//!
//! ## Invariants
//! - `max_runners > 0` and `min_idle_runners <= max_runners`.
//! - `generation` never decreases.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::EntityId;
use crate::core::identifiers::OwnerRef;
use crate::core::owner::require_non_empty;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Platform
// ============================================================================

/// Operating system family of a runner image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsType {
    /// Linux.
    #[default]
    Linux,
    /// Windows.
    Windows,
}

impl OsType {
    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
        }
    }

    /// Parses a stored label.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for unknown labels.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "linux" => Ok(Self::Linux),
            "windows" => Ok(Self::Windows),
            other => Err(StoreError::invalid("parse_os_type", format!("unknown os type: {other}"))),
        }
    }
}

/// CPU architecture of a runner image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsArch {
    /// 64-bit x86.
    #[default]
    Amd64,
    /// 64-bit ARM.
    Arm64,
    /// 32-bit ARM.
    Arm,
}

impl OsArch {
    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::Arm => "arm",
        }
    }

    /// Parses a stored label.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for unknown labels.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "amd64" => Ok(Self::Amd64),
            "arm64" => Ok(Self::Arm64),
            "arm" => Ok(Self::Arm),
            other => Err(StoreError::invalid("parse_os_arch", format!("unknown os arch: {other}"))),
        }
    }
}

// ============================================================================
// SECTION: Pools
// ============================================================================

/// Runner template with a capacity ceiling under one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    /// Pool identifier.
    pub id: EntityId,
    /// Owning repository, organization, or enterprise.
    pub owner: OwnerRef,
    /// Provider plugin name.
    pub provider_name: String,
    /// Provider image reference.
    pub image: String,
    /// Provider flavor (instance size).
    pub flavor: String,
    /// Operating system family.
    pub os_type: OsType,
    /// CPU architecture.
    pub os_arch: OsArch,
    /// Normalized tag set.
    pub tags: Vec<String>,
    /// Whether the pool accepts new jobs.
    pub enabled: bool,
    /// Upper bound on live instances.
    pub max_runners: u32,
    /// Idle instances the autoscaler keeps warm.
    pub min_idle_runners: u32,
    /// Prefix for generated runner names.
    pub runner_prefix: String,
    /// Minutes a runner may take to come online.
    pub runner_bootstrap_timeout: u32,
    /// Selection priority; higher wins.
    pub priority: u32,
    /// Provider-specific settings.
    pub extra_specs: Option<Value>,
    /// Provisioning generation.
    pub generation: u64,
    /// Creation time in unix milliseconds.
    pub created_at: i64,
    /// Last update time in unix milliseconds.
    pub updated_at: i64,
}

/// Input for creating a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePoolParams {
    /// Provider plugin name.
    pub provider_name: String,
    /// Provider image reference.
    pub image: String,
    /// Provider flavor.
    pub flavor: String,
    /// Operating system family.
    pub os_type: OsType,
    /// CPU architecture.
    pub os_arch: OsArch,
    /// Tags; normalized by the store.
    pub tags: Vec<String>,
    /// Whether the pool accepts new jobs.
    pub enabled: bool,
    /// Upper bound on live instances.
    pub max_runners: u32,
    /// Idle instances the autoscaler keeps warm.
    pub min_idle_runners: u32,
    /// Prefix for generated runner names.
    pub runner_prefix: String,
    /// Minutes a runner may take to come online.
    pub runner_bootstrap_timeout: u32,
    /// Selection priority.
    pub priority: u32,
    /// Provider-specific settings.
    pub extra_specs: Option<Value>,
}

impl Default for CreatePoolParams {
    fn default() -> Self {
        Self {
            provider_name: String::new(),
            image: String::new(),
            flavor: String::new(),
            os_type: OsType::default(),
            os_arch: OsArch::default(),
            tags: Vec::new(),
            enabled: true,
            max_runners: 1,
            min_idle_runners: 0,
            runner_prefix: "runner".to_string(),
            runner_bootstrap_timeout: 20,
            priority: 0,
            extra_specs: None,
        }
    }
}

impl CreatePoolParams {
    /// Validates provisioning fields and capacity bounds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when a field is empty or the
    /// capacity bounds are inconsistent.
    pub fn validate(&self) -> Result<(), StoreError> {
        require_non_empty("create_pool", "provider_name", &self.provider_name)?;
        require_non_empty("create_pool", "image", &self.image)?;
        require_non_empty("create_pool", "flavor", &self.flavor)?;
        validate_capacity("create_pool", self.max_runners, self.min_idle_runners)
    }
}

/// Partial update for a pool; `None` leaves a field unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdatePoolParams {
    /// New provider plugin name.
    pub provider_name: Option<String>,
    /// New image reference.
    pub image: Option<String>,
    /// New flavor.
    pub flavor: Option<String>,
    /// New operating system family.
    pub os_type: Option<OsType>,
    /// New CPU architecture.
    pub os_arch: Option<OsArch>,
    /// Replacement tag set.
    pub tags: Option<Vec<String>>,
    /// New enabled flag.
    pub enabled: Option<bool>,
    /// New capacity ceiling.
    pub max_runners: Option<u32>,
    /// New idle floor.
    pub min_idle_runners: Option<u32>,
    /// New runner name prefix.
    pub runner_prefix: Option<String>,
    /// New bootstrap timeout in minutes.
    pub runner_bootstrap_timeout: Option<u32>,
    /// New priority.
    pub priority: Option<u32>,
    /// Replacement provider-specific settings.
    pub extra_specs: Option<Value>,
}

impl UpdatePoolParams {
    /// Applies the update to a copy of `current`, returning the new pool and
    /// whether the provisioning generation must be bumped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when the merged pool violates
    /// its field or capacity rules.
    pub fn apply(&self, current: &Pool) -> Result<(Pool, bool), StoreError> {
        let mut next = current.clone();
        if let Some(value) = &self.provider_name {
            next.provider_name.clone_from(value);
        }
        if let Some(value) = &self.image {
            next.image.clone_from(value);
        }
        if let Some(value) = &self.flavor {
            next.flavor.clone_from(value);
        }
        if let Some(value) = self.os_type {
            next.os_type = value;
        }
        if let Some(value) = self.os_arch {
            next.os_arch = value;
        }
        if let Some(value) = &self.tags {
            next.tags = crate::core::tags::normalize_tags(value);
        }
        if let Some(value) = self.enabled {
            next.enabled = value;
        }
        if let Some(value) = self.max_runners {
            next.max_runners = value;
        }
        if let Some(value) = self.min_idle_runners {
            next.min_idle_runners = value;
        }
        if let Some(value) = &self.runner_prefix {
            next.runner_prefix.clone_from(value);
        }
        if let Some(value) = self.runner_bootstrap_timeout {
            next.runner_bootstrap_timeout = value;
        }
        if let Some(value) = self.priority {
            next.priority = value;
        }
        if let Some(value) = &self.extra_specs {
            next.extra_specs = Some(value.clone());
        }
        require_non_empty("update_pool", "provider_name", &next.provider_name)?;
        require_non_empty("update_pool", "image", &next.image)?;
        require_non_empty("update_pool", "flavor", &next.flavor)?;
        validate_capacity("update_pool", next.max_runners, next.min_idle_runners)?;
        let bump = next.provider_name != current.provider_name
            || next.image != current.image
            || next.flavor != current.flavor
            || next.os_type != current.os_type
            || next.os_arch != current.os_arch
            || next.extra_specs != current.extra_specs;
        if bump {
            next.generation = current.generation.saturating_add(1);
        }
        Ok((next, bump))
    }
}

// ============================================================================
// SECTION: Scale Sets
// ============================================================================

/// Named runner template that the forge scales on the fleet's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSet {
    /// Scale set identifier.
    pub id: EntityId,
    /// Owning repository, organization, or enterprise.
    pub owner: OwnerRef,
    /// Scale set name, unique per owner.
    pub name: String,
    /// Provider plugin name.
    pub provider_name: String,
    /// Provider image reference.
    pub image: String,
    /// Provider flavor.
    pub flavor: String,
    /// Operating system family.
    pub os_type: OsType,
    /// CPU architecture.
    pub os_arch: OsArch,
    /// Whether the scale set accepts jobs.
    pub enabled: bool,
    /// Upper bound on live instances.
    pub max_runners: u32,
    /// Idle instances the autoscaler keeps warm.
    pub min_idle_runners: u32,
    /// Prefix for generated runner names.
    pub runner_prefix: String,
    /// Provisioning generation.
    pub generation: u64,
    /// Creation time in unix milliseconds.
    pub created_at: i64,
    /// Last update time in unix milliseconds.
    pub updated_at: i64,
}

/// Input for creating a scale set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateScaleSetParams {
    /// Scale set name.
    pub name: String,
    /// Provider plugin name.
    pub provider_name: String,
    /// Provider image reference.
    pub image: String,
    /// Provider flavor.
    pub flavor: String,
    /// Operating system family.
    pub os_type: OsType,
    /// CPU architecture.
    pub os_arch: OsArch,
    /// Whether the scale set accepts jobs.
    pub enabled: bool,
    /// Upper bound on live instances.
    pub max_runners: u32,
    /// Idle instances the autoscaler keeps warm.
    pub min_idle_runners: u32,
    /// Prefix for generated runner names.
    pub runner_prefix: String,
}

impl Default for CreateScaleSetParams {
    fn default() -> Self {
        Self {
            name: String::new(),
            provider_name: String::new(),
            image: String::new(),
            flavor: String::new(),
            os_type: OsType::default(),
            os_arch: OsArch::default(),
            enabled: true,
            max_runners: 1,
            min_idle_runners: 0,
            runner_prefix: "runner".to_string(),
        }
    }
}

impl CreateScaleSetParams {
    /// Validates the name, provisioning fields, and capacity bounds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] on empty fields or
    /// inconsistent capacity bounds.
    pub fn validate(&self) -> Result<(), StoreError> {
        require_non_empty("create_scale_set", "name", &self.name)?;
        require_non_empty("create_scale_set", "provider_name", &self.provider_name)?;
        require_non_empty("create_scale_set", "image", &self.image)?;
        require_non_empty("create_scale_set", "flavor", &self.flavor)?;
        validate_capacity("create_scale_set", self.max_runners, self.min_idle_runners)
    }
}

/// Partial update for a scale set; `None` leaves a field unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateScaleSetParams {
    /// New name.
    pub name: Option<String>,
    /// New image reference.
    pub image: Option<String>,
    /// New flavor.
    pub flavor: Option<String>,
    /// New operating system family.
    pub os_type: Option<OsType>,
    /// New CPU architecture.
    pub os_arch: Option<OsArch>,
    /// New enabled flag.
    pub enabled: Option<bool>,
    /// New capacity ceiling.
    pub max_runners: Option<u32>,
    /// New idle floor.
    pub min_idle_runners: Option<u32>,
    /// New runner name prefix.
    pub runner_prefix: Option<String>,
}

impl UpdateScaleSetParams {
    /// Applies the update to a copy of `current`, bumping the generation when
    /// the image, flavor, or platform changes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when the merged scale set is invalid.
    pub fn apply(&self, current: &ScaleSet) -> Result<ScaleSet, StoreError> {
        let mut next = current.clone();
        if let Some(value) = &self.name {
            next.name.clone_from(value);
        }
        if let Some(value) = &self.image {
            next.image.clone_from(value);
        }
        if let Some(value) = &self.flavor {
            next.flavor.clone_from(value);
        }
        if let Some(value) = self.os_type {
            next.os_type = value;
        }
        if let Some(value) = self.os_arch {
            next.os_arch = value;
        }
        if let Some(value) = self.enabled {
            next.enabled = value;
        }
        if let Some(value) = self.max_runners {
            next.max_runners = value;
        }
        if let Some(value) = self.min_idle_runners {
            next.min_idle_runners = value;
        }
        if let Some(value) = &self.runner_prefix {
            next.runner_prefix.clone_from(value);
        }
        require_non_empty("update_scale_set", "name", &next.name)?;
        require_non_empty("update_scale_set", "image", &next.image)?;
        require_non_empty("update_scale_set", "flavor", &next.flavor)?;
        validate_capacity("update_scale_set", next.max_runners, next.min_idle_runners)?;
        if next.image != current.image
            || next.flavor != current.flavor
            || next.os_type != current.os_type
            || next.os_arch != current.os_arch
        {
            next.generation = current.generation.saturating_add(1);
        }
        Ok(next)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Checks `max_runners > 0` and `min_idle_runners <= max_runners`.
fn validate_capacity(
    operation: &'static str,
    max_runners: u32,
    min_idle_runners: u32,
) -> Result<(), StoreError> {
    if max_runners == 0 {
        return Err(StoreError::invalid(operation, "max_runners must be greater than zero"));
    }
    if min_idle_runners > max_runners {
        return Err(StoreError::invalid(
            operation,
            "min_idle_runners must not exceed max_runners",
        ));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests unwrap deterministic fixtures.")]
mod tests {
    use super::*;
    use crate::interfaces::ErrorKind;

    fn pool() -> Pool {
        Pool {
            id: EntityId::generate(),
            owner: OwnerRef::organization(EntityId::generate()),
            provider_name: "lxd".to_string(),
            image: "ubuntu:24.04".to_string(),
            flavor: "small".to_string(),
            os_type: OsType::Linux,
            os_arch: OsArch::Amd64,
            tags: vec!["linux".to_string()],
            enabled: true,
            max_runners: 4,
            min_idle_runners: 1,
            runner_prefix: "runner".to_string(),
            runner_bootstrap_timeout: 20,
            priority: 10,
            extra_specs: None,
            generation: 3,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn image_change_bumps_generation() {
        let update = UpdatePoolParams {
            image: Some("ubuntu:26.04".to_string()),
            ..UpdatePoolParams::default()
        };
        let (next, bumped) = update.apply(&pool()).unwrap();
        assert!(bumped);
        assert_eq!(next.generation, 4);
    }

    #[test]
    fn capacity_change_keeps_generation() {
        let update = UpdatePoolParams {
            max_runners: Some(8),
            priority: Some(1),
            ..UpdatePoolParams::default()
        };
        let (next, bumped) = update.apply(&pool()).unwrap();
        assert!(!bumped);
        assert_eq!(next.generation, 3);
        assert_eq!(next.max_runners, 8);
    }

    #[test]
    fn idle_floor_above_ceiling_is_rejected() {
        let update = UpdatePoolParams {
            min_idle_runners: Some(9),
            ..UpdatePoolParams::default()
        };
        assert_eq!(update.apply(&pool()).unwrap_err().kind(), ErrorKind::InvalidArgument);
        let params = CreatePoolParams {
            provider_name: "lxd".to_string(),
            image: "img".to_string(),
            flavor: "small".to_string(),
            max_runners: 0,
            ..CreatePoolParams::default()
        };
        assert_eq!(params.validate().unwrap_err().kind(), ErrorKind::InvalidArgument);
    }
}
