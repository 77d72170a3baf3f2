// crates/runner-fleet-core/src/core/identifiers.rs
// ============================================================================
// Module: Runner Fleet Identifiers
// Description: Opaque entity identifiers and the polymorphic owner reference.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde, uuid
// ============================================================================

//! ## Overview
//! Entities are keyed by random UUIDs rendered in their hyphenated lowercase
//! form. Parsing distinguishes malformed input (`InvalidArgument`) from
//! lookups that later find nothing (`NotFound`). [`OwnerRef`] is the single
//! place where the repository / organization / enterprise exclusivity is
//! expressed; the store maps it onto three nullable foreign keys.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Entity Identifier
// ============================================================================

/// Globally unique entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an identifier from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when `value` is not a UUID or
    /// is the nil UUID.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        let parsed = Uuid::parse_str(value.trim())
            .map_err(|_| StoreError::invalid("parse_id", format!("malformed identifier: {value}")))?;
        if parsed.is_nil() {
            return Err(StoreError::invalid("parse_id", "nil identifier"));
        }
        Ok(Self(parsed))
    }

    /// Returns the canonical string form used in storage.
    #[must_use]
    pub fn to_key(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

// ============================================================================
// SECTION: Owner Reference
// ============================================================================

/// Kind of ownership root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    /// A single repository.
    Repository,
    /// An organization.
    Organization,
    /// An enterprise.
    Enterprise,
}

impl OwnerKind {
    /// All owner kinds in a stable order.
    pub const ALL: [Self; 3] = [Self::Repository, Self::Organization, Self::Enterprise];

    /// Returns a stable label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Organization => "organization",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to exactly one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    /// Owner kind.
    pub kind: OwnerKind,
    /// Owner identifier.
    pub id: EntityId,
}

impl OwnerRef {
    /// Creates a repository reference.
    #[must_use]
    pub const fn repository(id: EntityId) -> Self {
        Self {
            kind: OwnerKind::Repository,
            id,
        }
    }

    /// Creates an organization reference.
    #[must_use]
    pub const fn organization(id: EntityId) -> Self {
        Self {
            kind: OwnerKind::Organization,
            id,
        }
    }

    /// Creates an enterprise reference.
    #[must_use]
    pub const fn enterprise(id: EntityId) -> Self {
        Self {
            kind: OwnerKind::Enterprise,
            id,
        }
    }

    /// Rebuilds a reference from the three nullable foreign-key columns.
    ///
    /// Returns `Ok(None)` when no column is set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when more than one column is
    /// set or a column holds a malformed identifier.
    pub fn from_columns(
        repo_id: Option<&str>,
        org_id: Option<&str>,
        enterprise_id: Option<&str>,
    ) -> Result<Option<Self>, StoreError> {
        let set = [
            (OwnerKind::Repository, repo_id),
            (OwnerKind::Organization, org_id),
            (OwnerKind::Enterprise, enterprise_id),
        ];
        let mut found = None;
        for (kind, value) in set {
            let Some(value) = value else {
                continue;
            };
            if found.is_some() {
                return Err(StoreError::invalid(
                    "owner_ref",
                    "entity references more than one owner kind",
                ));
            }
            found = Some(Self {
                kind,
                id: EntityId::parse(value).map_err(|err| err.with_operation("owner_ref"))?,
            });
        }
        Ok(found)
    }

    /// Splits the reference into `(repo_id, org_id, enterprise_id)` column values.
    #[must_use]
    pub fn to_columns(&self) -> (Option<String>, Option<String>, Option<String>) {
        let key = Some(self.id.to_key());
        match self.kind {
            OwnerKind::Repository => (key, None, None),
            OwnerKind::Organization => (None, key, None),
            OwnerKind::Enterprise => (None, None, key),
        }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests unwrap deterministic fixtures.")]
mod tests {
    use super::*;
    use crate::interfaces::ErrorKind;

    #[test]
    fn parse_rejects_malformed_and_nil() {
        let err = EntityId::parse("not-a-uuid").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = EntityId::parse("00000000-0000-0000-0000-000000000000").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn parse_round_trips_generated_ids() {
        let id = EntityId::generate();
        assert_eq!(EntityId::parse(&id.to_key()).unwrap(), id);
    }

    #[test]
    fn owner_columns_are_exclusive() {
        let repo = EntityId::generate().to_key();
        let org = EntityId::generate().to_key();
        let err = OwnerRef::from_columns(Some(&repo), Some(&org), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let owner = OwnerRef::from_columns(None, Some(&org), None).unwrap().unwrap();
        assert_eq!(owner.kind, OwnerKind::Organization);
        assert_eq!(owner.to_columns(), (None, Some(org), None));
        assert!(OwnerRef::from_columns(None, None, None).unwrap().is_none());
    }
}
