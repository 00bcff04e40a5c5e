//! RBAC data models: Role, Permission, RoleGrant, IdentityRoleAssignment and
//! the resolved [`PermissionSet`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::ids::{AssignmentId, IdentityId, OrganizationId, PermissionId, RoleId};

// ═══════════════════════════════════════════════════════════════════════════════
// Permission
// ═══════════════════════════════════════════════════════════════════════════════

/// A `resource:action` pair, e.g. `lead:create` or `deal:*`.
///
/// A `"*"` in the resource or action position of a *granted* key matches
/// anything in that position of a requested key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionKey {
    pub resource: String,
    pub action: String,
}

impl PermissionKey {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// The universal key `*:*`.
    pub fn any() -> Self {
        Self::new("*", "*")
    }

    /// Parse a permission from a colon-separated string like `"lead:create"`.
    pub fn parse(s: &str) -> Option<Self> {
        let (resource, action) = s.split_once(':')?;
        let (resource, action) = (resource.trim(), action.trim());
        if resource.is_empty() || action.is_empty() {
            return None;
        }
        Some(Self::new(resource.to_ascii_lowercase(), action.to_ascii_lowercase()))
    }

    /// Return the canonical string form `"resource:action"`.
    pub fn as_string(&self) -> String {
        self.to_string()
    }

    /// Whether this (granted) key covers the requested one.
    pub fn matches(&self, requested: &PermissionKey) -> bool {
        let resource_match = self.resource == "*" || self.resource == requested.resource;
        let action_match = self.action == "*" || self.action == requested.action;
        resource_match && action_match
    }

    /// Whether either key covers the other, wildcards on both sides.
    pub fn overlaps(&self, other: &PermissionKey) -> bool {
        self.matches(other) || other.matches(self)
    }

    pub fn is_wildcard(&self) -> bool {
        self.resource == "*" || self.action == "*"
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

/// A permission row, unique on `(organization_id, resource, action)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub organization_id: OrganizationId,
    pub resource: String,
    pub action: String,
}

impl Permission {
    pub fn new(organization_id: OrganizationId, key: &PermissionKey) -> Self {
        Self {
            id: PermissionId::new(),
            organization_id,
            resource: key.resource.clone(),
            action: key.action.clone(),
        }
    }

    pub fn key(&self) -> PermissionKey {
        PermissionKey::new(&self.resource, &self.action)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role
// ═══════════════════════════════════════════════════════════════════════════════

/// A named role scoped to one organization. Permissions attach via [`RoleGrant`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: String,
    /// Seeded from a predefined template.
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

impl Role {
    pub fn new(
        organization_id: OrganizationId,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: RoleId::new(),
            organization_id,
            name: name.into(),
            description: description.into(),
            is_system: false,
            created_at: Utc::now(),
        }
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }
}

/// Links a role to a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
}

/// Secondary, additive role grant to an identity within an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRoleAssignment {
    pub id: AssignmentId,
    pub identity_id: IdentityId,
    pub organization_id: OrganizationId,
    pub role_id: RoleId,
    pub is_active: bool,
    pub assigned_by: Option<IdentityId>,
    pub assigned_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Effective permission set
// ═══════════════════════════════════════════════════════════════════════════════

/// The resolved permissions of an identity within one organization.
///
/// A universal set grants every pair except those in `excluded`; explicit
/// grants are unioned on top and are never subtracted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub universal: bool,
    pub excluded: BTreeSet<PermissionKey>,
    pub granted: BTreeSet<PermissionKey>,
}

impl PermissionSet {
    /// The empty set: deny everything.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every permission.
    pub fn universal() -> Self {
        Self {
            universal: true,
            ..Self::default()
        }
    }

    /// Every permission except `excluded`.
    pub fn universal_except(excluded: impl IntoIterator<Item = PermissionKey>) -> Self {
        Self {
            universal: true,
            excluded: excluded.into_iter().collect(),
            granted: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.universal && self.granted.is_empty()
    }

    pub fn grant(&mut self, key: PermissionKey) {
        self.granted.insert(key);
    }

    pub fn extend(&mut self, keys: impl IntoIterator<Item = PermissionKey>) {
        self.granted.extend(keys);
    }

    /// Check a concrete `resource:action` pair.
    pub fn contains(&self, resource: &str, action: &str) -> bool {
        let requested = PermissionKey::new(resource, action);
        if self.granted.iter().any(|g| g.matches(&requested)) {
            return true;
        }
        // A wildcard request touching an exclusion is not fully covered.
        self.universal && !self.excluded.iter().any(|e| e.overlaps(&requested))
    }

    /// Sorted, de-duplicated string form. The universal set renders as `*:*`.
    pub fn to_strings(&self) -> Vec<String> {
        let mut out: BTreeSet<String> = self.granted.iter().map(|k| k.to_string()).collect();
        if self.universal {
            out.insert(PermissionKey::any().to_string());
        }
        out.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_key_parse() {
        let key = PermissionKey::parse("Lead:Create").unwrap();
        assert_eq!(key.resource, "lead");
        assert_eq!(key.action, "create");
        assert_eq!(key.as_string(), "lead:create");

        assert!(PermissionKey::parse("invalid").is_none());
        assert!(PermissionKey::parse("lead:").is_none());
    }

    #[test]
    fn test_wildcard_grant_matches_concrete_request() {
        let requested = PermissionKey::new("deal", "update");
        assert!(PermissionKey::any().matches(&requested));
        assert!(PermissionKey::new("deal", "*").matches(&requested));
        assert!(PermissionKey::new("*", "update").matches(&requested));
        assert!(!PermissionKey::new("lead", "*").matches(&requested));
    }

    #[test]
    fn test_requested_wildcard_is_not_a_grant() {
        let granted = PermissionKey::new("lead", "read");
        assert!(!granted.matches(&PermissionKey::new("lead", "*")));
    }

    #[test]
    fn test_universal_except() {
        let set = PermissionSet::universal_except([PermissionKey::new("issue", "create")]);
        assert!(!set.contains("issue", "create"));
        assert!(set.contains("issue", "update"));
        assert!(set.contains("lead", "delete"));
    }

    #[test]
    fn test_wildcard_request_overlapping_exclusion_is_denied() {
        let set = PermissionSet::universal_except([PermissionKey::new("issue", "create")]);
        assert!(!set.contains("issue", "*"));
        assert!(!set.contains("*", "create"));
        assert!(set.contains("lead", "*"));
        assert!(PermissionSet::universal().contains("issue", "*"));
    }

    #[test]
    fn test_empty_denies_everything() {
        let set = PermissionSet::empty();
        assert!(set.is_empty());
        assert!(!set.contains("lead", "read"));
        assert!(set.to_strings().is_empty());
    }

    #[test]
    fn test_to_strings_sorted_and_deduplicated() {
        let mut set = PermissionSet::empty();
        set.extend([
            PermissionKey::new("lead", "read"),
            PermissionKey::new("deal", "read"),
            PermissionKey::new("lead", "read"),
        ]);
        assert_eq!(set.to_strings(), vec!["deal:read", "lead:read"]);
    }
}
