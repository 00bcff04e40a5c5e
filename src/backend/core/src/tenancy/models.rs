//! Tenancy data models: Identity, Organization, OrganizationMembership, Profile, Employee.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CrmError;
use crate::ids::{EmployeeId, IdentityId, OrganizationId, ProfileId, RoleId};

// ═══════════════════════════════════════════════════════════════════════════════
// Identity
// ═══════════════════════════════════════════════════════════════════════════════

/// An authenticated principal. Never deleted, only deactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    /// Normalized (trimmed, lowercase) and unique.
    pub email: String,
    pub is_verified: bool,
    pub is_locked: bool,
    pub is_active: bool,
    /// Staff override: resolves to the universal permission set.
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: IdentityId::new(),
            email: email.into(),
            is_verified: false,
            is_locked: false,
            is_active: true,
            is_superuser: false,
            created_at: Utc::now(),
        }
    }

    /// Whether this identity may act at all.
    pub fn can_act(&self) -> bool {
        self.is_active && !self.is_locked
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Organization
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    /// Derived from the name, unique across all organizations.
    pub slug: String,
    pub is_active: bool,
    pub created_by: IdentityId,
    pub created_at: DateTime<Utc>,
}

/// Identity ↔ organization link. At most one row per pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationMembership {
    pub identity_id: IdentityId,
    pub organization_id: OrganizationId,
    pub is_active: bool,
    pub is_owner: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Profile
// ═══════════════════════════════════════════════════════════════════════════════

/// The closed set of role-types an identity can hold a profile for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Vendor,
    Employee,
    Customer,
}

impl ProfileKind {
    pub const ALL: [ProfileKind; 3] = [Self::Vendor, Self::Employee, Self::Customer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vendor => "vendor",
            Self::Employee => "employee",
            Self::Customer => "customer",
        }
    }

    /// Vendor and employee profiles cannot be active without an organization.
    pub fn requires_organization(&self) -> bool {
        matches!(self, Self::Vendor | Self::Employee)
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileKind {
    type Err = CrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vendor" => Ok(Self::Vendor),
            "employee" => Ok(Self::Employee),
            "customer" => Ok(Self::Customer),
            other => Err(CrmError::validation(format!("unknown profile kind: {}", other))),
        }
    }
}

/// One per (identity, kind), independent of organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub identity_id: IdentityId,
    pub kind: ProfileKind,
    pub organization_id: Option<OrganizationId>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Employee
// ═══════════════════════════════════════════════════════════════════════════════

/// Employment record; the source of truth for an employee's organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub identity_id: IdentityId,
    pub organization_id: OrganizationId,
    /// Primary role within the organization.
    pub role_id: Option<RoleId>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_kind_parse() {
        assert_eq!("Vendor".parse::<ProfileKind>().unwrap(), ProfileKind::Vendor);
        assert_eq!(" employee ".parse::<ProfileKind>().unwrap(), ProfileKind::Employee);
        assert!("admin".parse::<ProfileKind>().is_err());
    }

    #[test]
    fn test_requires_organization() {
        assert!(ProfileKind::Vendor.requires_organization());
        assert!(ProfileKind::Employee.requires_organization());
        assert!(!ProfileKind::Customer.requires_organization());
    }

    #[test]
    fn test_locked_identity_cannot_act() {
        let mut identity = Identity::new("a@example.com");
        assert!(identity.can_act());
        identity.is_locked = true;
        assert!(!identity.can_act());
    }
}
