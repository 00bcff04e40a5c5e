//! RBAC resolver.
//!
//! Answers "which `resource:action` pairs may identity X perform within
//! organization O?" by combining:
//!
//! 1. the superuser override (universal set);
//! 2. the primary role: the employment record's role for employees, or the
//!    universal set minus the vendor exclusions for the owning vendor;
//! 3. the primary role's [`RoleGrant`](super::models::RoleGrant)s;
//! 4. every active secondary [`IdentityRoleAssignment`](super::models::IdentityRoleAssignment).
//!
//! Nothing is cached: each call re-reads the store, so a revoked grant takes
//! effect on the next request.

use std::sync::Arc;
use tracing::debug;

use super::models::{PermissionKey, PermissionSet};
use super::roles::vendor_exclusions;
use crate::error::{CrmError, Result};
use crate::ids::{IdentityId, OrganizationId, RoleId};
use crate::store::RbacStore;
use crate::tenancy::{ProfileKind, TenancyManager};

/// Result of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    /// Denied, with an internal reason (never shown to callers).
    Deny(String),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }
}

#[derive(Clone)]
pub struct RbacResolver {
    tenancy: TenancyManager,
    store: Arc<dyn RbacStore>,
}

impl RbacResolver {
    pub fn new(tenancy: TenancyManager, store: Arc<dyn RbacStore>) -> Self {
        Self { tenancy, store }
    }

    /// Compute the effective permission set of `identity` within `organization`.
    pub async fn effective_permissions(
        &self,
        identity: IdentityId,
        organization: OrganizationId,
    ) -> Result<PermissionSet> {
        let Some(subject) = self.tenancy.store().get_identity(identity).await? else {
            return Ok(PermissionSet::empty());
        };
        if !subject.can_act() {
            debug!(identity_id = %identity, "Locked or inactive identity resolves to no permissions");
            return Ok(PermissionSet::empty());
        }
        if subject.is_superuser {
            return Ok(PermissionSet::universal());
        }

        let active_org = self
            .tenancy
            .store()
            .get_organization(organization)
            .await?
            .map_or(false, |o| o.is_active);
        if !active_org {
            return Ok(PermissionSet::empty());
        }

        let mut set = PermissionSet::empty();

        // Primary role: vendor ownership.
        if self.tenancy.owns_organization(identity, organization).await? {
            set = PermissionSet::universal_except(vendor_exclusions());
        }

        // Primary role: employment record.
        if self
            .tenancy
            .resolve_active_organization(identity, ProfileKind::Employee)
            .await?
            == Some(organization)
        {
            let role = self
                .tenancy
                .get_employee(identity)
                .await?
                .and_then(|e| e.role_id);
            if let Some(role) = role {
                set.extend(self.role_keys(role, organization).await?);
            }
        }

        // Secondary assignments are additive only.
        for assignment in self.store.list_assignments(identity, organization).await? {
            if assignment.is_active {
                set.extend(self.role_keys(assignment.role_id, organization).await?);
            }
        }

        debug!(
            identity_id = %identity,
            organization_id = %organization,
            universal = set.universal,
            granted = set.granted.len(),
            "Resolved effective permissions"
        );
        Ok(set)
    }

    /// Keys granted by a role, ignoring roles from other organizations.
    async fn role_keys(&self, role: RoleId, organization: OrganizationId) -> Result<Vec<PermissionKey>> {
        let Some(role) = self.store.get_role(role).await? else {
            return Ok(Vec::new());
        };
        if role.organization_id != organization {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .role_permissions(role.id)
            .await?
            .iter()
            .filter(|p| p.organization_id == organization)
            .map(|p| p.key())
            .collect())
    }

    pub async fn has_permission(
        &self,
        identity: IdentityId,
        organization: OrganizationId,
        resource: &str,
        action: &str,
    ) -> Result<bool> {
        Ok(self
            .effective_permissions(identity, organization)
            .await?
            .contains(resource, action))
    }

    pub async fn check(
        &self,
        identity: IdentityId,
        organization: OrganizationId,
        resource: &str,
        action: &str,
    ) -> Result<PolicyDecision> {
        if self.has_permission(identity, organization, resource, action).await? {
            Ok(PolicyDecision::Allow)
        } else {
            Ok(PolicyDecision::Deny(format!(
                "identity {} lacks {}:{} in organization {}",
                identity, resource, action, organization
            )))
        }
    }

    /// `Ok(())` if allowed, `PermissionDenied` otherwise.
    pub async fn enforce(
        &self,
        identity: IdentityId,
        organization: OrganizationId,
        resource: &str,
        action: &str,
    ) -> Result<()> {
        match self.check(identity, organization, resource, action).await? {
            PolicyDecision::Allow => Ok(()),
            PolicyDecision::Deny(reason) => {
                debug!(reason = %reason, "Permission denied");
                Err(CrmError::permission_denied(resource, action))
            }
        }
    }
}
