//! Role, permission and assignment administration.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use super::models::{IdentityRoleAssignment, Permission, PermissionKey, Role};
use super::roles::PredefinedRole;
use crate::error::{CrmError, ErrorCode, Result};
use crate::ids::{AssignmentId, IdentityId, OrganizationId, PermissionId, RoleId};
use crate::store::RbacStore;

#[derive(Clone)]
pub struct RbacAdmin {
    store: Arc<dyn RbacStore>,
}

impl RbacAdmin {
    pub fn new(store: Arc<dyn RbacStore>) -> Self {
        Self { store }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn create_role(
        &self,
        organization: OrganizationId,
        name: &str,
        description: &str,
    ) -> Result<Role> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CrmError::validation("role name must not be empty"));
        }
        if self.store.find_role_by_name(organization, name).await?.is_some() {
            return Err(CrmError::conflict(format!("role already exists: {}", name)));
        }
        let role = Role::new(organization, name, description);
        self.store.insert_role(&role).await?;
        Ok(role)
    }

    /// A role, provided it belongs to `organization`.
    pub async fn get_role(&self, organization: OrganizationId, id: RoleId) -> Result<Role> {
        self.store
            .get_role(id)
            .await?
            .filter(|r| r.organization_id == organization)
            .ok_or_else(|| CrmError::not_found("role", id.to_string()))
    }

    pub async fn list_roles(&self, organization: OrganizationId) -> Result<Vec<Role>> {
        self.store.list_roles(organization).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a permission; `(organization, resource, action)` must be unique.
    pub async fn create_permission(
        &self,
        organization: OrganizationId,
        resource: &str,
        action: &str,
    ) -> Result<Permission> {
        let key = PermissionKey::parse(&format!("{}:{}", resource, action)).ok_or_else(|| {
            CrmError::validation("permission resource and action must not be empty")
        })?;
        if self
            .store
            .find_permission(organization, &key.resource, &key.action)
            .await?
            .is_some()
        {
            return Err(CrmError::conflict(format!("permission already exists: {}", key)));
        }

        let permission = Permission::new(organization, &key);
        match self.store.insert_permission(&permission).await {
            Ok(()) => Ok(permission),
            // Lost a race with a concurrent insert.
            Err(e) if e.code() == ErrorCode::DuplicateRecord => {
                Err(CrmError::conflict(format!("permission already exists: {}", key)))
            }
            Err(e) => Err(e),
        }
    }

    /// Get-or-create.
    pub async fn ensure_permission(&self, organization: OrganizationId, key: &PermissionKey) -> Result<Permission> {
        if let Some(existing) = self
            .store
            .find_permission(organization, &key.resource, &key.action)
            .await?
        {
            return Ok(existing);
        }
        let permission = Permission::new(organization, key);
        self.store.insert_permission(&permission).await?;
        Ok(permission)
    }

    pub async fn grant_permission(&self, role: RoleId, permission: PermissionId) -> Result<()> {
        let (role, permission) = self.same_org_pair(role, permission).await?;
        self.store.grant(role.id, permission.id).await?;
        debug!(role = %role.name, permission = %permission.key(), "Permission granted");
        Ok(())
    }

    pub async fn revoke_permission(&self, role: RoleId, permission: PermissionId) -> Result<bool> {
        self.store.revoke(role, permission).await
    }

    async fn same_org_pair(&self, role: RoleId, permission: PermissionId) -> Result<(Role, Permission)> {
        let role = self
            .store
            .get_role(role)
            .await?
            .ok_or_else(|| CrmError::not_found("role", role.to_string()))?;
        let permission = self
            .store
            .get_permission(permission)
            .await?
            .ok_or_else(|| CrmError::not_found("permission", permission.to_string()))?;
        if role.organization_id != permission.organization_id {
            return Err(CrmError::validation(
                "role and permission belong to different organizations",
            ));
        }
        Ok((role, permission))
    }

    pub async fn role_permissions(&self, role: RoleId) -> Result<Vec<PermissionKey>> {
        Ok(self
            .store
            .role_permissions(role)
            .await?
            .iter()
            .map(|p| p.key())
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Secondary assignments
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant `role` to `identity` in addition to its primary role.
    pub async fn assign_role(
        &self,
        organization: OrganizationId,
        identity: IdentityId,
        role: RoleId,
        assigned_by: Option<IdentityId>,
    ) -> Result<IdentityRoleAssignment> {
        let role = self.get_role(organization, role).await?;

        let existing = self.store.list_assignments(identity, organization).await?;
        if let Some(mut assignment) = existing.into_iter().find(|a| a.role_id == role.id) {
            if !assignment.is_active {
                assignment.is_active = true;
                assignment.assigned_by = assigned_by;
                assignment.assigned_at = Utc::now();
                self.store.update_assignment(&assignment).await?;
            }
            return Ok(assignment);
        }

        let assignment = IdentityRoleAssignment {
            id: AssignmentId::new(),
            identity_id: identity,
            organization_id: organization,
            role_id: role.id,
            is_active: true,
            assigned_by,
            assigned_at: Utc::now(),
        };
        self.store.insert_assignment(&assignment).await?;
        Ok(assignment)
    }

    /// Deactivate a secondary assignment. Returns whether one was active.
    pub async fn revoke_assignment(
        &self,
        organization: OrganizationId,
        identity: IdentityId,
        role: RoleId,
    ) -> Result<bool> {
        let existing = self.store.list_assignments(identity, organization).await?;
        match existing.into_iter().find(|a| a.role_id == role && a.is_active) {
            Some(mut assignment) => {
                assignment.is_active = false;
                self.store.update_assignment(&assignment).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Seeding
    // ─────────────────────────────────────────────────────────────────────────

    /// Create the predefined roles and their grants. Safe to call repeatedly.
    pub async fn seed_predefined_roles(&self, organization: OrganizationId) -> Result<Vec<Role>> {
        let mut roles = Vec::new();
        for template in PredefinedRole::all() {
            let role = match self.store.find_role_by_name(organization, template.name()).await? {
                Some(role) => role,
                None => {
                    let role = Role::new(organization, template.name(), template.description()).system();
                    self.store.insert_role(&role).await?;
                    role
                }
            };
            for key in template.permissions() {
                let permission = self.ensure_permission(organization, &key).await?;
                self.store.grant(role.id, permission.id).await?;
            }
            roles.push(role);
        }
        info!(organization_id = %organization, count = roles.len(), "Predefined roles seeded");
        Ok(roles)
    }

    /// Look up a seeded template role by name.
    pub async fn predefined_role(&self, organization: OrganizationId, template: PredefinedRole) -> Result<Role> {
        self.store
            .find_role_by_name(organization, template.name())
            .await?
            .ok_or_else(|| CrmError::not_found("role", template.name()))
    }
}
