//! Tenancy & profile manager.
//!
//! Owns the identity lifecycle, organization creation, memberships, the
//! one-profile-per-kind invariant and employment records. The active
//! organization of an identity is only ever computed by
//! [`TenancyManager::resolve_active_organization`].

use chrono::Utc;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{info, instrument};

use super::models::{
    Employee, Identity, Organization, OrganizationMembership, Profile, ProfileKind,
};
use super::slug;
use crate::error::{CrmError, ErrorCode, Result};
use crate::ids::{EmployeeId, IdentityId, OrganizationId, ProfileId, RoleId};
use crate::store::TenancyStore;

/// Email validation regex (RFC 5322 simplified).
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)*$",
    )
    .expect("Invalid email regex")
});

/// Trim and lowercase an email, rejecting malformed addresses.
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if EMAIL_REGEX.is_match(&email) {
        Ok(email)
    } else {
        Err(CrmError::validation("invalid email address"))
    }
}

#[derive(Clone)]
pub struct TenancyManager {
    store: Arc<dyn TenancyStore>,
}

impl TenancyManager {
    pub fn new(store: Arc<dyn TenancyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TenancyStore> {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identities
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self))]
    pub async fn register_identity(&self, email: &str) -> Result<Identity> {
        let email = normalize_email(email)?;
        if self.store.find_identity_by_email(&email).await?.is_some() {
            return Err(CrmError::conflict("an identity with this email already exists"));
        }
        let identity = Identity::new(email);
        self.store.insert_identity(&identity).await?;
        info!(identity_id = %identity.id, "Identity registered");
        Ok(identity)
    }

    pub async fn get_identity(&self, id: IdentityId) -> Result<Identity> {
        self.store
            .get_identity(id)
            .await?
            .ok_or_else(|| CrmError::not_found("identity", id.to_string()))
    }

    pub async fn verify_identity(&self, id: IdentityId) -> Result<Identity> {
        self.update_identity(id, |i| i.is_verified = true).await
    }

    pub async fn lock_identity(&self, id: IdentityId) -> Result<Identity> {
        self.update_identity(id, |i| i.is_locked = true).await
    }

    pub async fn unlock_identity(&self, id: IdentityId) -> Result<Identity> {
        self.update_identity(id, |i| i.is_locked = false).await
    }

    /// Identities are never deleted.
    pub async fn deactivate_identity(&self, id: IdentityId) -> Result<Identity> {
        self.update_identity(id, |i| i.is_active = false).await
    }

    pub async fn set_superuser(&self, id: IdentityId, is_superuser: bool) -> Result<Identity> {
        self.update_identity(id, |i| i.is_superuser = is_superuser).await
    }

    async fn update_identity(&self, id: IdentityId, f: impl FnOnce(&mut Identity)) -> Result<Identity> {
        let mut identity = self.get_identity(id).await?;
        f(&mut identity);
        self.store.update_identity(&identity).await?;
        Ok(identity)
    }

    async fn acting_identity(&self, id: IdentityId) -> Result<Identity> {
        let identity = self.get_identity(id).await?;
        if !identity.can_act() {
            return Err(CrmError::new(
                ErrorCode::IdentityInactive,
                "Identity is locked or inactive",
            ));
        }
        Ok(identity)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Organizations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an organization owned by `owner`.
    ///
    /// The slug is derived from the name with `-1`, `-2`, ... appended on
    /// collision. The owner gets an active owner membership and a vendor
    /// profile (created, or re-pointed when it has no organization).
    #[instrument(skip(self))]
    pub async fn create_organization(&self, owner: IdentityId, name: &str) -> Result<Organization> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CrmError::validation("organization name must not be empty"));
        }
        self.acting_identity(owner).await?;

        let base = slug::slugify(name);
        let mut chosen = None;
        for candidate in slug::candidates(&base) {
            if !self.store.slug_exists(&candidate).await? {
                chosen = Some(candidate);
                break;
            }
        }
        let slug = chosen.ok_or_else(|| CrmError::internal("slug candidates exhausted"))?;

        let now = Utc::now();
        let organization = Organization {
            id: OrganizationId::new(),
            name: name.to_string(),
            slug,
            is_active: true,
            created_by: owner,
            created_at: now,
        };
        self.store.insert_organization(&organization).await?;

        self.store
            .upsert_membership(&OrganizationMembership {
                identity_id: owner,
                organization_id: organization.id,
                is_active: true,
                is_owner: true,
                joined_at: now,
                left_at: None,
            })
            .await?;

        self.ensure_profile(owner, ProfileKind::Vendor, organization.id).await?;

        info!(
            organization_id = %organization.id,
            slug = %organization.slug,
            owner = %owner,
            "Organization created"
        );
        Ok(organization)
    }

    pub async fn get_organization(&self, id: OrganizationId) -> Result<Organization> {
        self.store
            .get_organization(id)
            .await?
            .ok_or_else(|| CrmError::not_found("organization", id.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Memberships
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn join_organization(
        &self,
        identity: IdentityId,
        organization: OrganizationId,
    ) -> Result<OrganizationMembership> {
        self.acting_identity(identity).await?;
        self.get_organization(organization).await?;

        if let Some(existing) = self.store.get_membership(identity, organization).await? {
            if existing.is_active {
                return Ok(existing);
            }
        }

        let membership = OrganizationMembership {
            identity_id: identity,
            organization_id: organization,
            is_active: true,
            is_owner: false,
            joined_at: Utc::now(),
            left_at: None,
        };
        self.store.upsert_membership(&membership).await?;
        Ok(membership)
    }

    /// Deactivate a membership. The owner cannot leave.
    pub async fn leave_organization(
        &self,
        identity: IdentityId,
        organization: OrganizationId,
    ) -> Result<OrganizationMembership> {
        let mut membership = self
            .store
            .get_membership(identity, organization)
            .await?
            .filter(|m| m.is_active)
            .ok_or_else(|| CrmError::not_found("membership", organization.to_string()))?;

        if membership.is_owner {
            return Err(CrmError::conflict("the organization owner cannot leave"));
        }

        membership.is_active = false;
        membership.left_at = Some(Utc::now());
        self.store.upsert_membership(&membership).await?;
        Ok(membership)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Profiles
    // ─────────────────────────────────────────────────────────────────────────

    /// Create the identity's profile of `kind`.
    ///
    /// A deferred profile is created inactive and may omit the organization;
    /// otherwise vendor and employee profiles require one.
    #[instrument(skip(self))]
    pub async fn create_profile(
        &self,
        identity: IdentityId,
        kind: ProfileKind,
        organization: Option<OrganizationId>,
        deferred: bool,
    ) -> Result<Profile> {
        self.get_identity(identity).await?;

        if self.store.find_profile(identity, kind).await?.is_some() {
            return Err(CrmError::duplicate_profile(kind));
        }
        if kind.requires_organization() && organization.is_none() && !deferred {
            return Err(CrmError::organization_required(kind));
        }
        if let Some(org) = organization {
            self.get_organization(org).await?;
        }

        let profile = Profile {
            id: ProfileId::new(),
            identity_id: identity,
            kind,
            organization_id: organization,
            is_active: !deferred,
            created_at: Utc::now(),
        };
        self.store.insert_profile(&profile).await?;
        Ok(profile)
    }

    /// Activate a (deferred) profile, optionally attaching the organization.
    pub async fn activate_profile(
        &self,
        identity: IdentityId,
        kind: ProfileKind,
        organization: Option<OrganizationId>,
    ) -> Result<Profile> {
        let mut profile = self
            .store
            .find_profile(identity, kind)
            .await?
            .ok_or_else(|| CrmError::not_found("profile", format!("{}/{}", identity, kind)))?;

        if let Some(org) = organization {
            self.get_organization(org).await?;
            profile.organization_id = Some(org);
        }
        if kind.requires_organization() && profile.organization_id.is_none() {
            return Err(CrmError::organization_required(kind));
        }

        profile.is_active = true;
        self.store.update_profile(&profile).await?;
        Ok(profile)
    }

    pub async fn get_profile(&self, identity: IdentityId, kind: ProfileKind) -> Result<Option<Profile>> {
        self.store.find_profile(identity, kind).await
    }

    /// Get-or-create the profile of `kind`, active and pointing at `organization`.
    ///
    /// An existing vendor profile already attached to another organization keeps
    /// its pointer; ownership is tracked by memberships.
    pub async fn ensure_profile(
        &self,
        identity: IdentityId,
        kind: ProfileKind,
        organization: OrganizationId,
    ) -> Result<Profile> {
        match self.store.find_profile(identity, kind).await? {
            Some(mut profile) => {
                let keep_pointer = kind == ProfileKind::Vendor
                    && profile.is_active
                    && profile.organization_id.is_some();
                if !keep_pointer {
                    profile.organization_id = Some(organization);
                }
                profile.is_active = true;
                self.store.update_profile(&profile).await?;
                Ok(profile)
            }
            None => {
                let profile = Profile {
                    id: ProfileId::new(),
                    identity_id: identity,
                    kind,
                    organization_id: Some(organization),
                    is_active: true,
                    created_at: Utc::now(),
                };
                self.store.insert_profile(&profile).await?;
                Ok(profile)
            }
        }
    }

    /// Deactivate a profile and clear its organization pointer.
    async fn retire_profile(&self, identity: IdentityId, kind: ProfileKind) -> Result<()> {
        if let Some(mut profile) = self.store.find_profile(identity, kind).await? {
            profile.is_active = false;
            profile.organization_id = None;
            self.store.update_profile(&profile).await?;
        }
        Ok(())
    }

    /// Remove the identity's vendor role. Memberships are left intact.
    pub async fn remove_vendor(&self, identity: IdentityId) -> Result<()> {
        self.retire_profile(identity, ProfileKind::Vendor).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Employees
    // ─────────────────────────────────────────────────────────────────────────

    /// Employ `identity` in `organization`.
    ///
    /// An identity actively employed elsewhere is a conflict. The employee
    /// profile is created or re-pointed at the organization.
    #[instrument(skip(self))]
    pub async fn add_employee(
        &self,
        organization: OrganizationId,
        identity: IdentityId,
        role: Option<RoleId>,
    ) -> Result<Employee> {
        self.acting_identity(identity).await?;
        self.get_organization(organization).await?;

        let employee = match self.store.find_employee(identity).await? {
            Some(existing) if existing.is_active && existing.organization_id != organization => {
                return Err(CrmError::conflict(
                    "identity is already employed by another organization",
                ));
            }
            Some(mut existing) => {
                existing.organization_id = organization;
                existing.is_active = true;
                if role.is_some() {
                    existing.role_id = role;
                }
                existing
            }
            None => Employee {
                id: EmployeeId::new(),
                identity_id: identity,
                organization_id: organization,
                role_id: role,
                is_active: true,
                created_at: Utc::now(),
            },
        };
        self.store.upsert_employee(&employee).await?;
        self.ensure_profile(identity, ProfileKind::Employee, organization).await?;

        info!(organization_id = %organization, identity_id = %identity, "Employee added");
        Ok(employee)
    }

    pub async fn change_employee_role(
        &self,
        organization: OrganizationId,
        identity: IdentityId,
        role: Option<RoleId>,
    ) -> Result<Employee> {
        let mut employee = self.active_employee(organization, identity).await?;
        employee.role_id = role;
        self.store.upsert_employee(&employee).await?;
        Ok(employee)
    }

    /// End employment: the record and profile are deactivated, never deleted.
    #[instrument(skip(self))]
    pub async fn remove_employee(&self, organization: OrganizationId, identity: IdentityId) -> Result<Employee> {
        let mut employee = self.active_employee(organization, identity).await?;
        employee.is_active = false;
        self.store.upsert_employee(&employee).await?;
        self.retire_profile(identity, ProfileKind::Employee).await?;

        info!(organization_id = %organization, identity_id = %identity, "Employee removed");
        Ok(employee)
    }

    pub async fn get_employee(&self, identity: IdentityId) -> Result<Option<Employee>> {
        self.store.find_employee(identity).await
    }

    async fn active_employee(&self, organization: OrganizationId, identity: IdentityId) -> Result<Employee> {
        self.store
            .find_employee(identity)
            .await?
            .filter(|e| e.is_active && e.organization_id == organization)
            .ok_or_else(|| CrmError::not_found("employee", identity.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Organization scope
    // ─────────────────────────────────────────────────────────────────────────

    /// The organization an identity acts in under `kind`.
    ///
    /// - vendor: the active owner membership, with an active vendor profile
    /// - employee: the active employment record, with an active employee profile
    /// - customer: the single organization holding the identity's customer
    ///   record, or none when there are zero or several
    pub async fn resolve_active_organization(
        &self,
        identity: IdentityId,
        kind: ProfileKind,
    ) -> Result<Option<OrganizationId>> {
        match kind {
            ProfileKind::Vendor => self.resolve_vendor_organization(identity).await,
            ProfileKind::Employee => self.resolve_employee_organization(identity).await,
            ProfileKind::Customer => self.resolve_customer_organization(identity).await,
        }
    }

    async fn resolve_vendor_organization(&self, identity: IdentityId) -> Result<Option<OrganizationId>> {
        if !self.has_active_profile(identity, ProfileKind::Vendor).await? {
            return Ok(None);
        }
        self.store.owned_organization(identity).await
    }

    async fn resolve_employee_organization(&self, identity: IdentityId) -> Result<Option<OrganizationId>> {
        if !self.has_active_profile(identity, ProfileKind::Employee).await? {
            return Ok(None);
        }
        let Some(employee) = self.store.find_employee(identity).await? else {
            return Ok(None);
        };
        if !employee.is_active {
            return Ok(None);
        }
        let active_org = self
            .store
            .get_organization(employee.organization_id)
            .await?
            .map_or(false, |o| o.is_active);
        Ok(active_org.then_some(employee.organization_id))
    }

    async fn resolve_customer_organization(&self, identity: IdentityId) -> Result<Option<OrganizationId>> {
        let orgs = self.store.customer_organizations(identity).await?;
        Ok(match orgs.as_slice() {
            [single] => Some(*single),
            _ => None,
        })
    }

    /// Whether `identity` is an active vendor owning `organization`.
    ///
    /// A vendor may own several organizations; this checks one of them
    /// directly instead of going through the default resolved scope.
    pub async fn owns_organization(
        &self,
        identity: IdentityId,
        organization: OrganizationId,
    ) -> Result<bool> {
        if !self.has_active_profile(identity, ProfileKind::Vendor).await? {
            return Ok(false);
        }
        let owner = self
            .store
            .get_membership(identity, organization)
            .await?
            .map_or(false, |m| m.is_owner && m.is_active);
        if !owner {
            return Ok(false);
        }
        Ok(self
            .store
            .get_organization(organization)
            .await?
            .map_or(false, |o| o.is_active))
    }

    /// Every organization the identity is a customer of.
    pub async fn customer_organizations(&self, identity: IdentityId) -> Result<Vec<OrganizationId>> {
        self.store.customer_organizations(identity).await
    }

    async fn has_active_profile(&self, identity: IdentityId, kind: ProfileKind) -> Result<bool> {
        Ok(self
            .store
            .find_profile(identity, kind)
            .await?
            .map_or(false, |p| p.is_active))
    }
}
