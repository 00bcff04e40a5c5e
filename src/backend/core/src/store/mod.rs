//! Persistence seams.
//!
//! Each subsystem talks to storage through an `async_trait` store trait so the
//! same logic runs against PostgreSQL ([`PgStore`]) and the in-process
//! [`MemoryStore`]. Stage transitions go through a [`PipelineTx`] unit of work:
//! rows read with `lock_*` stay locked until the unit of work commits or is
//! dropped, and dropping it without [`PipelineTx::commit`] discards every write.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::ids::{
    CustomerId, DealId, IdentityId, LeadId, OrganizationId, PermissionId, PipelineId, RoleId,
    StageId,
};
use crate::pipeline::models::{
    Customer, Deal, Lead, Pipeline, Stage, StageHistoryEntry, StageSubject,
};
use crate::rbac::models::{IdentityRoleAssignment, Permission, Role};
use crate::tenancy::models::{
    Employee, Identity, Organization, OrganizationMembership, Profile, ProfileKind,
};

// ═══════════════════════════════════════════════════════════════════════════════
// Tenancy
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait TenancyStore: Send + Sync {
    /// Fails with `DuplicateRecord` when the email is taken.
    async fn insert_identity(&self, identity: &Identity) -> Result<()>;
    async fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>>;
    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>>;
    async fn update_identity(&self, identity: &Identity) -> Result<()>;

    async fn insert_organization(&self, organization: &Organization) -> Result<()>;
    async fn get_organization(&self, id: OrganizationId) -> Result<Option<Organization>>;
    async fn slug_exists(&self, slug: &str) -> Result<bool>;

    /// Insert or replace the row for `(identity, organization)`.
    async fn upsert_membership(&self, membership: &OrganizationMembership) -> Result<()>;
    async fn get_membership(
        &self,
        identity: IdentityId,
        organization: OrganizationId,
    ) -> Result<Option<OrganizationMembership>>;
    /// Earliest-joined organization the identity actively owns.
    async fn owned_organization(&self, identity: IdentityId) -> Result<Option<OrganizationId>>;

    async fn find_profile(&self, identity: IdentityId, kind: ProfileKind) -> Result<Option<Profile>>;
    /// Fails with `DuplicateProfile` when the identity already holds `profile.kind`.
    async fn insert_profile(&self, profile: &Profile) -> Result<()>;
    async fn update_profile(&self, profile: &Profile) -> Result<()>;

    async fn find_employee(&self, identity: IdentityId) -> Result<Option<Employee>>;
    /// Insert or replace the employment record of `employee.identity_id`.
    async fn upsert_employee(&self, employee: &Employee) -> Result<()>;

    /// Organizations in which the identity is linked to a customer record.
    async fn customer_organizations(&self, identity: IdentityId) -> Result<Vec<OrganizationId>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// RBAC
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait RbacStore: Send + Sync {
    async fn insert_role(&self, role: &Role) -> Result<()>;
    async fn get_role(&self, id: RoleId) -> Result<Option<Role>>;
    async fn find_role_by_name(&self, organization: OrganizationId, name: &str) -> Result<Option<Role>>;
    async fn list_roles(&self, organization: OrganizationId) -> Result<Vec<Role>>;

    /// Fails with `DuplicateRecord` on `(organization, resource, action)`.
    async fn insert_permission(&self, permission: &Permission) -> Result<()>;
    async fn get_permission(&self, id: PermissionId) -> Result<Option<Permission>>;
    async fn find_permission(
        &self,
        organization: OrganizationId,
        resource: &str,
        action: &str,
    ) -> Result<Option<Permission>>;

    /// Idempotent.
    async fn grant(&self, role: RoleId, permission: PermissionId) -> Result<()>;
    /// Returns whether a grant was removed.
    async fn revoke(&self, role: RoleId, permission: PermissionId) -> Result<bool>;
    async fn role_permissions(&self, role: RoleId) -> Result<Vec<Permission>>;

    async fn insert_assignment(&self, assignment: &IdentityRoleAssignment) -> Result<()>;
    async fn update_assignment(&self, assignment: &IdentityRoleAssignment) -> Result<()>;
    async fn list_assignments(
        &self,
        identity: IdentityId,
        organization: OrganizationId,
    ) -> Result<Vec<IdentityRoleAssignment>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn insert_pipeline(&self, pipeline: &Pipeline, stages: &[Stage]) -> Result<()>;
    async fn update_pipeline(&self, pipeline: &Pipeline) -> Result<()>;
    async fn get_pipeline(&self, id: PipelineId) -> Result<Option<Pipeline>>;
    /// Ordered by creation time.
    async fn list_pipelines(&self, organization: OrganizationId) -> Result<Vec<Pipeline>>;
    /// Ordered by `order_index`.
    async fn list_stages(&self, pipeline: PipelineId) -> Result<Vec<Stage>>;
    async fn get_stage(&self, id: StageId) -> Result<Option<Stage>>;

    async fn insert_lead(&self, lead: &Lead) -> Result<()>;
    async fn get_lead(&self, id: LeadId) -> Result<Option<Lead>>;
    async fn insert_deal(&self, deal: &Deal) -> Result<()>;
    async fn get_deal(&self, id: DealId) -> Result<Option<Deal>>;
    async fn insert_customer(&self, customer: &Customer) -> Result<()>;
    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>>;

    /// Chronological.
    async fn list_history(&self, subject: StageSubject) -> Result<Vec<StageHistoryEntry>>;

    /// Open a unit of work for a stage transition.
    async fn begin(&self) -> Result<Box<dyn PipelineTx>>;
}

/// A stage transition unit of work.
#[async_trait]
pub trait PipelineTx: Send {
    /// Read a lead and hold its row lock until commit or drop.
    async fn lock_lead(&mut self, id: LeadId) -> Result<Option<Lead>>;
    /// Read a deal and hold its row lock until commit or drop.
    async fn lock_deal(&mut self, id: DealId) -> Result<Option<Deal>>;
    async fn get_lead(&mut self, id: LeadId) -> Result<Option<Lead>>;

    async fn get_stage(&mut self, id: StageId) -> Result<Option<Stage>>;
    async fn list_pipelines(&mut self, organization: OrganizationId) -> Result<Vec<Pipeline>>;
    async fn list_stages(&mut self, pipeline: PipelineId) -> Result<Vec<Stage>>;

    async fn update_lead(&mut self, lead: &Lead) -> Result<()>;
    async fn update_deal(&mut self, deal: &Deal) -> Result<()>;
    async fn append_history(&mut self, entry: &StageHistoryEntry) -> Result<()>;

    async fn get_customer(&mut self, id: CustomerId) -> Result<Option<Customer>>;
    /// Match on the normalized email within one organization.
    async fn find_customer_by_email(
        &mut self,
        organization: OrganizationId,
        email: &str,
    ) -> Result<Option<Customer>>;
    /// Case-insensitive name match within one organization.
    async fn find_customer_by_name(
        &mut self,
        organization: OrganizationId,
        name: &str,
    ) -> Result<Option<Customer>>;
    async fn customers_converted_from(&mut self, lead: LeadId) -> Result<Vec<Customer>>;
    async fn insert_customer(&mut self, customer: &Customer) -> Result<()>;
    async fn update_customer(&mut self, customer: &Customer) -> Result<()>;

    /// Won deals linked to `customer`, not counting `excluding`.
    async fn count_won_deals(&mut self, customer: CustomerId, excluding: Option<DealId>) -> Result<i64>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
