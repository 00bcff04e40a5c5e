//! In-process store for tests and local development.
//!
//! All tables live behind one `tokio::sync::Mutex`. A [`PipelineTx`] takes the
//! lock for its whole lifetime and works on a copy of the tables, so units of
//! work are serialized and a dropped unit of work leaves no trace.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{PipelineStore, PipelineTx, RbacStore, TenancyStore};
use crate::error::{CrmError, ErrorCode, Result};
use crate::ids::{
    AssignmentId, CustomerId, DealId, IdentityId, LeadId, OrganizationId, PermissionId,
    PipelineId, RoleId, StageId,
};
use crate::pipeline::models::{
    Customer, Deal, Lead, Pipeline, Stage, StageHistoryEntry, StageSubject,
};
use crate::rbac::models::{IdentityRoleAssignment, Permission, Role};
use crate::tenancy::models::{
    Employee, Identity, Organization, OrganizationMembership, Profile, ProfileKind,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    identities: HashMap<IdentityId, Identity>,
    organizations: HashMap<OrganizationId, Organization>,
    memberships: HashMap<(IdentityId, OrganizationId), OrganizationMembership>,
    profiles: HashMap<(IdentityId, ProfileKind), Profile>,
    employees: HashMap<IdentityId, Employee>,

    roles: HashMap<RoleId, Role>,
    permissions: HashMap<PermissionId, Permission>,
    grants: HashSet<(RoleId, PermissionId)>,
    assignments: HashMap<AssignmentId, IdentityRoleAssignment>,

    pipelines: HashMap<PipelineId, Pipeline>,
    stages: HashMap<StageId, Stage>,
    leads: HashMap<LeadId, Lead>,
    deals: HashMap<DealId, Deal>,
    customers: HashMap<CustomerId, Customer>,
    history: Vec<StageHistoryEntry>,
}

fn duplicate(what: &str) -> CrmError {
    CrmError::with_internal(
        ErrorCode::DuplicateRecord,
        "A record with this identifier already exists",
        format!("unique violation: {}", what),
    )
}

fn missing_reference(what: &str) -> CrmError {
    CrmError::with_internal(
        ErrorCode::DatabaseError,
        "A database error occurred",
        format!("foreign key violation: {} does not exist", what),
    )
}

fn missing_row(what: &str) -> CrmError {
    CrmError::with_internal(
        ErrorCode::NotFound,
        "The requested record was not found",
        format!("update of missing {}", what),
    )
}

impl Tables {
    fn list_pipelines(&self, organization: OrganizationId) -> Vec<Pipeline> {
        let mut pipelines: Vec<Pipeline> = self
            .pipelines
            .values()
            .filter(|p| p.organization_id == organization)
            .cloned()
            .collect();
        pipelines.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pipelines
    }

    fn list_stages(&self, pipeline: PipelineId) -> Vec<Stage> {
        let mut stages: Vec<Stage> = self
            .stages
            .values()
            .filter(|s| s.pipeline_id == pipeline)
            .cloned()
            .collect();
        stages.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.name.cmp(&b.name)));
        stages
    }

    fn insert_customer(&mut self, customer: &Customer) -> Result<()> {
        if !self.organizations.contains_key(&customer.organization_id) {
            return Err(missing_reference("organization"));
        }
        self.check_customer_email(customer)?;
        if self.customers.contains_key(&customer.id) {
            return Err(duplicate("customers(id)"));
        }
        self.customers.insert(customer.id, customer.clone());
        Ok(())
    }

    fn update_customer(&mut self, customer: &Customer) -> Result<()> {
        if !self.customers.contains_key(&customer.id) {
            return Err(missing_row("customer"));
        }
        self.check_customer_email(customer)?;
        self.customers.insert(customer.id, customer.clone());
        Ok(())
    }

    /// Unique `(organization_id, lower(email))`, ignoring the row itself.
    fn check_customer_email(&self, customer: &Customer) -> Result<()> {
        let Some(email) = customer.contact.normalized_email() else {
            return Ok(());
        };
        let taken = self.customers.values().any(|c| {
            c.id != customer.id
                && c.organization_id == customer.organization_id
                && c.contact.normalized_email().as_deref() == Some(email.as_str())
        });
        if taken {
            return Err(duplicate("customers(organization_id, email)"));
        }
        Ok(())
    }
}

/// Shared in-memory implementation of every store trait.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tenancy
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl TenancyStore for MemoryStore {
    async fn insert_identity(&self, identity: &Identity) -> Result<()> {
        let mut t = self.tables.lock().await;
        if t.identities.values().any(|i| i.email == identity.email) {
            return Err(duplicate("identities(email)"));
        }
        t.identities.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>> {
        Ok(self.tables.lock().await.identities.get(&id).cloned())
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>> {
        let t = self.tables.lock().await;
        Ok(t.identities.values().find(|i| i.email == email).cloned())
    }

    async fn update_identity(&self, identity: &Identity) -> Result<()> {
        let mut t = self.tables.lock().await;
        match t.identities.get_mut(&identity.id) {
            Some(row) => {
                *row = identity.clone();
                Ok(())
            }
            None => Err(missing_row("identity")),
        }
    }

    async fn insert_organization(&self, organization: &Organization) -> Result<()> {
        let mut t = self.tables.lock().await;
        if t.organizations.values().any(|o| o.slug == organization.slug) {
            return Err(duplicate("organizations(slug)"));
        }
        if !t.identities.contains_key(&organization.created_by) {
            return Err(missing_reference("identity"));
        }
        t.organizations.insert(organization.id, organization.clone());
        Ok(())
    }

    async fn get_organization(&self, id: OrganizationId) -> Result<Option<Organization>> {
        Ok(self.tables.lock().await.organizations.get(&id).cloned())
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        let t = self.tables.lock().await;
        Ok(t.organizations.values().any(|o| o.slug == slug))
    }

    async fn upsert_membership(&self, membership: &OrganizationMembership) -> Result<()> {
        let mut t = self.tables.lock().await;
        if !t.identities.contains_key(&membership.identity_id) {
            return Err(missing_reference("identity"));
        }
        if !t.organizations.contains_key(&membership.organization_id) {
            return Err(missing_reference("organization"));
        }
        t.memberships.insert(
            (membership.identity_id, membership.organization_id),
            membership.clone(),
        );
        Ok(())
    }

    async fn get_membership(
        &self,
        identity: IdentityId,
        organization: OrganizationId,
    ) -> Result<Option<OrganizationMembership>> {
        let t = self.tables.lock().await;
        Ok(t.memberships.get(&(identity, organization)).cloned())
    }

    async fn owned_organization(&self, identity: IdentityId) -> Result<Option<OrganizationId>> {
        let t = self.tables.lock().await;
        Ok(t.memberships
            .values()
            .filter(|m| m.identity_id == identity && m.is_owner && m.is_active)
            .filter(|m| {
                t.organizations
                    .get(&m.organization_id)
                    .map_or(false, |o| o.is_active)
            })
            .min_by_key(|m| m.joined_at)
            .map(|m| m.organization_id))
    }

    async fn find_profile(&self, identity: IdentityId, kind: ProfileKind) -> Result<Option<Profile>> {
        Ok(self.tables.lock().await.profiles.get(&(identity, kind)).cloned())
    }

    async fn insert_profile(&self, profile: &Profile) -> Result<()> {
        let mut t = self.tables.lock().await;
        if !t.identities.contains_key(&profile.identity_id) {
            return Err(missing_reference("identity"));
        }
        let key = (profile.identity_id, profile.kind);
        if t.profiles.contains_key(&key) {
            return Err(CrmError::duplicate_profile(profile.kind));
        }
        t.profiles.insert(key, profile.clone());
        Ok(())
    }

    async fn update_profile(&self, profile: &Profile) -> Result<()> {
        let mut t = self.tables.lock().await;
        match t.profiles.get_mut(&(profile.identity_id, profile.kind)) {
            Some(row) if row.id == profile.id => {
                *row = profile.clone();
                Ok(())
            }
            _ => Err(missing_row("profile")),
        }
    }

    async fn find_employee(&self, identity: IdentityId) -> Result<Option<Employee>> {
        Ok(self.tables.lock().await.employees.get(&identity).cloned())
    }

    async fn upsert_employee(&self, employee: &Employee) -> Result<()> {
        let mut t = self.tables.lock().await;
        if !t.organizations.contains_key(&employee.organization_id) {
            return Err(missing_reference("organization"));
        }
        t.employees.insert(employee.identity_id, employee.clone());
        Ok(())
    }

    async fn customer_organizations(&self, identity: IdentityId) -> Result<Vec<OrganizationId>> {
        let t = self.tables.lock().await;
        let mut orgs: Vec<OrganizationId> = t
            .customers
            .values()
            .filter(|c| c.identity_id == Some(identity) && c.is_active())
            .map(|c| c.organization_id)
            .collect();
        orgs.sort();
        orgs.dedup();
        Ok(orgs)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RBAC
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl RbacStore for MemoryStore {
    async fn insert_role(&self, role: &Role) -> Result<()> {
        let mut t = self.tables.lock().await;
        if !t.organizations.contains_key(&role.organization_id) {
            return Err(missing_reference("organization"));
        }
        if t
            .roles
            .values()
            .any(|r| r.organization_id == role.organization_id && r.name == role.name)
        {
            return Err(duplicate("roles(organization_id, name)"));
        }
        t.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn get_role(&self, id: RoleId) -> Result<Option<Role>> {
        Ok(self.tables.lock().await.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, organization: OrganizationId, name: &str) -> Result<Option<Role>> {
        let t = self.tables.lock().await;
        Ok(t.roles
            .values()
            .find(|r| r.organization_id == organization && r.name == name)
            .cloned())
    }

    async fn list_roles(&self, organization: OrganizationId) -> Result<Vec<Role>> {
        let t = self.tables.lock().await;
        let mut roles: Vec<Role> = t
            .roles
            .values()
            .filter(|r| r.organization_id == organization)
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn insert_permission(&self, permission: &Permission) -> Result<()> {
        let mut t = self.tables.lock().await;
        if t.permissions.values().any(|p| {
            p.organization_id == permission.organization_id
                && p.resource == permission.resource
                && p.action == permission.action
        }) {
            return Err(duplicate("permissions(organization_id, resource, action)"));
        }
        t.permissions.insert(permission.id, permission.clone());
        Ok(())
    }

    async fn get_permission(&self, id: PermissionId) -> Result<Option<Permission>> {
        Ok(self.tables.lock().await.permissions.get(&id).cloned())
    }

    async fn find_permission(
        &self,
        organization: OrganizationId,
        resource: &str,
        action: &str,
    ) -> Result<Option<Permission>> {
        let t = self.tables.lock().await;
        Ok(t.permissions
            .values()
            .find(|p| p.organization_id == organization && p.resource == resource && p.action == action)
            .cloned())
    }

    async fn grant(&self, role: RoleId, permission: PermissionId) -> Result<()> {
        let mut t = self.tables.lock().await;
        if !t.roles.contains_key(&role) {
            return Err(missing_reference("role"));
        }
        if !t.permissions.contains_key(&permission) {
            return Err(missing_reference("permission"));
        }
        t.grants.insert((role, permission));
        Ok(())
    }

    async fn revoke(&self, role: RoleId, permission: PermissionId) -> Result<bool> {
        Ok(self.tables.lock().await.grants.remove(&(role, permission)))
    }

    async fn role_permissions(&self, role: RoleId) -> Result<Vec<Permission>> {
        let t = self.tables.lock().await;
        let mut permissions: Vec<Permission> = t
            .grants
            .iter()
            .filter(|(r, _)| *r == role)
            .filter_map(|(_, p)| t.permissions.get(p).cloned())
            .collect();
        permissions.sort_by(|a, b| (&a.resource, &a.action).cmp(&(&b.resource, &b.action)));
        Ok(permissions)
    }

    async fn insert_assignment(&self, assignment: &IdentityRoleAssignment) -> Result<()> {
        let mut t = self.tables.lock().await;
        if !t.identities.contains_key(&assignment.identity_id) {
            return Err(missing_reference("identity"));
        }
        if !t.roles.contains_key(&assignment.role_id) {
            return Err(missing_reference("role"));
        }
        t.assignments.insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn update_assignment(&self, assignment: &IdentityRoleAssignment) -> Result<()> {
        let mut t = self.tables.lock().await;
        match t.assignments.get_mut(&assignment.id) {
            Some(row) => {
                *row = assignment.clone();
                Ok(())
            }
            None => Err(missing_row("assignment")),
        }
    }

    async fn list_assignments(
        &self,
        identity: IdentityId,
        organization: OrganizationId,
    ) -> Result<Vec<IdentityRoleAssignment>> {
        let t = self.tables.lock().await;
        let mut assignments: Vec<IdentityRoleAssignment> = t
            .assignments
            .values()
            .filter(|a| a.identity_id == identity && a.organization_id == organization)
            .cloned()
            .collect();
        assignments.sort_by_key(|a| a.assigned_at);
        Ok(assignments)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn insert_pipeline(&self, pipeline: &Pipeline, stages: &[Stage]) -> Result<()> {
        let mut t = self.tables.lock().await;
        if !t.organizations.contains_key(&pipeline.organization_id) {
            return Err(missing_reference("organization"));
        }
        t.pipelines.insert(pipeline.id, pipeline.clone());
        for stage in stages {
            t.stages.insert(stage.id, stage.clone());
        }
        Ok(())
    }

    async fn update_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        let mut t = self.tables.lock().await;
        match t.pipelines.get_mut(&pipeline.id) {
            Some(row) => {
                *row = pipeline.clone();
                Ok(())
            }
            None => Err(missing_row("pipeline")),
        }
    }

    async fn get_pipeline(&self, id: PipelineId) -> Result<Option<Pipeline>> {
        Ok(self.tables.lock().await.pipelines.get(&id).cloned())
    }

    async fn list_pipelines(&self, organization: OrganizationId) -> Result<Vec<Pipeline>> {
        Ok(self.tables.lock().await.list_pipelines(organization))
    }

    async fn list_stages(&self, pipeline: PipelineId) -> Result<Vec<Stage>> {
        Ok(self.tables.lock().await.list_stages(pipeline))
    }

    async fn get_stage(&self, id: StageId) -> Result<Option<Stage>> {
        Ok(self.tables.lock().await.stages.get(&id).cloned())
    }

    async fn insert_lead(&self, lead: &Lead) -> Result<()> {
        let mut t = self.tables.lock().await;
        if !t.organizations.contains_key(&lead.organization_id) {
            return Err(missing_reference("organization"));
        }
        t.leads.insert(lead.id, lead.clone());
        Ok(())
    }

    async fn get_lead(&self, id: LeadId) -> Result<Option<Lead>> {
        Ok(self.tables.lock().await.leads.get(&id).cloned())
    }

    async fn insert_deal(&self, deal: &Deal) -> Result<()> {
        let mut t = self.tables.lock().await;
        if !t.organizations.contains_key(&deal.organization_id) {
            return Err(missing_reference("organization"));
        }
        t.deals.insert(deal.id, deal.clone());
        Ok(())
    }

    async fn get_deal(&self, id: DealId) -> Result<Option<Deal>> {
        Ok(self.tables.lock().await.deals.get(&id).cloned())
    }

    async fn insert_customer(&self, customer: &Customer) -> Result<()> {
        self.tables.lock().await.insert_customer(customer)
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>> {
        Ok(self.tables.lock().await.customers.get(&id).cloned())
    }

    async fn list_history(&self, subject: StageSubject) -> Result<Vec<StageHistoryEntry>> {
        let t = self.tables.lock().await;
        Ok(t.history
            .iter()
            .filter(|e| e.subject == subject)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn PipelineTx>> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

/// Unit of work over a private copy of the tables; the lock is held until
/// commit or drop.
pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl PipelineTx for MemoryTx {
    async fn lock_lead(&mut self, id: LeadId) -> Result<Option<Lead>> {
        Ok(self.working.leads.get(&id).cloned())
    }

    async fn lock_deal(&mut self, id: DealId) -> Result<Option<Deal>> {
        Ok(self.working.deals.get(&id).cloned())
    }

    async fn get_lead(&mut self, id: LeadId) -> Result<Option<Lead>> {
        Ok(self.working.leads.get(&id).cloned())
    }

    async fn get_stage(&mut self, id: StageId) -> Result<Option<Stage>> {
        Ok(self.working.stages.get(&id).cloned())
    }

    async fn list_pipelines(&mut self, organization: OrganizationId) -> Result<Vec<Pipeline>> {
        Ok(self.working.list_pipelines(organization))
    }

    async fn list_stages(&mut self, pipeline: PipelineId) -> Result<Vec<Stage>> {
        Ok(self.working.list_stages(pipeline))
    }

    async fn update_lead(&mut self, lead: &Lead) -> Result<()> {
        match self.working.leads.get_mut(&lead.id) {
            Some(row) => {
                *row = lead.clone();
                Ok(())
            }
            None => Err(missing_row("lead")),
        }
    }

    async fn update_deal(&mut self, deal: &Deal) -> Result<()> {
        match self.working.deals.get_mut(&deal.id) {
            Some(row) => {
                *row = deal.clone();
                Ok(())
            }
            None => Err(missing_row("deal")),
        }
    }

    async fn append_history(&mut self, entry: &StageHistoryEntry) -> Result<()> {
        if !self.working.stages.contains_key(&entry.to_stage_id) {
            return Err(missing_reference("stage"));
        }
        self.working.history.push(entry.clone());
        Ok(())
    }

    async fn get_customer(&mut self, id: CustomerId) -> Result<Option<Customer>> {
        Ok(self.working.customers.get(&id).cloned())
    }

    async fn find_customer_by_email(
        &mut self,
        organization: OrganizationId,
        email: &str,
    ) -> Result<Option<Customer>> {
        let email = email.trim().to_ascii_lowercase();
        Ok(self
            .working
            .customers
            .values()
            .find(|c| {
                c.organization_id == organization
                    && c.contact.normalized_email().as_deref() == Some(email.as_str())
            })
            .cloned())
    }

    async fn find_customer_by_name(
        &mut self,
        organization: OrganizationId,
        name: &str,
    ) -> Result<Option<Customer>> {
        let name = name.trim();
        let mut matches: Vec<&Customer> = self
            .working
            .customers
            .values()
            .filter(|c| c.organization_id == organization && c.name.trim().eq_ignore_ascii_case(name))
            .collect();
        matches.sort_by_key(|c| c.created_at);
        Ok(matches.first().map(|c| (*c).clone()))
    }

    async fn customers_converted_from(&mut self, lead: LeadId) -> Result<Vec<Customer>> {
        let mut customers: Vec<Customer> = self
            .working
            .customers
            .values()
            .filter(|c| c.converted_from_lead == Some(lead))
            .cloned()
            .collect();
        customers.sort_by_key(|c| c.created_at);
        Ok(customers)
    }

    async fn insert_customer(&mut self, customer: &Customer) -> Result<()> {
        self.working.insert_customer(customer)
    }

    async fn update_customer(&mut self, customer: &Customer) -> Result<()> {
        self.working.update_customer(customer)
    }

    async fn count_won_deals(&mut self, customer: CustomerId, excluding: Option<DealId>) -> Result<i64> {
        let count = self
            .working
            .deals
            .values()
            .filter(|d| d.customer_id == Some(customer) && d.is_won && Some(d.id) != excluding)
            .count();
        Ok(count as i64)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
