//! CRM service facade.
//!
//! Wires tenancy, RBAC and the stage engine together. Every caller-facing
//! operation takes a [`RequestContext`], passes the authorization gateway and
//! runs against the organization the gateway returned.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::error::{CrmError, Result};
use crate::ids::{CustomerId, DealId, IdentityId, LeadId, OrganizationId, RoleId};
use crate::integrations::StageEventSink;
use crate::pipeline::{
    Customer, Deal, Lead, NewCustomer, NewDeal, NewLead, Stage, StageEngine, StageHistoryEntry,
    StageRef, TransitionOutcome,
};
use crate::rbac::{
    AuthorizationGateway, PermissionKey, PermissionSet, PolicyDecision, RbacAdmin, RbacResolver,
    RequestContext,
};
use crate::store::{PipelineStore, RbacStore, TenancyStore};
use crate::tenancy::{Employee, Organization, ProfileKind, TenancyManager};

#[derive(Clone)]
pub struct CrmService {
    tenancy: TenancyManager,
    admin: RbacAdmin,
    gateway: AuthorizationGateway,
    engine: StageEngine,
}

impl CrmService {
    pub fn new(
        tenancy_store: Arc<dyn TenancyStore>,
        rbac_store: Arc<dyn RbacStore>,
        pipeline_store: Arc<dyn PipelineStore>,
    ) -> Self {
        let tenancy = TenancyManager::new(tenancy_store);
        let resolver = RbacResolver::new(tenancy.clone(), rbac_store.clone());
        Self {
            admin: RbacAdmin::new(rbac_store),
            gateway: AuthorizationGateway::new(tenancy.clone(), resolver),
            engine: StageEngine::new(pipeline_store),
            tenancy,
        }
    }

    /// Build over one store implementing every persistence seam.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: TenancyStore + RbacStore + PipelineStore + 'static,
    {
        Self::new(store.clone(), store.clone(), store)
    }

    pub fn with_sink(mut self, sink: Arc<dyn StageEventSink>) -> Self {
        self.engine = self.engine.with_sink(sink);
        self
    }

    pub fn tenancy(&self) -> &TenancyManager {
        &self.tenancy
    }

    pub fn admin(&self) -> &RbacAdmin {
        &self.admin
    }

    pub fn gateway(&self) -> &AuthorizationGateway {
        &self.gateway
    }

    pub fn engine(&self) -> &StageEngine {
        &self.engine
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Provisioning
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an organization and seed its predefined roles and default pipeline.
    #[instrument(skip(self))]
    pub async fn create_organization(&self, owner: IdentityId, name: &str) -> Result<Organization> {
        let organization = self.tenancy.create_organization(owner, name).await?;
        self.admin.seed_predefined_roles(organization.id).await?;
        let pipeline = self.engine.ensure_default_pipeline(organization.id).await?;
        info!(
            organization_id = %organization.id,
            pipeline_id = %pipeline.id,
            "Organization provisioned"
        );
        Ok(organization)
    }

    /// Employ `identity`; the primary role must belong to the organization.
    pub async fn add_employee(
        &self,
        organization: OrganizationId,
        identity: IdentityId,
        role: Option<RoleId>,
    ) -> Result<Employee> {
        if let Some(role) = role {
            self.admin.get_role(organization, role).await?;
        }
        self.tenancy.add_employee(organization, identity, role).await
    }

    pub async fn change_employee_role(
        &self,
        organization: OrganizationId,
        identity: IdentityId,
        role: Option<RoleId>,
    ) -> Result<Employee> {
        if let Some(role) = role {
            self.admin.get_role(organization, role).await?;
        }
        self.tenancy.change_employee_role(organization, identity, role).await
    }

    /// Create a customer record. A linked identity gets an active customer profile.
    pub async fn create_customer(&self, organization: OrganizationId, input: NewCustomer) -> Result<Customer> {
        self.tenancy.get_organization(organization).await?;
        if let Some(identity) = input.identity_id {
            match self.tenancy.get_profile(identity, ProfileKind::Customer).await? {
                Some(profile) if profile.is_active => {}
                Some(_) => {
                    self.tenancy
                        .activate_profile(identity, ProfileKind::Customer, None)
                        .await?;
                }
                None => {
                    self.tenancy
                        .create_profile(identity, ProfileKind::Customer, None, false)
                        .await?;
                }
            }
        }
        self.engine.create_customer(organization, input).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Authorized operations
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn list_stages(&self, ctx: &RequestContext, organization: Option<OrganizationId>) -> Result<Vec<Stage>> {
        let org = self.gateway.authorize(ctx, "stage", "read", organization, None).await?;
        self.engine.list_stages(org).await
    }

    pub async fn create_lead(
        &self,
        ctx: &RequestContext,
        organization: Option<OrganizationId>,
        input: NewLead,
    ) -> Result<Lead> {
        let org = self.gateway.authorize(ctx, "lead", "create", organization, None).await?;
        self.engine.create_lead(org, input, Some(ctx.identity_id)).await
    }

    pub async fn get_lead(&self, ctx: &RequestContext, organization: Option<OrganizationId>, id: LeadId) -> Result<Lead> {
        let lead = self.engine.find_lead(id).await?;
        self.gateway
            .authorize(ctx, "lead", "read", organization, Some(&lead))
            .await?;
        Ok(lead)
    }

    pub async fn move_lead(
        &self,
        ctx: &RequestContext,
        organization: Option<OrganizationId>,
        id: LeadId,
        target: StageRef,
        note: Option<String>,
    ) -> Result<TransitionOutcome> {
        let lead = self.engine.find_lead(id).await?;
        let org = self
            .gateway
            .authorize(ctx, "lead", "update", organization, Some(&lead))
            .await?;
        self.engine
            .move_lead(org, id, target, Some(ctx.identity_id), note)
            .await
    }

    pub async fn lead_history(
        &self,
        ctx: &RequestContext,
        organization: Option<OrganizationId>,
        id: LeadId,
    ) -> Result<Vec<StageHistoryEntry>> {
        let lead = self.engine.find_lead(id).await?;
        let org = self
            .gateway
            .authorize(ctx, "lead", "read", organization, Some(&lead))
            .await?;
        self.engine.lead_history(org, id).await
    }

    pub async fn create_deal(
        &self,
        ctx: &RequestContext,
        organization: Option<OrganizationId>,
        input: NewDeal,
    ) -> Result<Deal> {
        let org = self.gateway.authorize(ctx, "deal", "create", organization, None).await?;
        self.engine.create_deal(org, input, Some(ctx.identity_id)).await
    }

    pub async fn get_deal(&self, ctx: &RequestContext, organization: Option<OrganizationId>, id: DealId) -> Result<Deal> {
        let deal = self.engine.find_deal(id).await?;
        self.gateway
            .authorize(ctx, "deal", "read", organization, Some(&deal))
            .await?;
        Ok(deal)
    }

    pub async fn move_deal(
        &self,
        ctx: &RequestContext,
        organization: Option<OrganizationId>,
        id: DealId,
        target: StageRef,
        note: Option<String>,
    ) -> Result<TransitionOutcome> {
        let deal = self.engine.find_deal(id).await?;
        let org = self
            .gateway
            .authorize(ctx, "deal", "update", organization, Some(&deal))
            .await?;
        self.engine
            .move_deal(org, id, target, Some(ctx.identity_id), note)
            .await
    }

    pub async fn deal_history(
        &self,
        ctx: &RequestContext,
        organization: Option<OrganizationId>,
        id: DealId,
    ) -> Result<Vec<StageHistoryEntry>> {
        let deal = self.engine.find_deal(id).await?;
        let org = self
            .gateway
            .authorize(ctx, "deal", "read", organization, Some(&deal))
            .await?;
        self.engine.deal_history(org, id).await
    }

    /// Customers may read their own record; staff need `customer:read`.
    pub async fn get_customer(
        &self,
        ctx: &RequestContext,
        organization: Option<OrganizationId>,
        id: CustomerId,
    ) -> Result<Customer> {
        let customer = self.engine.find_customer(id).await?;
        self.gateway
            .authorize(ctx, "customer", "read", organization, Some(&customer))
            .await?;
        Ok(customer)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────────────────

    /// The caller's own permission set in the organization it acts in.
    pub async fn my_permissions(
        &self,
        ctx: &RequestContext,
        organization: Option<OrganizationId>,
    ) -> Result<(OrganizationId, PermissionSet)> {
        let org = self.gateway.resolve_scope(ctx, organization).await?;
        let set = self
            .gateway
            .resolver()
            .effective_permissions(ctx.identity_id, org)
            .await?;
        Ok((org, set))
    }

    pub async fn check_permission(
        &self,
        ctx: &RequestContext,
        organization: Option<OrganizationId>,
        resource: &str,
        action: &str,
    ) -> Result<PolicyDecision> {
        if resource.trim().is_empty() || action.trim().is_empty() {
            return Err(CrmError::validation("resource and action must not be empty"));
        }
        if PermissionKey::new(resource.trim(), action.trim()).is_wildcard() {
            return Err(CrmError::validation("resource and action must be concrete, not '*'"));
        }
        let org = self.gateway.resolve_scope(ctx, organization).await?;
        self.gateway
            .resolver()
            .check(ctx.identity_id, org, resource, action)
            .await
    }
}
