//! Authorization gateway.
//!
//! The single call every mutating or listing operation passes through. It
//! resolves the caller's organization, rejects instances owned by another
//! organization as `NotFound`, and checks the permission. The organization it
//! returns is the only valid scope for the operation that follows.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::resolver::RbacResolver;
use crate::error::{CrmError, ErrorCode, Result};
use crate::ids::{IdentityId, OrganizationId};
use crate::telemetry::AuthzMetrics;
use crate::tenancy::{Identity, ProfileKind, TenancyManager};

/// `resource:action` pairs a customer may use without an owned instance.
/// Everything else requires a record the customer owns.
const CUSTOMER_LISTINGS: &[(&str, &str)] = &[("stage", "read"), ("stage", "list")];

/// The authenticated caller, passed explicitly to every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub identity_id: IdentityId,
    /// The profile the caller is acting under.
    pub profile_kind: ProfileKind,
}

impl RequestContext {
    pub fn new(identity_id: IdentityId, profile_kind: ProfileKind) -> Self {
        Self {
            identity_id,
            profile_kind,
        }
    }
}

/// A record that belongs to exactly one organization.
pub trait TenantScoped: Send + Sync {
    fn organization_id(&self) -> OrganizationId;

    /// The identity that owns the record, for customer-facing records.
    fn owner_identity(&self) -> Option<IdentityId> {
        None
    }

    fn entity_type(&self) -> &'static str;

    fn entity_id(&self) -> String;
}

#[derive(Clone)]
pub struct AuthorizationGateway {
    tenancy: TenancyManager,
    resolver: RbacResolver,
}

impl AuthorizationGateway {
    pub fn new(tenancy: TenancyManager, resolver: RbacResolver) -> Self {
        Self { tenancy, resolver }
    }

    pub fn resolver(&self) -> &RbacResolver {
        &self.resolver
    }

    /// Authorize `resource:action` for the caller.
    ///
    /// `organization` is only consulted for customers (who may belong to
    /// several organizations), vendors owning several organizations and
    /// superusers. Employees act in the organization they are employed by.
    pub async fn authorize(
        &self,
        ctx: &RequestContext,
        resource: &str,
        action: &str,
        organization: Option<OrganizationId>,
        instance: Option<&dyn TenantScoped>,
    ) -> Result<OrganizationId> {
        let result = self
            .decide(ctx, resource, action, organization, instance)
            .await;
        AuthzMetrics::record(resource, result.is_ok());
        if let Err(ref e) = result {
            debug!(
                identity_id = %ctx.identity_id,
                profile = %ctx.profile_kind,
                resource = resource,
                action = action,
                error_code = %e.code(),
                "Authorization denied"
            );
        }
        result
    }

    /// The organization the caller acts in, without a permission check.
    ///
    /// Used for caller-scoped reads such as listing one's own permissions.
    pub async fn resolve_scope(
        &self,
        ctx: &RequestContext,
        organization: Option<OrganizationId>,
    ) -> Result<OrganizationId> {
        let identity = self.acting_identity(ctx).await?;
        self.scope(ctx, &identity, organization).await?.ok_or_else(|| {
            CrmError::new(
                ErrorCode::PermissionDenied,
                "No active organization for this profile",
            )
        })
    }

    async fn decide(
        &self,
        ctx: &RequestContext,
        resource: &str,
        action: &str,
        organization: Option<OrganizationId>,
        instance: Option<&dyn TenantScoped>,
    ) -> Result<OrganizationId> {
        let identity = self.acting_identity(ctx).await?;
        // A vendor addressing a record acts in the record's organization when
        // it owns that one too.
        let organization = match (organization, instance) {
            (None, Some(instance)) if ctx.profile_kind == ProfileKind::Vendor => {
                Some(instance.organization_id())
            }
            _ => organization,
        };
        let org = self
            .scope(ctx, &identity, organization)
            .await?
            .ok_or_else(|| CrmError::permission_denied(resource, action))?;

        if let Some(instance) = instance {
            if instance.organization_id() != org {
                return Err(CrmError::not_found(instance.entity_type(), instance.entity_id()));
            }
        }

        if ctx.profile_kind == ProfileKind::Customer && !identity.is_superuser {
            return self.authorize_customer(ctx, resource, action, org, instance);
        }

        self.resolver
            .enforce(ctx.identity_id, org, resource, action)
            .await?;
        Ok(org)
    }

    async fn acting_identity(&self, ctx: &RequestContext) -> Result<Identity> {
        let identity = self.tenancy.get_identity(ctx.identity_id).await.map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                CrmError::unauthorized("Unknown identity")
            } else {
                e
            }
        })?;
        if !identity.can_act() {
            return Err(CrmError::new(
                ErrorCode::IdentityInactive,
                "Identity is locked or inactive",
            ));
        }
        Ok(identity)
    }

    /// Customers may name one of their organizations and vendors any
    /// organization they own; otherwise vendors and employees act in the
    /// organization their profile resolves to. Superusers may name any
    /// organization.
    async fn scope(
        &self,
        ctx: &RequestContext,
        identity: &Identity,
        organization: Option<OrganizationId>,
    ) -> Result<Option<OrganizationId>> {
        let resolved = self
            .tenancy
            .resolve_active_organization(ctx.identity_id, ctx.profile_kind)
            .await?;

        Ok(match ctx.profile_kind {
            ProfileKind::Customer => {
                let orgs = self.tenancy.customer_organizations(ctx.identity_id).await?;
                match organization.or(resolved) {
                    Some(org) if orgs.contains(&org) || identity.is_superuser => Some(org),
                    _ => None,
                }
            }
            ProfileKind::Vendor => match organization {
                Some(org) if self.tenancy.owns_organization(ctx.identity_id, org).await? => {
                    Some(org)
                }
                Some(org) if identity.is_superuser => Some(org),
                _ => resolved,
            },
            ProfileKind::Employee => match resolved {
                Some(org) => Some(org),
                None if identity.is_superuser => organization,
                None => None,
            },
        })
    }

    /// Customers are checked by ownership of the record, not by permission set.
    fn authorize_customer(
        &self,
        ctx: &RequestContext,
        resource: &str,
        action: &str,
        org: OrganizationId,
        instance: Option<&dyn TenantScoped>,
    ) -> Result<OrganizationId> {
        match instance {
            Some(instance) if instance.owner_identity() == Some(ctx.identity_id) => Ok(org),
            Some(_) => Err(CrmError::permission_denied(resource, action)),
            None if CUSTOMER_LISTINGS.contains(&(resource, action)) => Ok(org),
            None => Err(CrmError::permission_denied(resource, action)),
        }
    }
}
