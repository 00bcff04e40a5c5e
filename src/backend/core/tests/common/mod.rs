//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use crm_core::ids::{IdentityId, OrganizationId};
use crm_core::pipeline::{ContactInfo, NewLead};
use crm_core::rbac::{PredefinedRole, RequestContext};
use crm_core::service::CrmService;
use crm_core::store::MemoryStore;
use crm_core::tenancy::{Organization, ProfileKind};
use fake::faker::company::en::CompanyName;
use fake::faker::internet::en::SafeEmail;
use fake::faker::name::en::Name;
use fake::Fake;

/// A service over a fresh in-memory store.
pub fn service() -> CrmService {
    CrmService::from_store(Arc::new(MemoryStore::new()))
}

/// An organization together with its owner.
pub struct Tenant {
    pub organization: Organization,
    pub owner: IdentityId,
}

impl Tenant {
    pub fn id(&self) -> OrganizationId {
        self.organization.id
    }

    pub fn owner_ctx(&self) -> RequestContext {
        RequestContext::new(self.owner, ProfileKind::Vendor)
    }
}

pub async fn register(service: &CrmService) -> IdentityId {
    let email: String = SafeEmail().fake();
    service
        .tenancy()
        .register_identity(&format!("{}.{}", uuid::Uuid::new_v4().simple(), email))
        .await
        .unwrap()
        .id
}

pub async fn tenant(service: &CrmService) -> Tenant {
    let owner = register(service).await;
    let name: String = CompanyName().fake();
    let organization = service.create_organization(owner, &name).await.unwrap();
    Tenant {
        organization,
        owner,
    }
}

/// Employ a new identity with one of the seeded roles.
pub async fn employee(service: &CrmService, tenant: &Tenant, role: PredefinedRole) -> RequestContext {
    let identity = register(service).await;
    let role = service
        .admin()
        .predefined_role(tenant.id(), role)
        .await
        .unwrap();
    service
        .add_employee(tenant.id(), identity, Some(role.id))
        .await
        .unwrap();
    RequestContext::new(identity, ProfileKind::Employee)
}

pub fn lead_with_email(email: &str) -> NewLead {
    NewLead {
        name: Name().fake(),
        contact: ContactInfo::with_email(email),
        ..NewLead::default()
    }
}
