//! Tenancy and profile integration tests.

mod common;

use crm_core::error::ErrorCode;
use crm_core::pipeline::{ContactInfo, NewCustomer};
use crm_core::rbac::PredefinedRole;
use crm_core::tenancy::ProfileKind;

// ============================================================================
// Profiles
// ============================================================================

#[tokio::test]
async fn test_one_profile_per_kind() {
    let service = common::service();
    let identity = common::register(&service).await;

    service
        .tenancy()
        .create_profile(identity, ProfileKind::Customer, None, false)
        .await
        .unwrap();
    let err = service
        .tenancy()
        .create_profile(identity, ProfileKind::Customer, None, false)
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::DuplicateProfile);
}

#[tokio::test]
async fn test_vendor_profile_requires_organization() {
    let service = common::service();
    let identity = common::register(&service).await;

    let err = service
        .tenancy()
        .create_profile(identity, ProfileKind::Vendor, None, false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OrganizationRequired);

    let err = service
        .tenancy()
        .create_profile(identity, ProfileKind::Employee, None, false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OrganizationRequired);
}

#[tokio::test]
async fn test_deferred_profile_activation() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let identity = common::register(&service).await;

    let profile = service
        .tenancy()
        .create_profile(identity, ProfileKind::Employee, None, true)
        .await
        .unwrap();
    assert!(!profile.is_active);
    assert!(profile.organization_id.is_none());

    // Still no organization: activation must fail.
    let err = service
        .tenancy()
        .activate_profile(identity, ProfileKind::Employee, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OrganizationRequired);

    let profile = service
        .tenancy()
        .activate_profile(identity, ProfileKind::Employee, Some(tenant.id()))
        .await
        .unwrap();
    assert!(profile.is_active);
    assert_eq!(profile.organization_id, Some(tenant.id()));
}

// ============================================================================
// Organizations
// ============================================================================

#[tokio::test]
async fn test_slug_collisions_get_numeric_suffix() {
    let service = common::service();
    let first_owner = common::register(&service).await;
    let second_owner = common::register(&service).await;
    let third_owner = common::register(&service).await;

    let first = service.create_organization(first_owner, "Acme Corp").await.unwrap();
    let second = service.create_organization(second_owner, "ACME  corp!").await.unwrap();
    let third = service.create_organization(third_owner, "acme corp").await.unwrap();

    assert_eq!(first.slug, "acme-corp");
    assert_eq!(second.slug, "acme-corp-1");
    assert_eq!(third.slug, "acme-corp-2");
}

#[tokio::test]
async fn test_empty_organization_name_is_rejected() {
    let service = common::service();
    let owner = common::register(&service).await;

    let err = service.create_organization(owner, "   ").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}

#[tokio::test]
async fn test_new_organization_is_provisioned() {
    let service = common::service();
    let tenant = common::tenant(&service).await;

    let roles = service.admin().list_roles(tenant.id()).await.unwrap();
    let mut names: Vec<&str> = roles.iter().map(|r| r.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["Manager", "Sales", "Support", "Viewer"]);

    let stages = service.engine().list_stages(tenant.id()).await.unwrap();
    let names: Vec<&str> = stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Lead", "Qualified", "Proposal", "Negotiation", "Closed Won", "Closed Lost"]
    );

    let vendor = service
        .tenancy()
        .get_profile(tenant.owner, ProfileKind::Vendor)
        .await
        .unwrap()
        .unwrap();
    assert!(vendor.is_active);
    assert_eq!(vendor.organization_id, Some(tenant.id()));

    let resolved = service
        .tenancy()
        .resolve_active_organization(tenant.owner, ProfileKind::Vendor)
        .await
        .unwrap();
    assert_eq!(resolved, Some(tenant.id()));
}

// ============================================================================
// Employees
// ============================================================================

#[tokio::test]
async fn test_employee_resolves_to_employer() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let ctx = common::employee(&service, &tenant, PredefinedRole::Sales).await;

    let resolved = service
        .tenancy()
        .resolve_active_organization(ctx.identity_id, ProfileKind::Employee)
        .await
        .unwrap();
    assert_eq!(resolved, Some(tenant.id()));

    service
        .tenancy()
        .remove_employee(tenant.id(), ctx.identity_id)
        .await
        .unwrap();
    let resolved = service
        .tenancy()
        .resolve_active_organization(ctx.identity_id, ProfileKind::Employee)
        .await
        .unwrap();
    assert_eq!(resolved, None);
}

#[tokio::test]
async fn test_employee_of_another_organization_is_conflict() {
    let service = common::service();
    let first = common::tenant(&service).await;
    let second = common::tenant(&service).await;
    let ctx = common::employee(&service, &first, PredefinedRole::Viewer).await;

    let err = service
        .add_employee(second.id(), ctx.identity_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);
}

#[tokio::test]
async fn test_primary_role_must_belong_to_organization() {
    let service = common::service();
    let first = common::tenant(&service).await;
    let second = common::tenant(&service).await;
    let foreign_role = service
        .admin()
        .predefined_role(second.id(), PredefinedRole::Manager)
        .await
        .unwrap();
    let identity = common::register(&service).await;

    let err = service
        .add_employee(first.id(), identity, Some(foreign_role.id))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

// ============================================================================
// Customers
// ============================================================================

#[tokio::test]
async fn test_customer_organization_is_ambiguous_across_tenants() {
    let service = common::service();
    let first = common::tenant(&service).await;
    let second = common::tenant(&service).await;
    let identity = common::register(&service).await;

    let input = NewCustomer {
        name: "Dana Reyes".to_string(),
        contact: ContactInfo::with_email("dana@example.com"),
        identity_id: Some(identity),
    };
    service.create_customer(first.id(), input.clone()).await.unwrap();

    let resolved = service
        .tenancy()
        .resolve_active_organization(identity, ProfileKind::Customer)
        .await
        .unwrap();
    assert_eq!(resolved, Some(first.id()));

    service.create_customer(second.id(), input).await.unwrap();
    let resolved = service
        .tenancy()
        .resolve_active_organization(identity, ProfileKind::Customer)
        .await
        .unwrap();
    assert_eq!(resolved, None);

    let orgs = service.tenancy().customer_organizations(identity).await.unwrap();
    assert_eq!(orgs.len(), 2);

    let profile = service
        .tenancy()
        .get_profile(identity, ProfileKind::Customer)
        .await
        .unwrap()
        .unwrap();
    assert!(profile.is_active);
}

#[tokio::test]
async fn test_locked_identity_cannot_create_organization() {
    let service = common::service();
    let identity = common::register(&service).await;
    service.tenancy().lock_identity(identity).await.unwrap();

    let err = service.create_organization(identity, "Locked Co").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::IdentityInactive);
}

// ============================================================================
// Memberships and vendor removal
// ============================================================================

#[tokio::test]
async fn test_join_and_leave_organization() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let member = common::register(&service).await;

    let joined = service
        .tenancy()
        .join_organization(member, tenant.id())
        .await
        .unwrap();
    assert!(joined.is_active);
    assert!(!joined.is_owner);
    assert!(joined.left_at.is_none());

    // Joining again returns the active membership.
    let again = service
        .tenancy()
        .join_organization(member, tenant.id())
        .await
        .unwrap();
    assert_eq!(again.joined_at, joined.joined_at);

    let left = service
        .tenancy()
        .leave_organization(member, tenant.id())
        .await
        .unwrap();
    assert!(!left.is_active);
    assert!(left.left_at.is_some());

    let err = service
        .tenancy()
        .leave_organization(member, tenant.id())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_owner_cannot_leave() {
    let service = common::service();
    let tenant = common::tenant(&service).await;

    let err = service
        .tenancy()
        .leave_organization(tenant.owner, tenant.id())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);

    let resolved = service
        .tenancy()
        .resolve_active_organization(tenant.owner, ProfileKind::Vendor)
        .await
        .unwrap();
    assert_eq!(resolved, Some(tenant.id()));
}

#[tokio::test]
async fn test_removed_vendor_loses_access() {
    let service = common::service();
    let tenant = common::tenant(&service).await;

    service.tenancy().remove_vendor(tenant.owner).await.unwrap();

    let profile = service
        .tenancy()
        .get_profile(tenant.owner, ProfileKind::Vendor)
        .await
        .unwrap()
        .unwrap();
    assert!(!profile.is_active);
    assert!(profile.organization_id.is_none());

    let resolved = service
        .tenancy()
        .resolve_active_organization(tenant.owner, ProfileKind::Vendor)
        .await
        .unwrap();
    assert_eq!(resolved, None);

    let set = service
        .gateway()
        .resolver()
        .effective_permissions(tenant.owner, tenant.id())
        .await
        .unwrap();
    assert!(set.is_empty());

    let err = service
        .list_stages(&tenant.owner_ctx(), Some(tenant.id()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
}
