//! Role-based access control.
//!
//! This module provides:
//! - **Models**: Role, Permission, RoleGrant, IdentityRoleAssignment and the
//!   resolved [`PermissionSet`]
//! - **Resolver**: effective `resource:action` set for an (identity, organization) pair
//! - **Gateway**: the single authorization call in front of every operation
//! - **Predefined roles**: Manager, Sales, Support, Viewer templates
//! - **Admin**: role/permission/assignment management and seeding
//!
//! # Usage
//!
//! ```rust,ignore
//! use crm_core::rbac::{AuthorizationGateway, RequestContext};
//!
//! let org = gateway
//!     .authorize(&ctx, "lead", "update", None, Some(&lead))
//!     .await?;
//! ```

pub mod admin;
pub mod gateway;
pub mod models;
pub mod resolver;
pub mod roles;

pub use admin::RbacAdmin;
pub use gateway::{AuthorizationGateway, RequestContext, TenantScoped};
pub use models::{
    IdentityRoleAssignment, Permission, PermissionKey, PermissionSet, Role, RoleGrant,
};
pub use resolver::{PolicyDecision, RbacResolver};
pub use roles::PredefinedRole;
