//! Tenancy: identities, organizations, memberships, profiles and employment.
//!
//! Every identity holds at most one [`Profile`] per [`ProfileKind`],
//! independent of organization. Vendor and employee profiles need an
//! organization once active; customer profiles never carry one.

pub mod manager;
pub mod models;
pub mod slug;

pub use manager::{normalize_email, TenancyManager};
pub use models::{Employee, Identity, Organization, OrganizationMembership, Profile, ProfileKind};
