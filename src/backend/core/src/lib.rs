#![allow(clippy::result_large_err)]
//! # CRM Core
//!
//! Multi-tenant CRM core: tenancy, role-based access control and the sales
//! pipeline.
//!
//! ## Architecture
//!
//! - **Tenancy**: Identities, organizations, employees and the three profile
//!   kinds (customer, employee, vendor)
//! - **RBAC**: Organization-scoped roles and permissions with additive
//!   resolution, a superuser bypass and a vendor carve-out
//! - **Gateway**: Authorization of every caller-facing operation with tenant
//!   isolation (cross-tenant lookups read as not found)
//! - **Pipeline**: Stage engine for leads and deals with history, closed-won
//!   conversion into customers and reversal when a record leaves a won stage
//! - **Store**: Persistence seams with in-memory and PostgreSQL backends
//! - **Telemetry**: Structured logging and Prometheus metrics
//! - **API**: Axum HTTP surface with bearer-token authentication

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod ids;
pub mod integrations;
pub mod middleware;
pub mod pipeline;
pub mod rbac;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod tenancy;

pub use error::{CrmError, ErrorCode, ErrorDetails, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{CrmError, ErrorCode, Result};
    pub use crate::ids::{
        CustomerId, DealId, IdentityId, LeadId, OrganizationId, PipelineId, RoleId, StageId,
    };
    pub use crate::integrations::{LoggingSink, StageEvent, StageEventSink, WebhookSink};
    pub use crate::pipeline::{
        ConversionEffect, Customer, Deal, Lead, NewCustomer, NewDeal, NewLead, Stage,
        StageEngine, StageRef, TransitionOutcome,
    };
    pub use crate::rbac::{
        AuthorizationGateway, PermissionSet, PolicyDecision, PredefinedRole, RbacAdmin,
        RbacResolver, RequestContext,
    };
    pub use crate::service::CrmService;
    pub use crate::store::{MemoryStore, PgStore};
    pub use crate::tenancy::{Identity, Organization, Profile, ProfileKind, TenancyManager};
}
