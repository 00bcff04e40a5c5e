//! HTTP middleware: bearer authentication and request tracing.
pub mod auth;
pub mod tracing;

pub use auth::{AuthConfig, AuthLayer, Authenticator, Claims, OrganizationHint, ORGANIZATION_HEADER};
pub use tracing::{RequestId, TracingLayer};
