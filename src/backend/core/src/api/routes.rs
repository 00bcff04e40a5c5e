//! V1 routes.

use axum::{
    routing::{get, post},
    Router,
};

use crate::api::{handlers, AppState};

/// V1 API prefix.
pub const V1_PREFIX: &str = "/api/v1";

/// Build the V1 API router.
///
/// All routes are mounted under `/api/v1/` and require a bearer token. The
/// optional `X-Organization-Id` header picks the organization when the caller
/// could act in more than one.
///
/// # Endpoints
///
/// ## Stages
/// - `GET /api/v1/stages` - Active stages of the default pipeline
///
/// ## Leads
/// - `POST /api/v1/leads` - Create a lead in the first stage
/// - `GET /api/v1/leads/:id` - Get a lead
/// - `POST /api/v1/leads/:id/stage` - Move a lead to another stage
/// - `GET /api/v1/leads/:id/history` - Stage history of a lead
///
/// ## Deals
/// - `POST /api/v1/deals` - Create a deal
/// - `GET /api/v1/deals/:id` - Get a deal
/// - `POST /api/v1/deals/:id/stage` - Move a deal to another stage
/// - `GET /api/v1/deals/:id/history` - Stage history of a deal
///
/// ## Customers
/// - `GET /api/v1/customers/:id` - Get a customer
///
/// ## Permissions
/// - `GET /api/v1/permissions` - The caller's effective permissions
/// - `GET /api/v1/permissions/check` - Check one `resource`/`action` pair
pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/stages", get(handlers::list_stages))
        // Lead endpoints
        .route("/leads", post(handlers::create_lead))
        .route("/leads/:id", get(handlers::get_lead))
        .route("/leads/:id/stage", post(handlers::move_lead))
        .route("/leads/:id/history", get(handlers::lead_history))
        // Deal endpoints
        .route("/deals", post(handlers::create_deal))
        .route("/deals/:id", get(handlers::get_deal))
        .route("/deals/:id/stage", post(handlers::move_deal))
        .route("/deals/:id/history", get(handlers::deal_history))
        .route("/customers/:id", get(handlers::get_customer))
        .route("/permissions", get(handlers::my_permissions))
        .route("/permissions/check", get(handlers::check_permission))
}

/// Route path constants.
pub mod paths {
    pub const STAGES: &str = "/api/v1/stages";
    pub const LEADS: &str = "/api/v1/leads";
    pub const DEALS: &str = "/api/v1/deals";
    pub const CUSTOMERS: &str = "/api/v1/customers";
    pub const PERMISSIONS: &str = "/api/v1/permissions";
    pub const PERMISSION_CHECK: &str = "/api/v1/permissions/check";

    pub fn lead_stage(id: &str) -> String {
        format!("{}/{}/stage", LEADS, id)
    }

    pub fn lead_history(id: &str) -> String {
        format!("{}/{}/history", LEADS, id)
    }

    pub fn deal_stage(id: &str) -> String {
        format!("{}/{}/stage", DEALS, id)
    }

    pub fn deal_history(id: &str) -> String {
        format!("{}/{}/history", DEALS, id)
    }
}
