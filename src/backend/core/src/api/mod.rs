//! HTTP API for the CRM core.
//!
//! The router mounts the health and metrics endpoints at the root and the
//! versioned business endpoints under `/api/v1`. Every `/api/v1` request runs
//! behind bearer-token authentication; handlers receive the caller as a
//! [`RequestContext`](crate::rbac::RequestContext).

pub mod handlers;
pub mod routes;

use axum::{routing::get, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::Database;
use crate::middleware::{AuthLayer, TracingLayer};
use crate::service::CrmService;
use crate::telemetry::MetricsRegistry;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: CrmService,
    pub metrics: MetricsRegistry,
    /// Absent when the service runs without PostgreSQL (tests, demos).
    pub db: Option<Database>,
}

impl AppState {
    pub fn new(service: CrmService, metrics: MetricsRegistry) -> Self {
        Self {
            service,
            metrics,
            db: None,
        }
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }
}

/// Build the application router.
pub fn build_router(state: AppState, auth: AuthLayer) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .nest(routes::V1_PREFIX, routes::v1_router().layer(auth))
        .layer(TracingLayer::new().exclude("/health").exclude("/metrics"))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Standard API response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("ok");
        assert!(response.success);
        assert_eq!(response.data, Some("ok"));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["data"], "ok");
    }
}
