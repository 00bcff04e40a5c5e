//! HTTP API tests against the in-memory store.

mod common;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Duration;
use serde_json::{json, Value};
use tower::ServiceExt;

use crm_core::api::{build_router, AppState};
use crm_core::middleware::{AuthConfig, AuthLayer, Authenticator, Claims, ORGANIZATION_HEADER};
use crm_core::rbac::RequestContext;
use crm_core::service::CrmService;
use crm_core::telemetry::MetricsRegistry;

const SECRET: &str = "test-secret";

// ============================================================================
// Test Utilities
// ============================================================================

struct Harness {
    app: Router,
    authenticator: Arc<Authenticator>,
    service: CrmService,
}

impl Harness {
    fn new() -> Self {
        let service = common::service();
        let authenticator = Arc::new(
            Authenticator::new(AuthConfig {
                jwt_secret: SECRET.to_string(),
                ..AuthConfig::default()
            })
            .unwrap(),
        );
        let state = AppState::new(service.clone(), MetricsRegistry::disabled());
        let app = build_router(state, AuthLayer::new(authenticator.clone()));
        Self {
            app,
            authenticator,
            service,
        }
    }

    fn token(&self, ctx: &RequestContext) -> String {
        let claims = Claims::new(ctx.identity_id, ctx.profile_kind, Duration::minutes(5));
        self.authenticator.issue(&claims).unwrap()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn get(&self, ctx: &RequestContext, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token(ctx)))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    async fn post(&self, ctx: &RequestContext, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token(ctx)))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }
}

// ============================================================================
// Health and metrics
// ============================================================================

#[tokio::test]
async fn test_health_is_public() {
    let harness = Harness::new();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, body) = harness.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"]["status"], "not_configured");
}

#[tokio::test]
async fn test_metrics_is_plain_text() {
    let harness = Harness::new();
    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();

    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let harness = Harness::new();
    let request = Request::builder()
        .uri("/api/v1/stages")
        .body(Body::empty())
        .unwrap();

    let (status, body) = harness.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_garbage_token_is_rejected() {
    let harness = Harness::new();
    let request = Request::builder()
        .uri("/api/v1/stages")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();

    let (status, body) = harness.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let harness = Harness::new();
    let tenant = common::tenant(&harness.service).await;
    let request = Request::builder()
        .uri("/api/v1/stages")
        .header(header::AUTHORIZATION, format!("Bearer {}", harness.token(&tenant.owner_ctx())))
        .header("x-request-id", "req-123")
        .body(Body::empty())
        .unwrap();

    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "req-123");
}

// ============================================================================
// Pipeline flow
// ============================================================================

#[tokio::test]
async fn test_lead_flow_over_http() {
    let harness = Harness::new();
    let tenant = common::tenant(&harness.service).await;
    let ctx = tenant.owner_ctx();

    let (status, body) = harness.get(&ctx, "/api/v1/stages").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 6);

    let (status, body) = harness
        .post(
            &ctx,
            "/api/v1/leads",
            json!({ "name": "Riley Chen", "contact": { "email": "riley@example.com" } }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let lead_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = harness
        .post(
            &ctx,
            &format!("/api/v1/leads/{}/stage", lead_id),
            json!({ "stage": "Closed Won", "note": "signed" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["changed"], true);
    assert_eq!(body["data"]["conversion"][0]["effect"], "created");
    let customer_id = body["data"]["conversion"][0]["customer_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, body) = harness
        .get(&ctx, &format!("/api/v1/customers/{}", customer_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "active");

    let (status, body) = harness
        .get(&ctx, &format!("/api/v1/leads/{}/history", lead_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["note"], "signed");
}

#[tokio::test]
async fn test_unknown_stage_returns_valid_names() {
    let harness = Harness::new();
    let tenant = common::tenant(&harness.service).await;
    let ctx = tenant.owner_ctx();
    let (_, body) = harness
        .post(&ctx, "/api/v1/leads", json!({ "name": "Sam" }))
        .await;
    let lead_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = harness
        .post(
            &ctx,
            &format!("/api/v1/leads/{}/stage", lead_id),
            json!({ "stage": "Won" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "STAGE_NOT_FOUND");
}

#[tokio::test]
async fn test_other_tenant_sees_not_found() {
    let harness = Harness::new();
    let first = common::tenant(&harness.service).await;
    let second = common::tenant(&harness.service).await;
    let (_, body) = harness
        .post(&first.owner_ctx(), "/api/v1/leads", json!({ "name": "Private" }))
        .await;
    let lead_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = harness
        .get(&second.owner_ctx(), &format!("/api/v1/leads/{}", lead_id))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

// ============================================================================
// Permissions
// ============================================================================

#[tokio::test]
async fn test_permission_endpoints() {
    let harness = Harness::new();
    let tenant = common::tenant(&harness.service).await;
    let ctx = tenant.owner_ctx();

    let (status, body) = harness.get(&ctx, "/api/v1/permissions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["organization_id"], tenant.id().to_string());

    let (status, body) = harness
        .get(&ctx, "/api/v1/permissions/check?resource=issue&action=create")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["allowed"], false);

    let (_, body) = harness
        .get(&ctx, "/api/v1/permissions/check?resource=issue&action=update")
        .await;
    assert_eq!(body["data"]["allowed"], true);
}

#[tokio::test]
async fn test_customer_uses_organization_header() {
    let harness = Harness::new();
    let tenant = common::tenant(&harness.service).await;
    let identity = common::register(&harness.service).await;
    let customer = harness
        .service
        .create_customer(
            tenant.id(),
            crm_core::pipeline::NewCustomer {
                name: "Jordan".into(),
                identity_id: Some(identity),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let ctx = RequestContext::new(identity, crm_core::tenancy::ProfileKind::Customer);

    let request = Request::builder()
        .uri(format!("/api/v1/customers/{}", customer.id))
        .header(header::AUTHORIZATION, format!("Bearer {}", harness.token(&ctx)))
        .header(ORGANIZATION_HEADER, tenant.id().to_string())
        .body(Body::empty())
        .unwrap();
    let (status, body) = harness.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Jordan");
}
