//! API request handlers.
//!
//! All handlers return `Result<impl IntoResponse, CrmError>`; errors render
//! through the `IntoResponse` implementation on `CrmError`, which keeps
//! internal detail out of the body.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::{ApiResponse, AppState};
use crate::error::CrmError;
use crate::ids::{CustomerId, DealId, LeadId, OrganizationId};
use crate::middleware::OrganizationHint;
use crate::pipeline::{NewDeal, NewLead, StageRef};
use crate::rbac::RequestContext;

// ═══════════════════════════════════════════════════════════════════════════════
// Health & Metrics
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.db {
        None => serde_json::json!({ "status": "not_configured" }),
        Some(db) => match db.check_connectivity().await {
            Ok(latency) => serde_json::json!({
                "status": "healthy",
                "latency_ms": latency.as_millis() as u64,
                "pool": db.pool_stats(),
            }),
            Err(e) => {
                tracing::error!(error = %e, "Health check failed to reach the database");
                serde_json::json!({ "status": "unhealthy" })
            }
        },
    };

    let healthy = database["status"] != "unhealthy";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "database": database,
        })),
    )
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.render(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Stage Handlers
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn list_stages(
    State(state): State<AppState>,
    ctx: RequestContext,
    OrganizationHint(org): OrganizationHint,
) -> Result<impl IntoResponse, CrmError> {
    let stages = state.service.list_stages(&ctx, org).await?;
    Ok(Json(ApiResponse::success(stages)))
}

/// Body of a stage move.
#[derive(Debug, Deserialize)]
pub struct MoveStageRequest {
    /// Stage id or case-insensitive stage name.
    pub stage: StageRef,
    pub note: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Lead Handlers
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn create_lead(
    State(state): State<AppState>,
    ctx: RequestContext,
    OrganizationHint(org): OrganizationHint,
    Json(req): Json<NewLead>,
) -> Result<impl IntoResponse, CrmError> {
    let lead = state.service.create_lead(&ctx, org, req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(lead))))
}

pub async fn get_lead(
    State(state): State<AppState>,
    ctx: RequestContext,
    OrganizationHint(org): OrganizationHint,
    Path(id): Path<LeadId>,
) -> Result<impl IntoResponse, CrmError> {
    let lead = state.service.get_lead(&ctx, org, id).await?;
    Ok(Json(ApiResponse::success(lead)))
}

pub async fn move_lead(
    State(state): State<AppState>,
    ctx: RequestContext,
    OrganizationHint(org): OrganizationHint,
    Path(id): Path<LeadId>,
    Json(req): Json<MoveStageRequest>,
) -> Result<impl IntoResponse, CrmError> {
    let outcome = state
        .service
        .move_lead(&ctx, org, id, req.stage, req.note)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

pub async fn lead_history(
    State(state): State<AppState>,
    ctx: RequestContext,
    OrganizationHint(org): OrganizationHint,
    Path(id): Path<LeadId>,
) -> Result<impl IntoResponse, CrmError> {
    let history = state.service.lead_history(&ctx, org, id).await?;
    Ok(Json(ApiResponse::success(history)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Deal Handlers
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn create_deal(
    State(state): State<AppState>,
    ctx: RequestContext,
    OrganizationHint(org): OrganizationHint,
    Json(req): Json<NewDeal>,
) -> Result<impl IntoResponse, CrmError> {
    let deal = state.service.create_deal(&ctx, org, req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(deal))))
}

pub async fn get_deal(
    State(state): State<AppState>,
    ctx: RequestContext,
    OrganizationHint(org): OrganizationHint,
    Path(id): Path<DealId>,
) -> Result<impl IntoResponse, CrmError> {
    let deal = state.service.get_deal(&ctx, org, id).await?;
    Ok(Json(ApiResponse::success(deal)))
}

pub async fn move_deal(
    State(state): State<AppState>,
    ctx: RequestContext,
    OrganizationHint(org): OrganizationHint,
    Path(id): Path<DealId>,
    Json(req): Json<MoveStageRequest>,
) -> Result<impl IntoResponse, CrmError> {
    let outcome = state
        .service
        .move_deal(&ctx, org, id, req.stage, req.note)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

pub async fn deal_history(
    State(state): State<AppState>,
    ctx: RequestContext,
    OrganizationHint(org): OrganizationHint,
    Path(id): Path<DealId>,
) -> Result<impl IntoResponse, CrmError> {
    let history = state.service.deal_history(&ctx, org, id).await?;
    Ok(Json(ApiResponse::success(history)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Customer Handlers
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn get_customer(
    State(state): State<AppState>,
    ctx: RequestContext,
    OrganizationHint(org): OrganizationHint,
    Path(id): Path<CustomerId>,
) -> Result<impl IntoResponse, CrmError> {
    let customer = state.service.get_customer(&ctx, org, id).await?;
    Ok(Json(ApiResponse::success(customer)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Permission Handlers
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub organization_id: OrganizationId,
    pub permissions: Vec<String>,
}

pub async fn my_permissions(
    State(state): State<AppState>,
    ctx: RequestContext,
    OrganizationHint(org): OrganizationHint,
) -> Result<impl IntoResponse, CrmError> {
    let (organization_id, set) = state.service.my_permissions(&ctx, org).await?;
    Ok(Json(ApiResponse::success(PermissionsResponse {
        organization_id,
        permissions: set.to_strings(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct CheckPermissionQuery {
    pub resource: String,
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct CheckPermissionResponse {
    pub resource: String,
    pub action: String,
    pub allowed: bool,
}

/// Deny reasons stay in the logs; the body only says allowed or not.
pub async fn check_permission(
    State(state): State<AppState>,
    ctx: RequestContext,
    OrganizationHint(org): OrganizationHint,
    Query(query): Query<CheckPermissionQuery>,
) -> Result<impl IntoResponse, CrmError> {
    let decision = state
        .service
        .check_permission(&ctx, org, &query.resource, &query.action)
        .await?;
    Ok(Json(ApiResponse::success(CheckPermissionResponse {
        allowed: decision.is_allowed(),
        resource: query.resource,
        action: query.action,
    })))
}
