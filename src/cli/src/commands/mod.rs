//! CLI subcommands.

pub mod config;
pub mod customer;
pub mod deal;
pub mod health;
pub mod lead;
pub mod permission;
pub mod stage;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::ApiClient;

// ── Shared API types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageInfo {
    pub id: Uuid,
    pub name: String,
    pub order_index: i32,
    pub win_probability: i32,
    pub is_closed_won: bool,
    pub is_closed_lost: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LeadInfo {
    pub id: Uuid,
    pub name: String,
    pub qualification: String,
    pub stage_id: Option<Uuid>,
    pub is_converted: bool,
    #[serde(default)]
    pub contact: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DealInfo {
    pub id: Uuid,
    pub name: String,
    pub value_cents: i64,
    pub currency: String,
    pub stage_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub probability: i32,
    pub is_won: bool,
    pub is_lost: bool,
    pub closed_at: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ConversionInfo {
    pub effect: String,
    pub customer_id: Uuid,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TransitionInfo {
    pub changed: bool,
    pub from_stage_id: Option<Uuid>,
    pub to_stage: StageInfo,
    #[serde(default)]
    pub conversion: Vec<ConversionInfo>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HistoryEntry {
    pub from_stage_id: Option<Uuid>,
    pub to_stage_id: Uuid,
    pub changed_by: Option<Uuid>,
    pub note: Option<String>,
    pub changed_at: String,
}

#[derive(Serialize)]
pub struct MoveRequest {
    pub stage: String,
    pub note: Option<String>,
}

/// Stages used to show stage ids by name. Table output only; a failed
/// lookup falls back to short ids.
pub async fn stages_for_display(client: &ApiClient) -> Vec<StageInfo> {
    client.get("/api/v1/stages").await.unwrap_or_default()
}
