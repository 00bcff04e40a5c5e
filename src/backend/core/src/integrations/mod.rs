//! Best-effort side integrations notified after a stage transition commits.
//!
//! Sinks never take part in the core transaction: a failing sink is logged
//! and counted, and the transition still succeeds.

pub mod webhook;

pub use webhook::WebhookSink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::ids::{IdentityId, OrganizationId, StageId};
use crate::pipeline::conversion::ConversionEffect;
use crate::pipeline::models::StageSubject;
use crate::telemetry::PipelineMetrics;

/// A committed stage transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    pub organization_id: OrganizationId,
    pub subject: StageSubject,
    pub from_stage_id: Option<StageId>,
    pub to_stage_id: StageId,
    pub to_stage_name: String,
    pub changed_by: Option<IdentityId>,
    pub conversion: Vec<ConversionEffect>,
    pub occurred_at: DateTime<Utc>,
}

#[async_trait]
pub trait StageEventSink: Send + Sync {
    fn name(&self) -> &str;

    async fn on_transition(&self, event: &StageEvent) -> Result<()>;
}

/// Writes every transition to the log.
#[derive(Debug, Default, Clone)]
pub struct LoggingSink;

#[async_trait]
impl StageEventSink for LoggingSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_transition(&self, event: &StageEvent) -> Result<()> {
        info!(
            organization_id = %event.organization_id,
            subject = event.subject.kind(),
            subject_id = %event.subject.id(),
            to_stage = %event.to_stage_name,
            conversions = event.conversion.len(),
            "Stage transition committed"
        );
        Ok(())
    }
}

/// Deliver `event` to every sink; failures are logged and counted, never returned.
pub async fn notify_all(sinks: &[Arc<dyn StageEventSink>], event: &StageEvent) {
    for sink in sinks {
        if let Err(e) = sink.on_transition(event).await {
            PipelineMetrics::record_integration_failure(sink.name());
            warn!(
                integration = sink.name(),
                error_code = %e.code(),
                error = %e,
                "Side integration failed; transition already committed"
            );
        }
    }
}
