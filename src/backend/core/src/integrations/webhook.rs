//! Webhook delivery of stage events.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{StageEvent, StageEventSink};
use crate::error::{CrmError, Result};
use crate::telemetry::redact_url;

/// POSTs each [`StageEvent`] as JSON to a fixed URL.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            url: url.into(),
        }
    }

    /// Set custom HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StageEventSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn on_transition(&self, event: &StageEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| CrmError::dependency_failure("webhook", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrmError::dependency_failure(
                "webhook",
                format!("unexpected status {}", status.as_u16()),
            ));
        }

        debug!(url = %redact_url(&self.url), status = status.as_u16(), "Stage event delivered");
        Ok(())
    }
}
