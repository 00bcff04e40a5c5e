//! Prometheus metrics for HTTP requests, authorization decisions and pipeline activity.
//!
//! # Example
//!
//! ```rust,no_run
//! use crm_core::telemetry::metrics::{PipelineMetrics, RequestDurationHistogram};
//!
//! RequestDurationHistogram::record("POST", "/api/v1/leads", 201, 0.012);
//! PipelineMetrics::record_transition("lead", true);
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether to install the Prometheus recorder
    pub enabled: bool,

    /// Histogram buckets for request durations (in seconds)
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_buckets: vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        }
    }
}

/// Handle to the installed Prometheus recorder.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// A registry that renders nothing; used when metrics are disabled.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Initialize the metrics subsystem and install the global recorder.
///
/// # Errors
///
/// Returns an error if the buckets are invalid or a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let handle = PrometheusBuilder::new()
        .add_global_label("service", service_name)
        .set_buckets(&config.duration_buckets)?
        .install_recorder()?;

    register_metric_descriptions();

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!("http_requests_total", "Total number of HTTP requests");

    describe_counter!("crm_errors_total", "Total number of errors by code and category");
    describe_counter!(
        "crm_authz_decisions_total",
        "Authorization gateway decisions by outcome"
    );
    describe_counter!(
        "crm_stage_transitions_total",
        "Committed stage transitions by subject"
    );
    describe_counter!(
        "crm_customer_conversions_total",
        "Customer conversion side effects by effect"
    );
    describe_counter!(
        "crm_side_integration_failures_total",
        "Best-effort integration failures by integration"
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP
// ═══════════════════════════════════════════════════════════════════════════════

/// Request duration histogram for HTTP requests.
pub struct RequestDurationHistogram;

impl RequestDurationHistogram {
    /// Record a request duration.
    pub fn record(method: &str, path: &str, status_code: u16, duration_seconds: f64) {
        histogram!(
            "http_request_duration_seconds",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status_code" => status_code.to_string(),
        )
        .record(duration_seconds);

        counter!(
            "http_requests_total",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status_code" => status_code.to_string(),
        )
        .increment(1);
    }

    /// Start timing a request.
    pub fn start(method: &str, path: &str) -> RequestTimer {
        RequestTimer {
            start: Instant::now(),
            method: method.to_string(),
            path: path.to_string(),
        }
    }
}

/// Timer for measuring request durations.
pub struct RequestTimer {
    start: Instant,
    method: String,
    path: String,
}

impl RequestTimer {
    /// Finish timing and record the duration.
    pub fn finish(self, status_code: u16) {
        let duration = self.start.elapsed().as_secs_f64();
        RequestDurationHistogram::record(&self.method, &self.path, status_code, duration);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Domain
// ═══════════════════════════════════════════════════════════════════════════════

/// Authorization gateway counters.
pub struct AuthzMetrics;

impl AuthzMetrics {
    pub fn record(resource: &str, allowed: bool) {
        counter!(
            "crm_authz_decisions_total",
            "resource" => resource.to_string(),
            "decision" => if allowed { "allow" } else { "deny" },
        )
        .increment(1);
    }
}

/// Pipeline engine counters.
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// Record a committed transition. No-op moves are labelled `changed=false`.
    pub fn record_transition(subject: &str, changed: bool) {
        counter!(
            "crm_stage_transitions_total",
            "subject" => subject.to_string(),
            "changed" => changed.to_string(),
        )
        .increment(1);
    }

    pub fn record_conversion(effect: &str) {
        counter!("crm_customer_conversions_total", "effect" => effect.to_string()).increment(1);
    }

    pub fn record_integration_failure(integration: &str) {
        counter!(
            "crm_side_integration_failures_total",
            "integration" => integration.to_string(),
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_defaults() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn test_disabled_registry_renders_empty() {
        assert_eq!(MetricsRegistry::disabled().render(), "");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        RequestDurationHistogram::start("GET", "/health").finish(200);
        AuthzMetrics::record("lead", false);
        PipelineMetrics::record_transition("deal", true);
        PipelineMetrics::record_conversion("customer_created");
        PipelineMetrics::record_integration_failure("webhook");
    }
}
