//! Telemetry: structured logging and Prometheus metrics.
//!
//! - **Logging**: JSON/pretty/compact output through `tracing-subscriber` with
//!   sensitive data redaction
//! - **Metrics**: Prometheus counters and histograms for requests,
//!   authorization decisions and pipeline activity
//!
//! # Example
//!
//! ```rust,no_run
//! use crm_core::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let handle = init_telemetry(&TelemetryConfig::default()).expect("telemetry");
//! println!("{}", handle.metrics.render());
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{
    init_logging, redact_url, LogFormat, LoggingConfig, RedactingMakeWriter, RedactionConfig,
    SensitiveFieldRedactor,
};
pub use metrics::{
    init_metrics, AuthzMetrics, MetricsConfig, MetricsRegistry, PipelineMetrics,
    RequestDurationHistogram,
};

use crate::config::ObservabilityConfig;

/// Unified telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name used as a global metrics label
    pub service_name: String,

    pub logging: LoggingConfig,

    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "crm-core".to_string(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl From<&ObservabilityConfig> for TelemetryConfig {
    fn from(config: &ObservabilityConfig) -> Self {
        let defaults = Self::default();
        Self {
            logging: LoggingConfig {
                level: config.log_level.clone(),
                format: config.log_format,
                ..defaults.logging
            },
            metrics: MetricsConfig {
                enabled: config.metrics_enabled,
                ..defaults.metrics
            },
            ..defaults
        }
    }
}

/// Initialize logging and metrics. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryHandle> {
    init_logging(&config.logging)?;
    let metrics = init_metrics(&config.metrics, &config.service_name)?;

    Ok(TelemetryHandle { metrics })
}

/// Handle for the installed telemetry stack.
#[derive(Debug, Clone)]
pub struct TelemetryHandle {
    pub metrics: MetricsRegistry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_observability_config() {
        let obs = ObservabilityConfig {
            log_level: "crm_core=debug".to_string(),
            log_format: LogFormat::Compact,
            metrics_enabled: false,
        };
        let config = TelemetryConfig::from(&obs);
        assert_eq!(config.service_name, "crm-core");
        assert_eq!(config.logging.level, "crm_core=debug");
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(!config.metrics.enabled);
    }
}
