//! # Observability Infrastructure
//!
//! Structured logging through `tracing` and counters/histograms through the
//! `metrics` facade.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, log_config_info};
pub use metrics::{describe_metrics, MetricsRecorder};

use crate::config::ObservabilityConfig;

/// Initialize logging and metric descriptions
pub fn init_observability(config: &ObservabilityConfig) -> MetricsRecorder {
    init_logging(config);
    if config.enable_metrics {
        describe_metrics();
    }

    ::tracing::info!(
        log_level = %config.log_level,
        json_logging = config.json_logging,
        metrics_enabled = config.enable_metrics,
        "Observability initialized"
    );

    MetricsRecorder::new()
}
