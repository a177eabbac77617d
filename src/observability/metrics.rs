//! # Metrics Collection
//!
//! Records bootstrap and validation metrics through the `metrics` facade. No
//! exporter is installed here; an embedding process may install one.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics recorder for bootstrap stages and connectivity checks
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Record the outcome of one bootstrap stage
    pub fn record_stage(&self, stage: &str, duration: Duration, success: bool) {
        let status = if success { "success" } else { "error" };
        let labels = [("stage", stage.to_string()), ("status", status.to_string())];
        counter!("meshvault_stage_total", &labels).increment(1);

        let duration_labels = [("stage", stage.to_string())];
        histogram!("meshvault_stage_duration_seconds", &duration_labels)
            .record(duration.as_secs_f64());
    }

    /// Record a full bootstrap run
    pub fn record_bootstrap(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!("meshvault_bootstrap_runs_total", "status" => status).increment(1);
    }

    /// Record one connectivity probe attempt
    pub fn record_probe_attempt(&self, target: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        let labels = [("target", target.to_string()), ("status", status.to_string())];
        counter!("meshvault_probe_attempts_total", &labels).increment(1);
    }
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!("meshvault_stage_total", Unit::Count, "Bootstrap stages executed");
    describe_histogram!(
        "meshvault_stage_duration_seconds",
        Unit::Seconds,
        "Time spent in each bootstrap stage"
    );
    describe_counter!("meshvault_bootstrap_runs_total", Unit::Count, "Bootstrap runs");
    describe_counter!("meshvault_probe_attempts_total", Unit::Count, "Connectivity probe attempts");
    describe_counter!("meshvault_pki_ca_created_total", Unit::Count, "CAs generated");
    describe_counter!("meshvault_pki_leaf_issued_total", Unit::Count, "Leaf certificates issued");
}
