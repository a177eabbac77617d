//! # Connectivity validation
//!
//! Polls an HTTP endpoint until it answers the way a [`SuccessPredicate`]
//! expects, the attempt budget runs out, or the caller cancels. Each attempt is
//! independent; a failed attempt is logged and followed by a fixed sleep.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ValidationConfig;
use crate::errors::{BootstrapError, Result};
use crate::observability::MetricsRecorder;

/// Endpoint probed from inside the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointTarget {
    pub url: String,
}

impl EndpointTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl fmt::Display for EndpointTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// What counts as a successful probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SuccessPredicate {
    HttpStatus(u16),
    Http2xx,
    BodyContains(String),
}

impl SuccessPredicate {
    fn needs_body(&self) -> bool {
        matches!(self, Self::BodyContains(_))
    }

    /// Evaluate one response. A body predicate also requires a 2xx status.
    pub fn matches(&self, status: u16, body: Option<&str>) -> bool {
        match self {
            Self::HttpStatus(expected) => status == *expected,
            Self::Http2xx => (200..300).contains(&status),
            Self::BodyContains(text) => {
                (200..300).contains(&status) && body.is_some_and(|b| b.contains(text.as_str()))
            }
        }
    }
}

/// A probe that satisfied its predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeSuccess {
    pub target: String,
    pub attempts: u32,
    pub status: u16,
}

/// Bounded, cancellable HTTP poller.
#[derive(Debug, Clone)]
pub struct ConnectivityValidator {
    client: reqwest::Client,
    metrics: MetricsRecorder,
}

impl ConnectivityValidator {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BootstrapError::internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, metrics: MetricsRecorder::new() })
    }

    pub fn from_config(config: &ValidationConfig) -> Result<Self> {
        Self::new(config.request_timeout())
    }

    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = metrics;
        self
    }

    /// Probe `target` up to `max_attempts` times, sleeping `interval` between
    /// attempts.
    ///
    /// Returns [`BootstrapError::Timeout`] when no attempt satisfied `predicate`
    /// and [`BootstrapError::Cancelled`] as soon as `cancel` fires.
    #[instrument(skip(self, predicate, cancel), fields(target = %target))]
    pub async fn check(
        &self,
        target: &EndpointTarget,
        max_attempts: u32,
        interval: Duration,
        predicate: &SuccessPredicate,
        cancel: &CancellationToken,
    ) -> Result<ProbeSuccess> {
        if max_attempts == 0 {
            return Err(BootstrapError::validation_field(
                "At least one attempt is required",
                "max_attempts",
            ));
        }

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(cancelled(target));
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(target)),
                outcome = self.probe(target, predicate) => outcome,
            };

            match outcome {
                Ok(status) => {
                    self.metrics.record_probe_attempt(&target.url, true);
                    info!(attempt, status, "Connectivity check succeeded");
                    return Ok(ProbeSuccess { target: target.url.clone(), attempts: attempt, status });
                }
                Err(reason) => {
                    self.metrics.record_probe_attempt(&target.url, false);
                    debug!(attempt, max_attempts, reason = %reason, "Probe attempt failed");
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(cancelled(target)),
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }

        warn!(attempts = max_attempts, "Connectivity check exhausted its attempts");
        Err(BootstrapError::timeout(target.url.clone(), max_attempts))
    }

    /// One request. `Err` carries a human readable reason for the log.
    async fn probe(
        &self,
        target: &EndpointTarget,
        predicate: &SuccessPredicate,
    ) -> std::result::Result<u16, String> {
        let response = self.client.get(&target.url).send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();

        let body = if predicate.needs_body() {
            Some(response.text().await.map_err(|e| e.to_string())?)
        } else {
            None
        };

        if predicate.matches(status, body.as_deref()) {
            Ok(status)
        } else {
            Err(format!("unexpected response status {}", status))
        }
    }
}

fn cancelled(target: &EndpointTarget) -> BootstrapError {
    BootstrapError::cancelled(format!("connectivity check to {}", target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(SuccessPredicate::HttpStatus(200).matches(200, None));
        assert!(!SuccessPredicate::HttpStatus(200).matches(403, None));
        assert!(SuccessPredicate::HttpStatus(403).matches(403, None));
        assert!(SuccessPredicate::Http2xx.matches(204, None));
        assert!(!SuccessPredicate::Http2xx.matches(503, None));

        let body = SuccessPredicate::BodyContains("hello world".to_string());
        assert!(body.matches(200, Some("\"hello world\"")));
        assert!(!body.matches(500, Some("hello world")));
        assert!(!body.matches(200, None));
    }

    #[tokio::test]
    async fn test_zero_attempts_rejected() {
        let validator = ConnectivityValidator::new(Duration::from_secs(1)).unwrap();
        let err = validator
            .check(
                &EndpointTarget::new("http://127.0.0.1:9"),
                0,
                Duration::ZERO,
                &SuccessPredicate::Http2xx,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_request() {
        let validator = ConnectivityValidator::new(Duration::from_secs(1)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = validator
            .check(
                &EndpointTarget::new("http://127.0.0.1:9"),
                5,
                Duration::from_secs(60),
                &SuccessPredicate::Http2xx,
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::Cancelled { .. }));
    }

    #[test]
    fn test_validator_from_config() {
        let config = ValidationConfig::default();
        assert!(ConnectivityValidator::from_config(&config).is_ok());
    }
}
