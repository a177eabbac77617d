//! # Structured Logging
//!
//! Subscriber setup and span macros. Spans carry identifiers (stage, mount,
//! path, role), never secret values.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{AppConfig, ObservabilityConfig};

/// Create a tracing span for a bootstrap stage.
///
/// ```rust,ignore
/// let span = stage_span!(Stage::RootProvisioned);
/// let span = stage_span!(Stage::SecretsWritten, secrets = 3);
/// ```
#[macro_export]
macro_rules! stage_span {
    ($stage:expr) => {
        tracing::info_span!(
            "bootstrap_stage",
            stage = %$stage,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($stage:expr, $($field:tt)*) => {
        tracing::info_span!(
            "bootstrap_stage",
            stage = %$stage,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for a secrets backend operation.
#[macro_export]
macro_rules! backend_span {
    ($operation:expr, $backend:expr) => {
        tracing::debug_span!(
            "backend_operation",
            operation = %$operation,
            backend = %$backend,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $backend:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "backend_operation",
            operation = %$operation,
            backend = %$backend,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. A subscriber that is already
/// installed (integration tests, embedding binaries) is left in place.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let result = if config.json_logging {
        tracing::subscriber::set_global_default(
            FmtSubscriber::builder().with_env_filter(filter).json().finish(),
        )
    } else {
        tracing::subscriber::set_global_default(
            FmtSubscriber::builder().with_env_filter(filter).finish(),
        )
    };

    if result.is_err() {
        tracing::debug!("Global subscriber already installed; keeping it");
    }
}

/// Log configuration at startup
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        vault_address = %config.vault.address,
        vault_namespace = ?config.vault.namespace,
        datacenter = %config.bootstrap.datacenter,
        kubernetes_auth_mount = %config.auth.mount,
        enterprise_license = config.mesh.features.enterprise_license,
        transparent_proxy = config.mesh.features.transparent_proxy,
        "meshvault configuration"
    );
}
