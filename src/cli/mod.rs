//! # Command Line Interface
//!
//! `bootstrap` provisions the secrets backend, `render-values` prints the mesh
//! values a bootstrap would produce, `check` probes an endpoint, and `teardown`
//! removes everything the configured plan provisions.

pub mod output;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bootstrap::{
    BackendReleaser, BootstrapDiagnostics, BootstrapOrchestrator, BootstrapPlan, CleanupScope,
};
use crate::config::AppConfig;
use crate::mesh::MeshConfigMapper;
use crate::observability::{init_observability, log_config_info};
use crate::secrets::{BackendType, InMemoryBackend, SecretsBackend, VaultBackend};
use crate::validation::{ConnectivityValidator, EndpointTarget, SuccessPredicate};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "meshvault")]
#[command(about = "Bootstrap Vault as the secrets backend of a Consul service mesh")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (TOML or YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use the process-local backend instead of Vault
    #[arg(long, global = true)]
    pub in_memory: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision policies, roles, the CA hierarchy and mesh secrets
    Bootstrap {
        /// Output format: json or yaml
        #[arg(short, long, default_value = "yaml")]
        output: String,
    },

    /// Print the mesh values without contacting the backend
    RenderValues {
        /// Output format: yaml, json or flags
        #[arg(short, long, default_value = "yaml")]
        output: String,
    },

    /// Poll an HTTP endpoint until it answers with the expected status
    Check {
        /// Endpoint to probe; defaults to the configured scenario target
        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        attempts: Option<u32>,

        /// Seconds between attempts
        #[arg(long)]
        interval: Option<u64>,

        #[arg(long)]
        status: Option<u16>,
    },

    /// Remove everything the configured plan provisions
    Teardown,
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.verbose {
        config.observability.log_level = "debug".to_string();
    }
    if cli.in_memory {
        config.bootstrap.backend = BackendType::InMemory;
    }

    let metrics = init_observability(&config.observability);
    log_config_info(&config);

    match cli.command {
        Commands::Bootstrap { output } => {
            let format = OutputFormat::parse(&output)?;
            let backend = connect_backend(&config).await?;
            let plan = BootstrapPlan::consul(&config)?;

            let mut scope = CleanupScope::new();
            let result = BootstrapOrchestrator::new(backend)
                .with_metrics(metrics)
                .run(&plan, &mut scope)
                .await;

            match result {
                Ok(outcome) => {
                    scope.disarm();
                    output::print_output(&outcome, format)?;
                }
                Err(e) => {
                    let diagnostics =
                        BootstrapDiagnostics::from_scope(&scope, e.failed_stage(), Some(&e));
                    scope.disarm();
                    output::print_output(&diagnostics, format)?;
                    if e.is_retryable() {
                        warn!("Backend was unavailable; re-running bootstrap is safe");
                    }
                    return Err(anyhow::Error::new(e).context("Bootstrap failed"));
                }
            }
        }

        Commands::RenderValues { output } => {
            let format = OutputFormat::parse(&output)?;
            let plan = BootstrapPlan::consul(&config)?;
            let references = MeshConfigMapper::map(&plan.features, &plan.expected_references())?;
            let values = MeshConfigMapper::build_values(&plan.mesh, &references)?;
            println!("{}", output::render_values(&values, format)?);
        }

        Commands::Check { url, attempts, interval, status } => {
            let validation = &config.validation;
            let target = match url {
                Some(url) => EndpointTarget::new(url),
                None if config.mesh.features.transparent_proxy => {
                    EndpointTarget::new(&config.scenario.static_server_url)
                }
                None => EndpointTarget::new(&config.scenario.upstream_url),
            };

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });

            let success = ConnectivityValidator::from_config(validation)?
                .with_metrics(metrics)
                .check(
                    &target,
                    attempts.unwrap_or(validation.max_attempts),
                    interval.map(Duration::from_secs).unwrap_or_else(|| validation.interval()),
                    &SuccessPredicate::HttpStatus(status.unwrap_or(validation.expected_status)),
                    &cancel,
                )
                .await?;
            output::print_output(&success, OutputFormat::Yaml)?;
        }

        Commands::Teardown => {
            let backend = connect_backend(&config).await?;
            let plan = BootstrapPlan::consul(&config)?;

            let mut scope = CleanupScope::new();
            for handle in plan.handles() {
                scope.track(handle);
            }
            let count = scope.handles().len();
            scope.release(&BackendReleaser::new(backend)).await?;
            info!(resources = count, "Teardown complete");
        }
    }

    Ok(())
}

/// Build the configured secrets backend.
async fn connect_backend(config: &AppConfig) -> anyhow::Result<Arc<dyn SecretsBackend>> {
    match config.bootstrap.backend {
        BackendType::Vault => {
            let backend = VaultBackend::connect(&config.vault)
                .await
                .with_context(|| format!("Failed to connect to Vault at {}", config.vault.address))?;
            Ok(Arc::new(backend))
        }
        BackendType::InMemory => Ok(Arc::new(InMemoryBackend::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "meshvault",
            "render-values",
            "--output",
            "flags",
            "--in-memory",
            "--config",
            "meshvault.toml",
        ])
        .unwrap();

        assert!(cli.in_memory);
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("meshvault.toml")));
        assert!(matches!(cli.command, Commands::RenderValues { ref output } if output == "flags"));
    }

    #[test]
    fn test_parse_check_overrides() {
        let cli = Cli::try_parse_from([
            "meshvault",
            "check",
            "--url",
            "http://static-server",
            "--attempts",
            "3",
        ])
        .unwrap();

        match cli.command {
            Commands::Check { url, attempts, interval, status } => {
                assert_eq!(url.as_deref(), Some("http://static-server"));
                assert_eq!(attempts, Some(3));
                assert!(interval.is_none());
                assert!(status.is_none());
            }
            _ => panic!("expected check command"),
        }
    }
}
