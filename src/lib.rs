//! # meshvault
//!
//! Bootstraps HashiCorp Vault as the secrets backend of a Consul service mesh on
//! Kubernetes, then checks that the mesh actually carries traffic.
//!
//! ## Architecture
//!
//! ```text
//! BootstrapOrchestrator → PolicyManager → AuthRoleBinder → PkiProvisioner
//!        ↓                                                      ↓
//!  SecretRepository (gossip key, license, snapshot agent)   root → intermediate → roles
//!        ↓
//!  MeshConfigMapper → Helm values → (mesh deployment) → ConnectivityValidator
//! ```
//!
//! Every component talks to the backend through the [`secrets::SecretsBackend`]
//! trait. [`secrets::VaultBackend`] is the production implementation;
//! [`secrets::InMemoryBackend`] runs the same semantics in-process for dry runs
//! and tests.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshvault::{AppConfig, BootstrapOrchestrator, BootstrapPlan, CleanupScope, Result};
//! use meshvault::secrets::VaultBackend;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = AppConfig::load(None)?;
//!     let backend = Arc::new(VaultBackend::connect(&config.vault).await?);
//!     let plan = BootstrapPlan::consul(&config)?;
//!
//!     let mut scope = CleanupScope::new();
//!     let outcome = BootstrapOrchestrator::new(backend).run(&plan, &mut scope).await?;
//!     scope.disarm();
//!     println!("{}", outcome.values.to_yaml()?);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod errors;
pub mod mesh;
pub mod observability;
pub mod pki;
pub mod policy;
pub mod scenario;
pub mod secrets;
pub mod validation;

// Re-export commonly used types
pub use bootstrap::{
    BootstrapDiagnostics, BootstrapOrchestrator, BootstrapOutcome, BootstrapPlan, CleanupScope,
    ResourceHandle, Stage,
};
pub use config::AppConfig;
pub use errors::{BootstrapError, ErrorKind, Result};
pub use scenario::{AccessPolicyApplier, Intention, MeshDeployer, Scenario, ScenarioReport};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "meshvault");
    }
}
