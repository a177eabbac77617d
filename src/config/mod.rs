//! # Configuration Management
//!
//! Configuration is read from an optional TOML or YAML file and overlaid with
//! `MESHVAULT__<SECTION>__<KEY>` environment variables, then validated. The
//! standard `VAULT_ADDR`, `VAULT_TOKEN` and `VAULT_NAMESPACE` variables win over
//! both for the Vault connection.

pub mod settings;

use std::path::Path;

pub use settings::{
    AppConfig, AuthConfig, BootstrapConfig, ObservabilityConfig, PkiConfig, ScenarioConfig,
    ValidationConfig,
};

use crate::errors::Result;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "MESHVAULT";

impl AppConfig {
    /// Load configuration from `path` (if given) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut app: AppConfig = builder.build()?.try_deserialize()?;
        app.vault = app.vault.with_env_overrides();
        app.validate()?;

        tracing::debug!(
            config_file = ?path,
            backend = %app.bootstrap.backend,
            "Configuration loaded"
        );
        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[bootstrap]
datacenter = "dc2"
backend = "in_memory"

[mesh]
intermediate_pki_path = "dc2/connect_inter"

[mesh.features]
transparent_proxy = true

[validation]
max_attempts = 5
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.bootstrap.datacenter, "dc2");
        assert_eq!(config.bootstrap.backend, crate::secrets::BackendType::InMemory);
        assert_eq!(config.mesh.intermediate_pki_path, "dc2/connect_inter");
        assert!(config.mesh.features.transparent_proxy);
        assert!(config.mesh.features.tls);
        assert_eq!(config.validation.max_attempts, 5);
        assert_eq!(config.validation.interval_seconds, 2);
    }

    #[test]
    fn test_load_rejects_invalid_file_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[validation]\nmax_attempts = 0\n").unwrap();
        assert!(AppConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/meshvault.toml"))).unwrap_err();
        assert!(matches!(err, crate::errors::BootstrapError::Config { .. }));
    }
}
