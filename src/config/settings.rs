//! # Configuration Settings
//!
//! Defines the configuration structure for meshvault. Defaults reproduce the
//! reference Consul-on-Vault deployment: datacenter `dc1`, KV mount `consul`,
//! Kubernetes auth at `kubernetes`, connect CA at `connect_root` and
//! `dc1/connect_inter`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{BootstrapError, Result};
use crate::mesh::MeshSettings;
use crate::secrets::{BackendType, SecretString, VaultConfig};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Vault connection
    #[validate(nested)]
    pub vault: VaultConfig,

    /// What to provision and where
    #[validate(nested)]
    pub bootstrap: BootstrapConfig,

    /// Kubernetes auth method
    #[validate(nested)]
    pub auth: AuthConfig,

    /// CA hierarchy
    #[validate(nested)]
    pub pki: PkiConfig,

    /// Mesh features and Helm value inputs
    #[validate(nested)]
    pub mesh: MeshSettings,

    /// Connectivity check budget
    #[validate(nested)]
    pub validation: ValidationConfig,

    #[validate(nested)]
    pub observability: ObservabilityConfig,

    pub scenario: ScenarioConfig,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(BootstrapError::from)?;
        self.validate_custom()
    }

    /// Cross-section rules the validator derive cannot express
    fn validate_custom(&self) -> Result<()> {
        let scheme = url::Url::parse(&self.vault.address).map(|u| u.scheme().to_string());
        if !matches!(scheme.as_deref(), Ok("http") | Ok("https")) {
            return Err(BootstrapError::validation_field(
                "Vault address must be an http:// or https:// URL",
                "vault.address",
            ));
        }

        if self.mesh.features.enterprise_license
            && self.bootstrap.enterprise_license.as_ref().map_or(true, SecretString::is_empty)
        {
            return Err(BootstrapError::validation_field(
                "Enterprise license feature is enabled but no license is configured",
                "bootstrap.enterprise_license",
            ));
        }

        if self.mesh.features.connect_ca
            && self.mesh.root_pki_path == self.mesh.intermediate_pki_path
        {
            return Err(BootstrapError::validation_field(
                "Connect root and intermediate PKI paths must differ",
                "mesh.intermediate_pki_path",
            ));
        }

        if self.mesh.features.tls
            && (self.pki.server_ca_mount == self.mesh.root_pki_path
                || self.pki.server_ca_mount == self.mesh.intermediate_pki_path)
        {
            return Err(BootstrapError::validation_field(
                "Server CA mount must not share a connect CA mount",
                "pki.server_ca_mount",
            ));
        }

        if self.pki.intermediate_ttl_hours > self.pki.root_ttl_hours {
            tracing::warn!(
                intermediate_ttl_hours = self.pki.intermediate_ttl_hours,
                root_ttl_hours = self.pki.root_ttl_hours,
                "Intermediate TTL exceeds root TTL and will be clamped"
            );
        }

        Ok(())
    }
}

/// What gets written to the secrets backend
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Backend to provision against
    pub backend: BackendType,

    /// Consul datacenter name
    #[validate(length(min = 1, max = 63, message = "Datacenter must be 1-63 characters"))]
    pub datacenter: String,

    /// Kubernetes namespace the mesh is installed into
    #[validate(length(min = 1, max = 63, message = "Namespace must be 1-63 characters"))]
    pub namespace: String,

    /// Helm release name; prefixes the mesh service accounts
    #[validate(length(min = 1, max = 53, message = "Release name must be 1-53 characters"))]
    pub release_name: String,

    /// KV v2 mount holding the mesh secrets
    #[validate(length(min = 1, message = "KV mount cannot be empty"))]
    pub kv_mount: String,

    /// Snapshot agent configuration document stored for the client agents
    pub snapshot_agent_config: SecretString,

    /// Enterprise license text, required when the license feature is on
    pub enterprise_license: Option<SecretString>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Vault,
            datacenter: "dc1".to_string(),
            namespace: "default".to_string(),
            release_name: "consul".to_string(),
            kv_mount: "consul".to_string(),
            snapshot_agent_config: SecretString::new(DEFAULT_SNAPSHOT_AGENT_CONFIG),
            enterprise_license: None,
        }
    }
}

const DEFAULT_SNAPSHOT_AGENT_CONFIG: &str = r#"{"snapshot_agent":{"log":{"level":"INFO","enable_syslog":false},"snapshot":{"interval":"1h","retain":30,"deregister_after":"8h"},"local_storage":{"path":"."}}}"#;

/// Kubernetes auth method configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AuthConfig {
    /// Auth method mount path
    #[validate(length(min = 1, message = "Auth mount cannot be empty"))]
    pub mount: String,

    /// Kubernetes API address Vault uses to review service account tokens
    #[validate(url(message = "Kubernetes host must be a URL"))]
    pub kubernetes_host: String,

    /// Lifetime of tokens issued to bound workloads
    #[validate(range(min = 60, max = 2592000, message = "Token TTL must be between 1 minute and 30 days"))]
    pub token_ttl_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mount: "kubernetes".to_string(),
            kubernetes_host: "https://kubernetes.default.svc".to_string(),
            token_ttl_seconds: 24 * 60 * 60,
        }
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_seconds)
    }
}

/// CA hierarchy configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PkiConfig {
    /// Mount of the CA that signs server certificates
    #[validate(length(min = 1, message = "Server CA mount cannot be empty"))]
    pub server_ca_mount: String,

    #[validate(length(min = 1, message = "Server CA common name cannot be empty"))]
    pub server_ca_common_name: String,

    /// Common name of the connect root CA; its mount is `mesh.root_pki_path`
    #[validate(length(min = 1, message = "Root common name cannot be empty"))]
    pub root_common_name: String,

    #[validate(length(min = 1, message = "Intermediate common name cannot be empty"))]
    pub intermediate_common_name: String,

    #[validate(range(min = 1, max = 876000, message = "Root TTL must be between 1 hour and 100 years"))]
    pub root_ttl_hours: u64,

    #[validate(range(min = 1, max = 876000, message = "Intermediate TTL must be between 1 hour and 100 years"))]
    pub intermediate_ttl_hours: u64,

    /// PKI role used to issue server certificates
    #[validate(length(min = 1, message = "Server role name cannot be empty"))]
    pub server_role_name: String,

    /// Upper bound on server certificate lifetime
    #[validate(range(min = 60, message = "Server certificate max TTL must be at least 60 seconds"))]
    pub server_cert_max_ttl_seconds: u64,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            server_ca_mount: "pki".to_string(),
            server_ca_common_name: "Consul CA".to_string(),
            root_common_name: "Consul Connect Root CA".to_string(),
            intermediate_common_name: "Consul Connect Intermediate CA".to_string(),
            root_ttl_hours: 87600,
            intermediate_ttl_hours: 8760,
            server_role_name: "consul-server".to_string(),
            server_cert_max_ttl_seconds: 3600,
        }
    }
}

impl PkiConfig {
    pub fn root_ttl(&self) -> Duration {
        Duration::from_secs(self.root_ttl_hours * 3600)
    }

    pub fn intermediate_ttl(&self) -> Duration {
        Duration::from_secs(self.intermediate_ttl_hours * 3600)
    }

    pub fn server_cert_max_ttl(&self) -> Duration {
        Duration::from_secs(self.server_cert_max_ttl_seconds)
    }
}

/// Connectivity check budget
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ValidationConfig {
    #[validate(range(min = 1, max = 1000, message = "Max attempts must be between 1 and 1000"))]
    pub max_attempts: u32,

    #[validate(range(max = 300, message = "Interval must be at most 300 seconds"))]
    pub interval_seconds: u64,

    #[validate(range(min = 1, max = 120, message = "Request timeout must be between 1 and 120 seconds"))]
    pub request_timeout_seconds: u64,

    /// Status the probe must return
    #[validate(range(min = 100, max = 599, message = "Expected status must be a valid HTTP status"))]
    pub expected_status: u16,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { max_attempts: 30, interval_seconds: 2, request_timeout_seconds: 5, expected_status: 200 }
    }
}

impl ValidationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or an EnvFilter directive
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    /// Record stage and probe metrics
    pub enable_metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), json_logging: false, enable_metrics: true }
    }
}

/// End-to-end scenario configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Leave provisioned state in place when the run fails
    pub no_cleanup_on_failure: bool,

    /// Probe target when transparent proxy is enabled
    pub static_server_url: String,

    /// Probe target through the explicit upstream listener otherwise
    pub upstream_url: String,

    pub intention_source: String,
    pub intention_destination: String,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            no_cleanup_on_failure: false,
            static_server_url: "http://static-server".to_string(),
            upstream_url: "http://localhost:1234".to_string(),
            intention_source: "static-client".to_string(),
            intention_destination: "static-server".to_string(),
        }
    }
}
