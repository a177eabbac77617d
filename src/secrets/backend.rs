//! Secrets backend trait definition.
//!
//! [`SecretsBackend`] is the narrow slice of the Vault API the bootstrap needs:
//! KV v2 documents, PKI mounts, ACL policies, and the Kubernetes auth method.
//! Every provisioning component talks to the backend only through this trait,
//! so the same orchestration runs against a real Vault ([`super::VaultBackend`])
//! or the process-local engine ([`super::InMemoryBackend`]).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::path::KvPath;
use super::types::SecretString;
use crate::errors::Result;

/// Type of secrets backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// HashiCorp Vault over HTTP
    Vault,
    /// Process-local backend for dry runs and tests
    InMemory,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vault => "vault",
            Self::InMemory => "in_memory",
        }
    }
}

impl FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "vault" => Ok(Self::Vault),
            "in_memory" | "memory" => Ok(Self::InMemory),
            _ => Err(format!("Unknown secrets backend type: {}", s)),
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// CA material returned when a root or intermediate is generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaBundle {
    /// PEM certificate of the CA on this mount
    pub certificate: String,
    /// PEM certificate of the CA that signed it (itself for a root)
    pub issuing_ca: String,
    /// PEM chain from this CA upward, excluding the self-signed root
    pub ca_chain: Vec<String>,
    pub serial_number: String,
}

/// Leaf certificate material returned by an issue call.
#[derive(Clone)]
pub struct IssuedCertificate {
    pub certificate: String,
    pub private_key: SecretString,
    pub issuing_ca: String,
    /// PEM chain from the issuing CA upward
    pub ca_chain: Vec<String>,
    pub serial_number: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("certificate", &format!("[{} bytes PEM]", self.certificate.len()))
            .field("private_key", &self.private_key)
            .field("ca_chain", &self.ca_chain.len())
            .field("serial_number", &self.serial_number)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// PKI role registered under an issuer mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkiRoleConfig {
    pub name: String,
    pub allowed_domains: Vec<String>,
    pub allow_subdomains: bool,
    pub allow_bare_domains: bool,
    pub allow_localhost: bool,
    pub allow_any_name: bool,
    pub generate_lease: bool,
    /// Upper bound for issued certificate lifetimes; longer requests are clamped
    #[serde(with = "duration_secs")]
    pub max_ttl: Duration,
}

impl PkiRoleConfig {
    /// Check a requested common name against the role's domain rules.
    pub fn allows(&self, common_name: &str) -> bool {
        if self.allow_any_name {
            return true;
        }
        if common_name == "localhost" {
            return self.allow_localhost;
        }
        self.allowed_domains.iter().any(|domain| {
            (self.allow_bare_domains && common_name == domain)
                || (self.allow_subdomains && common_name.ends_with(&format!(".{}", domain)))
        })
    }
}

/// Kubernetes auth role: binds service accounts in namespaces to policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesRoleConfig {
    pub bound_service_account_names: Vec<String>,
    pub bound_service_account_namespaces: Vec<String>,
    pub token_policies: Vec<String>,
    #[serde(with = "duration_secs")]
    pub token_ttl: Duration,
}

/// Serde helper storing durations as whole seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Format a duration the way Vault accepts TTL strings.
pub fn vault_ttl(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}

/// Secrets backend abstraction.
///
/// Implementations must be `Send + Sync`. Absent resources are reported as
/// `Ok(None)` from read calls, never as errors. Write calls are upserts unless
/// noted otherwise.
#[async_trait]
pub trait SecretsBackend: Send + Sync + fmt::Debug {
    /// Make sure a KV v2 engine is mounted at `mount`. Returns `true` when this
    /// call mounted it.
    async fn ensure_kv_mount(&self, mount: &str) -> Result<bool>;

    /// Unmount a KV engine, discarding every document under it.
    async fn disable_kv_mount(&self, mount: &str) -> Result<()>;

    /// Read the full KV document at `path`.
    async fn kv_read(&self, path: &KvPath) -> Result<Option<BTreeMap<String, String>>>;

    /// Replace the KV document at `path` with `data` (new version).
    async fn kv_write(&self, path: &KvPath, data: &BTreeMap<String, String>) -> Result<()>;

    /// Remove every version and the metadata of `path`.
    async fn kv_delete(&self, path: &KvPath) -> Result<()>;

    /// Maximum lease TTL of a mounted PKI engine, or `None` if not mounted.
    async fn pki_mount_max_ttl(&self, mount: &str) -> Result<Option<Duration>>;

    /// Mount a PKI engine with the given maximum lease TTL. No-op if mounted;
    /// returns `true` when this call mounted it.
    async fn enable_pki_mount(&self, mount: &str, max_lease_ttl: Duration) -> Result<bool>;

    /// Unmount a PKI engine, discarding its CA and roles.
    async fn disable_pki_mount(&self, mount: &str) -> Result<()>;

    /// PEM of the CA configured on `mount`, or `None` if no CA is set.
    async fn pki_read_ca(&self, mount: &str) -> Result<Option<String>>;

    /// Generate an internal self-signed root on `mount`.
    async fn pki_generate_root(
        &self,
        mount: &str,
        common_name: &str,
        ttl: Duration,
    ) -> Result<CaBundle>;

    /// Generate an intermediate on `mount` signed by the CA on `parent_mount`
    /// and install the signed certificate.
    async fn pki_generate_intermediate(
        &self,
        mount: &str,
        parent_mount: &str,
        common_name: &str,
        ttl: Duration,
    ) -> Result<CaBundle>;

    async fn pki_write_role(&self, mount: &str, role: &PkiRoleConfig) -> Result<()>;

    async fn pki_read_role(&self, mount: &str, name: &str) -> Result<Option<PkiRoleConfig>>;

    /// Issue a leaf certificate through `role` on `mount`.
    async fn pki_issue(
        &self,
        mount: &str,
        role: &str,
        common_name: &str,
        ttl: Duration,
    ) -> Result<IssuedCertificate>;

    /// Create or replace an ACL policy.
    async fn policy_write(&self, name: &str, rules: &str) -> Result<()>;

    /// Raw HCL of an ACL policy.
    async fn policy_read(&self, name: &str) -> Result<Option<String>>;

    async fn policy_delete(&self, name: &str) -> Result<()>;

    /// Enable (if needed) and configure the Kubernetes auth method at `mount`.
    /// Returns `true` when this call enabled the method.
    async fn enable_kubernetes_auth(&self, mount: &str, kubernetes_host: &str) -> Result<bool>;

    /// Disable the auth method at `mount`, dropping its roles.
    async fn disable_auth_mount(&self, mount: &str) -> Result<()>;

    async fn kubernetes_auth_enabled(&self, mount: &str) -> Result<bool>;

    async fn kubernetes_role_write(
        &self,
        mount: &str,
        name: &str,
        role: &KubernetesRoleConfig,
    ) -> Result<()>;

    async fn kubernetes_role_read(
        &self,
        mount: &str,
        name: &str,
    ) -> Result<Option<KubernetesRoleConfig>>;

    async fn kubernetes_role_delete(&self, mount: &str, name: &str) -> Result<()>;

    /// Verify the backend is reachable and unsealed.
    async fn health_check(&self) -> Result<()>;

    fn backend_type(&self) -> BackendType;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_role() -> PkiRoleConfig {
        PkiRoleConfig {
            name: "consul-server".to_string(),
            allowed_domains: vec!["dc1.consul".to_string(), "consul-server".to_string()],
            allow_subdomains: true,
            allow_bare_domains: false,
            allow_localhost: true,
            allow_any_name: false,
            generate_lease: true,
            max_ttl: Duration::from_secs(3600),
        }
    }

    #[test]
    fn test_role_allows_subdomains() {
        let role = server_role();
        assert!(role.allows("server.dc1.consul"));
        assert!(role.allows("localhost"));
        assert!(!role.allows("dc1.consul"));
        assert!(!role.allows("server.dc2.consul"));
        assert!(!role.allows("evil-dc1.consul"));
    }

    #[test]
    fn test_role_allow_any_name() {
        let role = PkiRoleConfig { allow_any_name: true, ..server_role() };
        assert!(role.allows("anything.example.com"));
    }

    #[test]
    fn test_backend_type_parse_and_display() {
        assert_eq!("vault".parse::<BackendType>().unwrap(), BackendType::Vault);
        assert_eq!("memory".parse::<BackendType>().unwrap(), BackendType::InMemory);
        assert!("consul".parse::<BackendType>().is_err());
        assert_eq!(BackendType::InMemory.to_string(), "in_memory");
    }

    #[test]
    fn test_vault_ttl_format() {
        assert_eq!(vault_ttl(Duration::from_secs(3600)), "3600s");
    }

    #[test]
    fn test_role_serializes_ttl_as_seconds() {
        let json = serde_json::to_value(server_role()).unwrap();
        assert_eq!(json["max_ttl"], 3600);
    }
}
