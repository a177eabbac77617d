//! HashiCorp Vault secrets backend implementation.
//!
//! KV v2 documents, ACL policies, and the mount/auth tables go through the
//! typed `vaultrs` client. The PKI hierarchy (mount tuning, root and intermediate
//! generation, sign/set-signed, roles, issue) and Kubernetes auth roles use a thin
//! JSON layer over the same HTTP API, since those calls need request and
//! response fields that are exchanged as raw Vault JSON.
//!
//! # Configuration
//!
//! - `VAULT_ADDR`: Vault server address
//! - `VAULT_TOKEN`: Authentication token
//! - `VAULT_NAMESPACE`: Vault namespace (optional, for Enterprise)
//!
//! # Security
//!
//! - Tokens and secret values are never logged
//! - Errors carry paths and Vault's error strings, never request bodies

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument};
use validator::Validate;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::kv2;

use super::backend::{
    vault_ttl, BackendType, CaBundle, IssuedCertificate, KubernetesRoleConfig, PkiRoleConfig,
    SecretsBackend,
};
use super::path::KvPath;
use super::types::SecretString;
use crate::errors::{BootstrapError, Result};

/// Configuration for the HashiCorp Vault backend.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault server address (e.g., "https://vault.example.com:8200")
    #[validate(length(min = 1, message = "Vault address cannot be empty"))]
    pub address: String,

    /// Vault authentication token
    pub token: Option<SecretString>,

    /// Vault namespace (for Enterprise multi-tenancy)
    pub namespace: Option<String>,

    /// Per-request timeout in seconds
    #[validate(range(min = 1, max = 300, message = "Request timeout must be between 1 and 300 seconds"))]
    pub request_timeout_seconds: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8200".to_string(),
            token: None,
            namespace: None,
            request_timeout_seconds: 30,
        }
    }
}

impl VaultConfig {
    /// Overlay `VAULT_ADDR`, `VAULT_TOKEN` and `VAULT_NAMESPACE` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(address) = std::env::var("VAULT_ADDR") {
            self.address = address;
        }
        if let Ok(token) = std::env::var("VAULT_TOKEN") {
            self.token = Some(SecretString::new(token));
        }
        if let Ok(namespace) = std::env::var("VAULT_NAMESPACE") {
            self.namespace = Some(namespace);
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Check if a Vault error message describes a transient condition.
fn is_transient_vault_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    error_lower.contains("connection refused")
        || error_lower.contains("connection reset")
        || error_lower.contains("connection closed")
        || error_lower.contains("timed out")
        || error_lower.contains("timeout")
        || error_lower.contains("too many requests")
        || error_lower.contains("vault is sealed")
}

/// Map a `vaultrs` error for an operation on `path`.
fn map_client_error(err: ClientError, path: &str) -> BootstrapError {
    match BootstrapError::from_vault(err, path) {
        BootstrapError::Internal { message } if is_transient_vault_error(&message) => {
            BootstrapError::backend_unavailable(message)
        }
        mapped => mapped,
    }
}

fn is_not_found(err: &ClientError) -> bool {
    matches!(err, ClientError::APIError { code: 404, .. })
}

/// Raw JSON access to endpoints without a typed `vaultrs` wrapper.
struct VaultHttp {
    http: reqwest::Client,
    address: String,
    token: Option<SecretString>,
    namespace: Option<String>,
}

impl VaultHttp {
    fn new(config: &VaultConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BootstrapError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            address: config.address.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            namespace: config.namespace.clone(),
        })
    }

    /// Send a request to `/v1/{path}`.
    ///
    /// Returns `Ok(None)` for 404, `Ok(Some(Value::Null))` for empty bodies.
    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Option<Value>> {
        let url = format!("{}/v1/{}", self.address, path);
        let mut request = self.http.request(method.clone(), &url);

        if let Some(token) = &self.token {
            request = request.header("X-Vault-Token", token.expose_secret());
        }
        if let Some(namespace) = &self.namespace {
            request = request.header("X-Vault-Namespace", namespace);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            BootstrapError::backend_unavailable(format!("{} {}: {}", method, path, e))
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            BootstrapError::backend_unavailable(format!("{} {}: {}", method, path, e))
        })?;

        if status.as_u16() == 404 {
            return Ok(None);
        }

        if !status.is_success() {
            let errors = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("errors").cloned())
                .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
                .unwrap_or_default()
                .join("; ");

            return Err(match status.as_u16() {
                403 => BootstrapError::permission_denied(path, errors),
                429 | 500..=599 => BootstrapError::backend_unavailable(format!(
                    "{} {} returned {}: {}",
                    method, path, status, errors
                )),
                _ => BootstrapError::internal(format!(
                    "{} {} returned {}: {}",
                    method, path, status, errors
                )),
            });
        }

        if text.trim().is_empty() {
            return Ok(Some(Value::Null));
        }

        serde_json::from_str(&text).map(Some).map_err(|e| {
            BootstrapError::internal(format!("Invalid JSON from Vault for {}: {}", path, e))
        })
    }

    async fn read_data(&self, path: &str) -> Result<Option<Value>> {
        Ok(self.send(Method::GET, path, None).await?.and_then(|v| v.get("data").cloned()))
    }

    async fn write(&self, path: &str, body: Value) -> Result<Option<Value>> {
        match self.send(Method::POST, path, Some(body)).await? {
            Some(v) => Ok(v.get("data").cloned()),
            None => Err(BootstrapError::not_found("vault path", path)),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.send(Method::DELETE, path, None).await.map(|_| ())
    }
}

fn str_field(data: &Value, field: &str) -> String {
    data.get(field).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn str_list(data: &Value, field: &str) -> Vec<String> {
    match data.get(field) {
        Some(Value::Array(items)) => {
            items.iter().filter_map(Value::as_str).map(str::to_string).collect()
        }
        Some(Value::String(s)) if !s.is_empty() => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn bool_field(data: &Value, field: &str) -> bool {
    data.get(field).and_then(Value::as_bool).unwrap_or(false)
}

fn secs_field(data: &Value, field: &str) -> Duration {
    Duration::from_secs(data.get(field).and_then(Value::as_u64).unwrap_or(0))
}

/// HashiCorp Vault secrets backend.
///
/// `Send + Sync`; share it behind an `Arc` across components.
pub struct VaultBackend {
    client: VaultClient,
    http: VaultHttp,
    address: String,
}

impl std::fmt::Debug for VaultBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultBackend")
            .field("address", &self.address)
            .field("client", &"[VaultClient]")
            .finish()
    }
}

impl VaultBackend {
    /// Creates a Vault backend and checks that the server is reachable.
    ///
    /// # Errors
    ///
    /// - [`BootstrapError::Config`] if configuration is invalid
    /// - [`BootstrapError::BackendUnavailable`] if Vault is unreachable or sealed
    pub async fn connect(config: &VaultConfig) -> Result<Self> {
        let backend = Self::new(config)?;
        backend.health_check().await?;

        info!(
            vault_addr = %config.address,
            namespace = ?config.namespace,
            "Connected to Vault secrets backend"
        );

        Ok(backend)
    }

    /// Creates a Vault backend without contacting the server.
    pub fn new(config: &VaultConfig) -> Result<Self> {
        config.validate().map_err(BootstrapError::from)?;

        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(&config.address);

        if let Some(ref token) = config.token {
            settings_builder.token(token.expose_secret());
        }

        if let Some(namespace) = config.namespace.clone() {
            settings_builder.namespace(Some(namespace));
        }

        let settings = settings_builder.build().map_err(|e| {
            BootstrapError::config(format!("Invalid Vault configuration: {}", e))
        })?;

        let client = VaultClient::new(settings).map_err(|e| {
            BootstrapError::backend_unavailable(format!("Failed to create Vault client: {}", e))
        })?;

        Ok(Self { client, http: VaultHttp::new(config)?, address: config.address.clone() })
    }

    async fn mount_listed(&self, mount: &str) -> Result<bool> {
        let mounts = vaultrs::sys::mount::list(&self.client)
            .await
            .map_err(|e| map_client_error(e, "sys/mounts"))?;
        Ok(mounts.contains_key(&format!("{}/", mount.trim_end_matches('/'))))
    }
}

#[async_trait]
impl SecretsBackend for VaultBackend {
    #[instrument(skip(self), fields(backend = "vault"))]
    async fn ensure_kv_mount(&self, mount: &str) -> Result<bool> {
        if self.mount_listed(mount).await? {
            return Ok(false);
        }
        vaultrs::sys::mount::enable(&self.client, mount, "kv-v2", None)
            .await
            .map_err(|e| map_client_error(e, &format!("sys/mounts/{}", mount)))?;
        info!(mount = %mount, "Enabled KV v2 secrets engine");
        Ok(true)
    }

    async fn disable_kv_mount(&self, mount: &str) -> Result<()> {
        self.http.delete(&format!("sys/mounts/{}", mount)).await?;
        info!(mount = %mount, "Disabled KV secrets engine");
        Ok(())
    }

    async fn kv_read(&self, path: &KvPath) -> Result<Option<BTreeMap<String, String>>> {
        match kv2::read::<BTreeMap<String, String>>(&self.client, path.mount(), path.logical())
            .await
        {
            Ok(data) => Ok(Some(data)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(map_client_error(e, &path.to_string())),
        }
    }

    async fn kv_write(&self, path: &KvPath, data: &BTreeMap<String, String>) -> Result<()> {
        kv2::set(&self.client, path.mount(), path.logical(), data)
            .await
            .map_err(|e| map_client_error(e, &path.to_string()))?;
        debug!(path = %path, fields = data.len(), "Wrote KV document to Vault");
        Ok(())
    }

    async fn kv_delete(&self, path: &KvPath) -> Result<()> {
        match kv2::delete_metadata(&self.client, path.mount(), path.logical()).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(map_client_error(e, &path.metadata_path())),
        }
    }

    async fn pki_mount_max_ttl(&self, mount: &str) -> Result<Option<Duration>> {
        if !self.mount_listed(mount).await? {
            return Ok(None);
        }
        let tune = self.http.read_data(&format!("sys/mounts/{}/tune", mount)).await?;
        Ok(tune.map(|data| secs_field(&data, "max_lease_ttl")))
    }

    async fn enable_pki_mount(&self, mount: &str, max_lease_ttl: Duration) -> Result<bool> {
        if self.mount_listed(mount).await? {
            return Ok(false);
        }
        self.http
            .send(
                Method::POST,
                &format!("sys/mounts/{}", mount),
                Some(json!({
                    "type": "pki",
                    "config": { "max_lease_ttl": vault_ttl(max_lease_ttl) }
                })),
            )
            .await?;
        info!(mount = %mount, max_lease_ttl_secs = max_lease_ttl.as_secs(), "Enabled PKI engine");
        Ok(true)
    }

    async fn disable_pki_mount(&self, mount: &str) -> Result<()> {
        self.http.delete(&format!("sys/mounts/{}", mount)).await
    }

    async fn pki_read_ca(&self, mount: &str) -> Result<Option<String>> {
        let data = self.http.read_data(&format!("{}/cert/ca", mount)).await?;
        Ok(data.map(|d| str_field(&d, "certificate")).filter(|pem| !pem.trim().is_empty()))
    }

    #[instrument(skip(self), fields(backend = "vault"))]
    async fn pki_generate_root(
        &self,
        mount: &str,
        common_name: &str,
        ttl: Duration,
    ) -> Result<CaBundle> {
        let data = self
            .http
            .write(
                &format!("{}/root/generate/internal", mount),
                json!({ "common_name": common_name, "ttl": vault_ttl(ttl) }),
            )
            .await?
            .ok_or_else(|| BootstrapError::internal("Vault returned no root certificate"))?;

        Ok(CaBundle {
            certificate: str_field(&data, "certificate"),
            issuing_ca: str_field(&data, "issuing_ca"),
            ca_chain: Vec::new(),
            serial_number: str_field(&data, "serial_number"),
        })
    }

    #[instrument(skip(self), fields(backend = "vault"))]
    async fn pki_generate_intermediate(
        &self,
        mount: &str,
        parent_mount: &str,
        common_name: &str,
        ttl: Duration,
    ) -> Result<CaBundle> {
        let csr = self
            .http
            .write(
                &format!("{}/intermediate/generate/internal", mount),
                json!({ "common_name": common_name }),
            )
            .await?
            .map(|d| str_field(&d, "csr"))
            .filter(|csr| !csr.is_empty())
            .ok_or_else(|| BootstrapError::internal("Vault returned no intermediate CSR"))?;

        let signed = self
            .http
            .write(
                &format!("{}/root/sign-intermediate", parent_mount),
                json!({
                    "csr": csr,
                    "common_name": common_name,
                    "ttl": vault_ttl(ttl),
                    "format": "pem",
                }),
            )
            .await?
            .ok_or_else(|| BootstrapError::internal("Vault returned no signed intermediate"))?;

        let certificate = str_field(&signed, "certificate");
        let issuing_ca = str_field(&signed, "issuing_ca");
        let mut ca_chain = str_list(&signed, "ca_chain");
        if ca_chain.is_empty() {
            ca_chain.push(issuing_ca.clone());
        }

        let bundle = std::iter::once(certificate.clone())
            .chain(ca_chain.iter().cloned())
            .collect::<Vec<_>>()
            .join("\n");
        self.http
            .send(
                Method::POST,
                &format!("{}/intermediate/set-signed", mount),
                Some(json!({ "certificate": bundle })),
            )
            .await?;

        Ok(CaBundle {
            certificate,
            issuing_ca,
            ca_chain,
            serial_number: str_field(&signed, "serial_number"),
        })
    }

    async fn pki_write_role(&self, mount: &str, role: &PkiRoleConfig) -> Result<()> {
        self.http
            .send(
                Method::POST,
                &format!("{}/roles/{}", mount, role.name),
                Some(json!({
                    "allowed_domains": role.allowed_domains,
                    "allow_subdomains": role.allow_subdomains,
                    "allow_bare_domains": role.allow_bare_domains,
                    "allow_localhost": role.allow_localhost,
                    "allow_any_name": role.allow_any_name,
                    "generate_lease": role.generate_lease,
                    "max_ttl": vault_ttl(role.max_ttl),
                })),
            )
            .await?;
        Ok(())
    }

    async fn pki_read_role(&self, mount: &str, name: &str) -> Result<Option<PkiRoleConfig>> {
        let data = self.http.read_data(&format!("{}/roles/{}", mount, name)).await?;
        Ok(data.map(|d| PkiRoleConfig {
            name: name.to_string(),
            allowed_domains: str_list(&d, "allowed_domains"),
            allow_subdomains: bool_field(&d, "allow_subdomains"),
            allow_bare_domains: bool_field(&d, "allow_bare_domains"),
            allow_localhost: bool_field(&d, "allow_localhost"),
            allow_any_name: bool_field(&d, "allow_any_name"),
            generate_lease: bool_field(&d, "generate_lease"),
            max_ttl: secs_field(&d, "max_ttl"),
        }))
    }

    #[instrument(skip(self), fields(backend = "vault"))]
    async fn pki_issue(
        &self,
        mount: &str,
        role: &str,
        common_name: &str,
        ttl: Duration,
    ) -> Result<IssuedCertificate> {
        let data = self
            .http
            .write(
                &format!("{}/issue/{}", mount, role),
                json!({ "common_name": common_name, "ttl": vault_ttl(ttl) }),
            )
            .await?
            .ok_or_else(|| BootstrapError::internal("Vault returned no certificate"))?;

        let expires_at = match data.get("expiration").and_then(Value::as_i64) {
            Some(ts) => Some(DateTime::from_timestamp(ts, 0).ok_or_else(|| {
                error!(timestamp = ts, "Invalid expiration timestamp from Vault PKI");
                BootstrapError::internal(format!("Invalid expiration timestamp: {}", ts))
            })?),
            None => None,
        };

        let issuing_ca = str_field(&data, "issuing_ca");
        let mut ca_chain = str_list(&data, "ca_chain");
        if ca_chain.is_empty() {
            ca_chain.push(issuing_ca.clone());
        }

        Ok(IssuedCertificate {
            certificate: str_field(&data, "certificate"),
            private_key: SecretString::new(str_field(&data, "private_key")),
            issuing_ca,
            ca_chain,
            serial_number: str_field(&data, "serial_number"),
            expires_at,
        })
    }

    async fn policy_write(&self, name: &str, rules: &str) -> Result<()> {
        vaultrs::sys::policy::set(&self.client, name, rules)
            .await
            .map_err(|e| map_client_error(e, &format!("sys/policy/{}", name)))
    }

    async fn policy_read(&self, name: &str) -> Result<Option<String>> {
        match vaultrs::sys::policy::read(&self.client, name).await {
            Ok(policy) => Ok(Some(policy.rules)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(map_client_error(e, &format!("sys/policy/{}", name))),
        }
    }

    async fn policy_delete(&self, name: &str) -> Result<()> {
        vaultrs::sys::policy::delete(&self.client, name)
            .await
            .map_err(|e| map_client_error(e, &format!("sys/policy/{}", name)))
    }

    async fn enable_kubernetes_auth(&self, mount: &str, kubernetes_host: &str) -> Result<bool> {
        let created = !self.kubernetes_auth_enabled(mount).await?;
        if created {
            vaultrs::sys::auth::enable(&self.client, mount, "kubernetes", None)
                .await
                .map_err(|e| map_client_error(e, &format!("sys/auth/{}", mount)))?;
            info!(mount = %mount, "Enabled Kubernetes auth method");
        }

        self.http
            .send(
                Method::POST,
                &format!("auth/{}/config", mount),
                Some(json!({ "kubernetes_host": kubernetes_host })),
            )
            .await?;
        Ok(created)
    }

    async fn disable_auth_mount(&self, mount: &str) -> Result<()> {
        self.http.delete(&format!("sys/auth/{}", mount)).await?;
        info!(mount = %mount, "Disabled auth method");
        Ok(())
    }

    async fn kubernetes_auth_enabled(&self, mount: &str) -> Result<bool> {
        let methods = vaultrs::sys::auth::list(&self.client)
            .await
            .map_err(|e| map_client_error(e, "sys/auth"))?;
        Ok(methods.contains_key(&format!("{}/", mount.trim_end_matches('/'))))
    }

    async fn kubernetes_role_write(
        &self,
        mount: &str,
        name: &str,
        role: &KubernetesRoleConfig,
    ) -> Result<()> {
        self.http
            .send(
                Method::POST,
                &format!("auth/{}/role/{}", mount, name),
                Some(json!({
                    "bound_service_account_names": role.bound_service_account_names,
                    "bound_service_account_namespaces": role.bound_service_account_namespaces,
                    "token_policies": role.token_policies,
                    "token_ttl": vault_ttl(role.token_ttl),
                })),
            )
            .await?;
        Ok(())
    }

    async fn kubernetes_role_read(
        &self,
        mount: &str,
        name: &str,
    ) -> Result<Option<KubernetesRoleConfig>> {
        let data = self.http.read_data(&format!("auth/{}/role/{}", mount, name)).await?;
        Ok(data.map(|d| KubernetesRoleConfig {
            bound_service_account_names: str_list(&d, "bound_service_account_names"),
            bound_service_account_namespaces: str_list(&d, "bound_service_account_namespaces"),
            token_policies: str_list(&d, "token_policies"),
            token_ttl: secs_field(&d, "token_ttl"),
        }))
    }

    async fn kubernetes_role_delete(&self, mount: &str, name: &str) -> Result<()> {
        self.http.delete(&format!("auth/{}/role/{}", mount, name)).await
    }

    async fn health_check(&self) -> Result<()> {
        match vaultrs::sys::health(&self.client).await {
            Ok(_) => {
                debug!("Vault health check passed");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, vault_addr = %self.address, "Vault health check failed");
                Err(BootstrapError::backend_unavailable(format!(
                    "Vault health check failed: {}",
                    e
                )))
            }
        }
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Vault
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_config_default() {
        let config = VaultConfig::default();
        assert_eq!(config.address, "http://127.0.0.1:8200");
        assert!(config.token.is_none());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_vault_config_debug_redacts_token() {
        let config =
            VaultConfig { token: Some(SecretString::new("s.root-token")), ..Default::default() };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("s.root-token"));
    }

    #[test]
    fn test_vault_config_rejects_empty_address() {
        let config = VaultConfig { address: String::new(), ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_is_transient_vault_error() {
        assert!(is_transient_vault_error("connection refused"));
        assert!(is_transient_vault_error("request timed out"));
        assert!(is_transient_vault_error("429 Too Many Requests"));
        assert!(is_transient_vault_error("Vault is sealed"));
        assert!(!is_transient_vault_error("permission denied"));
        assert!(!is_transient_vault_error("unknown role"));
    }

    #[test]
    fn test_map_client_error_forbidden_keeps_path() {
        let err = map_client_error(
            ClientError::APIError { code: 403, errors: vec!["permission denied".into()] },
            "consul/data/secret/gossip",
        );
        match err {
            BootstrapError::PermissionDenied { path, .. } => {
                assert_eq!(path, "consul/data/secret/gossip")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_json_field_helpers() {
        let data = json!({
            "allowed_domains": ["dc1.consul", "localhost"],
            "legacy_domains": "a.consul,b.consul",
            "allow_subdomains": true,
            "max_ttl": 3600,
        });

        assert_eq!(str_list(&data, "allowed_domains"), vec!["dc1.consul", "localhost"]);
        assert_eq!(str_list(&data, "legacy_domains"), vec!["a.consul", "b.consul"]);
        assert!(str_list(&data, "missing").is_empty());
        assert!(bool_field(&data, "allow_subdomains"));
        assert!(!bool_field(&data, "allow_localhost"));
        assert_eq!(secs_field(&data, "max_ttl"), Duration::from_secs(3600));
    }

    #[test]
    fn test_backend_new_does_not_contact_server() {
        let config = VaultConfig {
            address: "http://127.0.0.1:1".to_string(),
            token: Some(SecretString::new("root")),
            ..Default::default()
        };
        let backend = VaultBackend::new(&config).unwrap();
        assert_eq!(backend.backend_type(), BackendType::Vault);
        assert!(format!("{:?}", backend).contains("[VaultClient]"));
    }
}
