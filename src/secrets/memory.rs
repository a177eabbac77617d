//! Process-local secrets backend.
//!
//! Holds KV documents, PKI mounts, policies and Kubernetes auth roles in memory
//! and signs real X.509 certificates with `rcgen`, so the bootstrap workflow can
//! run end to end without a Vault server. Used for `--in-memory` dry runs and by
//! the test suite, which also relies on its failure injection hooks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use rand::RngCore;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SerialNumber,
};
use time::OffsetDateTime;
use tracing::debug;

use super::backend::{
    BackendType, CaBundle, IssuedCertificate, KubernetesRoleConfig, PkiRoleConfig, SecretsBackend,
};
use super::path::KvPath;
use super::types::SecretString;
use crate::errors::{BootstrapError, Result};

struct CaEntry {
    key: KeyPair,
    cert: Certificate,
    pem: String,
    /// Issuers above this CA, nearest first
    chain: Vec<String>,
    not_after: OffsetDateTime,
}

struct PkiMount {
    max_ttl: Duration,
    ca: Option<CaEntry>,
    roles: BTreeMap<String, PkiRoleConfig>,
}

#[derive(Default)]
struct State {
    kv_mounts: BTreeSet<String>,
    kv: BTreeMap<KvPath, BTreeMap<String, String>>,
    pki: BTreeMap<String, PkiMount>,
    policies: BTreeMap<String, String>,
    auth_mounts: BTreeMap<String, String>,
    kubernetes_roles: BTreeMap<(String, String), KubernetesRoleConfig>,
}

/// In-memory [`SecretsBackend`].
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    unavailable: AtomicBool,
    denied_prefixes: Mutex<Vec<String>>,
    writes: AtomicU64,
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("writes", &self.writes.load(Ordering::Relaxed))
            .field("unavailable", &self.unavailable.load(Ordering::Relaxed))
            .finish()
    }
}

fn rcgen_error(context: &str, err: rcgen::Error) -> BootstrapError {
    BootstrapError::internal(format!("{}: {}", context, err))
}

fn ttl_span(ttl: Duration) -> time::Duration {
    time::Duration::seconds(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2))
}

/// Random positive serial, rendered the way Vault reports it (`aa:bb:...`).
fn new_serial() -> (SerialNumber, String) {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] = (bytes[0] & 0x7f) | 0x01;
    let rendered = bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(":");
    (SerialNumber::from_slice(&bytes), rendered)
}

fn ca_params(common_name: &str, not_after: OffsetDateTime) -> Result<(CertificateParams, String)> {
    let mut params = CertificateParams::new(Vec::<String>::new())
        .map_err(|e| rcgen_error("build CA params", e))?;
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_before = OffsetDateTime::now_utc() - time::Duration::minutes(1);
    params.not_after = not_after;
    let (serial, rendered) = new_serial();
    params.serial_number = Some(serial);
    Ok((params, rendered))
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable or sealed backend.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Reject every operation whose API path starts with `prefix`.
    pub fn deny_path(&self, prefix: impl Into<String>) {
        if let Ok(mut denied) = self.denied_prefixes.lock() {
            denied.push(prefix.into());
        }
    }

    pub fn clear_denied(&self) {
        if let Ok(mut denied) = self.denied_prefixes.lock() {
            denied.clear();
        }
    }

    /// Number of mutating calls that reached the store.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Names of all stored policies.
    pub fn policy_names(&self) -> Vec<String> {
        self.state().map(|s| s.policies.keys().cloned().collect()).unwrap_or_default()
    }

    /// Number of stored KV documents.
    pub fn kv_len(&self) -> usize {
        self.state().map(|s| s.kv.len()).unwrap_or_default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| BootstrapError::internal("in-memory backend state poisoned"))
    }

    fn guard(&self, path: &str) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BootstrapError::backend_unavailable(format!(
                "connection refused while accessing {}",
                path
            )));
        }
        let denied = self
            .denied_prefixes
            .lock()
            .map_err(|_| BootstrapError::internal("in-memory backend state poisoned"))?;
        if denied.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            return Err(BootstrapError::permission_denied(path, "permission denied"));
        }
        Ok(())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SecretsBackend for InMemoryBackend {
    async fn ensure_kv_mount(&self, mount: &str) -> Result<bool> {
        self.guard(&format!("sys/mounts/{}", mount))?;
        let mut state = self.state()?;
        let created = state.kv_mounts.insert(mount.to_string());
        if created {
            self.record_write();
        }
        Ok(created)
    }

    async fn disable_kv_mount(&self, mount: &str) -> Result<()> {
        self.guard(&format!("sys/mounts/{}", mount))?;
        let mut state = self.state()?;
        if state.kv_mounts.remove(mount) {
            state.kv.retain(|path, _| path.mount() != mount);
            self.record_write();
        }
        Ok(())
    }

    async fn kv_read(&self, path: &KvPath) -> Result<Option<BTreeMap<String, String>>> {
        self.guard(&path.to_string())?;
        Ok(self.state()?.kv.get(path).cloned())
    }

    async fn kv_write(&self, path: &KvPath, data: &BTreeMap<String, String>) -> Result<()> {
        self.guard(&path.to_string())?;
        let mut state = self.state()?;
        if !state.kv_mounts.contains(path.mount()) {
            return Err(BootstrapError::not_found("kv mount", path.mount()));
        }
        state.kv.insert(path.clone(), data.clone());
        self.record_write();
        debug!(path = %path, fields = data.len(), "Stored KV document in memory");
        Ok(())
    }

    async fn kv_delete(&self, path: &KvPath) -> Result<()> {
        self.guard(&path.metadata_path())?;
        if self.state()?.kv.remove(path).is_some() {
            self.record_write();
        }
        Ok(())
    }

    async fn pki_mount_max_ttl(&self, mount: &str) -> Result<Option<Duration>> {
        self.guard(&format!("sys/mounts/{}/tune", mount))?;
        Ok(self.state()?.pki.get(mount).map(|m| m.max_ttl))
    }

    async fn enable_pki_mount(&self, mount: &str, max_lease_ttl: Duration) -> Result<bool> {
        self.guard(&format!("sys/mounts/{}", mount))?;
        let mut state = self.state()?;
        if state.pki.contains_key(mount) {
            return Ok(false);
        }
        state.pki.insert(
            mount.to_string(),
            PkiMount { max_ttl: max_lease_ttl, ca: None, roles: BTreeMap::new() },
        );
        self.record_write();
        Ok(true)
    }

    async fn disable_pki_mount(&self, mount: &str) -> Result<()> {
        self.guard(&format!("sys/mounts/{}", mount))?;
        if self.state()?.pki.remove(mount).is_some() {
            self.record_write();
        }
        Ok(())
    }

    async fn pki_read_ca(&self, mount: &str) -> Result<Option<String>> {
        self.guard(&format!("{}/cert/ca", mount))?;
        Ok(self.state()?.pki.get(mount).and_then(|m| m.ca.as_ref()).map(|ca| ca.pem.clone()))
    }

    async fn pki_generate_root(
        &self,
        mount: &str,
        common_name: &str,
        ttl: Duration,
    ) -> Result<CaBundle> {
        self.guard(&format!("{}/root/generate/internal", mount))?;
        let mut state = self.state()?;
        let pki = state.pki.get_mut(mount).ok_or_else(|| BootstrapError::not_found("pki mount", mount))?;
        if pki.ca.is_some() {
            return Err(BootstrapError::already_exists("pki ca", mount));
        }

        let not_after = OffsetDateTime::now_utc() + ttl_span(ttl.min(pki.max_ttl));
        let (params, serial_number) = ca_params(common_name, not_after)?;
        let key = KeyPair::generate().map_err(|e| rcgen_error("generate root key", e))?;
        let cert = params.self_signed(&key).map_err(|e| rcgen_error("self-sign root", e))?;
        let pem = cert.pem();

        pki.ca = Some(CaEntry { key, cert, pem: pem.clone(), chain: Vec::new(), not_after });
        self.record_write();

        Ok(CaBundle { certificate: pem.clone(), issuing_ca: pem, ca_chain: Vec::new(), serial_number })
    }

    async fn pki_generate_intermediate(
        &self,
        mount: &str,
        parent_mount: &str,
        common_name: &str,
        ttl: Duration,
    ) -> Result<CaBundle> {
        self.guard(&format!("{}/intermediate/generate/internal", mount))?;
        self.guard(&format!("{}/root/sign-intermediate", parent_mount))?;
        let mut state = self.state()?;

        match state.pki.get(mount) {
            None => return Err(BootstrapError::not_found("pki mount", mount)),
            Some(m) if m.ca.is_some() => {
                return Err(BootstrapError::already_exists("pki ca", mount))
            }
            Some(_) => {}
        }

        let parent = state
            .pki
            .get(parent_mount)
            .ok_or_else(|| BootstrapError::not_found("pki mount", parent_mount))?;
        let issuer = parent.ca.as_ref().ok_or_else(|| {
            BootstrapError::ordering(format!("mount '{}' has no CA to sign with", parent_mount))
        })?;

        let not_after =
            (OffsetDateTime::now_utc() + ttl_span(ttl.min(parent.max_ttl))).min(issuer.not_after);
        let (mut params, serial_number) = ca_params(common_name, not_after)?;
        params.use_authority_key_identifier_extension = true;
        let key = KeyPair::generate().map_err(|e| rcgen_error("generate intermediate key", e))?;
        let cert = params
            .signed_by(&key, &issuer.cert, &issuer.key)
            .map_err(|e| rcgen_error("sign intermediate", e))?;
        let pem = cert.pem();

        let mut chain = vec![issuer.pem.clone()];
        chain.extend(issuer.chain.iter().cloned());
        let issuing_ca = issuer.pem.clone();

        if let Some(target) = state.pki.get_mut(mount) {
            target.ca = Some(CaEntry { key, cert, pem: pem.clone(), chain: chain.clone(), not_after });
        }
        self.record_write();

        Ok(CaBundle { certificate: pem, issuing_ca, ca_chain: chain, serial_number })
    }

    async fn pki_write_role(&self, mount: &str, role: &PkiRoleConfig) -> Result<()> {
        self.guard(&format!("{}/roles/{}", mount, role.name))?;
        let mut state = self.state()?;
        let pki = state.pki.get_mut(mount).ok_or_else(|| BootstrapError::not_found("pki mount", mount))?;
        pki.roles.insert(role.name.clone(), role.clone());
        self.record_write();
        Ok(())
    }

    async fn pki_read_role(&self, mount: &str, name: &str) -> Result<Option<PkiRoleConfig>> {
        self.guard(&format!("{}/roles/{}", mount, name))?;
        Ok(self.state()?.pki.get(mount).and_then(|m| m.roles.get(name)).cloned())
    }

    async fn pki_issue(
        &self,
        mount: &str,
        role: &str,
        common_name: &str,
        ttl: Duration,
    ) -> Result<IssuedCertificate> {
        self.guard(&format!("{}/issue/{}", mount, role))?;
        let state = self.state()?;
        let pki = state.pki.get(mount).ok_or_else(|| BootstrapError::not_found("pki mount", mount))?;
        let role_config =
            pki.roles.get(role).ok_or_else(|| BootstrapError::unknown_role(mount, role))?;
        if !role_config.allows(common_name) {
            return Err(BootstrapError::validation_field(
                format!("common name '{}' not allowed by role '{}'", common_name, role),
                "common_name",
            ));
        }
        let issuer = pki.ca.as_ref().ok_or_else(|| {
            BootstrapError::ordering(format!("mount '{}' has no CA to issue from", mount))
        })?;

        let effective = ttl.min(role_config.max_ttl).min(pki.max_ttl);
        let not_after = (OffsetDateTime::now_utc() + ttl_span(effective)).min(issuer.not_after);

        let mut params = CertificateParams::new(vec![common_name.to_string()])
            .map_err(|e| rcgen_error("build leaf params", e))?;
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages =
            vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages =
            vec![ExtendedKeyUsagePurpose::ServerAuth, ExtendedKeyUsagePurpose::ClientAuth];
        params.use_authority_key_identifier_extension = true;
        params.not_before = OffsetDateTime::now_utc() - time::Duration::minutes(1);
        params.not_after = not_after;
        let (serial, serial_number) = new_serial();
        params.serial_number = Some(serial);

        let key = KeyPair::generate().map_err(|e| rcgen_error("generate leaf key", e))?;
        let cert = params
            .signed_by(&key, &issuer.cert, &issuer.key)
            .map_err(|e| rcgen_error("sign leaf", e))?;

        let mut ca_chain = vec![issuer.pem.clone()];
        ca_chain.extend(issuer.chain.iter().cloned());

        Ok(IssuedCertificate {
            certificate: cert.pem(),
            private_key: SecretString::new(key.serialize_pem()),
            issuing_ca: issuer.pem.clone(),
            ca_chain,
            serial_number,
            expires_at: DateTime::from_timestamp(not_after.unix_timestamp(), 0),
        })
    }

    async fn policy_write(&self, name: &str, rules: &str) -> Result<()> {
        self.guard(&format!("sys/policy/{}", name))?;
        self.state()?.policies.insert(name.to_string(), rules.to_string());
        self.record_write();
        Ok(())
    }

    async fn policy_read(&self, name: &str) -> Result<Option<String>> {
        self.guard(&format!("sys/policy/{}", name))?;
        Ok(self.state()?.policies.get(name).cloned())
    }

    async fn policy_delete(&self, name: &str) -> Result<()> {
        self.guard(&format!("sys/policy/{}", name))?;
        if self.state()?.policies.remove(name).is_some() {
            self.record_write();
        }
        Ok(())
    }

    async fn enable_kubernetes_auth(&self, mount: &str, kubernetes_host: &str) -> Result<bool> {
        self.guard(&format!("sys/auth/{}", mount))?;
        let mut state = self.state()?;
        let previous = state.auth_mounts.insert(mount.to_string(), kubernetes_host.to_string());
        if previous.as_deref() != Some(kubernetes_host) {
            self.record_write();
        }
        Ok(previous.is_none())
    }

    async fn disable_auth_mount(&self, mount: &str) -> Result<()> {
        self.guard(&format!("sys/auth/{}", mount))?;
        let mut state = self.state()?;
        if state.auth_mounts.remove(mount).is_some() {
            state.kubernetes_roles.retain(|(role_mount, _), _| role_mount != mount);
            self.record_write();
        }
        Ok(())
    }

    async fn kubernetes_auth_enabled(&self, mount: &str) -> Result<bool> {
        self.guard("sys/auth")?;
        Ok(self.state()?.auth_mounts.contains_key(mount))
    }

    async fn kubernetes_role_write(
        &self,
        mount: &str,
        name: &str,
        role: &KubernetesRoleConfig,
    ) -> Result<()> {
        self.guard(&format!("auth/{}/role/{}", mount, name))?;
        let mut state = self.state()?;
        if !state.auth_mounts.contains_key(mount) {
            return Err(BootstrapError::not_found("auth mount", mount));
        }
        state.kubernetes_roles.insert((mount.to_string(), name.to_string()), role.clone());
        self.record_write();
        Ok(())
    }

    async fn kubernetes_role_read(
        &self,
        mount: &str,
        name: &str,
    ) -> Result<Option<KubernetesRoleConfig>> {
        self.guard(&format!("auth/{}/role/{}", mount, name))?;
        Ok(self.state()?.kubernetes_roles.get(&(mount.to_string(), name.to_string())).cloned())
    }

    async fn kubernetes_role_delete(&self, mount: &str, name: &str) -> Result<()> {
        self.guard(&format!("auth/{}/role/{}", mount, name))?;
        if self.state()?.kubernetes_roles.remove(&(mount.to_string(), name.to_string())).is_some() {
            self.record_write();
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.guard("sys/health")
    }

    fn backend_type(&self) -> BackendType {
        BackendType::InMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    #[tokio::test]
    async fn test_kv_write_requires_mount() {
        let backend = InMemoryBackend::new();
        let path = KvPath::parse("consul/data/secret/gossip").unwrap();
        let data = BTreeMap::from([("gossip".to_string(), "key".to_string())]);

        let err = backend.kv_write(&path, &data).await.unwrap_err();
        assert!(matches!(err, BootstrapError::NotFound { .. }));

        backend.ensure_kv_mount("consul").await.unwrap();
        backend.kv_write(&path, &data).await.unwrap();
        assert_eq!(backend.kv_read(&path).await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn test_disable_kv_mount_drops_documents() {
        let backend = InMemoryBackend::new();
        let path = KvPath::parse("consul/data/secret/gossip").unwrap();
        let data = BTreeMap::from([("gossip".to_string(), "key".to_string())]);

        assert!(backend.ensure_kv_mount("consul").await.unwrap());
        assert!(!backend.ensure_kv_mount("consul").await.unwrap());
        backend.kv_write(&path, &data).await.unwrap();

        backend.disable_kv_mount("consul").await.unwrap();
        assert_eq!(backend.kv_len(), 0);
        assert!(backend.ensure_kv_mount("consul").await.unwrap());
    }

    #[tokio::test]
    async fn test_disable_auth_mount_drops_roles() {
        let backend = InMemoryBackend::new();
        let role = KubernetesRoleConfig {
            bound_service_account_names: vec!["consul-server".to_string()],
            bound_service_account_namespaces: vec!["default".to_string()],
            token_policies: vec!["gossip".to_string()],
            token_ttl: DAY,
        };

        assert!(backend.enable_kubernetes_auth("kubernetes", "https://k8s").await.unwrap());
        assert!(!backend.enable_kubernetes_auth("kubernetes", "https://k8s").await.unwrap());
        backend.kubernetes_role_write("kubernetes", "consul-server", &role).await.unwrap();

        backend.disable_auth_mount("kubernetes").await.unwrap();
        assert!(!backend.kubernetes_auth_enabled("kubernetes").await.unwrap());
        assert!(backend.kubernetes_role_read("kubernetes", "consul-server").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_root_generation_is_not_repeatable() {
        let backend = InMemoryBackend::new();
        backend.enable_pki_mount("pki", DAY * 365).await.unwrap();

        let bundle = backend.pki_generate_root("pki", "Consul CA", DAY * 30).await.unwrap();
        assert!(bundle.certificate.starts_with("-----BEGIN CERTIFICATE-----"));
        assert_eq!(bundle.certificate, bundle.issuing_ca);

        let err = backend.pki_generate_root("pki", "Consul CA", DAY).await.unwrap_err();
        assert!(matches!(err, BootstrapError::AlreadyExists { .. }));
        assert_eq!(backend.pki_read_ca("pki").await.unwrap(), Some(bundle.certificate));
    }

    #[tokio::test]
    async fn test_intermediate_without_parent_ca_is_ordering_violation() {
        let backend = InMemoryBackend::new();
        backend.enable_pki_mount("connect_root", DAY).await.unwrap();
        backend.enable_pki_mount("dc1/connect_inter", DAY).await.unwrap();

        let err = backend
            .pki_generate_intermediate("dc1/connect_inter", "connect_root", "inter", DAY)
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::OrderingViolation { .. }));
    }

    #[tokio::test]
    async fn test_issue_checks_role_and_name() {
        let backend = InMemoryBackend::new();
        backend.enable_pki_mount("pki", DAY).await.unwrap();
        backend.pki_generate_root("pki", "Consul CA", DAY).await.unwrap();

        let err = backend.pki_issue("pki", "consul-server", "server.dc1.consul", DAY).await;
        assert!(matches!(err, Err(BootstrapError::UnknownRole { .. })));

        backend
            .pki_write_role(
                "pki",
                &PkiRoleConfig {
                    name: "consul-server".to_string(),
                    allowed_domains: vec!["dc1.consul".to_string()],
                    allow_subdomains: true,
                    allow_bare_domains: false,
                    allow_localhost: true,
                    allow_any_name: false,
                    generate_lease: true,
                    max_ttl: Duration::from_secs(3600),
                },
            )
            .await
            .unwrap();

        let denied = backend.pki_issue("pki", "consul-server", "server.dc2.consul", DAY).await;
        assert!(matches!(denied, Err(BootstrapError::Validation { .. })));

        let leaf = backend.pki_issue("pki", "consul-server", "server.dc1.consul", DAY).await.unwrap();
        assert_eq!(leaf.ca_chain.len(), 1);
        let expires = leaf.expires_at.unwrap();
        let max = chrono::Utc::now() + chrono::Duration::seconds(3601);
        assert!(expires <= max, "leaf ttl must be clamped to the role max");
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let backend = InMemoryBackend::new();
        backend.deny_path("sys/policy/");
        let err = backend.policy_write("gossip", "path \"x\" {}").await.unwrap_err();
        assert!(matches!(err, BootstrapError::PermissionDenied { .. }));

        backend.clear_denied();
        backend.set_unavailable(true);
        let err = backend.health_check().await.unwrap_err();
        assert!(err.is_retryable());

        backend.set_unavailable(false);
        backend.health_check().await.unwrap();
        assert_eq!(backend.write_count(), 0);
    }

    #[test]
    fn test_serial_format() {
        let (_, rendered) = new_serial();
        assert_eq!(rendered.split(':').count(), 16);
        assert!(rendered.chars().all(|c| c == ':' || c.is_ascii_hexdigit()));
    }
}
