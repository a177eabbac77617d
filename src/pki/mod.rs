//! # PKI provisioning
//!
//! Builds the CA hierarchy the mesh uses: self-signed roots, intermediates
//! signed by an already provisioned parent, PKI roles on issuer mounts, and leaf
//! certificates issued through those roles.
//!
//! Ordering is enforced against the backend's state, not local bookkeeping:
//! an intermediate needs a CA on its parent mount, and a role or leaf needs a CA
//! on its issuer mount. Requested TTLs above the issuer's maximum are clamped
//! and the effective value is returned next to the requested one.

pub mod chain;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

pub use chain::{verify_chain, ChainVerification, CertificateSummary};

use crate::errors::{BootstrapError, Result};
use crate::secrets::{PkiRoleConfig, SecretString, SecretsBackend};

/// Position of a CA in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum CaRole {
    Root,
    Intermediate { parent: String },
}

/// A provisioned certificate authority, identified by its mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaNode {
    pub mount: String,
    pub role: CaRole,
    pub common_name: String,
    pub certificate: String,
    pub requested_ttl: Duration,
    /// Lifetime after clamping to the issuer's maximum
    pub ttl: Duration,
}

impl CaNode {
    pub fn parent(&self) -> Option<&str> {
        match &self.role {
            CaRole::Root => None,
            CaRole::Intermediate { parent } => Some(parent),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self.role, CaRole::Root)
    }
}

/// Leaf certificate issued through a PKI role.
#[derive(Clone)]
pub struct LeafCertificate {
    pub issuer_mount: String,
    pub role: String,
    pub common_name: String,
    pub requested_ttl: Duration,
    pub ttl: Duration,
    pub certificate: String,
    pub private_key: SecretString,
    pub issuing_ca: String,
    pub ca_chain: Vec<String>,
    pub serial_number: String,
}

impl LeafCertificate {
    /// True when the issuer lowered the requested lifetime.
    pub fn was_clamped(&self) -> bool {
        self.ttl < self.requested_ttl
    }

    /// Walk this certificate's chain up to a self-signed root.
    ///
    /// `trust` supplies certificates the issue response does not carry,
    /// typically the root PEM.
    pub fn verify(&self, trust: &[String]) -> Result<ChainVerification> {
        let mut pool = self.ca_chain.clone();
        pool.push(self.issuing_ca.clone());
        pool.extend(trust.iter().cloned());
        verify_chain(&self.certificate, &pool)
    }
}

impl fmt::Debug for LeafCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafCertificate")
            .field("issuer_mount", &self.issuer_mount)
            .field("role", &self.role)
            .field("common_name", &self.common_name)
            .field("requested_ttl", &self.requested_ttl)
            .field("ttl", &self.ttl)
            .field("private_key", &self.private_key)
            .field("serial_number", &self.serial_number)
            .finish()
    }
}

/// Creates and reads the CA hierarchy through a [`SecretsBackend`].
#[derive(Debug, Clone)]
pub struct PkiProvisioner {
    backend: Arc<dyn SecretsBackend>,
}

impl PkiProvisioner {
    pub fn new(backend: Arc<dyn SecretsBackend>) -> Self {
        Self { backend }
    }

    /// Mount the PKI engine a root on `mount` lives on. Returns `true` when this
    /// call mounted it.
    pub async fn mount_root(&self, mount: &str, ttl: Duration) -> Result<bool> {
        self.backend.enable_pki_mount(mount, ttl).await
    }

    /// Check that `parent_mount` holds a CA and mount the engine for an
    /// intermediate on `mount`, capped at the parent's maximum TTL.
    ///
    /// Returns the effective TTL.
    pub async fn mount_intermediate(
        &self,
        mount: &str,
        parent_mount: &str,
        ttl: Duration,
    ) -> Result<Duration> {
        if mount == parent_mount {
            return Err(BootstrapError::ordering(format!(
                "intermediate '{}' cannot be its own parent",
                mount
            )));
        }

        if self.backend.pki_read_ca(parent_mount).await?.is_none() {
            return Err(BootstrapError::ordering(format!(
                "parent mount '{}' has no provisioned CA; create it before intermediate '{}'",
                parent_mount, mount
            )));
        }

        let parent_max = self.backend.pki_mount_max_ttl(parent_mount).await?.unwrap_or(ttl);
        let effective = clamp(ttl, parent_max);
        self.backend.enable_pki_mount(mount, effective).await?;
        Ok(effective)
    }

    /// Mount `mount` if needed and generate a self-signed root on it.
    ///
    /// Fails with [`BootstrapError::AlreadyExists`] when the mount already has a CA.
    #[instrument(skip(self), fields(mount = %mount))]
    pub async fn create_root(&self, mount: &str, common_name: &str, ttl: Duration) -> Result<CaNode> {
        self.mount_root(mount, ttl).await?;

        if self.backend.pki_read_ca(mount).await?.is_some() {
            return Err(BootstrapError::already_exists("pki ca", mount));
        }

        let max_ttl = self.backend.pki_mount_max_ttl(mount).await?.unwrap_or(ttl);
        let effective = clamp(ttl, max_ttl);
        let bundle = self.backend.pki_generate_root(mount, common_name, effective).await?;

        info!(common_name = %common_name, ttl_secs = effective.as_secs(), "Root CA generated");
        metrics::counter!("meshvault_pki_ca_created_total", "role" => "root").increment(1);

        Ok(CaNode {
            mount: mount.to_string(),
            role: CaRole::Root,
            common_name: common_name.to_string(),
            certificate: bundle.certificate,
            requested_ttl: ttl,
            ttl: effective,
        })
    }

    /// Like [`Self::create_root`], but returns the existing root when present.
    pub async fn ensure_root(&self, mount: &str, common_name: &str, ttl: Duration) -> Result<CaNode> {
        match self.create_root(mount, common_name, ttl).await {
            Err(BootstrapError::AlreadyExists { .. }) => {
                self.existing_node(mount, CaRole::Root, common_name, ttl).await
            }
            other => other,
        }
    }

    /// Generate an intermediate on `mount`, signed by the CA on `parent_mount`.
    ///
    /// Fails with [`BootstrapError::OrderingViolation`] when the parent has no CA.
    #[instrument(skip(self), fields(mount = %mount, parent = %parent_mount))]
    pub async fn create_intermediate(
        &self,
        mount: &str,
        parent_mount: &str,
        common_name: &str,
        ttl: Duration,
    ) -> Result<CaNode> {
        let effective = self.mount_intermediate(mount, parent_mount, ttl).await?;

        if self.backend.pki_read_ca(mount).await?.is_some() {
            return Err(BootstrapError::already_exists("pki ca", mount));
        }

        if effective < ttl {
            warn!(
                requested_secs = ttl.as_secs(),
                effective_secs = effective.as_secs(),
                "Intermediate TTL clamped to parent maximum"
            );
        }

        let bundle = self
            .backend
            .pki_generate_intermediate(mount, parent_mount, common_name, effective)
            .await?;

        info!(common_name = %common_name, ttl_secs = effective.as_secs(), "Intermediate CA generated");
        metrics::counter!("meshvault_pki_ca_created_total", "role" => "intermediate").increment(1);

        Ok(CaNode {
            mount: mount.to_string(),
            role: CaRole::Intermediate { parent: parent_mount.to_string() },
            common_name: common_name.to_string(),
            certificate: bundle.certificate,
            requested_ttl: ttl,
            ttl: effective,
        })
    }

    /// Like [`Self::create_intermediate`], but returns the existing CA when present.
    pub async fn ensure_intermediate(
        &self,
        mount: &str,
        parent_mount: &str,
        common_name: &str,
        ttl: Duration,
    ) -> Result<CaNode> {
        match self.create_intermediate(mount, parent_mount, common_name, ttl).await {
            Err(BootstrapError::AlreadyExists { .. }) => {
                let role = CaRole::Intermediate { parent: parent_mount.to_string() };
                self.existing_node(mount, role, common_name, ttl).await
            }
            other => other,
        }
    }

    async fn existing_node(
        &self,
        mount: &str,
        role: CaRole,
        common_name: &str,
        requested_ttl: Duration,
    ) -> Result<CaNode> {
        let certificate = self
            .backend
            .pki_read_ca(mount)
            .await?
            .ok_or_else(|| BootstrapError::not_found("pki ca", mount))?;
        let summary = chain::summarize(&certificate)?;

        info!(mount = %mount, subject = %summary.subject, "Reusing existing CA");
        Ok(CaNode {
            mount: mount.to_string(),
            role,
            common_name: common_name.to_string(),
            certificate,
            requested_ttl,
            ttl: summary.lifetime,
        })
    }

    /// Register (or replace) a PKI role on an issuer mount.
    #[instrument(skip(self, role), fields(mount = %mount, role = %role.name))]
    pub async fn define_role(&self, mount: &str, role: &PkiRoleConfig) -> Result<()> {
        if self.backend.pki_read_ca(mount).await?.is_none() {
            return Err(BootstrapError::ordering(format!(
                "mount '{}' has no CA; cannot define role '{}'",
                mount, role.name
            )));
        }
        if self.backend.pki_read_role(mount, &role.name).await?.as_ref() == Some(role) {
            return Ok(());
        }
        self.backend.pki_write_role(mount, role).await
    }

    /// Issue a leaf certificate from `issuer_mount` through `role`.
    ///
    /// A TTL above the role's `max_ttl` is lowered to it.
    #[instrument(skip(self), fields(mount = %issuer_mount, role = %role))]
    pub async fn issue_leaf(
        &self,
        issuer_mount: &str,
        role: &str,
        common_name: &str,
        ttl: Duration,
    ) -> Result<LeafCertificate> {
        if self.backend.pki_read_ca(issuer_mount).await?.is_none() {
            return Err(BootstrapError::ordering(format!(
                "issuer '{}' is not provisioned",
                issuer_mount
            )));
        }

        let role_config = self
            .backend
            .pki_read_role(issuer_mount, role)
            .await?
            .ok_or_else(|| BootstrapError::unknown_role(issuer_mount, role))?;

        let mut effective = clamp(ttl, role_config.max_ttl);
        if let Some(mount_max) = self.backend.pki_mount_max_ttl(issuer_mount).await? {
            effective = clamp(effective, mount_max);
        }

        let issued = self.backend.pki_issue(issuer_mount, role, common_name, effective).await?;
        metrics::counter!("meshvault_pki_leaf_issued_total").increment(1);

        Ok(LeafCertificate {
            issuer_mount: issuer_mount.to_string(),
            role: role.to_string(),
            common_name: common_name.to_string(),
            requested_ttl: ttl,
            ttl: effective,
            certificate: issued.certificate,
            private_key: issued.private_key,
            issuing_ca: issued.issuing_ca,
            ca_chain: issued.ca_chain,
            serial_number: issued.serial_number,
        })
    }

    /// Summary of the CA on `mount`, or `None` if it has none.
    pub async fn read_ca(&self, mount: &str) -> Result<Option<CertificateSummary>> {
        match self.backend.pki_read_ca(mount).await? {
            Some(pem) => chain::summarize(&pem).map(Some),
            None => Ok(None),
        }
    }

    /// PEM of the CA on `mount`.
    pub async fn ca_pem(&self, mount: &str) -> Result<Option<String>> {
        self.backend.pki_read_ca(mount).await
    }

    /// Unmount a PKI engine. Used by cleanup.
    pub async fn remove_mount(&self, mount: &str) -> Result<()> {
        self.backend.disable_pki_mount(mount).await
    }
}

/// Lower `requested` to `max` when a non-zero maximum is set.
fn clamp(requested: Duration, max: Duration) -> Duration {
    if max.is_zero() {
        requested
    } else {
        requested.min(max)
    }
}
