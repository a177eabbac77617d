//! # Workload identity bindings
//!
//! Binds a Kubernetes service account in a namespace to a backend role that
//! carries named policies. A workload presents its service account token to the
//! Kubernetes auth method and receives a backend token scoped to those policies.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::errors::{BootstrapError, Result};
use crate::policy::PolicyManager;
use crate::secrets::{KubernetesRoleConfig, SecretsBackend};

/// Default lifetime of tokens handed out through a binding.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Platform identity allowed to log in through a role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentitySelector {
    pub namespace: String,
    pub service_account: String,
}

impl IdentitySelector {
    pub fn new(namespace: impl Into<String>, service_account: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), service_account: service_account.into() }
    }
}

impl fmt::Display for IdentitySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.service_account)
    }
}

/// A role on the Kubernetes auth mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRoleBinding {
    pub role_name: String,
    pub auth_mount: String,
    pub identity: IdentitySelector,
    /// Policy names, first occurrence order, no duplicates
    pub policies: Vec<String>,
    pub token_ttl: Duration,
}

impl AuthRoleBinding {
    fn to_backend(&self) -> KubernetesRoleConfig {
        KubernetesRoleConfig {
            bound_service_account_names: vec![self.identity.service_account.clone()],
            bound_service_account_namespaces: vec![self.identity.namespace.clone()],
            token_policies: self.policies.clone(),
            token_ttl: self.token_ttl,
        }
    }
}

fn ordered_unique(names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !out.contains(name) {
            out.push(name.clone());
        }
    }
    out
}

/// Manages roles on one Kubernetes auth mount.
#[derive(Debug, Clone)]
pub struct AuthRoleBinder {
    backend: Arc<dyn SecretsBackend>,
    policies: PolicyManager,
    mount: String,
    token_ttl: Duration,
}

impl AuthRoleBinder {
    pub fn new(backend: Arc<dyn SecretsBackend>, policies: PolicyManager, mount: impl Into<String>) -> Self {
        Self { backend, policies, mount: mount.into(), token_ttl: DEFAULT_TOKEN_TTL }
    }

    pub fn with_token_ttl(mut self, token_ttl: Duration) -> Self {
        self.token_ttl = token_ttl;
        self
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Enable and configure the Kubernetes auth method on this binder's mount.
    ///
    /// Returns `true` when the method was not enabled before this call.
    #[instrument(skip(self), fields(mount = %self.mount))]
    pub async fn enable_kubernetes(&self, kubernetes_host: &str) -> Result<bool> {
        if kubernetes_host.is_empty() {
            return Err(BootstrapError::validation_field(
                "Kubernetes host cannot be empty",
                "kubernetes_host",
            ));
        }
        let created = self.backend.enable_kubernetes_auth(&self.mount, kubernetes_host).await?;
        info!(kubernetes_host = %kubernetes_host, created, "Kubernetes auth method configured");
        Ok(created)
    }

    /// Bind `identity` to `role_name` with `policy_names`.
    ///
    /// Every policy must already exist. Rebinding with identical inputs does not
    /// write to the backend.
    #[instrument(skip(self, policy_names), fields(mount = %self.mount, role = %role_name))]
    pub async fn bind_role(
        &self,
        role_name: &str,
        identity: &IdentitySelector,
        policy_names: &[String],
    ) -> Result<AuthRoleBinding> {
        if role_name.is_empty() {
            return Err(BootstrapError::validation_field("Role name cannot be empty", "role_name"));
        }

        let policies = ordered_unique(policy_names);
        for name in &policies {
            if !self.policies.exists(name).await? {
                return Err(BootstrapError::unknown_policy(name.clone()));
            }
        }

        if !self.backend.kubernetes_auth_enabled(&self.mount).await? {
            return Err(BootstrapError::ordering(format!(
                "auth method '{}' is not enabled; cannot bind role '{}'",
                self.mount, role_name
            )));
        }

        let binding = AuthRoleBinding {
            role_name: role_name.to_string(),
            auth_mount: self.mount.clone(),
            identity: identity.clone(),
            policies,
            token_ttl: self.token_ttl,
        };
        let desired = binding.to_backend();

        let current = self.backend.kubernetes_role_read(&self.mount, role_name).await?;
        if current.as_ref() == Some(&desired) {
            debug!("Role binding unchanged");
            return Ok(binding);
        }

        self.backend.kubernetes_role_write(&self.mount, role_name, &desired).await?;
        info!(identity = %identity, policies = ?binding.policies, "Role bound");
        Ok(binding)
    }

    pub async fn get_binding(&self, role_name: &str) -> Result<AuthRoleBinding> {
        let role = self
            .backend
            .kubernetes_role_read(&self.mount, role_name)
            .await?
            .ok_or_else(|| BootstrapError::not_found("auth role", role_name))?;

        let first = |values: &[String]| values.first().cloned().unwrap_or_default();
        Ok(AuthRoleBinding {
            role_name: role_name.to_string(),
            auth_mount: self.mount.clone(),
            identity: IdentitySelector::new(
                first(&role.bound_service_account_namespaces),
                first(&role.bound_service_account_names),
            ),
            policies: role.token_policies,
            token_ttl: role.token_ttl,
        })
    }

    pub async fn unbind_role(&self, role_name: &str) -> Result<()> {
        self.backend.kubernetes_role_delete(&self.mount, role_name).await
    }
}
