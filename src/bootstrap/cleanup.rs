//! Scoped release of everything a run provisioned.
//!
//! Each provisioning step records a [`ResourceHandle`] in the run's
//! [`CleanupScope`]. Releasing the scope hands the handles, newest first, to a
//! [`ResourceReleaser`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Instrument};

use crate::errors::Result;
use crate::secrets::{KvPath, SecretsBackend};

/// Something a run created or touched that cleanup must remove.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceHandle {
    Secret { path: String },
    Policy { name: String },
    AuthRole { mount: String, name: String },
    PkiMount { mount: String },
    KvMount { mount: String },
    AuthMount { mount: String },
    Intention { source: String, destination: String },
    MeshRelease { name: String },
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret { path } => write!(f, "secret {}", path),
            Self::Policy { name } => write!(f, "policy {}", name),
            Self::AuthRole { mount, name } => write!(f, "auth role {}/{}", mount, name),
            Self::PkiMount { mount } => write!(f, "pki mount {}", mount),
            Self::KvMount { mount } => write!(f, "kv mount {}", mount),
            Self::AuthMount { mount } => write!(f, "auth mount {}", mount),
            Self::Intention { source, destination } => {
                write!(f, "intention {} -> {}", source, destination)
            }
            Self::MeshRelease { name } => write!(f, "mesh release {}", name),
        }
    }
}

/// Removes a single resource.
#[async_trait]
pub trait ResourceReleaser: Send + Sync {
    async fn release(&self, handle: &ResourceHandle) -> Result<()>;
}

/// Releases the handles that live in the secrets backend.
#[derive(Debug, Clone)]
pub struct BackendReleaser {
    backend: Arc<dyn SecretsBackend>,
}

impl BackendReleaser {
    pub fn new(backend: Arc<dyn SecretsBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ResourceReleaser for BackendReleaser {
    async fn release(&self, handle: &ResourceHandle) -> Result<()> {
        let span =
            crate::backend_span!("release", self.backend.backend_type(), resource = %handle);
        async {
            match handle {
                ResourceHandle::Secret { path } => {
                    self.backend.kv_delete(&KvPath::parse(path)?).await
                }
                ResourceHandle::Policy { name } => self.backend.policy_delete(name).await,
                ResourceHandle::AuthRole { mount, name } => {
                    self.backend.kubernetes_role_delete(mount, name).await
                }
                ResourceHandle::PkiMount { mount } => self.backend.disable_pki_mount(mount).await,
                ResourceHandle::KvMount { mount } => self.backend.disable_kv_mount(mount).await,
                ResourceHandle::AuthMount { mount } => self.backend.disable_auth_mount(mount).await,
                ResourceHandle::Intention { .. } | ResourceHandle::MeshRelease { .. } => Ok(()),
            }
        }
        .instrument(span)
        .await
    }
}

/// Ordered set of handles acquired during a run.
#[derive(Debug, Default)]
pub struct CleanupScope {
    handles: Vec<ResourceHandle>,
    released: bool,
}

impl CleanupScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `handle`; handles already tracked keep their original position.
    pub fn track(&mut self, handle: ResourceHandle) {
        if !self.handles.contains(&handle) {
            self.handles.push(handle);
        }
    }

    pub fn handles(&self) -> &[ResourceHandle] {
        &self.handles
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Keep every handle in place; the resources outlive the scope.
    pub fn disarm(&mut self) -> Vec<ResourceHandle> {
        self.released = true;
        std::mem::take(&mut self.handles)
    }

    /// Release every handle in reverse acquisition order.
    ///
    /// All handles are attempted; the first failure is returned afterwards.
    pub async fn release(&mut self, releaser: &dyn ResourceReleaser) -> Result<()> {
        let mut first_error = None;

        while let Some(handle) = self.handles.pop() {
            match releaser.release(&handle).await {
                Ok(()) => info!(resource = %handle, "Released"),
                Err(e) => {
                    warn!(resource = %handle, error = %e, "Failed to release resource");
                    first_error.get_or_insert(e);
                }
            }
        }
        self.released = true;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for CleanupScope {
    fn drop(&mut self) {
        if !self.released && !self.handles.is_empty() {
            warn!(
                remaining = self.handles.len(),
                "Cleanup scope dropped without release; resources left in place"
            );
        }
    }
}
