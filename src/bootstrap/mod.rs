//! # Bootstrap orchestration
//!
//! Sequences policies, role bindings, the CA hierarchy, KV secrets and the mesh
//! configuration through a fixed stage machine. Every stage is idempotent, so a
//! failed run is recovered by running it again; nothing is rolled back.

pub mod cleanup;
pub mod plan;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info, Instrument};

pub use cleanup::{BackendReleaser, CleanupScope, ResourceHandle, ResourceReleaser};
pub use plan::{AuthoritySpec, BootstrapPlan, PkiRoleSpec, RoleSpec, SecretSource, SecretSpec};

use crate::auth::{AuthRoleBinder, AuthRoleBinding};
use crate::errors::{BootstrapError, Result};
use crate::mesh::{FeatureKey, MeshConfigMapper, MeshConsumptionReference, MeshValues};
use crate::observability::MetricsRecorder;
use crate::pki::{CaNode, PkiProvisioner};
use crate::policy::PolicyManager;
use crate::secrets::{
    generate_gossip_key, KvPath, SecretRecord, SecretRef, SecretRepository, SecretsBackend,
};

/// Position of a run in the bootstrap sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    NotStarted,
    PoliciesWritten,
    RolesBindable,
    RootProvisioned,
    IntermediateProvisioned,
    SecretsWritten,
    ConfigMapped,
    Done,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::NotStarted,
        Stage::PoliciesWritten,
        Stage::RolesBindable,
        Stage::RootProvisioned,
        Stage::IntermediateProvisioned,
        Stage::SecretsWritten,
        Stage::ConfigMapped,
        Stage::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::NotStarted => "NotStarted",
            Stage::PoliciesWritten => "PoliciesWritten",
            Stage::RolesBindable => "RolesBindable",
            Stage::RootProvisioned => "RootProvisioned",
            Stage::IntermediateProvisioned => "IntermediateProvisioned",
            Stage::SecretsWritten => "SecretsWritten",
            Stage::ConfigMapped => "ConfigMapped",
            Stage::Done => "Done",
        }
    }

    pub fn next(&self) -> Option<Stage> {
        let index = Stage::ALL.iter().position(|s| s == self)?;
        Stage::ALL.get(index + 1).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapOutcome {
    pub stage: Stage,
    pub nodes: Vec<CaNode>,
    pub bindings: Vec<AuthRoleBinding>,
    pub references: Vec<MeshConsumptionReference>,
    pub values: MeshValues,
}

/// What a failed run had touched. Names and paths only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapDiagnostics {
    pub failed_stage: Option<Stage>,
    pub cause: Option<String>,
    pub secrets: Vec<String>,
    pub policies: Vec<String>,
    pub roles: Vec<String>,
    pub mounts: Vec<String>,
}

impl BootstrapDiagnostics {
    pub fn from_scope(scope: &CleanupScope, failed_stage: Option<Stage>, cause: Option<&BootstrapError>) -> Self {
        let mut diagnostics = Self {
            failed_stage,
            cause: cause.map(|e| e.to_string()),
            ..Default::default()
        };
        for handle in scope.handles() {
            match handle {
                ResourceHandle::Secret { path } => diagnostics.secrets.push(path.clone()),
                ResourceHandle::Policy { name } => diagnostics.policies.push(name.clone()),
                ResourceHandle::AuthRole { mount, name } => {
                    diagnostics.roles.push(format!("{}/{}", mount, name))
                }
                ResourceHandle::PkiMount { mount } | ResourceHandle::KvMount { mount } => {
                    diagnostics.mounts.push(mount.clone())
                }
                ResourceHandle::AuthMount { mount } => {
                    diagnostics.mounts.push(format!("auth/{}", mount))
                }
                ResourceHandle::Intention { .. } | ResourceHandle::MeshRelease { .. } => {}
            }
        }
        diagnostics
    }
}

/// State carried from one stage to the next.
#[derive(Default)]
struct Progress {
    nodes: Vec<CaNode>,
    bindings: Vec<AuthRoleBinding>,
    resolved: BTreeMap<FeatureKey, SecretRef>,
    references: Vec<MeshConsumptionReference>,
    values: Option<MeshValues>,
}

/// Drives a [`BootstrapPlan`] against one secrets backend.
#[derive(Debug, Clone)]
pub struct BootstrapOrchestrator {
    backend: Arc<dyn SecretsBackend>,
    secrets: SecretRepository,
    policies: PolicyManager,
    pki: PkiProvisioner,
    metrics: MetricsRecorder,
}

impl BootstrapOrchestrator {
    pub fn new(backend: Arc<dyn SecretsBackend>) -> Self {
        Self {
            secrets: SecretRepository::new(backend.clone()),
            policies: PolicyManager::new(backend.clone()),
            pki: PkiProvisioner::new(backend.clone()),
            metrics: MetricsRecorder::new(),
            backend,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn pki(&self) -> &PkiProvisioner {
        &self.pki
    }

    pub fn secrets(&self) -> &SecretRepository {
        &self.secrets
    }

    /// Run every stage of `plan` in order.
    ///
    /// Resources are recorded in `scope` as they are provisioned. The first
    /// failure aborts the run with [`BootstrapError::StageFailed`] naming the
    /// stage that was being entered.
    pub async fn run(&self, plan: &BootstrapPlan, scope: &mut CleanupScope) -> Result<BootstrapOutcome> {
        let mut progress = Progress::default();
        let run_started = Instant::now();

        let mut stage = Stage::NotStarted;
        while let Some(next) = stage.next() {
            let started = Instant::now();
            let result = self
                .run_stage(next, plan, scope, &mut progress)
                .instrument(crate::stage_span!(next))
                .await;
            self.metrics.record_stage(next.as_str(), started.elapsed(), result.is_ok());

            if let Err(e) = result {
                let diagnostics = BootstrapDiagnostics::from_scope(scope, Some(next), Some(&e));
                error!(
                    stage = %next,
                    error = %e,
                    diagnostics = ?diagnostics,
                    "Bootstrap stage failed"
                );
                self.metrics.record_bootstrap(false);
                return Err(BootstrapError::at_stage(next, e));
            }
            stage = next;
        }

        let values = progress
            .values
            .ok_or_else(|| BootstrapError::internal("bootstrap finished without mesh values"))?;

        self.metrics.record_bootstrap(true);
        info!(
            elapsed_ms = run_started.elapsed().as_millis() as u64,
            authorities = progress.nodes.len(),
            bindings = progress.bindings.len(),
            references = progress.references.len(),
            "Bootstrap complete"
        );

        Ok(BootstrapOutcome {
            stage,
            nodes: progress.nodes,
            bindings: progress.bindings,
            references: progress.references,
            values,
        })
    }

    async fn run_stage(
        &self,
        stage: Stage,
        plan: &BootstrapPlan,
        scope: &mut CleanupScope,
        progress: &mut Progress,
    ) -> Result<()> {
        match stage {
            Stage::NotStarted => Ok(()),
            Stage::PoliciesWritten => self.write_policies(plan, scope).await,
            Stage::RolesBindable => self.bind_roles(plan, scope, progress).await,
            Stage::RootProvisioned => self.provision_roots(plan, scope, progress).await,
            Stage::IntermediateProvisioned => {
                self.provision_intermediates(plan, scope, progress).await
            }
            Stage::SecretsWritten => self.write_secrets(plan, scope, progress).await,
            Stage::ConfigMapped => {
                let references = MeshConfigMapper::map(&plan.features, &progress.resolved)?;
                progress.values = Some(MeshConfigMapper::build_values(&plan.mesh, &references)?);
                progress.references = references;
                Ok(())
            }
            Stage::Done => Ok(()),
        }
    }

    async fn write_policies(&self, plan: &BootstrapPlan, scope: &mut CleanupScope) -> Result<()> {
        self.backend.health_check().await?;

        for document in &plan.policies {
            self.policies.apply(document).await?;
            scope.track(ResourceHandle::Policy { name: document.name.clone() });
        }
        Ok(())
    }

    async fn bind_roles(
        &self,
        plan: &BootstrapPlan,
        scope: &mut CleanupScope,
        progress: &mut Progress,
    ) -> Result<()> {
        let binder =
            AuthRoleBinder::new(self.backend.clone(), self.policies.clone(), &plan.auth_mount)
                .with_token_ttl(plan.token_ttl);
        if binder.enable_kubernetes(&plan.kubernetes_host).await? {
            scope.track(ResourceHandle::AuthMount { mount: plan.auth_mount.clone() });
        }

        for role in &plan.roles {
            let binding = binder.bind_role(&role.name, &role.identity, &role.policies).await?;
            scope.track(ResourceHandle::AuthRole {
                mount: binding.auth_mount.clone(),
                name: binding.role_name.clone(),
            });
            progress.bindings.push(binding);
        }
        Ok(())
    }

    async fn provision_roots(
        &self,
        plan: &BootstrapPlan,
        scope: &mut CleanupScope,
        progress: &mut Progress,
    ) -> Result<()> {
        let mut mounts = Vec::new();
        for spec in plan.roots() {
            self.pki.mount_root(&spec.mount, spec.ttl).await?;
            scope.track(ResourceHandle::PkiMount { mount: spec.mount.clone() });

            let node = self.pki.ensure_root(&spec.mount, &spec.common_name, spec.ttl).await?;
            mounts.push(node.mount.clone());
            progress.nodes.push(node);
        }
        self.define_pki_roles(plan, &mounts).await
    }

    async fn provision_intermediates(
        &self,
        plan: &BootstrapPlan,
        scope: &mut CleanupScope,
        progress: &mut Progress,
    ) -> Result<()> {
        let mut mounts = Vec::new();
        for spec in plan.intermediates() {
            let parent = spec.parent.as_deref().unwrap_or_default();
            self.pki.mount_intermediate(&spec.mount, parent, spec.ttl).await?;
            scope.track(ResourceHandle::PkiMount { mount: spec.mount.clone() });

            let node = self
                .pki
                .ensure_intermediate(&spec.mount, parent, &spec.common_name, spec.ttl)
                .await?;
            mounts.push(node.mount.clone());
            progress.nodes.push(node);
        }
        self.define_pki_roles(plan, &mounts).await
    }

    async fn define_pki_roles(&self, plan: &BootstrapPlan, mounts: &[String]) -> Result<()> {
        for spec in plan.pki_roles_on(mounts) {
            self.pki.define_role(&spec.mount, &spec.role).await?;
        }
        Ok(())
    }

    async fn write_secrets(
        &self,
        plan: &BootstrapPlan,
        scope: &mut CleanupScope,
        progress: &mut Progress,
    ) -> Result<()> {
        let kv_mounts: BTreeSet<String> = plan
            .secrets
            .iter()
            .map(|spec| KvPath::parse(&spec.path).map(|p| p.mount().to_string()))
            .collect::<Result<_>>()?;
        for mount in &kv_mounts {
            if self.backend.ensure_kv_mount(mount).await? {
                scope.track(ResourceHandle::KvMount { mount: mount.clone() });
            }
        }

        // Writes that landed are tracked even when a sibling fails.
        let writes =
            plan.secrets.iter().map(|spec| async move { (spec, self.write_secret(spec).await) });
        let mut first_error = None;
        for (spec, written) in join_all(writes).await {
            match written {
                Ok(reference) => {
                    scope.track(ResourceHandle::Secret { path: spec.path.clone() });
                    progress.resolved.insert(spec.feature, reference);
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        for (feature, reference) in &plan.pki_references {
            progress.resolved.insert(*feature, reference.clone());
        }
        info!(secrets = plan.secrets.len(), "Secrets written");
        Ok(())
    }

    async fn write_secret(&self, spec: &SecretSpec) -> Result<SecretRef> {
        match &spec.source {
            SecretSource::GossipKey => {
                self.secrets.ensure(&spec.path, &spec.field, generate_gossip_key).await?;
                Ok(spec.reference())
            }
            SecretSource::Value { value } => {
                let record = SecretRecord::new(&spec.path, &spec.field, value.clone());
                self.secrets.put_record(&record).await
            }
        }
    }
}
