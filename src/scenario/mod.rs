//! # End-to-end scenario
//!
//! Bootstraps the secrets backend, hands the rendered values to a
//! [`MeshDeployer`], opens an intention through an [`AccessPolicyApplier`] and
//! checks that traffic flows. Everything the run created is released on the
//! way out, unless the run failed and cleanup on failure is disabled.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bootstrap::{
    BackendReleaser, BootstrapOrchestrator, BootstrapOutcome, BootstrapPlan, CleanupScope,
    ResourceHandle, ResourceReleaser,
};
use crate::config::AppConfig;
use crate::errors::Result;
use crate::mesh::MeshValues;
use crate::observability::MetricsRecorder;
use crate::secrets::SecretsBackend;
use crate::validation::{ConnectivityValidator, EndpointTarget, ProbeSuccess, SuccessPredicate};

/// Installs and removes the mesh (for example a Helm release).
#[async_trait]
pub trait MeshDeployer: Send + Sync {
    /// Install or upgrade the mesh; returns the release name.
    async fn deploy(&self, values: &MeshValues) -> Result<String>;

    async fn teardown(&self, release: &str) -> Result<()>;
}

/// Identity-based allow rule between two services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intention {
    pub source: String,
    pub destination: String,
}

/// Applies and removes intentions in the mesh.
#[async_trait]
pub trait AccessPolicyApplier: Send + Sync {
    async fn apply(&self, intention: &Intention) -> Result<()>;

    async fn remove(&self, intention: &Intention) -> Result<()>;
}

/// Report of a completed scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub bootstrap: BootstrapOutcome,
    pub release: String,
    pub probe: ProbeSuccess,
}

/// Routes each handle to the component that created it.
struct ScenarioReleaser<'a> {
    backend: BackendReleaser,
    deployer: &'a dyn MeshDeployer,
    access: &'a dyn AccessPolicyApplier,
}

#[async_trait]
impl ResourceReleaser for ScenarioReleaser<'_> {
    async fn release(&self, handle: &ResourceHandle) -> Result<()> {
        match handle {
            ResourceHandle::Intention { source, destination } => {
                self.access
                    .remove(&Intention { source: source.clone(), destination: destination.clone() })
                    .await
            }
            ResourceHandle::MeshRelease { name } => self.deployer.teardown(name).await,
            other => self.backend.release(other).await,
        }
    }
}

/// One end-to-end run against a backend, a deployer and an access policy applier.
pub struct Scenario {
    config: AppConfig,
    backend: Arc<dyn SecretsBackend>,
    deployer: Arc<dyn MeshDeployer>,
    access: Arc<dyn AccessPolicyApplier>,
    metrics: MetricsRecorder,
}

impl Scenario {
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn SecretsBackend>,
        deployer: Arc<dyn MeshDeployer>,
        access: Arc<dyn AccessPolicyApplier>,
    ) -> Self {
        Self { config, backend, deployer, access, metrics: MetricsRecorder::new() }
    }

    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = metrics;
        self
    }

    /// Where the probe goes: the service name under transparent proxy,
    /// the explicit upstream listener otherwise.
    pub fn probe_target(&self) -> EndpointTarget {
        if self.config.mesh.features.transparent_proxy {
            EndpointTarget::new(&self.config.scenario.static_server_url)
        } else {
            EndpointTarget::new(&self.config.scenario.upstream_url)
        }
    }

    pub fn intention(&self) -> Intention {
        Intention {
            source: self.config.scenario.intention_source.clone(),
            destination: self.config.scenario.intention_destination.clone(),
        }
    }

    /// Run the scenario, then release what it created.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ScenarioReport> {
        let mut scope = CleanupScope::new();
        let result = self.execute(&mut scope, cancel).await;

        let result = match result {
            Err(e) if self.config.scenario.no_cleanup_on_failure => {
                let kept = scope.disarm();
                warn!(resources = kept.len(), "Run failed; leaving provisioned resources in place");
                return Err(e);
            }
            other => other,
        };

        let releaser = ScenarioReleaser {
            backend: BackendReleaser::new(self.backend.clone()),
            deployer: self.deployer.as_ref(),
            access: self.access.as_ref(),
        };
        let released = scope.release(&releaser).await;

        match (result, released) {
            (Ok((outcome, release, probe)), Ok(())) => {
                info!(release = %release, attempts = probe.attempts, "Scenario passed");
                Ok(ScenarioReport { bootstrap: outcome, release, probe })
            }
            (Ok(_), Err(cleanup_error)) => {
                error!(error = %cleanup_error, "Scenario passed but cleanup failed");
                Err(cleanup_error)
            }
            (Err(run_error), Err(cleanup_error)) => {
                error!(error = %cleanup_error, "Cleanup after failed run also failed");
                Err(run_error)
            }
            (Err(run_error), Ok(())) => Err(run_error),
        }
    }

    async fn execute(
        &self,
        scope: &mut CleanupScope,
        cancel: &CancellationToken,
    ) -> Result<(BootstrapOutcome, String, ProbeSuccess)> {
        let plan = BootstrapPlan::consul(&self.config)?;
        let outcome = BootstrapOrchestrator::new(self.backend.clone())
            .with_metrics(self.metrics.clone())
            .run(&plan, scope)
            .await?;

        let release = self.deployer.deploy(&outcome.values).await?;
        scope.track(ResourceHandle::MeshRelease { name: release.clone() });
        info!(release = %release, "Mesh deployed");

        let intention = self.intention();
        self.access.apply(&intention).await?;
        scope.track(ResourceHandle::Intention {
            source: intention.source.clone(),
            destination: intention.destination.clone(),
        });

        let validation = &self.config.validation;
        let probe = ConnectivityValidator::from_config(validation)?
            .with_metrics(self.metrics.clone())
            .check(
                &self.probe_target(),
                validation.max_attempts,
                validation.interval(),
                &SuccessPredicate::HttpStatus(validation.expected_status),
                cancel,
            )
            .await?;

        Ok((outcome, release, probe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BootstrapError;
    use crate::secrets::InMemoryBackend;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingDeployer {
        torn_down: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MeshDeployer for RecordingDeployer {
        async fn deploy(&self, _values: &MeshValues) -> Result<String> {
            Ok("consul".to_string())
        }

        async fn teardown(&self, release: &str) -> Result<()> {
            self.torn_down.lock().unwrap().push(release.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingAccess {
        removed: Mutex<Vec<Intention>>,
    }

    #[async_trait]
    impl AccessPolicyApplier for RecordingAccess {
        async fn apply(&self, _intention: &Intention) -> Result<()> {
            Ok(())
        }

        async fn remove(&self, intention: &Intention) -> Result<()> {
            self.removed.lock().unwrap().push(intention.clone());
            Ok(())
        }
    }

    fn scenario(config: AppConfig) -> (Scenario, Arc<InMemoryBackend>, Arc<RecordingDeployer>, Arc<RecordingAccess>) {
        let backend = Arc::new(InMemoryBackend::new());
        let deployer = Arc::new(RecordingDeployer::default());
        let access = Arc::new(RecordingAccess::default());
        let scenario = Scenario::new(config, backend.clone(), deployer.clone(), access.clone());
        (scenario, backend, deployer, access)
    }

    #[test]
    fn test_probe_target_follows_transparent_proxy() {
        let mut config = AppConfig::default();
        let (plain, ..) = scenario(config.clone());
        assert_eq!(plain.probe_target().url, "http://localhost:1234");

        config.mesh.features.transparent_proxy = true;
        let (tproxy, ..) = scenario(config);
        assert_eq!(tproxy.probe_target().url, "http://static-server");
    }

    #[tokio::test]
    async fn test_failed_probe_still_releases_everything() {
        let mut config = AppConfig::default();
        config.scenario.upstream_url = "http://127.0.0.1:9".to_string();
        config.validation.max_attempts = 1;
        let (scenario, backend, deployer, access) = scenario(config);

        let err = scenario.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Timeout { attempts: 1, .. }));

        assert_eq!(deployer.torn_down.lock().unwrap().as_slice(), ["consul".to_string()]);
        assert_eq!(access.removed.lock().unwrap().len(), 1);
        assert!(backend.policy_names().is_empty());
        assert_eq!(backend.kv_len(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_run_keeps_resources_when_asked() {
        let mut config = AppConfig::default();
        config.scenario.upstream_url = "http://127.0.0.1:9".to_string();
        config.scenario.no_cleanup_on_failure = true;
        config.validation.max_attempts = 1;
        let (scenario, backend, deployer, _) = scenario(config);

        assert!(scenario.run(&CancellationToken::new()).await.is_err());
        assert!(deployer.torn_down.lock().unwrap().is_empty());
        assert!(backend.policy_names().contains(&"gossip".to_string()));
        assert!(logs_contain("leaving provisioned resources in place"));
    }
}
