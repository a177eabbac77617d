//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use meshvault::secrets::InMemoryBackend;
use meshvault::{AppConfig, BootstrapOrchestrator, BootstrapOutcome, BootstrapPlan, CleanupScope};

pub fn backend() -> Arc<InMemoryBackend> {
    Arc::new(InMemoryBackend::new())
}

pub fn config_with_license() -> AppConfig {
    let mut config = AppConfig::default();
    config.mesh.features.enterprise_license = true;
    config.bootstrap.enterprise_license = Some("02MV4UU43BK5HGYYTOJZWFQMTMNNEWU33JJ".into());
    config
}

/// Run a full bootstrap and leave everything in place.
pub async fn bootstrap(
    backend: &Arc<InMemoryBackend>,
    config: &AppConfig,
) -> meshvault::Result<BootstrapOutcome> {
    let plan = BootstrapPlan::consul(config)?;
    let mut scope = CleanupScope::new();
    let result = BootstrapOrchestrator::new(backend.clone()).run(&plan, &mut scope).await;
    scope.disarm();
    result
}
