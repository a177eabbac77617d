mod common;

use std::time::Duration;

use base64::Engine;
use meshvault::auth::AuthRoleBinder;
use meshvault::bootstrap::BackendReleaser;
use meshvault::mesh::FeatureKey;
use meshvault::pki::PkiProvisioner;
use meshvault::policy::PolicyManager;
use meshvault::secrets::{SecretRepository, SecretsBackend};
use meshvault::{
    AppConfig, BootstrapDiagnostics, BootstrapError, BootstrapOrchestrator, BootstrapPlan,
    CleanupScope, ErrorKind, ResourceHandle, Stage,
};

#[tokio::test]
async fn bootstrap_provisions_connect_ca_and_issues_verifiable_leaf() {
    let backend = common::backend();
    let outcome = common::bootstrap(&backend, &AppConfig::default()).await.unwrap();
    assert_eq!(outcome.stage, Stage::Done);

    let pki = PkiProvisioner::new(backend.clone());
    let root = pki.read_ca("connect_root").await.unwrap().expect("root CA");
    assert!(root.self_signed);
    let inter = pki.read_ca("dc1/connect_inter").await.unwrap().expect("intermediate CA");
    assert!(!inter.self_signed);
    assert_eq!(inter.issuer, root.subject);

    let gossip = SecretRepository::new(backend.clone())
        .get("consul/data/secret/gossip", "gossip")
        .await
        .unwrap();
    let key = base64::engine::general_purpose::STANDARD.decode(gossip.expose_secret()).unwrap();
    assert_eq!(key.len(), 32);

    let binder = AuthRoleBinder::new(backend.clone(), PolicyManager::new(backend.clone()), "kubernetes");
    let server = binder.get_binding("consul-server").await.unwrap();
    assert!(server.policies.contains(&"consul-connect-ca".to_string()));
    assert_eq!(server.identity.service_account, "consul-server");

    let leaf = pki
        .issue_leaf("dc1/connect_inter", "consul-server", "server.dc1.consul", Duration::from_secs(600))
        .await
        .unwrap();
    let root_pem = pki.ca_pem("connect_root").await.unwrap().unwrap();
    let chain = leaf.verify(&[root_pem]).unwrap();
    assert_eq!(chain.depth(), 3);
    assert_eq!(chain.root_subject(), Some(root.subject.as_str()));
}

#[tokio::test]
async fn rerun_has_no_backend_side_effects() {
    let backend = common::backend();
    let config = AppConfig::default();

    let first = common::bootstrap(&backend, &config).await.unwrap();
    let writes = backend.write_count();
    let gossip_before = SecretRepository::new(backend.clone())
        .get("consul/data/secret/gossip", "gossip")
        .await
        .unwrap();

    let second = common::bootstrap(&backend, &config).await.unwrap();
    assert_eq!(backend.write_count(), writes);
    assert_eq!(first.references, second.references);
    assert_eq!(first.values, second.values);

    let gossip_after = SecretRepository::new(backend.clone())
        .get("consul/data/secret/gossip", "gossip")
        .await
        .unwrap();
    assert_eq!(gossip_before.expose_secret(), gossip_after.expose_secret());
}

#[tokio::test]
async fn failed_run_completes_on_retry() {
    let backend = common::backend();
    let config = AppConfig::default();
    backend.deny_path("consul/data/secret/snapshotagentconfig");

    let err = common::bootstrap(&backend, &config).await.unwrap_err();
    assert_eq!(err.failed_stage(), Some(Stage::SecretsWritten));
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(err.to_string().contains("SecretsWritten"));

    backend.clear_denied();
    let outcome = common::bootstrap(&backend, &config).await.unwrap();
    assert_eq!(outcome.stage, Stage::Done);
}

#[tokio::test]
async fn license_reference_follows_feature_flag() {
    let backend = common::backend();
    let without = common::bootstrap(&backend, &AppConfig::default()).await.unwrap();
    assert!(without.references.iter().all(|r| r.feature != FeatureKey::EnterpriseLicense));
    assert!(without.values.global.enterprise_license.is_none());

    let backend = common::backend();
    let with = common::bootstrap(&backend, &common::config_with_license()).await.unwrap();
    let licenses: Vec<_> =
        with.references.iter().filter(|r| r.feature == FeatureKey::EnterpriseLicense).collect();
    assert_eq!(licenses.len(), 1);
    assert_eq!(licenses[0].secret_path, "consul/data/secret/enterpriselicense");
    assert_eq!(licenses[0].secret_field, "enterpriselicense");
    assert!(backend.policy_names().contains(&"license".to_string()));
}

#[tokio::test]
async fn every_requested_feature_gets_exactly_one_reference() {
    let backend = common::backend();
    let config = common::config_with_license();
    let outcome = common::bootstrap(&backend, &config).await.unwrap();

    let requested = config.mesh.features.requested();
    assert_eq!(outcome.references.len(), requested.len());
    for feature in requested {
        assert_eq!(outcome.references.iter().filter(|r| r.feature == feature).count(), 1);
    }
}

#[tokio::test]
async fn intermediate_without_root_is_an_ordering_violation() {
    let backend = common::backend();
    let pki = PkiProvisioner::new(backend.clone());

    let err = pki
        .create_intermediate("dc1/connect_inter", "connect_root", "Intermediate", Duration::from_secs(3600))
        .await
        .unwrap_err();
    assert!(matches!(err, BootstrapError::OrderingViolation { .. }));

    let err = pki
        .issue_leaf("connect_root", "consul-server", "server.dc1.consul", Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, BootstrapError::OrderingViolation { .. }));
}

#[tokio::test]
async fn releasing_the_scope_removes_provisioned_state() {
    let backend = common::backend();
    let plan = BootstrapPlan::consul(&AppConfig::default()).unwrap();
    let mut scope = CleanupScope::new();

    BootstrapOrchestrator::new(backend.clone()).run(&plan, &mut scope).await.unwrap();
    assert!(!backend.policy_names().is_empty());
    assert!(backend.kv_len() > 0);

    assert!(scope.handles().contains(&ResourceHandle::AuthMount { mount: "kubernetes".into() }));
    assert!(scope.handles().contains(&ResourceHandle::KvMount { mount: "consul".into() }));

    scope.release(&BackendReleaser::new(backend.clone())).await.unwrap();
    assert!(backend.policy_names().is_empty());
    assert_eq!(backend.kv_len(), 0);
    assert!(PkiProvisioner::new(backend.clone()).read_ca("connect_root").await.unwrap().is_none());
    assert!(!backend.kubernetes_auth_enabled("kubernetes").await.unwrap());
    assert!(backend.ensure_kv_mount("consul").await.unwrap(), "kv mount should be gone");
}

#[tokio::test]
async fn release_after_failed_secret_write_removes_written_siblings() {
    let backend = common::backend();
    backend.deny_path("consul/data/secret/snapshotagentconfig");
    let plan = BootstrapPlan::consul(&AppConfig::default()).unwrap();
    let mut scope = CleanupScope::new();

    let err = BootstrapOrchestrator::new(backend.clone()).run(&plan, &mut scope).await.unwrap_err();
    assert_eq!(err.failed_stage(), Some(Stage::SecretsWritten));
    assert_eq!(backend.kv_len(), 1);

    let diagnostics = BootstrapDiagnostics::from_scope(&scope, err.failed_stage(), Some(&err));
    assert_eq!(diagnostics.secrets, vec!["consul/data/secret/gossip".to_string()]);
    assert!(diagnostics.mounts.contains(&"consul".to_string()));

    scope.release(&BackendReleaser::new(backend.clone())).await.unwrap();
    assert_eq!(backend.kv_len(), 0);
    assert!(backend.policy_names().is_empty());
    assert!(!backend.kubernetes_auth_enabled("kubernetes").await.unwrap());
}

#[tokio::test]
async fn release_after_failed_root_generation_removes_the_mount() {
    let backend = common::backend();
    backend.deny_path("connect_root/root/generate");
    let plan = BootstrapPlan::consul(&AppConfig::default()).unwrap();
    let mut scope = CleanupScope::new();

    let err = BootstrapOrchestrator::new(backend.clone()).run(&plan, &mut scope).await.unwrap_err();
    assert_eq!(err.failed_stage(), Some(Stage::RootProvisioned));
    assert!(backend.pki_mount_max_ttl("connect_root").await.unwrap().is_some());

    backend.clear_denied();
    scope.release(&BackendReleaser::new(backend.clone())).await.unwrap();
    assert!(backend.pki_mount_max_ttl("connect_root").await.unwrap().is_none());
    assert!(backend.pki_mount_max_ttl("pki").await.unwrap().is_none());
}

#[tokio::test]
async fn release_keeps_mounts_that_existed_before_the_run() {
    let backend = common::backend();
    backend.enable_kubernetes_auth("kubernetes", "https://kubernetes.default.svc").await.unwrap();
    backend.ensure_kv_mount("consul").await.unwrap();

    let plan = BootstrapPlan::consul(&AppConfig::default()).unwrap();
    let mut scope = CleanupScope::new();
    BootstrapOrchestrator::new(backend.clone()).run(&plan, &mut scope).await.unwrap();
    assert!(!scope.handles().iter().any(|h| matches!(
        h,
        ResourceHandle::AuthMount { .. } | ResourceHandle::KvMount { .. }
    )));

    scope.release(&BackendReleaser::new(backend.clone())).await.unwrap();
    assert!(backend.kubernetes_auth_enabled("kubernetes").await.unwrap());
    assert!(!backend.ensure_kv_mount("consul").await.unwrap());
    assert_eq!(backend.kv_len(), 0);
}
