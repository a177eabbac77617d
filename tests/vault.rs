//! Tests against a live Vault dev server.
//!
//! Requires `VAULT_ADDR` and `VAULT_TOKEN`; run with `cargo test --features vault_tests`.
#![cfg(feature = "vault_tests")]

use std::sync::Arc;

use meshvault::policy::{Capability, Grant, PolicyDocument, PolicyManager};
use meshvault::secrets::{SecretRepository, SecretString, VaultBackend, VaultConfig};

async fn backend() -> Arc<VaultBackend> {
    let config = VaultConfig::default().with_env_overrides();
    Arc::new(VaultBackend::connect(&config).await.expect("Vault must be reachable"))
}

#[tokio::test]
async fn kv_secret_round_trip_is_idempotent() {
    let backend = backend().await;
    let repo = SecretRepository::new(backend.clone());
    let path = format!("secret/data/meshvault-test-{}", uuid::Uuid::new_v4());

    repo.prepare(&path).await.unwrap();
    let value = SecretString::new("s3cr3t");
    repo.put(&path, "gossip", &value).await.unwrap();
    repo.put(&path, "gossip", &value).await.unwrap();
    assert_eq!(repo.get(&path, "gossip").await.unwrap().expose_secret(), "s3cr3t");

    repo.delete(&path).await.unwrap();
    assert!(repo.get(&path, "gossip").await.is_err());
}

#[tokio::test]
async fn policy_is_written_and_read_back() {
    let backend = backend().await;
    let policies = PolicyManager::new(backend.clone());
    let name = format!("meshvault-test-{}", uuid::Uuid::new_v4());

    let document = PolicyDocument::new(
        name.clone(),
        [Grant::new("secret/data/meshvault-test", Capability::Read)],
    );
    policies.apply(&document).await.unwrap();
    assert!(policies.exists(&name).await.unwrap());

    policies.delete_policy(&name).await.unwrap();
    assert!(!policies.exists(&name).await.unwrap());
}
