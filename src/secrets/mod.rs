//! Secrets backend access.
//!
//! Everything the bootstrap provisions lives in the secrets backend: KV secrets
//! (gossip key, license, snapshot agent config), PKI mounts, ACL policies and
//! Kubernetes auth roles.
//!
//! # Architecture
//!
//! [`SecretsBackend`] is the backend-agnostic surface. Two implementations ship:
//! - [`VaultBackend`]: HashiCorp Vault over HTTP
//! - [`InMemoryBackend`]: process-local store with a real CA engine, for dry runs and tests
//!
//! [`SecretRepository`] layers `(path, field)` semantics on top of the KV part.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use meshvault::secrets::{InMemoryBackend, SecretRepository};
//!
//! let repo = SecretRepository::new(Arc::new(InMemoryBackend::new()));
//! repo.prepare("consul/data/secret/gossip").await?;
//! let key = repo.ensure("consul/data/secret/gossip", "gossip", generate_gossip_key).await?;
//! ```
//!
//! # Security Considerations
//!
//! - Secret values travel as [`SecretString`] and never reach logs or diagnostics
//! - Components other than the repository only hold [`SecretRef`]s

pub mod backend;
pub mod memory;
pub mod path;
pub mod repository;
pub mod types;
pub mod vault;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;

pub use backend::{
    BackendType, CaBundle, IssuedCertificate, KubernetesRoleConfig, PkiRoleConfig, SecretsBackend,
};
pub use memory::InMemoryBackend;
pub use path::KvPath;
pub use repository::{SecretRecord, SecretRef, SecretRepository};
pub use types::SecretString;
pub use vault::{VaultBackend, VaultConfig};

use crate::errors::Result;

/// Length in bytes of a gossip encryption key.
pub const GOSSIP_KEY_BYTES: usize = 32;

/// Generate a base64-encoded gossip encryption key.
pub fn generate_gossip_key() -> Result<SecretString> {
    let mut key = [0u8; GOSSIP_KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut key);
    Ok(SecretString::new(STANDARD.encode(key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gossip_key_is_32_random_bytes() {
        let first = generate_gossip_key().unwrap();
        let second = generate_gossip_key().unwrap();
        let decoded = STANDARD.decode(first.expose_secret()).unwrap();
        assert_eq!(decoded.len(), GOSSIP_KEY_BYTES);
        assert_ne!(first, second);
    }
}
