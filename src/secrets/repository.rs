//! Typed access to opaque key/value secrets.
//!
//! A secret is addressed by `(path, field)`: the path names a KV v2 document and
//! the field one entry inside it. The backend owns every value; this type keeps
//! no cache, so callers always observe the backend's current state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::backend::SecretsBackend;
use super::path::KvPath;
use super::types::SecretString;
use crate::errors::{BootstrapError, Result};

/// Location of a secret value, held by every component that is not the repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecretRef {
    pub path: String,
    pub field: String,
}

impl SecretRef {
    pub fn new(path: impl Into<String>, field: impl Into<String>) -> Self {
        Self { path: path.into(), field: field.into() }
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path, self.field)
    }
}

/// A secret value together with its location.
#[derive(Debug, Clone)]
pub struct SecretRecord {
    pub path: String,
    pub field: String,
    pub value: SecretString,
}

impl SecretRecord {
    pub fn new(
        path: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<SecretString>,
    ) -> Self {
        Self { path: path.into(), field: field.into(), value: value.into() }
    }

    pub fn reference(&self) -> SecretRef {
        SecretRef::new(self.path.clone(), self.field.clone())
    }
}

/// Repository over the KV v2 part of a [`SecretsBackend`].
#[derive(Debug, Clone)]
pub struct SecretRepository {
    backend: Arc<dyn SecretsBackend>,
}

impl SecretRepository {
    pub fn new(backend: Arc<dyn SecretsBackend>) -> Self {
        Self { backend }
    }

    /// Make sure the KV engine that `path` lives on is mounted; `true` when
    /// this call mounted it.
    pub async fn prepare(&self, path: &str) -> Result<bool> {
        let kv_path = KvPath::parse(path)?;
        self.backend.ensure_kv_mount(kv_path.mount()).await
    }

    /// Store `value` under `(path, field)`.
    ///
    /// Other fields of the document are preserved. Writing the value a field
    /// already holds succeeds without touching the backend.
    #[instrument(skip(self, value), fields(path = %path, field = %field))]
    pub async fn put(&self, path: &str, field: &str, value: &SecretString) -> Result<()> {
        if field.is_empty() {
            return Err(BootstrapError::validation_field("Secret field cannot be empty", "field"));
        }
        let kv_path = KvPath::parse(path)?;

        let mut document = self.backend.kv_read(&kv_path).await?.unwrap_or_default();
        if document.get(field).map(String::as_str) == Some(value.expose_secret()) {
            debug!("Secret unchanged, skipping write");
            return Ok(());
        }

        document.insert(field.to_string(), value.expose_secret().to_string());
        self.backend.kv_write(&kv_path, &document).await?;
        info!("Secret written");
        Ok(())
    }

    pub async fn put_record(&self, record: &SecretRecord) -> Result<SecretRef> {
        self.put(&record.path, &record.field, &record.value).await?;
        Ok(record.reference())
    }

    /// Read the value at `(path, field)`.
    pub async fn get(&self, path: &str, field: &str) -> Result<SecretString> {
        self.find(path, field)
            .await?
            .ok_or_else(|| BootstrapError::not_found("secret", format!("{}#{}", path, field)))
    }

    async fn find(&self, path: &str, field: &str) -> Result<Option<SecretString>> {
        let kv_path = KvPath::parse(path)?;
        let document: Option<BTreeMap<String, String>> = self.backend.kv_read(&kv_path).await?;
        Ok(document.and_then(|mut doc| doc.remove(field)).map(SecretString::new))
    }

    /// Return the stored value, or generate, store and return a new one.
    pub async fn ensure<F>(&self, path: &str, field: &str, generate: F) -> Result<SecretString>
    where
        F: FnOnce() -> Result<SecretString> + Send,
    {
        if let Some(existing) = self.find(path, field).await? {
            debug!(path = %path, field = %field, "Reusing existing secret");
            return Ok(existing);
        }

        let value = generate()?;
        self.put(path, field, &value).await?;
        Ok(value)
    }

    /// Remove the document at `path`, including every version and its metadata.
    #[instrument(skip(self), fields(path = %path))]
    pub async fn delete(&self, path: &str) -> Result<()> {
        let kv_path = KvPath::parse(path)?;
        self.backend.kv_delete(&kv_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::InMemoryBackend;

    const GOSSIP: &str = "consul/data/secret/gossip";

    async fn repository() -> (Arc<InMemoryBackend>, SecretRepository) {
        let backend = Arc::new(InMemoryBackend::new());
        let repo = SecretRepository::new(backend.clone());
        repo.prepare(GOSSIP).await.unwrap();
        (backend, repo)
    }

    #[tokio::test]
    async fn test_put_twice_is_idempotent() {
        let (backend, repo) = repository().await;
        let value = SecretString::new("c2VjcmV0LWtleQ==");

        repo.put(GOSSIP, "gossip", &value).await.unwrap();
        let writes = backend.write_count();
        repo.put(GOSSIP, "gossip", &value).await.unwrap();

        assert_eq!(backend.write_count(), writes);
        assert_eq!(repo.get(GOSSIP, "gossip").await.unwrap().expose_secret(), value.expose_secret());
    }

    #[tokio::test]
    async fn test_put_record_returns_its_reference() {
        let (_, repo) = repository().await;
        let record = SecretRecord::new(GOSSIP, "gossip", "c2VjcmV0LWtleQ==");

        let reference = repo.put_record(&record).await.unwrap();

        assert_eq!(reference, SecretRef::new(GOSSIP, "gossip"));
        assert_eq!(repo.get(GOSSIP, "gossip").await.unwrap().expose_secret(), "c2VjcmV0LWtleQ==");
    }

    #[tokio::test]
    async fn test_put_preserves_other_fields() {
        let (_, repo) = repository().await;
        repo.put(GOSSIP, "gossip", &"a".into()).await.unwrap();
        repo.put(GOSSIP, "backup", &"b".into()).await.unwrap();

        assert_eq!(repo.get(GOSSIP, "gossip").await.unwrap().expose_secret(), "a");
        assert_eq!(repo.get(GOSSIP, "backup").await.unwrap().expose_secret(), "b");
    }

    #[tokio::test]
    async fn test_get_missing_field_is_not_found() {
        let (_, repo) = repository().await;
        let err = repo.get(GOSSIP, "gossip").await.unwrap_err();
        assert!(matches!(err, BootstrapError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_ensure_generates_once() {
        let (_, repo) = repository().await;
        let first = repo.ensure(GOSSIP, "gossip", || Ok("first".into())).await.unwrap();
        let second = repo.ensure(GOSSIP, "gossip", || Ok("second".into())).await.unwrap();
        assert_eq!(first.expose_secret(), "first");
        assert_eq!(second.expose_secret(), "first");
    }

    #[tokio::test]
    async fn test_put_surfaces_permission_denied() {
        let (backend, repo) = repository().await;
        backend.deny_path("consul/data/secret/");
        let err = repo.put(GOSSIP, "gossip", &"v".into()).await.unwrap_err();
        assert!(matches!(err, BootstrapError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn test_put_surfaces_backend_unavailable() {
        let (backend, repo) = repository().await;
        backend.set_unavailable(true);
        let err = repo.put(GOSSIP, "gossip", &"v".into()).await.unwrap_err();
        assert!(matches!(err, BootstrapError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_delete_removes_document() {
        let (_, repo) = repository().await;
        repo.put(GOSSIP, "gossip", &"v".into()).await.unwrap();
        repo.delete(GOSSIP).await.unwrap();
        assert!(repo.get(GOSSIP, "gossip").await.is_err());
    }

    #[test]
    fn test_secret_ref_display() {
        assert_eq!(SecretRef::new(GOSSIP, "gossip").to_string(), "consul/data/secret/gossip#gossip");
    }
}
