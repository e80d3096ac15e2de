//! Secret store boundary.
//!
//! Multi-tenant runs fetch one named JSON document holding the credentials of
//! every destination stream. The store only hands out raw bytes; parsing lives
//! in `beacon_core::credentials`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tracing::instrument;

/// Secret store operation error.
#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("invalid secret name: {0:?}")]
    InvalidName(String),

    #[error("secret store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Named secret lookup.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the latest version of secret `name`.
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, SecretStoreError>;
}

#[async_trait]
impl<T> SecretStore for Arc<T>
where
    T: SecretStore + ?Sized,
{
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, SecretStoreError> {
        (**self).fetch(name).await
    }
}

/// In-memory secret store for tests/dev.
///
/// Counts fetches so callers can check the once-per-worker contract.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: HashMap<String, Vec<u8>>,
    fetches: AtomicUsize,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, SecretStoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| SecretStoreError::NotFound(name.to_string()))
    }
}

/// Secrets kept as files in one directory, one file per secret name.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, SecretStoreError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(SecretStoreError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    #[instrument(skip(self), err)]
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, SecretStoreError> {
        let path = self.path_for(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SecretStoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_returns_secret_and_counts_fetches() {
        let store = InMemorySecretStore::new().with_secret("streams", b"{}".to_vec());

        assert_eq!(store.fetch("streams").await.unwrap(), b"{}".to_vec());
        assert!(matches!(
            store.fetch("other").await,
            Err(SecretStoreError::NotFound(name)) if name == "other"
        ));
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn file_store_reads_named_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ga4-streams"), br#"{"1":{}}"#).unwrap();
        let store = FileSecretStore::new(dir.path());

        assert_eq!(store.fetch("ga4-streams").await.unwrap(), br#"{"1":{}}"#.to_vec());
        assert!(matches!(
            store.fetch("missing").await,
            Err(SecretStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn file_store_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path());

        for name in ["../etc/passwd", "a/b", "", ".hidden"] {
            assert!(
                matches!(store.fetch(name).await, Err(SecretStoreError::InvalidName(_))),
                "{name} should be rejected"
            );
        }
    }
}
