use async_trait::async_trait;
use crate::application::errors::StorageError;

/// Store trait - abstraction for plugin document persistence.
///
/// Documents are opaque byte blobs addressed by `(namespace, key)`. Writes
/// replace the whole document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Returns whether a document was removed
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StorageError>;
    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError>;

    /// Remove every document of a namespace
    async fn drop_namespace(&self, namespace: &str) -> Result<(), StorageError>;
}
