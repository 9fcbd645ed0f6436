//! In-memory document store, for tests and `storage.in-memory`

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::application::errors::StorageError;
use crate::domain::traits::DocumentStore;

/// Documents kept in process memory, grouped by namespace
#[derive(Default)]
pub struct MemoryStore {
    docs: Arc<RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let docs = self.docs.read().await;
        Ok(docs.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut docs = self.docs.write().await;
        docs.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StorageError> {
        let mut docs = self.docs.write().await;
        Ok(docs
            .get_mut(namespace)
            .map(|ns| ns.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let docs = self.docs.read().await;
        Ok(docs
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<(), StorageError> {
        self.docs.write().await.remove(namespace);
        Ok(())
    }
}
