//! Plugin storage sandbox
//!
//! Each plugin's documents live under a namespace equal to its id. Plugins only
//! ever get a [`ScopedStorage`] bound to their own id, so nothing in this
//! interface lets one plugin reach another plugin's documents.

pub mod disabled;
pub mod fs;
pub mod memory;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::application::errors::StorageError;
use crate::domain::entities::is_valid_token;
use crate::domain::traits::DocumentStore;

pub use disabled::DisabledList;
pub use fs::FsStore;
pub use memory::MemoryStore;

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Per-plugin document storage with serialized writes per `(plugin, key)`
pub struct PluginStorage {
    backend: Arc<dyn DocumentStore>,
    locks: Mutex<HashMap<(String, String), KeyLock>>,
}

impl PluginStorage {
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Storage rooted at `root` on disk
    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FsStore::new(root)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn check(plugin_id: &str, key: Option<&str>) -> Result<(), StorageError> {
        if !is_valid_token(plugin_id) {
            return Err(StorageError::InvalidNamespace(plugin_id.to_string()));
        }
        match key {
            Some(key) if !is_valid_token(key) => Err(StorageError::InvalidKey(key.to_string())),
            _ => Ok(()),
        }
    }

    fn key_lock(&self, plugin_id: &str, key: &str) -> KeyLock {
        // A poisoned map only means another writer panicked between two
        // HashMap calls; the map itself is still consistent.
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry((plugin_id.to_string(), key.to_string()))
            .or_default()
            .clone()
    }

    /// Forget the lock of `(plugin_id, key)` once no other writer holds it
    fn release_lock(&self, plugin_id: &str, key: &str, lock: KeyLock) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let entry = (plugin_id.to_string(), key.to_string());
        // One reference in the map, one in `lock`
        let current = locks.get(&entry).is_some_and(|held| Arc::ptr_eq(held, &lock));
        if current && Arc::strong_count(&lock) == 2 {
            locks.remove(&entry);
        }
    }

    pub async fn read(&self, plugin_id: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Self::check(plugin_id, Some(key))?;
        self.backend.get(plugin_id, key).await
    }

    /// Replace the whole document under `key`
    pub async fn write(&self, plugin_id: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        Self::check(plugin_id, Some(key))?;
        let lock = self.key_lock(plugin_id, key);
        let result = {
            let _guard = lock.lock().await;
            self.backend.put(plugin_id, key, value).await
        };
        self.release_lock(plugin_id, key, lock);
        result
    }

    pub async fn remove(&self, plugin_id: &str, key: &str) -> Result<bool, StorageError> {
        Self::check(plugin_id, Some(key))?;
        let lock = self.key_lock(plugin_id, key);
        let result = {
            let _guard = lock.lock().await;
            self.backend.delete(plugin_id, key).await
        };
        self.release_lock(plugin_id, key, lock);
        result
    }

    pub async fn list(&self, plugin_id: &str) -> Result<BTreeSet<String>, StorageError> {
        Self::check(plugin_id, None)?;
        Ok(self.backend.keys(plugin_id).await?.into_iter().collect())
    }

    /// Drop every document of a plugin
    pub async fn purge(&self, plugin_id: &str) -> Result<(), StorageError> {
        Self::check(plugin_id, None)?;
        self.backend.drop_namespace(plugin_id).await?;
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|(owner, _), _| owner != plugin_id);
        Ok(())
    }

    /// Wait until every write that is currently in flight has landed
    pub async fn flush(&self) {
        let pending: Vec<KeyLock> = {
            let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.values().cloned().collect()
        };
        for lock in pending {
            drop(lock.lock().await);
        }
    }

    pub fn scoped(self: &Arc<Self>, plugin_id: impl Into<Arc<str>>) -> ScopedStorage {
        ScopedStorage {
            plugin_id: plugin_id.into(),
            storage: Arc::clone(self),
        }
    }
}

/// Storage handle bound to one plugin
#[derive(Clone)]
pub struct ScopedStorage {
    plugin_id: Arc<str>,
    storage: Arc<PluginStorage>,
}

impl ScopedStorage {
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.storage.read(&self.plugin_id, key).await
    }

    pub async fn write(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.storage.write(&self.plugin_id, key, value).await
    }

    pub async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        self.storage.remove(&self.plugin_id, key).await
    }

    pub async fn list(&self) -> Result<BTreeSet<String>, StorageError> {
        self.storage.list(&self.plugin_id).await
    }

    pub async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.read(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write(key, &bytes).await
    }
}

impl std::fmt::Debug for ScopedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedStorage")
            .field("plugin_id", &self.plugin_id)
            .finish()
    }
}
