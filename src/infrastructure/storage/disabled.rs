//! Persisted list of plugins the operator disabled

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::application::errors::StorageError;

/// Plugin ids that must stay disabled across restarts, one per line on disk
#[derive(Debug, Clone)]
pub struct DisabledList {
    path: PathBuf,
    ids: BTreeSet<String>,
}

impl DisabledList {
    /// Load the list, treating a missing or unreadable file as empty
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ids = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                tracing::error!("Failed to load disabled plugin list {}: {}", path.display(), e);
                BTreeSet::new()
            }
        };
        Self { path, ids }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns whether the list changed
    pub fn insert(&mut self, id: &str) -> bool {
        self.ids.insert(id.to_string())
    }

    /// Returns whether the list changed
    pub fn remove(&mut self, id: &str) -> bool {
        self.ids.remove(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub async fn save(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = self.ids.iter().cloned().collect::<Vec<_>>().join("\n");
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("disabled_plugins.txt");

        let mut list = DisabledList::load(&path).await;
        assert!(list.insert("demo-1"));
        assert!(!list.insert("demo-1"));
        list.insert("demo-2");
        list.save().await.unwrap();

        let mut reloaded = DisabledList::load(&path).await;
        assert!(reloaded.contains("demo-1"));
        assert!(reloaded.contains("demo-2"));

        assert!(reloaded.remove("demo-1"));
        reloaded.save().await.unwrap();
        assert!(!DisabledList::load(&path).await.contains("demo-1"));
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let list = DisabledList::load("/nonexistent/disabled_plugins.txt").await;
        assert_eq!(list.ids().count(), 0);
    }
}
