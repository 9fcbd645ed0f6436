//! Capabilities handed to plugin code

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::application::errors::PluginResult;
use crate::application::handlers::HandlerResult;
use crate::application::tasks::{TaskId, TaskSupervisor};
use crate::domain::traits::Marketplace;
use crate::infrastructure::storage::ScopedStorage;

/// Everything a handler may touch: the marketplace client, the plugin's own
/// storage, and its background task slot.
#[derive(Clone)]
pub struct PluginContext {
    plugin_id: Arc<str>,
    marketplace: Arc<dyn Marketplace>,
    storage: ScopedStorage,
    supervisor: Arc<TaskSupervisor>,
}

impl PluginContext {
    pub fn new(
        plugin_id: impl Into<Arc<str>>,
        marketplace: Arc<dyn Marketplace>,
        storage: ScopedStorage,
        supervisor: Arc<TaskSupervisor>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            marketplace,
            storage,
            supervisor,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn marketplace(&self) -> &Arc<dyn Marketplace> {
        &self.marketplace
    }

    pub fn storage(&self) -> &ScopedStorage {
        &self.storage
    }

    /// Spawn a background task owned by this plugin.
    ///
    /// Fails with `NotRunning` once the plugin is disabled or deleted.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, work: F) -> PluginResult<TaskId>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.supervisor.spawn(&self.plugin_id, name, work)
    }

    pub fn active_tasks(&self) -> usize {
        self.supervisor.active(&self.plugin_id)
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_id", &self.plugin_id)
            .finish_non_exhaustive()
    }
}
