//! Plugin registry - Authoritative plugin table and lifecycle state machine
//!
//! Transitions on one plugin id are serialized by a per-id lock; transitions
//! on different ids run independently.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use libloading::Library;
use tracing::{debug, info, warn};

use super::module::PluginBindings;
use crate::application::commands::CommandRegistrar;
use crate::application::context::PluginContext;
use crate::application::errors::{CollisionError, PluginError, PluginResult};
use crate::application::events::{DispatchOptions, EventDispatcher};
use crate::application::tasks::TaskSupervisor;
use crate::domain::entities::{EventKind, PluginInfo, PluginMeta, PluginState};
use crate::domain::traits::Marketplace;
use crate::infrastructure::storage::PluginStorage;

/// Operator-configurable registry behaviour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPolicy {
    /// Drop deleted records instead of keeping tombstones
    pub purge_deleted: bool,
    /// Remove a plugin's storage root when it is deleted
    pub purge_storage_on_delete: bool,
    /// Fire `DELETE` for every remaining plugin at shutdown
    pub fire_delete_on_shutdown: bool,
}

impl Default for RegistryPolicy {
    fn default() -> Self {
        Self {
            purge_deleted: false,
            purge_storage_on_delete: false,
            fire_delete_on_shutdown: true,
        }
    }
}

/// One plugin record
#[derive(Debug, Clone)]
pub struct Plugin {
    meta: PluginMeta,
    state: PluginState,
    source: String,
    bindings: Arc<PluginBindings>,
    context: PluginContext,
    updated_at: DateTime<Utc>,
}

impl Plugin {
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn meta(&self) -> &PluginMeta {
        &self.meta
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn bindings(&self) -> &PluginBindings {
        &self.bindings
    }

    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    fn info(&self, supervisor: &TaskSupervisor) -> PluginInfo {
        PluginInfo {
            meta: self.meta.clone(),
            state: self.state,
            source: self.source.clone(),
            commands: self.bindings.commands.keys().cloned().collect(),
            background_tasks: supervisor.active(&self.meta.id),
            updated_at: self.updated_at,
        }
    }
}

#[derive(Default)]
struct Inner {
    plugins: HashMap<String, Plugin>,
    /// Ids in load order
    order: Vec<String>,
    /// Ids deleted in this process; never reusable
    retired: HashSet<String>,
}

pub struct PluginRegistry {
    inner: RwLock<Inner>,
    transitions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    dispatcher: Arc<EventDispatcher>,
    registrar: Arc<CommandRegistrar>,
    supervisor: Arc<TaskSupervisor>,
    storage: Arc<PluginStorage>,
    marketplace: Arc<dyn Marketplace>,
    policy: RegistryPolicy,
    libraries: Mutex<Vec<Library>>,
}

impl PluginRegistry {
    pub fn new(marketplace: Arc<dyn Marketplace>, storage: Arc<PluginStorage>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            transitions: Mutex::new(HashMap::new()),
            dispatcher: Arc::new(EventDispatcher::default()),
            registrar: Arc::new(CommandRegistrar::new()),
            supervisor: Arc::new(TaskSupervisor::default()),
            storage,
            marketplace,
            policy: RegistryPolicy::default(),
            libraries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_policy(mut self, policy: RegistryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Dispatch options also set the command handler timeout
    pub fn with_dispatch(mut self, options: DispatchOptions) -> Self {
        self.registrar = Arc::new(CommandRegistrar::new().with_handler_timeout(options.handler_timeout));
        self.dispatcher = Arc::new(EventDispatcher::new(options));
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.supervisor = Arc::new(TaskSupervisor::new(grace));
        self
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn registrar(&self) -> &Arc<CommandRegistrar> {
        &self.registrar
    }

    pub fn supervisor(&self) -> &Arc<TaskSupervisor> {
        &self.supervisor
    }

    pub fn storage(&self) -> &Arc<PluginStorage> {
        &self.storage
    }

    pub fn policy(&self) -> &RegistryPolicy {
        &self.policy
    }

    fn read(&self) -> PluginResult<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| PluginError::Internal("Lock poisoned".to_string()))
    }

    fn write(&self) -> PluginResult<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| PluginError::Internal("Lock poisoned".to_string()))
    }

    /// Build the capability handle a plugin's handlers receive
    pub fn context(&self, plugin_id: &str) -> PluginContext {
        PluginContext::new(
            plugin_id,
            Arc::clone(&self.marketplace),
            self.storage.scoped(plugin_id),
            Arc::clone(&self.supervisor),
        )
    }

    /// Add a validated plugin in `Loaded` state
    pub fn insert(&self, meta: PluginMeta, source: impl Into<String>, bindings: PluginBindings) -> PluginResult<()> {
        let mut inner = self.write()?;
        if inner.plugins.contains_key(&meta.id) || inner.retired.contains(&meta.id) {
            return Err(CollisionError::PluginId(meta.id).into());
        }

        let id = meta.id.clone();
        let plugin = Plugin {
            context: self.context(&id),
            meta,
            state: PluginState::Loaded,
            source: source.into(),
            bindings: Arc::new(bindings),
            updated_at: Utc::now(),
        };
        inner.plugins.insert(id.clone(), plugin);
        inner.order.push(id);
        Ok(())
    }

    /// Whether `id` is taken, including by a deleted plugin
    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .read()
            .ok()
            .map(|inner| inner.plugins.contains_key(id) || inner.retired.contains(id))
            .unwrap_or(false)
    }

    pub fn get(&self, id: &str) -> Option<PluginInfo> {
        let inner = self.inner.read().ok()?;
        inner.plugins.get(id).map(|p| p.info(&self.supervisor))
    }

    pub fn state(&self, id: &str) -> Option<PluginState> {
        self.inner.read().ok()?.plugins.get(id).map(|p| p.state)
    }

    /// All plugins in load order
    pub fn list(&self) -> Vec<PluginInfo> {
        self.inner
            .read()
            .ok()
            .map(|inner| {
                inner
                    .order
                    .iter()
                    .filter_map(|id| inner.plugins.get(id))
                    .map(|p| p.info(&self.supervisor))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn list_enabled(&self) -> Vec<PluginInfo> {
        self.list()
            .into_iter()
            .filter(|p| p.state == PluginState::Enabled)
            .collect()
    }

    /// Keep a plugin library mapped for the rest of the process
    pub fn keep_library(&self, library: Library) {
        self.libraries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(library);
    }

    fn record(&self, id: &str) -> PluginResult<Plugin> {
        self.read()?
            .plugins
            .get(id)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(id.to_string()))
    }

    fn set_state(&self, id: &str, state: PluginState) -> PluginResult<()> {
        let mut inner = self.write()?;
        let plugin = inner
            .plugins
            .get_mut(id)
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        debug!("Plugin {}: {} -> {}", id, plugin.state, state);
        plugin.state = state;
        plugin.updated_at = Utc::now();
        Ok(())
    }

    async fn lock_transitions(&self, id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.transitions.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// `Loaded | Disabled -> Enabled`.
    ///
    /// Commands are registered first; a collision leaves the plugin untouched
    /// and fires nothing. `PRE_INIT` then `INIT` fire for this plugin only.
    pub async fn enable(&self, id: &str) -> PluginResult<()> {
        let _guard = self.lock_transitions(id).await;
        let plugin = self.record(id)?;
        if !plugin.state.can_enable() {
            return Err(PluginError::InvalidState {
                id: id.to_string(),
                state: plugin.state,
                operation: "enable",
            });
        }

        let bindings = &plugin.bindings;
        self.registrar
            .register(id, &bindings.commands, &bindings.callbacks, &plugin.context)?;
        self.supervisor.open(id);
        if let Err(e) = self.dispatcher.bind(id, &bindings.handlers, &plugin.context) {
            self.deactivate(id).await;
            return Err(e);
        }
        if let Err(e) = self.set_state(id, PluginState::Enabled) {
            self.deactivate(id).await;
            return Err(e);
        }
        info!("Plugin {} enabled", id);

        for kind in [EventKind::PreInit, EventKind::Init] {
            self.dispatcher
                .fire_lifecycle(id, kind, &bindings.handlers, &plugin.context)
                .await;
        }
        Ok(())
    }

    /// `Enabled -> Disabled`. Returns once the plugin's tasks stopped or were
    /// detached.
    pub async fn disable(&self, id: &str) -> PluginResult<()> {
        let _guard = self.lock_transitions(id).await;
        let plugin = self.record(id)?;
        if !plugin.state.can_disable() {
            return Err(PluginError::InvalidState {
                id: id.to_string(),
                state: plugin.state,
                operation: "disable",
            });
        }

        self.deactivate(id).await;
        self.set_state(id, PluginState::Disabled)?;
        info!("Plugin {} disabled", id);
        Ok(())
    }

    /// Any state except `Deleted` -> `Deleted`. The id can never be loaded
    /// again in this process.
    pub async fn delete(&self, id: &str) -> PluginResult<()> {
        let _guard = self.lock_transitions(id).await;
        let plugin = self.record(id)?;
        if plugin.state.is_deleted() {
            return Err(PluginError::InvalidState {
                id: id.to_string(),
                state: plugin.state,
                operation: "delete",
            });
        }

        if plugin.state == PluginState::Enabled {
            self.deactivate(id).await;
        }
        self.dispatcher
            .fire_lifecycle(id, EventKind::Delete, &plugin.bindings.handlers, &plugin.context)
            .await;

        if self.policy.purge_storage_on_delete {
            if let Err(e) = self.storage.purge(id).await {
                warn!("Failed to purge storage of plugin {}: {}", id, e);
            }
        }

        {
            let mut inner = self.write()?;
            inner.retired.insert(id.to_string());
            if self.policy.purge_deleted {
                inner.plugins.remove(id);
                inner.order.retain(|o| o != id);
            } else if let Some(record) = inner.plugins.get_mut(id) {
                record.state = PluginState::Deleted;
                record.bindings = Arc::new(PluginBindings::default());
                record.updated_at = Utc::now();
            }
        }
        info!("Plugin {} deleted", id);
        Ok(())
    }

    /// Tear everything down: disable enabled plugins, optionally fire
    /// `DELETE`, cancel all tasks and flush storage. Storage is never purged
    /// here.
    pub async fn shutdown(&self) {
        let ids = match self.read() {
            Ok(inner) => inner.order.clone(),
            Err(e) => {
                warn!("Shutdown could not read the registry: {}", e);
                Vec::new()
            }
        };

        for id in &ids {
            let _guard = self.lock_transitions(id).await;
            let Ok(plugin) = self.record(id) else {
                continue;
            };
            if plugin.state == PluginState::Enabled {
                self.deactivate(id).await;
                if let Err(e) = self.set_state(id, PluginState::Disabled) {
                    warn!("Failed to disable plugin {} at shutdown: {}", id, e);
                }
            }
            if self.policy.fire_delete_on_shutdown && !plugin.state.is_deleted() {
                self.dispatcher
                    .fire_lifecycle(id, EventKind::Delete, &plugin.bindings.handlers, &plugin.context)
                    .await;
            }
        }

        let report = self.supervisor.shutdown().await;
        if report.detached > 0 {
            warn!("{} task(s) leaked at shutdown", report.detached);
        }
        self.storage.flush().await;
        info!("Plugin registry shut down ({} plugin(s))", ids.len());
    }

    /// Remove a plugin from every routing table and stop its tasks
    async fn deactivate(&self, id: &str) {
        if let Err(e) = self.dispatcher.unbind(id) {
            warn!("Failed to unbind handlers of plugin {}: {}", id, e);
        }
        if let Err(e) = self.registrar.unregister(id) {
            warn!("Failed to unregister commands of plugin {}: {}", id, e);
        }
        self.supervisor.close(id).await;
    }
}

impl Drop for PluginRegistry {
    fn drop(&mut self) {
        // Detached tasks may still run library code.
        let libraries = std::mem::take(self.libraries.get_mut().unwrap_or_else(|e| e.into_inner()));
        for library in libraries {
            std::mem::forget(library);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::commands::CommandBinding;
    use crate::application::handlers::EventHandler;
    use crate::application::testing::NullMarketplace;
    use std::collections::BTreeMap;

    fn meta(id: &str) -> PluginMeta {
        PluginMeta {
            id: id.to_string(),
            name: format!("{} name", id),
            version: "1.0.0".to_string(),
            description: "test plugin".to_string(),
            author: "tests".to_string(),
        }
    }

    fn registry() -> PluginRegistry {
        PluginRegistry::new(Arc::new(NullMarketplace), Arc::new(PluginStorage::in_memory()))
            .with_grace_period(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_state_machine() {
        let registry = registry();
        registry.insert(meta("p1"), "test", PluginBindings::default()).unwrap();
        assert_eq!(registry.state("p1"), Some(PluginState::Loaded));

        assert!(matches!(
            registry.disable("p1").await,
            Err(PluginError::InvalidState { operation: "disable", .. })
        ));
        registry.enable("p1").await.unwrap();
        assert!(matches!(
            registry.enable("p1").await,
            Err(PluginError::InvalidState { state: PluginState::Enabled, .. })
        ));
        registry.disable("p1").await.unwrap();
        registry.enable("p1").await.unwrap();
        registry.delete("p1").await.unwrap();
        assert_eq!(registry.state("p1"), Some(PluginState::Deleted));
        assert!(registry.enable("p1").await.is_err());
        assert!(registry.delete("p1").await.is_err());
        assert!(matches!(registry.enable("missing").await, Err(PluginError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_deleted_id_is_not_reusable() {
        let registry = registry().with_policy(RegistryPolicy {
            purge_deleted: true,
            ..Default::default()
        });
        registry.insert(meta("p1"), "test", PluginBindings::default()).unwrap();
        registry.delete("p1").await.unwrap();
        assert!(registry.get("p1").is_none());
        assert!(registry.contains("p1"));
        assert!(matches!(
            registry.insert(meta("p1"), "test", PluginBindings::default()),
            Err(PluginError::Collision(CollisionError::PluginId(_)))
        ));
    }

    #[tokio::test]
    async fn test_collision_aborts_enable_without_events() {
        let registry = registry();
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut first = PluginBindings::default();
        first
            .commands
            .insert("report".into(), CommandBinding::new("first", |_inv, _ctx| async { Ok(()) }));
        registry.insert(meta("first"), "test", first).unwrap();

        let mut second = PluginBindings::default();
        second
            .commands
            .insert("report".into(), CommandBinding::new("second", |_inv, _ctx| async { Ok(()) }));
        let counter = Arc::clone(&fired);
        second.handlers = BTreeMap::from([(
            EventKind::PreInit,
            vec![EventHandler::lifecycle(move |_ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                }
            })],
        )]);
        registry.insert(meta("second"), "test", second).unwrap();

        registry.enable("first").await.unwrap();
        assert!(matches!(
            registry.enable("second").await,
            Err(PluginError::Collision(CollisionError::Command { .. }))
        ));
        assert_eq!(registry.state("second"), Some(PluginState::Loaded));
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(registry.registrar().lookup("report").unwrap().plugin_id, "first");
        assert!(!registry.supervisor().is_open("second"));
    }

    #[tokio::test]
    async fn test_list_keeps_load_order() {
        let registry = registry();
        for id in ["b", "a", "c"] {
            registry.insert(meta(id), "test", PluginBindings::default()).unwrap();
        }
        registry.enable("c").await.unwrap();
        let ids: Vec<String> = registry.list().into_iter().map(|p| p.meta.id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert_eq!(registry.list_enabled().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enables_of_one_plugin_are_exclusive() {
        let registry = registry();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut bindings = PluginBindings::default();
        for kind in [EventKind::PreInit, EventKind::Init] {
            let log = Arc::clone(&log);
            bindings.handlers.entry(kind).or_default().push(EventHandler::lifecycle(move |_ctx| {
                let log = Arc::clone(&log);
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    log.lock().unwrap().push(kind);
                    Ok(())
                }
            }));
        }
        registry.insert(meta("p1"), "test", bindings).unwrap();

        let (a, b) = tokio::join!(registry.enable("p1"), registry.enable("p1"));
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(PluginError::InvalidState { state: PluginState::Enabled, operation: "enable", .. })
        )));
        assert_eq!(*log.lock().unwrap(), vec![EventKind::PreInit, EventKind::Init]);
        assert_eq!(registry.state("p1"), Some(PluginState::Enabled));
    }
}
