//! Plugin host - the facade the front-end and the operator talk to
//!
//! Wraps the registry with the startup sequence (load, then auto-enable), the
//! persisted disabled list, and event/command ingress.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::application::commands::{CallbackInfo, CallbackOutcome, CommandInfo, CommandOutcome, CommandParser};
use crate::application::errors::{BotError, PluginResult};
use crate::application::events::DispatchHandle;
use crate::domain::entities::{ChatMessage, CommandInvocation, Interaction, Order, PluginInfo, PluginState};
use crate::domain::traits::Marketplace;
use crate::infrastructure::config::Config;
use crate::infrastructure::plugins::{LoadReport, ModuleSource, PluginLoader, PluginRegistry};
use crate::infrastructure::storage::{DisabledList, FsStore, PluginStorage};

pub struct PluginHost {
    registry: Arc<PluginRegistry>,
    loader: PluginLoader,
    parser: CommandParser,
    disabled: Option<Mutex<DisabledList>>,
    auto_enable: bool,
}

impl PluginHost {
    pub fn new(registry: Arc<PluginRegistry>, loader: PluginLoader) -> Self {
        Self {
            registry,
            loader,
            parser: CommandParser::default(),
            disabled: None,
            auto_enable: true,
        }
    }

    /// Remember operator disables in `list`
    pub fn with_disabled_list(mut self, list: DisabledList) -> Self {
        self.disabled = Some(Mutex::new(list));
        self
    }

    pub fn with_parser(mut self, parser: CommandParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn auto_enable(mut self, enabled: bool) -> Self {
        self.auto_enable = enabled;
        self
    }

    /// Build the whole runtime from configuration
    pub async fn from_config(config: &Config, marketplace: Arc<dyn Marketplace>) -> Result<Self, BotError> {
        let storage = if config.storage.in_memory {
            PluginStorage::in_memory()
        } else {
            let store = FsStore::new(config.plugin_storage_dir());
            store.init().await?;
            PluginStorage::new(Arc::new(store))
        };

        let registry = PluginRegistry::new(marketplace, Arc::new(storage))
            .with_policy(config.registry_policy())
            .with_dispatch(config.dispatch_options())
            .with_grace_period(config.grace_period());
        let loader = PluginLoader::new(&config.plugins.directory).require_uuid_ids(config.plugins.require_uuid_ids);

        let mut host = Self::new(Arc::new(registry), loader)
            .with_parser(CommandParser::new(config.bot.prefix.clone()))
            .auto_enable(config.plugins.auto_enable);
        if !config.storage.in_memory {
            host = host.with_disabled_list(DisabledList::load(config.disabled_list_path()).await);
        }
        Ok(host)
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn parser(&self) -> &CommandParser {
        &self.parser
    }

    /// Load built-in modules and everything in the plugin directory
    pub fn load(&self, builtins: Vec<ModuleSource>) -> LoadReport {
        let report = self.loader.load_all(&self.registry, builtins);
        report.log();
        report
    }

    /// Enable loaded plugins unless the operator disabled them earlier.
    /// Returns how many were enabled.
    pub async fn start(&self) -> usize {
        if !self.auto_enable {
            info!("Auto-enable is off; plugins stay loaded");
            return 0;
        }

        let mut enabled = 0;
        for plugin in self.registry.list() {
            if plugin.state != PluginState::Loaded {
                continue;
            }
            if self.is_marked_disabled(&plugin.meta.id).await {
                info!("Plugin {} stays disabled", plugin.meta.id);
                continue;
            }
            match self.registry.enable(&plugin.meta.id).await {
                Ok(()) => enabled += 1,
                Err(e) => error!("Failed to enable plugin {}: {}", plugin.meta.id, e),
            }
        }
        enabled
    }

    pub async fn enable(&self, id: &str) -> PluginResult<()> {
        self.registry.enable(id).await?;
        self.remember(id, false).await;
        Ok(())
    }

    pub async fn disable(&self, id: &str) -> PluginResult<()> {
        self.registry.disable(id).await?;
        self.remember(id, true).await;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> PluginResult<()> {
        self.registry.delete(id).await?;
        self.remember(id, false).await;
        Ok(())
    }

    pub fn list(&self) -> Vec<PluginInfo> {
        self.registry.list()
    }

    pub fn get(&self, id: &str) -> Option<PluginInfo> {
        self.registry.get(id)
    }

    pub fn new_message(&self, message: ChatMessage) -> DispatchHandle {
        self.registry.dispatcher().dispatch_message(message)
    }

    pub fn new_order(&self, order: Order) -> DispatchHandle {
        self.registry.dispatcher().dispatch_order(order)
    }

    /// Parse `text` with the bot's prefix
    pub fn parse_command(&self, chat_id: &str, text: &str, user_id: Option<&str>) -> Option<CommandInvocation> {
        self.parser.parse(chat_id, text, user_id)
    }

    pub async fn handle_command(&self, invocation: CommandInvocation) -> CommandOutcome {
        self.registry.registrar().invoke_command(invocation).await
    }

    pub async fn handle_callback(&self, interaction: Interaction) -> CallbackOutcome {
        self.registry.registrar().invoke_callback(interaction).await
    }

    /// Merged command table for the front-end
    pub fn commands(&self) -> Vec<CommandInfo> {
        self.registry.registrar().command_table()
    }

    pub fn callbacks(&self) -> Vec<CallbackInfo> {
        self.registry.registrar().callback_table()
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }

    async fn is_marked_disabled(&self, id: &str) -> bool {
        match &self.disabled {
            Some(list) => list.lock().await.contains(id),
            None => false,
        }
    }

    async fn remember(&self, id: &str, disabled: bool) {
        let Some(list) = &self.disabled else {
            return;
        };
        let mut list = list.lock().await;
        let changed = if disabled { list.insert(id) } else { list.remove(id) };
        if changed {
            if let Err(e) = list.save().await {
                warn!("Failed to save disabled plugin list {}: {}", list.path().display(), e);
            }
        }
    }
}
