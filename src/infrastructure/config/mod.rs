//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::application::errors::ConfigError;
use crate::application::events::DispatchOptions;
use crate::infrastructure::plugins::RegistryPolicy;

/// Bot configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub bot: BotConfig,
    pub plugins: PluginConfig,
    pub storage: StorageConfig,
    pub registry: RegistryConfig,
    pub dispatcher: DispatcherConfig,
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BotConfig {
    pub name: String,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PluginConfig {
    pub directory: PathBuf,
    /// Enable loaded plugins at startup unless the operator disabled them
    pub auto_enable: bool,
    pub require_uuid_ids: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StorageConfig {
    pub directory: PathBuf,
    pub in_memory: bool,
    /// Remove a plugin's documents when it is deleted
    pub purge_on_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RegistryConfig {
    /// Drop deleted plugins from listings instead of keeping tombstones
    pub purge_deleted: bool,
    pub fire_delete_on_shutdown: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DispatcherConfig {
    /// 0 disables stall detection
    pub stall_threshold_ms: u64,
    pub handler_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SupervisorConfig {
    pub grace_period_ms: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "bazaar-bot".to_string(),
            prefix: "/".to_string(),
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./plugins"),
            auto_enable: true,
            require_uuid_ids: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./storage"),
            in_memory: false,
            purge_on_delete: false,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            purge_deleted: false,
            fire_delete_on_shutdown: true,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            stall_threshold_ms: 5000,
            handler_timeout_ms: None,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { grace_period_ms: 2000 }
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_env() -> Self {
        // Defaults plus environment overrides
        let mut config = Config::default();

        if let Ok(dir) = std::env::var("BAZAAR_PLUGINS_DIR") {
            config.plugins.directory = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("BAZAAR_STORAGE_DIR") {
            config.storage.directory = PathBuf::from(dir);
        }

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue("bot.prefix must not be empty".to_string()));
        }
        if self.dispatcher.handler_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue(
                "dispatcher.handler-timeout-ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            stall_threshold: match self.dispatcher.stall_threshold_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            handler_timeout: self.dispatcher.handler_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.supervisor.grace_period_ms)
    }

    pub fn registry_policy(&self) -> RegistryPolicy {
        RegistryPolicy {
            purge_deleted: self.registry.purge_deleted,
            purge_storage_on_delete: self.storage.purge_on_delete,
            fire_delete_on_shutdown: self.registry.fire_delete_on_shutdown,
        }
    }

    /// Root of the per-plugin namespaces. Host state lives beside it, never
    /// inside, so no plugin id can reach it.
    pub fn plugin_storage_dir(&self) -> PathBuf {
        self.storage.directory.join("plugins")
    }

    /// Where the operator's disabled plugin list is kept
    pub fn disabled_list_path(&self) -> PathBuf {
        self.storage.directory.join("cache").join("disabled_plugins.txt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            "plugins:\n  auto-enable: false\ndispatcher:\n  stall-threshold-ms: 0\n  handler-timeout-ms: 250\n",
        )
        .unwrap();
        assert!(!config.plugins.auto_enable);
        assert_eq!(config.plugins.directory, PathBuf::from("./plugins"));
        assert_eq!(config.supervisor.grace_period_ms, 2000);

        let options = config.dispatch_options();
        assert_eq!(options.stall_threshold, None);
        assert_eq!(options.handler_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_yaml_round_trip_and_validation() {
        let config = Config::default();
        let parsed: Config = serde_yaml::from_str(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(parsed, config);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "bot:\n  prefix: ''\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::InvalidValue(_))));
        assert!(matches!(Config::load(dir.path().join("missing.yaml")), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_policy_mapping() {
        let mut config = Config::default();
        config.storage.purge_on_delete = true;
        let policy = config.registry_policy();
        assert!(policy.purge_storage_on_delete);
        assert!(policy.fire_delete_on_shutdown);
        assert!(config.disabled_list_path().ends_with("cache/disabled_plugins.txt"));
        assert!(!config.disabled_list_path().starts_with(config.plugin_storage_dir()));
    }
}
