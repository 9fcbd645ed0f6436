//! Plugin manifest definition (`plugin.yaml`)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::module::ModuleMetadata;
use crate::application::errors::PluginError;

pub const MANIFEST_FILE: &str = "plugin.yaml";

/// Metadata shipped next to a dynamic library plugin
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginManifest {
    pub id: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,

    /// Path to the shared library, relative to the plugin directory
    pub library: Option<PathBuf>,

    /// Ignore this plugin without reporting a failure
    #[serde(default)]
    pub skip: bool,
}

impl PluginManifest {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PluginError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PluginError::Load(format!("Failed to read manifest: {}", e)))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, PluginError> {
        serde_yaml::from_str(content)
            .map_err(|e| PluginError::Load(format!("Failed to parse manifest: {}", e)))
    }

    pub fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            author: self.author.clone(),
        }
    }

    /// Library to load for a plugin living in `dir`.
    ///
    /// Defaults to the platform library name of the directory, e.g.
    /// `plugins/order-log/liborder_log.so`.
    pub fn library_path(&self, dir: &Path) -> PathBuf {
        match &self.library {
            Some(lib) => dir.join(lib),
            None => {
                let stem = dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("plugin")
                    .replace('-', "_");
                dir.join(format!(
                    "{}{}{}",
                    std::env::consts::DLL_PREFIX,
                    stem,
                    std::env::consts::DLL_SUFFIX
                ))
            }
        }
    }
}
