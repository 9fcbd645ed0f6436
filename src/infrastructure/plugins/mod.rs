//! Plugin system for bazaar-bot
//!
//! Plugins are either compiled into the host or dynamically loaded shared
//! libraries. Each one provides a [`PluginModule`]; library plugins ship a
//! `plugin.yaml` manifest next to the library.

pub mod loader;
pub mod manifest;
pub mod module;
pub mod registry;

pub use loader::{LoadFailure, LoadReport, ModuleSource, PluginLoader};
pub use manifest::PluginManifest;
pub use module::{ModuleMetadata, PluginBinder, PluginBindings, PluginDefinition, PluginEntryFn, PluginModule};
pub use registry::{Plugin, PluginRegistry, RegistryPolicy};
