//! Infrastructure layer - External concerns
//! 
//! This layer contains:
//! - Config: Configuration loading
//! - Storage: Plugin document storage
//! - Plugins: Module loading and the plugin registry
//! - Adapters: Platform integrations (console)

pub mod adapters;
pub mod config;
pub mod plugins;
pub mod storage;
