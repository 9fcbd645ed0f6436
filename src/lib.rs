//! bazaar-bot - a plugin runtime for marketplace chat bots
//!
//! Plugins observe marketplace events, register bot commands and run
//! background work. The runtime keeps them isolated from each other and from
//! the host.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod plugins;

pub use application::errors::{BotError, PluginError, PluginResult};
pub use application::services::PluginHost;
pub use infrastructure::config::Config;
