//! Plugins compiled into bazaar-bot

pub mod order_assistant;

use crate::infrastructure::plugins::ModuleSource;

pub use order_assistant::OrderAssistant;

/// Modules loaded before anything found in the plugin directory
pub fn builtin_modules() -> Vec<ModuleSource> {
    vec![ModuleSource::builtin(OrderAssistant::default())]
}
