//! Domain entities - Core business objects with no external dependencies

pub mod event;
pub mod interaction;
pub mod market;
pub mod plugin;

pub use event::EventKind;
pub use interaction::{CommandInvocation, Interaction};
pub use market::{ChatMessage, Order};
pub use plugin::{is_canonical_uuid_v4, is_valid_token, PluginInfo, PluginMeta, PluginState};
