use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of events a plugin can bind handlers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Fired for a single plugin right before `Init` when it gets enabled
    PreInit,
    /// Fired for a single plugin when it gets enabled
    Init,
    /// Fired for a single plugin when it gets deleted
    Delete,
    /// A chat message arrived from the marketplace
    NewMessage,
    /// An order arrived from the marketplace
    NewOrder,
}

impl EventKind {
    pub const LIFECYCLE: [EventKind; 3] = [EventKind::PreInit, EventKind::Init, EventKind::Delete];
    pub const DOMAIN: [EventKind; 2] = [EventKind::NewMessage, EventKind::NewOrder];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PreInit => "PRE_INIT",
            EventKind::Init => "INIT",
            EventKind::Delete => "DELETE",
            EventKind::NewMessage => "NEW_MESSAGE",
            EventKind::NewOrder => "NEW_ORDER",
        }
    }

    /// Lifecycle events are delivered only to the plugin changing state
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, EventKind::PreInit | EventKind::Init | EventKind::Delete)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_partition() {
        assert!(EventKind::LIFECYCLE.iter().all(|k| k.is_lifecycle()));
        assert!(EventKind::DOMAIN.iter().all(|k| !k.is_lifecycle()));
    }

    #[test]
    fn test_kind_serializes_as_wire_name() {
        let json = serde_json::to_string(&EventKind::NewOrder).unwrap();
        assert_eq!(json, "\"NEW_ORDER\"");
        assert_eq!(EventKind::PreInit.to_string(), "PRE_INIT");
    }
}
