use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("token pattern is valid")
});

/// Whether `s` can be used as a plugin id or storage key.
///
/// Both end up as path components, so only a conservative character set is
/// accepted and leading dots are rejected.
pub fn is_valid_token(s: &str) -> bool {
    TOKEN_RE.is_match(s)
}

/// Whether `s` is a canonical (lowercase, hyphenated) UUID v4
pub fn is_canonical_uuid_v4(s: &str) -> bool {
    match uuid::Uuid::parse_str(s) {
        Ok(parsed) => parsed.get_version_num() == 4 && parsed.hyphenated().to_string() == s,
        Err(_) => false,
    }
}

/// Display metadata every plugin must declare
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMeta {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
}

/// Lifecycle state of a plugin.
///
/// `Discovered -> Validated -> Loaded -> Enabled <-> Disabled -> Deleted`
///
/// `Discovered` and `Validated` are passed through inside the loader only.
/// A registry record starts at `Loaded`, so listings never show the first two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Discovered,
    Validated,
    Loaded,
    Enabled,
    Disabled,
    Deleted,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::Discovered => "discovered",
            PluginState::Validated => "validated",
            PluginState::Loaded => "loaded",
            PluginState::Enabled => "enabled",
            PluginState::Disabled => "disabled",
            PluginState::Deleted => "deleted",
        }
    }

    pub fn can_enable(&self) -> bool {
        matches!(self, PluginState::Loaded | PluginState::Disabled)
    }

    pub fn can_disable(&self) -> bool {
        matches!(self, PluginState::Enabled)
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, PluginState::Deleted)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Read-only view of a plugin for listings
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    #[serde(flatten)]
    pub meta: PluginMeta,
    pub state: PluginState,
    /// Where the module came from (`builtin:<name>` or a directory)
    pub source: String,
    pub commands: Vec<String>,
    pub background_tasks: usize,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_validation() {
        assert!(is_valid_token("demo-1"));
        assert!(is_valid_token("settings.json"));
        assert!(is_valid_token("019b97fa-497b-4dd2-a041-da54f9378d8e"));
        assert!(!is_valid_token(""));
        assert!(!is_valid_token(".hidden"));
        assert!(!is_valid_token("../escape"));
        assert!(!is_valid_token("a/b"));
        assert!(!is_valid_token("has space"));
        assert!(!is_valid_token(&"x".repeat(129)));
    }

    #[test]
    fn test_uuid_policy() {
        assert!(is_canonical_uuid_v4("5c0b4bd4-8a5e-4f2e-9a57-3f1c2d7b9e10"));
        assert!(!is_canonical_uuid_v4("5C0B4BD4-8A5E-4F2E-9A57-3F1C2D7B9E10"));
        assert!(!is_canonical_uuid_v4("example-plugin-2024-001"));
        // version 1
        assert!(!is_canonical_uuid_v4("c232ab00-9414-11ec-b3c8-9f6bdeced846"));
    }

    #[test]
    fn test_state_transitions_allowed() {
        assert!(PluginState::Loaded.can_enable());
        assert!(PluginState::Disabled.can_enable());
        assert!(!PluginState::Enabled.can_enable());
        assert!(!PluginState::Deleted.can_enable());
        assert!(PluginState::Enabled.can_disable());
        assert!(!PluginState::Loaded.can_disable());
    }
}
