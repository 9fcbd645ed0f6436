//! Application layer errors

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::entities::{EventKind, PluginState};

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Bad or missing plugin metadata and bindings. Fails a single module only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),

    #[error("invalid plugin id `{0}`")]
    InvalidId(String),

    #[error("plugin id `{0}` is already registered")]
    DuplicateId(String),

    #[error("handler bound to {kind} has an incompatible signature")]
    IncompatibleHandler { kind: EventKind },

    #[error("invalid command token `{0}`")]
    InvalidCommand(String),

    #[error("command `{0}` declared twice")]
    DuplicateCommand(String),
}

/// A registration that would shadow an existing owner
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollisionError {
    #[error("plugin id `{0}` is already registered")]
    PluginId(String),

    #[error("command `{token}` is already owned by plugin `{owner}`")]
    Command { token: String, owner: String },
}

/// What a failed handler was bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerTarget {
    Event(EventKind),
    Command(String),
    Callback(String),
}

impl fmt::Display for HandlerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerTarget::Event(kind) => write!(f, "{}", kind),
            HandlerTarget::Command(token) => write!(f, "command `{}`", token),
            HandlerTarget::Callback(token) => write!(f, "callback `{}`", token),
        }
    }
}

/// A plugin handler returned an error, panicked or timed out
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("plugin `{plugin_id}` handler for {target} failed: {message}")]
pub struct HandlerFailure {
    pub plugin_id: String,
    pub target: HandlerTarget,
    pub message: String,
}

/// A supervised background task returned an error or panicked
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("task `{task}` ({task_id}) of plugin `{plugin_id}` failed: {message}")]
pub struct TaskFailure {
    pub plugin_id: String,
    pub task_id: Uuid,
    pub task: String,
    pub message: String,
}

/// Plugin runtime errors
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Collision: {0}")]
    Collision(#[from] CollisionError),

    #[error("Plugin `{id}` cannot {operation} while {state}")]
    InvalidState {
        id: String,
        state: PluginState,
        operation: &'static str,
    },

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin `{0}` is not running")]
    NotRunning(String),

    #[error("Load error: {0}")]
    Load(String),

    #[error(transparent)]
    Handler(#[from] HandlerFailure),

    #[error(transparent)]
    Task(#[from] TaskFailure),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
