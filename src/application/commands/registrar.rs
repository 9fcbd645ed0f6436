//! Command/callback registrar - one routable table for every enabled plugin

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::binding::{normalize_token, CallbackBinding, CommandBinding};
use crate::application::context::PluginContext;
use crate::application::errors::{CollisionError, HandlerFailure, HandlerTarget, PluginError, PluginResult};
use crate::application::handlers::run_contained;
use crate::domain::entities::{CommandInvocation, Interaction};

struct OwnedCommand {
    plugin_id: String,
    binding: CommandBinding,
    context: PluginContext,
}

struct OwnedCallback {
    plugin_id: String,
    binding: CallbackBinding,
    context: PluginContext,
}

#[derive(Default)]
struct Tables {
    commands: BTreeMap<String, OwnedCommand>,
    /// Registration order is match order
    callbacks: Vec<OwnedCallback>,
}

/// Published command entry for the chat front-end
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandInfo {
    pub token: String,
    pub description: String,
    pub plugin_id: String,
}

/// Published callback entry for the chat front-end
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackInfo {
    pub token: String,
    pub plugin_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// No plugin owns the token
    Unknown,
    /// The owner's filters rejected the invocation
    Filtered { plugin_id: String },
    Handled { plugin_id: String },
    Failed(HandlerFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Unmatched,
    Handled { plugin_id: String, token: String },
    Failed(HandlerFailure),
}

pub struct CommandRegistrar {
    tables: RwLock<Tables>,
    handler_timeout: Option<Duration>,
}

impl CommandRegistrar {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            handler_timeout: None,
        }
    }

    pub fn with_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Add a plugin's commands and callbacks, all or nothing.
    ///
    /// A command token already owned by another plugin rejects the whole
    /// registration; the current owner keeps it.
    pub fn register(
        &self,
        plugin_id: &str,
        commands: &BTreeMap<String, CommandBinding>,
        callbacks: &[CallbackBinding],
        context: &PluginContext,
    ) -> PluginResult<()> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| PluginError::Internal("Lock poisoned".to_string()))?;

        for token in commands.keys() {
            if let Some(owned) = tables.commands.get(token) {
                if owned.plugin_id != plugin_id {
                    warn!(
                        "Plugin {} tried to register /{} owned by {}",
                        plugin_id, token, owned.plugin_id
                    );
                    return Err(CollisionError::Command {
                        token: token.clone(),
                        owner: owned.plugin_id.clone(),
                    }
                    .into());
                }
            }
        }

        for (token, binding) in commands {
            tables.commands.insert(
                token.clone(),
                OwnedCommand {
                    plugin_id: plugin_id.to_string(),
                    binding: binding.clone(),
                    context: context.clone(),
                },
            );
        }
        tables.callbacks.retain(|c| c.plugin_id != plugin_id);
        for binding in callbacks {
            tables.callbacks.push(OwnedCallback {
                plugin_id: plugin_id.to_string(),
                binding: binding.clone(),
                context: context.clone(),
            });
        }

        if !commands.is_empty() || !callbacks.is_empty() {
            info!(
                "Registered {} command(s) and {} callback(s) for plugin {}",
                commands.len(),
                callbacks.len(),
                plugin_id
            );
        }
        Ok(())
    }

    /// Drop every binding of a plugin. Returns how many were removed.
    pub fn unregister(&self, plugin_id: &str) -> PluginResult<usize> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| PluginError::Internal("Lock poisoned".to_string()))?;

        let before = tables.commands.len() + tables.callbacks.len();
        tables.commands.retain(|_, c| c.plugin_id != plugin_id);
        tables.callbacks.retain(|c| c.plugin_id != plugin_id);
        let removed = before - tables.commands.len() - tables.callbacks.len();

        if removed > 0 {
            debug!("Removed {} binding(s) of plugin {}", removed, plugin_id);
        }
        Ok(removed)
    }

    pub fn lookup(&self, token: &str) -> Option<CommandInfo> {
        let tables = self.tables.read().ok()?;
        let token = normalize_token(token);
        tables.commands.get(&token).map(|owned| CommandInfo {
            token,
            description: owned.binding.description.clone(),
            plugin_id: owned.plugin_id.clone(),
        })
    }

    /// Merged command table, sorted by token
    pub fn command_table(&self) -> Vec<CommandInfo> {
        self.tables
            .read()
            .ok()
            .map(|tables| {
                tables
                    .commands
                    .iter()
                    .map(|(token, owned)| CommandInfo {
                        token: token.clone(),
                        description: owned.binding.description.clone(),
                        plugin_id: owned.plugin_id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Callback table in match order
    pub fn callback_table(&self) -> Vec<CallbackInfo> {
        self.tables
            .read()
            .ok()
            .map(|tables| {
                tables
                    .callbacks
                    .iter()
                    .map(|owned| CallbackInfo {
                        token: owned.binding.token.clone(),
                        plugin_id: owned.plugin_id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Route a command to its owner and run the handler
    pub async fn invoke_command(&self, mut invocation: CommandInvocation) -> CommandOutcome {
        invocation.command = normalize_token(&invocation.command);
        let token = invocation.command.clone();

        let routed = self.tables.read().ok().and_then(|tables| {
            tables
                .commands
                .get(&token)
                .map(|owned| (owned.plugin_id.clone(), owned.binding.clone(), owned.context.clone()))
        });
        let Some((plugin_id, binding, context)) = routed else {
            return CommandOutcome::Unknown;
        };

        if !binding.passes(&invocation) {
            debug!("Command /{} filtered out by plugin {}", token, plugin_id);
            return CommandOutcome::Filtered { plugin_id };
        }

        let handler = binding.handler;
        let result = run_contained(
            &plugin_id,
            HandlerTarget::Command(token),
            self.handler_timeout,
            move || handler(invocation, context),
        )
        .await;

        match result {
            Ok(()) => CommandOutcome::Handled { plugin_id },
            Err(failure) => {
                error!("{}", failure);
                CommandOutcome::Failed(failure)
            }
        }
    }

    /// Route an interaction to the first callback whose predicate matches
    pub async fn invoke_callback(&self, interaction: Interaction) -> CallbackOutcome {
        let candidates: Vec<(String, CallbackBinding, PluginContext)> = match self.tables.read() {
            Ok(tables) => tables
                .callbacks
                .iter()
                .map(|c| (c.plugin_id.clone(), c.binding.clone(), c.context.clone()))
                .collect(),
            Err(_) => return CallbackOutcome::Unmatched,
        };

        // Predicates run outside the lock; the first match short-circuits
        let Some((plugin_id, binding, context)) =
            candidates.into_iter().find(|(_, binding, _)| binding.matches(&interaction))
        else {
            return CallbackOutcome::Unmatched;
        };

        let token = binding.token.clone();
        let handler = binding.handler;
        let result = run_contained(
            &plugin_id,
            HandlerTarget::Callback(token.clone()),
            self.handler_timeout,
            move || handler(interaction, context),
        )
        .await;

        match result {
            Ok(()) => CallbackOutcome::Handled { plugin_id, token },
            Err(failure) => {
                error!("{}", failure);
                CallbackOutcome::Failed(failure)
            }
        }
    }
}

impl Default for CommandRegistrar {
    fn default() -> Self {
        Self::new()
    }
}
