//! Plugin modules - the code side of a plugin
//!
//! A module declares its metadata and binds its handlers, commands and
//! callbacks through a [`PluginBinder`]. The binder adapts plugin closures to
//! the fixed handler shapes and rejects anything that does not fit, so a bad
//! module fails validation instead of failing later at dispatch time.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::application::commands::binding::{is_valid_command, normalize_token};
use crate::application::commands::{CallbackBinding, CommandBinding};
use crate::application::context::PluginContext;
use crate::application::errors::ValidationError;
use crate::application::handlers::{EventHandler, HandlerError, HandlerResult, HandlerSet};
use crate::domain::entities::{ChatMessage, EventKind, Order};

/// Metadata as declared by a module. Every field is optional here so the
/// loader can name the missing one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModuleMetadata {
    pub id: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
}

impl ModuleMetadata {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            version: Some(version.into()),
            description: Some(description.into()),
            author: Some(author.into()),
        }
    }

    /// Fill fields missing here from `fallback`
    pub fn or(self, fallback: ModuleMetadata) -> Self {
        Self {
            id: self.id.or(fallback.id),
            name: self.name.or(fallback.name),
            version: self.version.or(fallback.version),
            description: self.description.or(fallback.description),
            author: self.author.or(fallback.author),
        }
    }
}

/// Extension code the loader can turn into a plugin record
pub trait PluginModule: Send + Sync {
    fn metadata(&self) -> ModuleMetadata;

    /// Declare handlers, commands and callbacks
    fn bind(&self, binder: &mut PluginBinder) -> Result<(), HandlerError>;
}

/// Everything a module bound, in fixed shapes
#[derive(Debug, Clone, Default)]
pub struct PluginBindings {
    pub handlers: HandlerSet,
    pub commands: BTreeMap<String, CommandBinding>,
    pub callbacks: Vec<CallbackBinding>,
}

impl PluginBindings {
    pub fn handler_count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty() && self.commands.is_empty() && self.callbacks.is_empty()
    }
}

/// Collects a module's bindings and the first problem with them
#[derive(Default)]
pub struct PluginBinder {
    bindings: PluginBindings,
    errors: Vec<ValidationError>,
}

impl PluginBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `kind`. A handler whose shape does not fit the event
    /// is recorded as a validation error.
    pub fn on(&mut self, kind: EventKind, handler: EventHandler) -> &mut Self {
        if handler.accepts(kind) {
            self.bindings.handlers.entry(kind).or_default().push(handler);
        } else {
            self.errors.push(ValidationError::IncompatibleHandler { kind });
        }
        self
    }

    pub fn on_pre_init<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.on(EventKind::PreInit, EventHandler::lifecycle(f))
    }

    pub fn on_init<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.on(EventKind::Init, EventHandler::lifecycle(f))
    }

    pub fn on_delete<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.on(EventKind::Delete, EventHandler::lifecycle(f))
    }

    pub fn on_new_message<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Arc<ChatMessage>, PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.on(EventKind::NewMessage, EventHandler::message(f))
    }

    pub fn on_new_order<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Arc<Order>, PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.on(EventKind::NewOrder, EventHandler::order(f))
    }

    /// Declare a command. The token is normalized (`/Report` -> `report`).
    pub fn command(&mut self, token: &str, binding: CommandBinding) -> &mut Self {
        let token = normalize_token(token);
        if !is_valid_command(&token) {
            self.errors.push(ValidationError::InvalidCommand(token));
        } else if self.bindings.commands.contains_key(&token) {
            self.errors.push(ValidationError::DuplicateCommand(token));
        } else {
            self.bindings.commands.insert(token, binding);
        }
        self
    }

    pub fn callback(&mut self, binding: CallbackBinding) -> &mut Self {
        self.bindings.callbacks.push(binding);
        self
    }

    pub fn finish(self) -> Result<PluginBindings, ValidationError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(self.bindings),
        }
    }
}

type SetupFn = Arc<dyn Fn(&mut PluginBinder) -> Result<(), HandlerError> + Send + Sync>;

/// A module assembled in code, for plugins compiled into the host
#[derive(Clone)]
pub struct PluginDefinition {
    metadata: ModuleMetadata,
    setup: Option<SetupFn>,
}

impl PluginDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            metadata: ModuleMetadata {
                id: Some(id.into()),
                ..Default::default()
            },
            setup: None,
        }
    }

    pub fn from_metadata(metadata: ModuleMetadata) -> Self {
        Self { metadata, setup: None }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = Some(name.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.metadata.version = Some(version.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.metadata.author = Some(author.into());
        self
    }

    /// Code run when the module is bound
    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut PluginBinder) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(f));
        self
    }
}

impl PluginModule for PluginDefinition {
    fn metadata(&self) -> ModuleMetadata {
        self.metadata.clone()
    }

    fn bind(&self, binder: &mut PluginBinder) -> Result<(), HandlerError> {
        match &self.setup {
            Some(setup) => setup(binder),
            None => Ok(()),
        }
    }
}

/// Entry point a dynamic library exports as `bazaar_plugin_entry`
pub type PluginEntryFn = unsafe extern "C" fn() -> *mut Box<dyn PluginModule>;

/// Export a [`PluginModule`] from a `cdylib` crate.
///
/// ```ignore
/// bazaar_bot::export_plugin!(MyPlugin::default());
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($constructor:expr) => {
        #[no_mangle]
        pub extern "C" fn bazaar_plugin_entry() -> *mut Box<dyn $crate::infrastructure::plugins::PluginModule> {
            let module: Box<dyn $crate::infrastructure::plugins::PluginModule> = Box::new($constructor);
            Box::into_raw(Box::new(module))
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binder_collects_in_declaration_order() {
        let mut binder = PluginBinder::new();
        binder
            .on_pre_init(|_ctx| async { Ok(()) })
            .on_init(|_ctx| async { Ok(()) })
            .on_new_order(|_order, _ctx| async { Ok(()) })
            .on_new_order(|_order, _ctx| async { Ok(()) })
            .command("/Report", CommandBinding::new("Sales report", |_inv, _ctx| async { Ok(()) }));

        let bindings = binder.finish().unwrap();
        assert_eq!(bindings.handler_count(), 4);
        assert_eq!(bindings.handlers[&EventKind::NewOrder].len(), 2);
        assert!(bindings.commands.contains_key("report"));
    }

    #[test]
    fn test_incompatible_shape_is_rejected() {
        let mut binder = PluginBinder::new();
        binder.on(EventKind::NewOrder, EventHandler::message(|_msg, _ctx| async { Ok(()) }));
        assert_eq!(
            binder.finish().unwrap_err(),
            ValidationError::IncompatibleHandler { kind: EventKind::NewOrder }
        );
    }

    #[test]
    fn test_bad_and_duplicate_commands() {
        let mut binder = PluginBinder::new();
        binder.command("has space", CommandBinding::new("x", |_inv, _ctx| async { Ok(()) }));
        assert!(matches!(binder.finish(), Err(ValidationError::InvalidCommand(_))));

        let mut binder = PluginBinder::new();
        binder
            .command("stats", CommandBinding::new("a", |_inv, _ctx| async { Ok(()) }))
            .command("/STATS", CommandBinding::new("b", |_inv, _ctx| async { Ok(()) }));
        assert_eq!(
            binder.finish().unwrap_err(),
            ValidationError::DuplicateCommand("stats".into())
        );
    }

    #[test]
    fn test_metadata_fallback() {
        let declared = ModuleMetadata {
            id: Some("shop".into()),
            ..Default::default()
        };
        let merged = declared.or(ModuleMetadata::new("other", "Shop", "1.0", "d", "a"));
        assert_eq!(merged.id.as_deref(), Some("shop"));
        assert_eq!(merged.name.as_deref(), Some("Shop"));
    }
}
