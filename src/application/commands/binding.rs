use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::application::context::PluginContext;
use crate::application::handlers::HandlerResult;
use crate::domain::entities::{CommandInvocation, Interaction};

/// Command handler function type
pub type CommandFn =
    Arc<dyn Fn(CommandInvocation, PluginContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Callback handler function type
pub type CallbackFn =
    Arc<dyn Fn(Interaction, PluginContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

pub type CommandFilter = Arc<dyn Fn(&CommandInvocation) -> bool + Send + Sync>;
pub type CallbackPredicate = Arc<dyn Fn(&Interaction) -> bool + Send + Sync>;

/// Strip the prefix and lowercase, the way users type commands
pub fn normalize_token(token: &str) -> String {
    token.trim().trim_start_matches('/').to_lowercase()
}

/// Command tokens follow chat platform rules: 1-32 chars of `[a-z0-9_-]`
pub fn is_valid_command(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= 32
        && token
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// A plugin-declared command
#[derive(Clone)]
pub struct CommandBinding {
    pub description: String,
    pub handler: CommandFn,
    pub filters: Vec<CommandFilter>,
}

impl CommandBinding {
    pub fn new<F, Fut>(description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CommandInvocation, PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            description: description.into(),
            handler: Arc::new(move |inv, ctx| Box::pin(handler(inv, ctx))),
            filters: Vec::new(),
        }
    }

    /// Add a filter; all filters must pass for the handler to run
    pub fn with_filter<P>(mut self, filter: P) -> Self
    where
        P: Fn(&CommandInvocation) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Evaluate the filters. A panicking filter counts as a rejection.
    pub fn passes(&self, invocation: &CommandInvocation) -> bool {
        self.filters.iter().all(|filter| {
            catch_unwind(AssertUnwindSafe(|| filter(invocation))).unwrap_or_else(|_| {
                tracing::warn!("Filter of command /{} panicked", invocation.command);
                false
            })
        })
    }
}

/// A plugin-declared callback, matched by predicate
#[derive(Clone)]
pub struct CallbackBinding {
    pub token: String,
    pub handler: CallbackFn,
    pub predicate: CallbackPredicate,
}

impl CallbackBinding {
    pub fn new<P, F, Fut>(token: impl Into<String>, predicate: P, handler: F) -> Self
    where
        P: Fn(&Interaction) -> bool + Send + Sync + 'static,
        F: Fn(Interaction, PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            token: token.into(),
            handler: Arc::new(move |inter, ctx| Box::pin(handler(inter, ctx))),
            predicate: Arc::new(predicate),
        }
    }

    /// Callback matching interactions whose data starts with `prefix`
    pub fn with_prefix<F, Fut>(token: impl Into<String>, prefix: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Interaction, PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let prefix = prefix.into();
        Self::new(token, move |i: &Interaction| i.data.starts_with(&prefix), handler)
    }

    /// A panicking predicate counts as no match
    pub fn matches(&self, interaction: &Interaction) -> bool {
        catch_unwind(AssertUnwindSafe(|| (self.predicate)(interaction))).unwrap_or_else(|_| {
            tracing::warn!("Predicate of callback {} panicked", self.token);
            false
        })
    }
}

impl std::fmt::Debug for CommandBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBinding")
            .field("description", &self.description)
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl std::fmt::Debug for CallbackBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackBinding").field("token", &self.token).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_rules() {
        assert_eq!(normalize_token("/Report "), "report");
        assert!(is_valid_command("report"));
        assert!(is_valid_command("auto_reply-2"));
        assert!(!is_valid_command(""));
        assert!(!is_valid_command("Report"));
        assert!(!is_valid_command("two words"));
        assert!(!is_valid_command(&"a".repeat(33)));
    }

    #[test]
    fn test_filters_all_must_pass() {
        let binding = CommandBinding::new("Show report", |_inv, _ctx| async { Ok(()) })
            .with_filter(|inv| inv.user_id.as_deref() == Some("owner"))
            .with_filter(|inv| !inv.args.is_empty());

        let ok = CommandInvocation::new("c1", "report", vec!["today".into()]).with_user("owner");
        let no_args = CommandInvocation::new("c1", "report", vec![]).with_user("owner");
        let stranger = CommandInvocation::new("c1", "report", vec!["today".into()]).with_user("x");

        assert!(binding.passes(&ok));
        assert!(!binding.passes(&no_args));
        assert!(!binding.passes(&stranger));
    }

    #[test]
    fn test_panicking_predicate_does_not_match() {
        let binding = CallbackBinding::new(
            "broken",
            |_i: &Interaction| -> bool { panic!("bad predicate") },
            |_i, _ctx| async { Ok(()) },
        );
        assert!(!binding.matches(&Interaction::new("c1", "anything")));

        let prefixed = CallbackBinding::with_prefix("refund", "refund:", |_i, _ctx| async { Ok(()) });
        assert!(prefixed.matches(&Interaction::new("c1", "refund:42")));
        assert!(!prefixed.matches(&Interaction::new("c1", "other")));
    }
}
