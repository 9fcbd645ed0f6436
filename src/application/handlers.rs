//! Handler shapes - one fixed signature per event kind
//!
//! Plugin code is adapted into these shapes when a module is bound, so the
//! dispatcher never has to guess how to call a handler.

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::{JoinError, JoinHandle};

use crate::application::context::PluginContext;
use crate::application::errors::{HandlerFailure, HandlerTarget};
use crate::domain::entities::{ChatMessage, EventKind, Order};

/// Error type plugin handlers may return
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Handler result
pub type HandlerResult = Result<(), HandlerError>;

pub type LifecycleFn = Arc<dyn Fn(PluginContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
pub type MessageFn =
    Arc<dyn Fn(Arc<ChatMessage>, PluginContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
pub type OrderFn =
    Arc<dyn Fn(Arc<Order>, PluginContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Handlers of one plugin, per event kind, in declaration order
pub type HandlerSet = BTreeMap<EventKind, Vec<EventHandler>>;

/// An event with its immutable payload
#[derive(Debug, Clone)]
pub enum Event {
    Lifecycle(EventKind),
    NewMessage(Arc<ChatMessage>),
    NewOrder(Arc<Order>),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Lifecycle(kind) => *kind,
            Event::NewMessage(_) => EventKind::NewMessage,
            Event::NewOrder(_) => EventKind::NewOrder,
        }
    }
}

/// A handler reference bound to an event kind
#[derive(Clone)]
pub enum EventHandler {
    Lifecycle(LifecycleFn),
    Message(MessageFn),
    Order(OrderFn),
}

impl EventHandler {
    pub fn lifecycle<F, Fut>(f: F) -> Self
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        EventHandler::Lifecycle(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    pub fn message<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<ChatMessage>, PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        EventHandler::Message(Arc::new(move |msg, ctx| Box::pin(f(msg, ctx))))
    }

    pub fn order<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<Order>, PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        EventHandler::Order(Arc::new(move |order, ctx| Box::pin(f(order, ctx))))
    }

    /// Whether this handler's shape fits events of `kind`
    pub fn accepts(&self, kind: EventKind) -> bool {
        match self {
            EventHandler::Lifecycle(_) => kind.is_lifecycle(),
            EventHandler::Message(_) => kind == EventKind::NewMessage,
            EventHandler::Order(_) => kind == EventKind::NewOrder,
        }
    }

    /// Build the handler future for `event`. `None` when the shapes differ.
    pub fn invoke(&self, event: &Event, ctx: PluginContext) -> Option<BoxFuture<'static, HandlerResult>> {
        match (self, event) {
            (EventHandler::Lifecycle(f), Event::Lifecycle(_)) => Some(f(ctx)),
            (EventHandler::Message(f), Event::NewMessage(msg)) => Some(f(Arc::clone(msg), ctx)),
            (EventHandler::Order(f), Event::NewOrder(order)) => Some(f(Arc::clone(order), ctx)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = match self {
            EventHandler::Lifecycle(_) => "lifecycle",
            EventHandler::Message(_) => "message",
            EventHandler::Order(_) => "order",
        };
        f.debug_tuple("EventHandler").field(&shape).finish()
    }
}

/// Wrap a handler future with an optional hard timeout
pub(crate) fn with_timeout(
    fut: BoxFuture<'static, HandlerResult>,
    limit: Option<Duration>,
) -> BoxFuture<'static, HandlerResult> {
    match limit {
        None => fut,
        Some(limit) => Box::pin(async move {
            match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(format!("timed out after {:?}", limit).into()),
            }
        }),
    }
}

/// Turn the outcome of a handler task into a failure record
pub(crate) fn settle(
    plugin_id: &str,
    target: HandlerTarget,
    joined: Result<HandlerResult, JoinError>,
) -> Result<(), HandlerFailure> {
    let message = match joined {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => e.to_string(),
        Err(e) if e.is_panic() => format!("panicked: {}", panic_message(e.into_panic())),
        Err(_) => "cancelled".to_string(),
    };
    Err(HandlerFailure {
        plugin_id: plugin_id.to_string(),
        target,
        message,
    })
}

/// Start a handler in its own task. Building the future happens inside the
/// task too, so a handler that panics before its first await is contained.
pub(crate) fn spawn_contained<F>(limit: Option<Duration>, call: F) -> JoinHandle<HandlerResult>
where
    F: FnOnce() -> BoxFuture<'static, HandlerResult> + Send + 'static,
{
    tokio::spawn(async move { with_timeout(call(), limit).await })
}

/// Run a handler in its own task and contain whatever happens there
pub(crate) async fn run_contained<F>(
    plugin_id: &str,
    target: HandlerTarget,
    limit: Option<Duration>,
    call: F,
) -> Result<(), HandlerFailure>
where
    F: FnOnce() -> BoxFuture<'static, HandlerResult> + Send + 'static,
{
    let joined = spawn_contained(limit, call).await;
    settle(plugin_id, target, joined)
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_acceptance() {
        let lifecycle = EventHandler::lifecycle(|_ctx| async { Ok(()) });
        let message = EventHandler::message(|_msg, _ctx| async { Ok(()) });
        let order = EventHandler::order(|_order, _ctx| async { Ok(()) });

        assert!(lifecycle.accepts(EventKind::Init));
        assert!(lifecycle.accepts(EventKind::Delete));
        assert!(!lifecycle.accepts(EventKind::NewMessage));
        assert!(message.accepts(EventKind::NewMessage));
        assert!(!message.accepts(EventKind::NewOrder));
        assert!(order.accepts(EventKind::NewOrder));
        assert!(!order.accepts(EventKind::PreInit));
    }

    #[tokio::test]
    async fn test_contained_panic_becomes_failure() {
        let failure = run_contained("demo", HandlerTarget::Event(EventKind::NewOrder), None, || {
            panic!("kaboom before the first await")
        })
        .await
        .unwrap_err();
        assert_eq!(failure.plugin_id, "demo");
        assert!(failure.message.contains("kaboom"));
    }

    #[tokio::test]
    async fn test_timeout_becomes_failure() {
        let failure = run_contained(
            "demo",
            HandlerTarget::Command("slow".into()),
            Some(Duration::from_millis(20)),
            || {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
            },
        )
        .await
        .unwrap_err();
        assert!(failure.message.starts_with("timed out"));
    }
}
