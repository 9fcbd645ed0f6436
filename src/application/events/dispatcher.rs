//! Event dispatcher - ordered, fault-isolated delivery to plugin handlers
//!
//! Domain events are broadcast to every enabled plugin's handlers in the order
//! the plugins were enabled. Each handler runs in its own tokio task; a
//! handler that fails, panics or times out is logged and skipped. A handler
//! that is still running after the stall threshold is left running on its own
//! and the broadcast moves on, so one slow plugin cannot hold back the rest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::application::context::PluginContext;
use crate::application::errors::{HandlerFailure, HandlerTarget, PluginError, PluginResult};
use crate::application::handlers::{settle, spawn_contained, Event, EventHandler, HandlerSet};
use crate::domain::entities::{ChatMessage, EventKind, Order};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOptions {
    /// How long the broadcast waits on one handler before moving on
    pub stall_threshold: Option<Duration>,
    /// Hard limit after which a handler is cancelled and counted as failed
    pub handler_timeout: Option<Duration>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            stall_threshold: Some(Duration::from_secs(5)),
            handler_timeout: None,
        }
    }
}

#[derive(Clone)]
struct Binding {
    plugin_id: Arc<str>,
    handler: EventHandler,
    context: PluginContext,
    /// Cleared when the plugin leaves `Enabled`, so in-flight broadcasts skip it
    active: Arc<AtomicBool>,
}

#[derive(Default)]
struct BindingTable {
    by_kind: HashMap<EventKind, Vec<Binding>>,
    active: HashMap<String, Arc<AtomicBool>>,
}

/// What happened to one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub kind: EventKind,
    /// Handlers started
    pub invoked: usize,
    /// Handlers that finished successfully before the broadcast moved on
    pub completed: usize,
    pub failures: Vec<HandlerFailure>,
    /// Plugins whose handler was still running at the stall threshold
    pub stalled: Vec<String>,
}

impl DispatchReport {
    fn new(kind: EventKind) -> Self {
        Self {
            kind,
            invoked: 0,
            completed: 0,
            failures: Vec::new(),
            stalled: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.stalled.is_empty()
    }
}

/// A broadcast in progress. Dropping it does not stop the broadcast.
pub struct DispatchHandle {
    kind: EventKind,
    inner: JoinHandle<DispatchReport>,
}

impl DispatchHandle {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the broadcast loop to reach the last handler
    pub async fn wait(self) -> DispatchReport {
        match self.inner.await {
            Ok(report) => report,
            Err(e) => {
                error!("Dispatch of {} aborted: {}", self.kind, e);
                DispatchReport::new(self.kind)
            }
        }
    }
}

pub struct EventDispatcher {
    table: RwLock<BindingTable>,
    options: DispatchOptions,
}

impl EventDispatcher {
    pub fn new(options: DispatchOptions) -> Self {
        Self {
            table: RwLock::new(BindingTable::default()),
            options,
        }
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Append a plugin's domain-event handlers to the broadcast table
    pub fn bind(&self, plugin_id: &str, handlers: &HandlerSet, context: &PluginContext) -> PluginResult<()> {
        let mut table = self
            .table
            .write()
            .map_err(|_| PluginError::Internal("Lock poisoned".to_string()))?;
        remove_plugin(&mut table, plugin_id);

        let active = Arc::new(AtomicBool::new(true));
        let owner: Arc<str> = Arc::from(plugin_id);
        for kind in EventKind::DOMAIN {
            let Some(list) = handlers.get(&kind) else {
                continue;
            };
            let slot = table.by_kind.entry(kind).or_default();
            for handler in list {
                slot.push(Binding {
                    plugin_id: Arc::clone(&owner),
                    handler: handler.clone(),
                    context: context.clone(),
                    active: Arc::clone(&active),
                });
            }
        }
        table.active.insert(plugin_id.to_string(), active);
        Ok(())
    }

    /// Remove a plugin from the broadcast table. Returns how many handlers
    /// were removed.
    pub fn unbind(&self, plugin_id: &str) -> PluginResult<usize> {
        let mut table = self
            .table
            .write()
            .map_err(|_| PluginError::Internal("Lock poisoned".to_string()))?;
        Ok(remove_plugin(&mut table, plugin_id))
    }

    /// Owners of the handlers bound to `kind`, in delivery order
    pub fn bound(&self, kind: EventKind) -> Vec<String> {
        self.table
            .read()
            .ok()
            .and_then(|t| {
                t.by_kind
                    .get(&kind)
                    .map(|list| list.iter().map(|b| b.plugin_id.to_string()).collect())
            })
            .unwrap_or_default()
    }

    pub fn dispatch_message(&self, message: ChatMessage) -> DispatchHandle {
        debug!("[{}] NEW_MESSAGE from {}: {}", message.chat_id, message.author, message.preview(50));
        self.broadcast(Event::NewMessage(Arc::new(message)))
    }

    pub fn dispatch_order(&self, order: Order) -> DispatchHandle {
        debug!("NEW_ORDER {} from {} ({})", order.id, order.buyer, order.amount);
        self.broadcast(Event::NewOrder(Arc::new(order)))
    }

    /// Deliver a domain event to every bound handler without waiting for them.
    ///
    /// Only plugins bound at the time of the call take part.
    pub fn broadcast(&self, event: Event) -> DispatchHandle {
        let kind = event.kind();
        let snapshot = if kind.is_lifecycle() {
            warn!("{} is a lifecycle event and cannot be broadcast", kind);
            Vec::new()
        } else {
            self.table
                .read()
                .ok()
                .and_then(|t| t.by_kind.get(&kind).cloned())
                .unwrap_or_default()
        };

        let options = self.options.clone();
        DispatchHandle {
            kind,
            inner: tokio::spawn(run_sequence(event, snapshot, options)),
        }
    }

    /// Fire a lifecycle event for one plugin and wait for its handlers
    pub async fn fire_lifecycle(
        &self,
        plugin_id: &str,
        kind: EventKind,
        handlers: &HandlerSet,
        context: &PluginContext,
    ) -> DispatchReport {
        if !kind.is_lifecycle() {
            warn!("{} is not a lifecycle event", kind);
            return DispatchReport::new(kind);
        }

        let owner: Arc<str> = Arc::from(plugin_id);
        let active = Arc::new(AtomicBool::new(true));
        let bindings = handlers
            .get(&kind)
            .map(|list| {
                list.iter()
                    .map(|handler| Binding {
                        plugin_id: Arc::clone(&owner),
                        handler: handler.clone(),
                        context: context.clone(),
                        active: Arc::clone(&active),
                    })
                    .collect()
            })
            .unwrap_or_default();

        // Lifecycle handlers are never detached; only the hard timeout applies
        let options = DispatchOptions {
            stall_threshold: None,
            ..self.options.clone()
        };
        run_sequence(Event::Lifecycle(kind), bindings, options).await
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DispatchOptions::default())
    }
}

fn remove_plugin(table: &mut BindingTable, plugin_id: &str) -> usize {
    if let Some(flag) = table.active.remove(plugin_id) {
        flag.store(false, Ordering::SeqCst);
    }
    let mut removed = 0;
    for list in table.by_kind.values_mut() {
        let before = list.len();
        list.retain(|b| &*b.plugin_id != plugin_id);
        removed += before - list.len();
    }
    removed
}

async fn run_sequence(event: Event, bindings: Vec<Binding>, options: DispatchOptions) -> DispatchReport {
    let kind = event.kind();
    let mut report = DispatchReport::new(kind);

    for binding in bindings {
        if !binding.active.load(Ordering::SeqCst) {
            debug!("Skipping {} handler of inactive plugin {}", kind, binding.plugin_id);
            continue;
        }

        let Binding { plugin_id, handler, context, .. } = binding;
        let payload = event.clone();
        let mut handle = spawn_contained(options.handler_timeout, move || {
            handler.invoke(&payload, context).unwrap_or_else(|| {
                Box::pin(async move { Err(format!("handler cannot receive {}", kind).into()) })
            })
        });
        report.invoked += 1;

        let joined = match options.stall_threshold {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        "Plugin {} {} handler still running after {:?}; continuing without it",
                        plugin_id, kind, limit
                    );
                    report.stalled.push(plugin_id.to_string());
                    let owner = Arc::clone(&plugin_id);
                    tokio::spawn(async move {
                        if let Err(failure) = settle(&owner, HandlerTarget::Event(kind), handle.await) {
                            error!("{}", failure);
                        }
                    });
                    continue;
                }
            },
            None => handle.await,
        };

        match settle(&plugin_id, HandlerTarget::Event(kind), joined) {
            Ok(()) => report.completed += 1,
            Err(failure) => {
                error!("{}", failure);
                report.failures.push(failure);
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::test_context;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn order_handlers(log: &Log, tag: &'static str, fail: bool) -> HandlerSet {
        let log = Arc::clone(log);
        let handler = EventHandler::order(move |order, _ctx| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!("{}:{}", tag, order.id));
                if fail {
                    return Err("handler exploded".into());
                }
                Ok(())
            }
        });
        BTreeMap::from([(EventKind::NewOrder, vec![handler])])
    }

    #[tokio::test]
    async fn test_broadcast_in_enable_order_despite_failure() {
        let dispatcher = EventDispatcher::default();
        let log: Log = Arc::default();

        dispatcher.bind("p1", &order_handlers(&log, "p1", false), &test_context("p1")).unwrap();
        dispatcher.bind("p2", &order_handlers(&log, "p2", true), &test_context("p2")).unwrap();
        dispatcher.bind("p3", &order_handlers(&log, "p3", false), &test_context("p3")).unwrap();

        let report = dispatcher.dispatch_order(Order::new("o1", "buyer", 10.0)).wait().await;

        assert_eq!(*log.lock().unwrap(), vec!["p1:o1", "p2:o1", "p3:o1"]);
        assert_eq!(report.invoked, 3);
        assert_eq!(report.completed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].plugin_id, "p2");
        assert_eq!(report.failures[0].target, HandlerTarget::Event(EventKind::NewOrder));
    }

    #[tokio::test]
    async fn test_unbound_plugin_receives_nothing() {
        let dispatcher = EventDispatcher::default();
        let log: Log = Arc::default();
        dispatcher.bind("p1", &order_handlers(&log, "p1", false), &test_context("p1")).unwrap();
        assert_eq!(dispatcher.unbind("p1").unwrap(), 1);

        let report = dispatcher.dispatch_order(Order::new("o1", "buyer", 1.0)).wait().await;
        assert_eq!(report.invoked, 0);
        assert!(log.lock().unwrap().is_empty());
        assert!(dispatcher.bound(EventKind::NewOrder).is_empty());
    }

    #[tokio::test]
    async fn test_stalled_handler_does_not_block_others() {
        let dispatcher = EventDispatcher::new(DispatchOptions {
            stall_threshold: Some(Duration::from_millis(50)),
            handler_timeout: None,
        });
        let log: Log = Arc::default();

        let slow = EventHandler::message(|_msg, _ctx| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        dispatcher
            .bind("slow", &BTreeMap::from([(EventKind::NewMessage, vec![slow])]), &test_context("slow"))
            .unwrap();

        let fast_log = Arc::clone(&log);
        let fast = EventHandler::message(move |msg, _ctx| {
            let log = Arc::clone(&fast_log);
            async move {
                log.lock().unwrap().push(msg.content.clone());
                Ok(())
            }
        });
        dispatcher
            .bind("fast", &BTreeMap::from([(EventKind::NewMessage, vec![fast])]), &test_context("fast"))
            .unwrap();

        let report = dispatcher
            .dispatch_message(ChatMessage::new("c1", "u1", "hello", "m1"))
            .wait()
            .await;
        assert_eq!(report.stalled, vec!["slow"]);
        assert_eq!(report.completed, 1);
        assert_eq!(*log.lock().unwrap(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_lifecycle_is_not_broadcast() {
        let dispatcher = EventDispatcher::default();
        let report = dispatcher.broadcast(Event::Lifecycle(EventKind::Init)).wait().await;
        assert_eq!(report.invoked, 0);
    }

    #[tokio::test]
    async fn test_fire_lifecycle_runs_only_given_kind() {
        let dispatcher = EventDispatcher::default();
        let log: Log = Arc::default();
        let mut handlers: HandlerSet = BTreeMap::new();
        for kind in [EventKind::PreInit, EventKind::Init] {
            let log = Arc::clone(&log);
            handlers.entry(kind).or_default().push(EventHandler::lifecycle(move |ctx| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(format!("{}:{}", kind, ctx.plugin_id()));
                    Ok(())
                }
            }));
        }

        let ctx = test_context("p1");
        dispatcher.fire_lifecycle("p1", EventKind::PreInit, &handlers, &ctx).await;
        let report = dispatcher.fire_lifecycle("p1", EventKind::Init, &handlers, &ctx).await;
        assert_eq!(report.completed, 1);
        assert_eq!(*log.lock().unwrap(), vec!["PRE_INIT:p1", "INIT:p1"]);
    }

    #[tokio::test]
    async fn test_slow_lifecycle_handler_is_awaited() {
        let dispatcher = EventDispatcher::new(DispatchOptions {
            stall_threshold: Some(Duration::from_millis(50)),
            handler_timeout: None,
        });
        let log: Log = Arc::default();
        let mut handlers: HandlerSet = BTreeMap::new();

        let pre_log = Arc::clone(&log);
        handlers.entry(EventKind::PreInit).or_default().push(EventHandler::lifecycle(move |_ctx| {
            let log = Arc::clone(&pre_log);
            async move {
                log.lock().unwrap().push("pre_init start".to_string());
                tokio::time::sleep(Duration::from_millis(200)).await;
                log.lock().unwrap().push("pre_init end".to_string());
                Ok(())
            }
        }));
        let init_log = Arc::clone(&log);
        handlers.entry(EventKind::Init).or_default().push(EventHandler::lifecycle(move |_ctx| {
            let log = Arc::clone(&init_log);
            async move {
                log.lock().unwrap().push("init".to_string());
                Ok(())
            }
        }));

        let ctx = test_context("p1");
        let report = dispatcher.fire_lifecycle("p1", EventKind::PreInit, &handlers, &ctx).await;
        assert!(report.stalled.is_empty());
        assert_eq!(report.completed, 1);
        dispatcher.fire_lifecycle("p1", EventKind::Init, &handlers, &ctx).await;
        assert_eq!(*log.lock().unwrap(), vec!["pre_init start", "pre_init end", "init"]);
    }
}
