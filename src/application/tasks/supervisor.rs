//! Background task supervisor
//!
//! Every task a plugin spawns is tracked under the plugin's id with its own
//! [`CancellationToken`]. Closing a plugin cancels its tasks, waits for them
//! up to a grace period, and aborts and detaches whatever is left.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::errors::{PluginError, PluginResult, TaskFailure};
use crate::application::handlers::{panic_message, HandlerResult};

pub type TaskId = Uuid;

struct TaskEntry {
    name: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
struct SupervisorState {
    /// Plugins currently allowed to spawn
    open: HashSet<String>,
    tasks: HashMap<String, HashMap<TaskId, TaskEntry>>,
}

/// Snapshot of a running task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub started_at: DateTime<Utc>,
}

/// Result of cancelling a plugin's tasks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelReport {
    /// Tasks that stopped within the grace period
    pub cancelled: usize,
    /// Tasks that ignored cancellation and were aborted and detached
    pub detached: usize,
}

impl CancelReport {
    fn merge(&mut self, other: CancelReport) {
        self.cancelled += other.cancelled;
        self.detached += other.detached;
    }
}

pub struct TaskSupervisor {
    state: Arc<Mutex<SupervisorState>>,
    grace: Duration,
}

fn lock(state: &Mutex<SupervisorState>) -> MutexGuard<'_, SupervisorState> {
    // Nothing panics while holding this lock; recover instead of cascading.
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl TaskSupervisor {
    pub fn new(grace: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(SupervisorState::default())),
            grace,
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace
    }

    /// Allow `plugin_id` to spawn tasks
    pub fn open(&self, plugin_id: &str) {
        lock(&self.state).open.insert(plugin_id.to_string());
    }

    pub fn is_open(&self, plugin_id: &str) -> bool {
        lock(&self.state).open.contains(plugin_id)
    }

    /// Start `work` concurrently under `plugin_id` and return immediately.
    ///
    /// `work` receives the task's cancellation token and is expected to stop
    /// soon after it fires.
    pub fn spawn<F, Fut>(&self, plugin_id: &str, name: impl Into<String>, work: F) -> PluginResult<TaskId>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let name = name.into();
        if !self.is_open(plugin_id) {
            return Err(PluginError::NotRunning(plugin_id.to_string()));
        }

        // Plugin code may call back into the supervisor, so it runs unlocked
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let fut = work(token.clone());

        let mut state = lock(&self.state);
        if !state.open.contains(plugin_id) {
            // Closed while `work` was running
            token.cancel();
            return Err(PluginError::NotRunning(plugin_id.to_string()));
        }

        let shared = Arc::clone(&self.state);
        let owner = plugin_id.to_string();
        let task_name = name.clone();
        // The entry is inserted before this lock is released, so the task can
        // never try to remove itself before it is tracked.
        let handle = tokio::spawn(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => debug!("Task {} ({}) of plugin {} finished", task_name, id, owner),
                Ok(Err(e)) => {
                    let failure = TaskFailure {
                        plugin_id: owner.clone(),
                        task_id: id,
                        task: task_name.clone(),
                        message: e.to_string(),
                    };
                    error!("{}", failure);
                }
                Err(payload) => {
                    let failure = TaskFailure {
                        plugin_id: owner.clone(),
                        task_id: id,
                        task: task_name.clone(),
                        message: format!("panicked: {}", panic_message(payload)),
                    };
                    error!("{}", failure);
                }
            }

            let mut state = lock(&shared);
            if let Some(tasks) = state.tasks.get_mut(&owner) {
                tasks.remove(&id);
                if tasks.is_empty() {
                    state.tasks.remove(&owner);
                }
            }
        });

        state.tasks.entry(plugin_id.to_string()).or_default().insert(
            id,
            TaskEntry {
                name: name.clone(),
                token,
                handle,
                started_at: Utc::now(),
            },
        );
        debug!("Spawned task {} ({}) for plugin {}", name, id, plugin_id);
        Ok(id)
    }

    /// Number of tasks still running for a plugin
    pub fn active(&self, plugin_id: &str) -> usize {
        lock(&self.state).tasks.get(plugin_id).map(|t| t.len()).unwrap_or(0)
    }

    pub fn tasks(&self, plugin_id: &str) -> Vec<TaskInfo> {
        let state = lock(&self.state);
        let mut tasks: Vec<TaskInfo> = state
            .tasks
            .get(plugin_id)
            .map(|tasks| {
                tasks
                    .iter()
                    .map(|(id, entry)| TaskInfo {
                        id: *id,
                        name: entry.name.clone(),
                        started_at: entry.started_at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        tasks.sort_by_key(|t| t.started_at);
        tasks
    }

    /// Cancel a single task
    pub async fn cancel(&self, plugin_id: &str, task_id: TaskId) -> CancelReport {
        let entry = lock(&self.state)
            .tasks
            .get_mut(plugin_id)
            .and_then(|tasks| tasks.remove(&task_id));
        match entry {
            Some(entry) => self.wind_down(plugin_id, vec![(task_id, entry)]).await,
            None => CancelReport::default(),
        }
    }

    /// Refuse new tasks for `plugin_id` and cancel everything it still runs.
    ///
    /// Returns once every task stopped or the grace period ran out.
    pub async fn close(&self, plugin_id: &str) -> CancelReport {
        let entries: Vec<(TaskId, TaskEntry)> = {
            let mut state = lock(&self.state);
            state.open.remove(plugin_id);
            state
                .tasks
                .remove(plugin_id)
                .map(|tasks| tasks.into_iter().collect())
                .unwrap_or_default()
        };
        let report = self.wind_down(plugin_id, entries).await;
        if report != CancelReport::default() {
            info!(
                "Plugin {}: {} task(s) cancelled, {} detached",
                plugin_id, report.cancelled, report.detached
            );
        }
        report
    }

    /// Close every plugin
    pub async fn shutdown(&self) -> CancelReport {
        let owners: Vec<String> = {
            let state = lock(&self.state);
            state.open.iter().chain(state.tasks.keys()).cloned().collect::<HashSet<_>>().into_iter().collect()
        };
        let mut total = CancelReport::default();
        for owner in owners {
            total.merge(self.close(&owner).await);
        }
        total
    }

    async fn wind_down(&self, plugin_id: &str, entries: Vec<(TaskId, TaskEntry)>) -> CancelReport {
        let mut report = CancelReport::default();
        if entries.is_empty() {
            return report;
        }

        for (_, entry) in &entries {
            entry.token.cancel();
        }

        let deadline = tokio::time::Instant::now() + self.grace;
        for (id, mut entry) in entries {
            match tokio::time::timeout_at(deadline, &mut entry.handle).await {
                Ok(_) => report.cancelled += 1,
                Err(_) => {
                    entry.handle.abort();
                    report.detached += 1;
                    warn!(
                        "Task {} ({}) of plugin {} ignored cancellation for {:?}; detached",
                        entry.name, id, plugin_id, self.grace
                    );
                }
            }
        }
        report
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}
