//! Background task lifecycle management.
//!
//! Every spawned unit of work is wrapped so its completion (success, failure,
//! or cancellation) is reported back to a single supervisor task rather than
//! having the work itself re-acquire the registry's own lock — avoiding a
//! self-deadlock when `create` is called reentrantly from inside a task it
//! tracks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

struct TrackedTask {
    name: Option<String>,
    component: Option<String>,
    wait_on_ready: bool,
    cancel: CancellationToken,
    on_cleanup: Option<Arc<dyn Fn() + Send + Sync>>,
}

#[derive(Debug, Default, Clone)]
pub struct TaskStats {
    pub pending: usize,
    pub by_component: HashMap<String, usize>,
    pub wait_on_ready: usize,
}

enum Completion {
    Done(TaskId, TaskState),
}

/// Tracks every background task spawned by an agent or its components.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskId, TrackedTask>>,
    next_id: AtomicU64,
    completions_tx: mpsc::UnboundedSender<Completion>,
    parent_cancel: CancellationToken,
}

impl TaskRegistry {
    pub fn new() -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
        let registry = Arc::new(TaskRegistry {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            completions_tx: tx,
            parent_cancel: CancellationToken::new(),
        });
        let weak = Arc::downgrade(&registry);
        tokio::spawn(async move {
            while let Some(Completion::Done(id, state)) = rx.recv().await {
                let Some(registry) = weak.upgrade() else { break };
                let removed = registry.tasks.lock().await.remove(&id);
                if let Some(task) = removed {
                    match state {
                        TaskState::Failed => {
                            log::warn!("background task {:?} ({:?}) failed", id, task.name)
                        }
                        TaskState::Cancelled => {
                            log::debug!("background task {:?} ({:?}) cancelled", id, task.name)
                        }
                        _ => {}
                    }
                    if let Some(cleanup) = task.on_cleanup {
                        cleanup();
                    }
                }
            }
        });
        registry
    }

    /// Spawns `work`, tracking it under an identity and optional owning
    /// component. `work` receives a [`CancellationToken`] it should check at
    /// its own cooperative checkpoints.
    pub async fn create<F, Fut>(
        self: &Arc<Self>,
        work: F,
        name: Option<String>,
        component: Option<String>,
        wait_on_ready: bool,
        on_cleanup: Option<Arc<dyn Fn() + Send + Sync>>,
    ) -> TaskId
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = self.parent_cancel.child_token();
        self.tasks.lock().await.insert(
            id,
            TrackedTask {
                name,
                component,
                wait_on_ready,
                cancel: cancel.clone(),
                on_cleanup,
            },
        );
        let tx = self.completions_tx.clone();
        let fut = work(cancel.clone());
        tokio::spawn(async move {
            let state = if cancel.is_cancelled() {
                TaskState::Cancelled
            } else {
                match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(()) => TaskState::Completed,
                    Err(_) => TaskState::Failed,
                }
            };
            let _ = tx.send(Completion::Done(id, state));
        });
        id
    }

    pub async fn count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn stats(&self) -> TaskStats {
        let tasks = self.tasks.lock().await;
        let mut by_component = HashMap::new();
        let mut wait_on_ready = 0;
        for task in tasks.values() {
            if let Some(c) = &task.component {
                *by_component.entry(c.clone()).or_insert(0) += 1;
            }
            if task.wait_on_ready {
                wait_on_ready += 1;
            }
        }
        TaskStats {
            pending: tasks.len(),
            by_component,
            wait_on_ready,
        }
    }

    /// Blocks (async) until every currently-tracked task has completed, or
    /// `timeout` elapses.
    pub async fn wait_for_all(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|d| tokio::time::Instant::now() + d);
        loop {
            if self.count().await == 0 {
                return Ok(());
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    return Err(Error::Timeout);
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Gate used by agent initialization: blocks until every task registered
    /// with `wait_on_ready = true` has completed.
    pub async fn ready_gate(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|d| tokio::time::Instant::now() + d);
        loop {
            let remaining = self.stats().await.wait_on_ready;
            if remaining == 0 {
                return Ok(());
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    return Err(Error::Timeout);
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Cancels every outstanding task. Best-effort: tasks must observe their
    /// [`CancellationToken`] to actually stop promptly.
    pub async fn cancel_all(&self) {
        self.parent_cancel.cancel();
    }
}
