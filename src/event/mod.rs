//! Priority-ordered, typed, async-first publish/subscribe event bus.
//!
//! Handlers for a single [`EventRouter::apply`] call are awaited strictly in
//! priority order on the caller's own task; nothing races. [`EventRouter::do_fire`]
//! is the fire-and-forget counterpart and runs each dispatch on its own task.

pub mod names;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

fn panic_message(e: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = e.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = e.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// The mutable record threaded through every handler invocation for one dispatch.
///
/// Handlers observe and may mutate `parameters` in place; downstream handlers in
/// the same dispatch see the mutation. `output` is a separate accumulator used by
/// event families (like rendering) where handlers contribute rather than rewrite.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub event: String,
    pub parameters: Map<String, Value>,
    pub output: Map<String, Value>,
    /// Set if a handler raised during this dispatch. Subsequent handlers still run.
    pub exception: Option<String>,
}

impl EventContext {
    pub fn new(event: impl Into<String>, parameters: Map<String, Value>) -> Self {
        EventContext {
            event: event.into(),
            parameters,
            output: Map::new(),
            exception: None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.parameters.insert(key.into(), value.into());
    }
}

/// An event handler. Implementors may be sync-in-spirit (return immediately)
/// or genuinely async; both are awaited uniformly by the router.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, ctx: &mut EventContext);
}

/// Wraps a plain async closure as an [`EventHandler`], mirroring how components
/// register ad hoc handlers without a named type.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&mut EventContext) + Send + Sync,
{
    async fn handle(&self, ctx: &mut EventContext) {
        (self.0)(ctx)
    }
}

struct Subscription {
    id: u64,
    priority: i32,
    sequence: u64,
    handler: Arc<dyn EventHandler>,
}

/// An opaque token returned by [`EventRouter::on`], consumed by [`EventRouter::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken {
    event_hash: u64,
    id: u64,
}

/// Priority-ordered pub/sub bus owned by a single [`crate::agent::Agent`].
pub struct EventRouter {
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
    next_sequence: AtomicU64,
    background: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_event(event: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    event.hash(&mut h);
    h.finish()
}

impl EventRouter {
    pub fn new() -> Self {
        EventRouter {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            next_sequence: AtomicU64::new(0),
            background: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Subscribes `handler` to `event`. Higher `priority` runs first; ties
    /// break by registration order.
    pub async fn on(
        &self,
        event: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        priority: i32,
    ) -> SubscriptionToken {
        let event = event.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscriptions.write().await;
        let entry = subs.entry(event.clone()).or_default();
        entry.push(Subscription {
            id,
            priority,
            sequence,
            handler,
        });
        entry.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.sequence.cmp(&b.sequence)));
        SubscriptionToken {
            event_hash: hash_event(&event),
            id,
        }
    }

    /// Deregisters a previously-returned subscription. No-op if already removed.
    pub async fn off(&self, event: &str, token: SubscriptionToken) {
        if hash_event(event) != token.event_hash {
            return;
        }
        let mut subs = self.subscriptions.write().await;
        if let Some(list) = subs.get_mut(event) {
            list.retain(|s| s.id != token.id);
        }
    }

    /// Dispatches `event` to every subscriber in priority order, awaiting each
    /// in turn, and returns the final context.
    ///
    /// A handler that panics does not abort the dispatch: the panic is caught,
    /// logged, and recorded on `ctx.exception`, and the remaining handlers
    /// still run.
    pub async fn apply(&self, event: &str, parameters: Map<String, Value>) -> EventContext {
        let mut ctx = EventContext::new(event, parameters);
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subs = self.subscriptions.read().await;
            subs.get(event)
                .map(|list| list.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            let outcome = std::panic::AssertUnwindSafe(handler.handle(&mut ctx))
                .catch_unwind()
                .await;
            if let Err(panic) = outcome {
                let msg = panic_message(&panic);
                log::warn!("handler for event '{event}' panicked: {msg}");
                ctx.exception = Some(msg);
            }
        }
        ctx
    }

    /// Schedules `event` to dispatch on a background task and returns immediately.
    pub async fn do_fire(self: &Arc<Self>, event: impl Into<String>, parameters: Map<String, Value>) {
        let event = event.into();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            this.apply(&event, parameters).await;
        });
        self.background.lock().await.push(handle);
    }

    /// Awaits all outstanding fire-and-forget dispatches, optionally bounded by
    /// `timeout`. Completed handles are pruned either way.
    pub async fn join(&self, timeout: Option<Duration>) -> Result<()> {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.background.lock().await;
            std::mem::take(&mut *guard)
        };
        let all = futures::future::join_all(handles);
        match timeout {
            Some(d) => tokio::time::timeout(d, all)
                .await
                .map(|_| ())
                .map_err(|_| Error::Timeout),
            None => {
                all.await;
                Ok(())
            }
        }
    }
}
