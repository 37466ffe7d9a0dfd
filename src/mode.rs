//! Scoped handler sessions ("modes") with setup/teardown and isolation levels.
//!
//! The source framework models mode entry/exit as a single-use suspend-once
//! coroutine: one block of code running setup, yielding while the mode is
//! active, then resuming to run teardown. Rust has no stable, object-safe
//! generator for that shape, so this is realized as a pair of async-trait
//! methods (`setup`, `teardown`) on one [`ModeHandler`] plus an explicit
//! `enter`/`exit` pair on [`ModeManager`] — the same "one session, no
//! re-entry" contract, without relying on unstable syntax.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::message_list::MessageList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// No isolation: mutations to messages/config persist on exit.
    None,
    /// LLM config and tool set are snapshot on entry and restored on exit;
    /// message history is shared with the parent.
    Config,
    /// Message history is snapshot on entry and restored on exit — except the
    /// final assistant message produced immediately before exit, which is
    /// appended to the parent.
    Thread,
    /// Full isolation: changes during the mode are discarded entirely on exit,
    /// including any final assistant message.
    Fork,
}

/// Scoped session state for one active mode, threaded through setup/teardown.
pub struct ModeSession {
    pub name: String,
    pub isolation: IsolationLevel,
    version_index_before: i64,
}

#[async_trait]
pub trait ModeHandler: Send + Sync {
    async fn setup(&self, session: &mut ModeSession) -> Result<()>;
    async fn teardown(&self, session: &mut ModeSession) -> Result<()>;
}

struct ModeDef {
    isolation: IsolationLevel,
    invokable: bool,
    #[allow(dead_code)]
    metadata: Map<String, Value>,
    handler: Arc<dyn ModeHandler>,
}

/// A pending, not-yet-applied mode transition, applied by the execute loop at
/// the next safe point (between iterations).
#[derive(Debug, Clone)]
pub enum PendingTransition {
    Switch(String),
    Exit,
}

struct ActiveMode {
    name: String,
    isolation: IsolationLevel,
    version_index_before: i64,
}

/// Owns the mode registry, the active mode stack, and per-mode scoped state.
pub struct ModeManager {
    defs: Mutex<HashMap<String, ModeDef>>,
    stack: Mutex<Vec<ActiveMode>>,
    state_frames: Mutex<Vec<HashMap<String, Value>>>,
    pending: Mutex<Option<PendingTransition>>,
}

impl Default for ModeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeManager {
    pub fn new() -> Self {
        ModeManager {
            defs: Mutex::new(HashMap::new()),
            stack: Mutex::new(Vec::new()),
            state_frames: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
        }
    }

    pub async fn register(
        &self,
        name: impl Into<String>,
        isolation: IsolationLevel,
        invokable: bool,
        metadata: Map<String, Value>,
        handler: Arc<dyn ModeHandler>,
    ) {
        self.defs.lock().await.insert(
            name.into(),
            ModeDef {
                isolation,
                invokable,
                metadata,
                handler,
            },
        );
    }

    pub async fn is_invokable(&self, name: &str) -> bool {
        self.defs.lock().await.get(name).map(|d| d.invokable).unwrap_or(false)
    }

    pub async fn active_mode_name(&self) -> Option<String> {
        self.stack.lock().await.last().map(|m| m.name.clone())
    }

    /// Looks up the isolation level a registered mode declared, before it has
    /// been entered. Callers needing to snapshot config/tools ahead of entry
    /// (isolation `Config`) use this to decide whether to do so.
    pub async fn isolation_of(&self, name: &str) -> Option<IsolationLevel> {
        self.defs.lock().await.get(name).map(|d| d.isolation)
    }

    /// The isolation level of the currently active mode, without popping it.
    pub async fn active_isolation(&self) -> Option<IsolationLevel> {
        self.stack.lock().await.last().map(|m| m.isolation)
    }

    /// Pushes `name` onto the stack and runs its setup. Entering the
    /// currently-active mode is a no-op.
    pub async fn enter(&self, name: &str, messages: &MessageList) -> Result<()> {
        if self.active_mode_name().await.as_deref() == Some(name) {
            return Ok(());
        }
        let handler = {
            let defs = self.defs.lock().await;
            let def = defs
                .get(name)
                .ok_or_else(|| Error::validation(format!("mode '{name}' is not registered")))?;
            (def.handler.clone(), def.isolation)
        };
        let (handler, isolation) = handler;
        let version_index_before = messages.current_index().await;

        let mut session = ModeSession {
            name: name.to_string(),
            isolation,
            version_index_before,
        };
        handler.setup(&mut session).await?;

        self.state_frames.lock().await.push(HashMap::new());
        self.stack.lock().await.push(ActiveMode {
            name: name.to_string(),
            isolation,
            version_index_before,
        });
        Ok(())
    }

    /// Pops the top mode and runs its teardown, applying isolation semantics
    /// against `messages`.
    pub async fn exit(&self, messages: &MessageList) -> Result<()> {
        let active = {
            let mut stack = self.stack.lock().await;
            stack.pop()
        };
        let Some(active) = active else {
            return Ok(());
        };
        self.state_frames.lock().await.pop();

        let handler = {
            let defs = self.defs.lock().await;
            defs.get(&active.name)
                .map(|d| d.handler.clone())
                .ok_or_else(|| Error::validation(format!("mode '{}' was deregistered mid-session", active.name)))?
        };
        let mut session = ModeSession {
            name: active.name.clone(),
            isolation: active.isolation,
            version_index_before: active.version_index_before,
        };
        handler.teardown(&mut session).await?;

        match active.isolation {
            // Message history is shared for both: Config isolation only scopes
            // the tool set and LLM config, handled by the caller around
            // enter/exit since ModeManager has no access to either.
            IsolationLevel::None | IsolationLevel::Config => {}
            IsolationLevel::Thread => {
                let final_assistant = messages.messages().await?.into_iter().last().filter(|m| {
                    matches!(m.role, crate::message::MessageRole::Assistant)
                });
                messages.truncate_after(active.version_index_before).await?;
                if let Some(msg) = final_assistant {
                    messages.append(msg).await?;
                }
            }
            IsolationLevel::Fork => {
                messages.truncate_after(active.version_index_before).await?;
            }
        }
        Ok(())
    }

    pub async fn schedule_mode_switch(&self, name: impl Into<String>) {
        *self.pending.lock().await = Some(PendingTransition::Switch(name.into()));
    }

    pub async fn schedule_mode_exit(&self) {
        *self.pending.lock().await = Some(PendingTransition::Exit);
    }

    pub async fn take_pending_transition(&self) -> Option<PendingTransition> {
        self.pending.lock().await.take()
    }

    /// Looks up scoped state by key, searching from the innermost active mode
    /// outward so inner modes shadow outer ones.
    pub async fn state_get(&self, key: &str) -> Option<Value> {
        let frames = self.state_frames.lock().await;
        frames.iter().rev().find_map(|f| f.get(key).cloned())
    }

    pub async fn state_set(&self, key: impl Into<String>, value: Value) {
        let mut frames = self.state_frames.lock().await;
        if let Some(top) = frames.last_mut() {
            top.insert(key.into(), value);
        }
    }
}
