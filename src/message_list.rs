//! An ordered, mutable, indexable view over the current [`crate::version::Version`].
//!
//! Every mutation produces a new version in the owned [`VersionManager`]; nothing
//! here ever rewrites a stored [`Message`] in place.

use std::sync::Arc;

use serde_json::Map;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::event::{names, EventRouter};
use crate::identifier::Identifier;
use crate::message::{Message, MessageRole};
use crate::store::{AgentHandle, MessageRegistry, MessageStore};
use crate::version::VersionManager;

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    if index >= 0 {
        let i = index as usize;
        (i < len).then_some(i)
    } else {
        let from_end = (-index) as usize;
        (from_end <= len).then(|| len - from_end)
    }
}

pub struct MessageList {
    store: MessageStore,
    registry: Arc<MessageRegistry>,
    owner: Arc<AgentHandle>,
    versions: Mutex<VersionManager>,
    events: Arc<EventRouter>,
}

impl MessageList {
    pub fn new(store: MessageStore, registry: Arc<MessageRegistry>, owner: Arc<AgentHandle>, events: Arc<EventRouter>) -> Self {
        MessageList {
            store,
            registry,
            owner,
            versions: Mutex::new(VersionManager::new()),
            events,
        }
    }

    async fn record_ids(&self, ids: &[Identifier], version_index: usize) {
        for id in ids {
            self.registry.record_ownership(*id, &self.owner, version_index).await;
        }
    }

    pub async fn current_ids(&self) -> Vec<Identifier> {
        self.versions.lock().await.current()
    }

    pub async fn current_index(&self) -> i64 {
        self.versions.lock().await.current_index()
    }

    pub async fn len(&self) -> usize {
        self.current_ids().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Resolves the current version's ids into their stored messages, in order.
    pub async fn messages(&self) -> Result<Vec<Message>> {
        let ids = self.current_ids().await;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.store.get(id).await?);
        }
        Ok(out)
    }

    pub async fn get(&self, index: i64) -> Result<Message> {
        let ids = self.current_ids().await;
        let i = resolve_index(index, ids.len())
            .ok_or_else(|| Error::validation(format!("message index {index} out of range")))?;
        self.store.get(ids[i]).await
    }

    /// Appends one message, creating exactly one new version.
    pub async fn append(&self, message: Message) -> Result<()> {
        self.extend(vec![message]).await
    }

    /// Appends multiple messages as a single batch: exactly one new version is
    /// created, which is what keeps an assistant message's tool calls and their
    /// tool-result messages atomic from the version history's perspective.
    pub async fn extend(&self, messages: Vec<Message>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        self.events.apply(names::MESSAGE_APPEND_BEFORE, Map::new()).await;
        let mut new_ids = Vec::with_capacity(messages.len());
        for msg in messages {
            new_ids.push(msg.id);
            self.store.put(msg).await;
        }
        let mut versions = self.versions.lock().await;
        let mut ids = versions.current();
        ids.extend(new_ids.iter().copied());
        let index = versions.add_version(ids, Map::new());
        drop(versions);
        self.record_ids(&new_ids, index).await;
        self.events.apply(names::MESSAGE_APPEND_AFTER, Map::new()).await;
        Ok(())
    }

    /// Replaces the message at `index` with fresh content under a fresh
    /// identifier; the original stays in the store.
    pub async fn replace(&self, index: i64, message: Message) -> Result<()> {
        self.events.apply(names::MESSAGE_REPLACE_BEFORE, Map::new()).await;
        let mut versions = self.versions.lock().await;
        let mut ids = versions.current();
        let i = resolve_index(index, ids.len())
            .ok_or_else(|| Error::validation(format!("message index {index} out of range")))?;
        let new_id = message.id;
        self.store.put(message).await;
        ids[i] = new_id;
        let version_index = versions.add_version(ids, Map::new());
        drop(versions);
        self.record_ids(&[new_id], version_index).await;
        self.events.apply(names::MESSAGE_REPLACE_AFTER, Map::new()).await;
        Ok(())
    }

    /// Sets or replaces the system message at index 0. Prepends if no message
    /// currently occupies index 0 with role `System`.
    pub async fn set_system(&self, text: impl Into<String>) -> Result<()> {
        let system = Message::system(text);
        let ids = self.current_ids().await;
        let has_system = if let Some(first) = ids.first() {
            matches!(self.store.get(*first).await?.role, MessageRole::System)
        } else {
            false
        };
        if has_system {
            self.replace(0, system).await
        } else {
            let mut versions = self.versions.lock().await;
            let mut new_ids = versions.current();
            self.store.put(system.clone()).await;
            new_ids.insert(0, system.id);
            let version_index = versions.add_version(new_ids, Map::new());
            drop(versions);
            self.record_ids(&[system.id], version_index).await;
            Ok(())
        }
    }

    /// Creates a new empty version; previous versions remain retrievable.
    pub async fn clear(&self) -> Result<()> {
        let mut versions = self.versions.lock().await;
        versions.add_version(Vec::new(), Map::new());
        Ok(())
    }

    /// Replaces the messages at `indices` with `messages`, one new version for
    /// the whole batch. Fails validation if the counts differ; no mutation
    /// occurs on failure.
    pub async fn slice_assign(&self, indices: &[i64], messages: Vec<Message>) -> Result<()> {
        if indices.len() != messages.len() {
            return Err(Error::validation(format!(
                "slice_assign: {} indices but {} messages",
                indices.len(),
                messages.len()
            )));
        }
        let mut versions = self.versions.lock().await;
        let mut ids = versions.current();
        let mut resolved = Vec::with_capacity(indices.len());
        for &idx in indices {
            resolved.push(
                resolve_index(idx, ids.len())
                    .ok_or_else(|| Error::validation(format!("message index {idx} out of range")))?,
            );
        }
        let mut new_ids = Vec::with_capacity(messages.len());
        for (i, msg) in resolved.into_iter().zip(messages.into_iter()) {
            new_ids.push(msg.id);
            self.store.put(msg).await;
            ids[i] = new_ids[new_ids.len() - 1];
        }
        let version_index = versions.add_version(ids, Map::new());
        drop(versions);
        self.record_ids(&new_ids, version_index).await;
        Ok(())
    }

    /// Rebuilds from the current version's ids. Only needed after externally
    /// mutating the underlying `VersionManager` (revert/fork); the mutating
    /// methods above already keep this list in sync.
    pub async fn sync_from_version(&self) -> Result<Vec<Message>> {
        self.messages().await
    }

    /// Returns a read-only projection of the current messages satisfying
    /// `predicate`. Does not create a version: this is not append-position data.
    pub async fn filter<F: Fn(&Message) -> bool>(&self, predicate: F) -> Result<Vec<Message>> {
        Ok(self.messages().await?.into_iter().filter(|m| predicate(m)).collect())
    }

    pub async fn revert_to(&self, index: i64) -> Result<usize> {
        self.versions.lock().await.revert_to(index)
    }

    pub async fn truncate_after(&self, index: i64) -> Result<()> {
        self.versions.lock().await.truncate_after(index)
    }
}
