//! Content-addressed message persistence.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::message::Message;

/// Optional write-through persistence. A failure here is logged and otherwise
/// swallowed — it must never fail the primary in-memory operation.
#[async_trait]
pub trait PersistenceHook: Send + Sync {
    async fn store_async(&self, message: &Message) -> Result<()>;
    async fn load_async(&self, id: Identifier) -> Result<Option<Message>>;
}

/// A key/value store from [`Identifier`] to [`Message`]. Never overwrites an
/// existing identifier with different content; "replacing" a message means
/// minting a fresh identifier for the new content.
#[derive(Clone)]
pub struct MessageStore {
    inner: Arc<RwLock<HashMap<Identifier, Message>>>,
    persistence: Option<Arc<dyn PersistenceHook>>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    pub fn new() -> Self {
        MessageStore {
            inner: Arc::new(RwLock::new(HashMap::new())),
            persistence: None,
        }
    }

    pub fn with_persistence(hook: Arc<dyn PersistenceHook>) -> Self {
        MessageStore {
            inner: Arc::new(RwLock::new(HashMap::new())),
            persistence: Some(hook),
        }
    }

    pub async fn put(&self, message: Message) {
        let id = message.id;
        self.inner.write().await.insert(id, message.clone());
        if let Some(hook) = &self.persistence {
            if let Err(e) = hook.store_async(&message).await {
                log::warn!("persistence write-through failed for {id}: {e}");
            }
        }
    }

    pub async fn get(&self, id: Identifier) -> Result<Message> {
        self.inner
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("message {id}")))
    }

    pub async fn exists(&self, id: Identifier) -> bool {
        self.inner.read().await.contains_key(&id)
    }
}

/// A lightweight identity cell agents hand out for [`MessageRegistry`]'s weak
/// ownership table, so the registry never needs a self-referential `Arc<Agent>`.
#[derive(Clone)]
pub struct AgentHandle {
    pub agent_id: Identifier,
}

/// Tracks which agent owns each message and which version indices reference it.
/// Ownership is tracked weakly: once the owning agent is dropped, the entry is
/// pruned lazily on next access.
#[derive(Default)]
pub struct MessageRegistry {
    entries: RwLock<HashMap<Identifier, (Weak<AgentHandle>, std::collections::HashSet<usize>)>>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        MessageRegistry {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record_ownership(&self, message_id: Identifier, owner: &Arc<AgentHandle>, version_index: usize) {
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(message_id)
            .or_insert_with(|| (Arc::downgrade(owner), std::collections::HashSet::new()));
        entry.0 = Arc::downgrade(owner);
        entry.1.insert(version_index);
    }

    /// Returns the owning agent handle if it is still alive, pruning the entry
    /// if not.
    pub async fn owner(&self, message_id: Identifier) -> Option<Arc<AgentHandle>> {
        let mut entries = self.entries.write().await;
        match entries.get(&message_id) {
            Some((weak, _)) => match weak.upgrade() {
                Some(handle) => Some(handle),
                None => {
                    entries.remove(&message_id);
                    None
                }
            },
            None => None,
        }
    }

    pub async fn versions_containing(&self, message_id: Identifier) -> std::collections::HashSet<usize> {
        self.entries
            .read()
            .await
            .get(&message_id)
            .map(|(_, versions)| versions.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MessageStore::new();
        let msg = Message::system("hi");
        let id = msg.id;
        store.put(msg).await;
        let back = store.get(id).await.unwrap();
        assert_eq!(back.id, id);
    }

    #[tokio::test]
    async fn get_missing_returns_not_found() {
        let store = MessageStore::new();
        let err = store.get(Identifier::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn replacing_content_requires_a_new_identifier() {
        let store = MessageStore::new();
        let original = Message::system("v1");
        let original_id = original.id;
        store.put(original).await;
        let replacement = Message::system("v2");
        assert_ne!(replacement.id, original_id);
        store.put(replacement).await;
        // the original identifier's content is unchanged
        assert_eq!(store.get(original_id).await.unwrap().text(), "v1");
    }

    #[tokio::test]
    async fn registry_prunes_dead_owners_lazily() {
        let registry = MessageRegistry::new();
        let msg_id = Identifier::new();
        {
            let owner = Arc::new(AgentHandle {
                agent_id: Identifier::new(),
            });
            registry.record_ownership(msg_id, &owner, 0).await;
            assert!(registry.owner(msg_id).await.is_some());
        }
        // owner Arc dropped here
        assert!(registry.owner(msg_id).await.is_none());
    }
}
