//! In-process conversation store backed by a sharded concurrent map.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::conversations::core::errors::{StoreError, StoreResult};
use crate::conversations::core::ids::ConversationId;
use crate::conversations::core::types::{
    Conversation, ConversationSummary, MessageTurn, next_update_time, now_millis,
};
use crate::conversations::storage::store::{ConversationStore, StoreFuture};

/// Non-durable [`ConversationStore`].
///
/// A conversation lives in one map shard; appends hold that shard's write lock
/// for the push and the timestamp bump, so they serialize per conversation.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: DashMap<ConversationId, Conversation>,
    closed: AtomicBool,
}

impl InMemoryConversationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::BackingStoreUnavailable(
                "store is closed".to_string(),
            ));
        }
        Ok(())
    }

    fn with_conversation<T>(
        &self,
        id: ConversationId,
        f: impl FnOnce(&Conversation) -> T,
    ) -> StoreResult<T> {
        self.ensure_open()?;
        let entry = self
            .conversations
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok(f(entry.value()))
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn create_conversation(
        &self,
        id: ConversationId,
    ) -> StoreFuture<'_, StoreResult<ConversationId>> {
        Box::pin(async move {
            self.ensure_open()?;
            match self.conversations.entry(id.clone()) {
                Entry::Occupied(_) => Err(StoreError::Conflict(id)),
                Entry::Vacant(slot) => {
                    slot.insert(Conversation::empty(id.clone(), now_millis()));
                    info!(conversation_id = %id, "Created conversation");
                    Ok(id)
                }
            }
        })
    }

    fn get_conversation(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<Conversation>> {
        Box::pin(async move { self.with_conversation(id, Clone::clone) })
    }

    fn add_message(
        &self,
        id: ConversationId,
        human: String,
        response: String,
    ) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.ensure_open()?;
            let mut entry = self
                .conversations
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            let conversation = entry.value_mut();
            conversation.updated_at = next_update_time(conversation.updated_at, now_millis());
            conversation.messages.push(MessageTurn { human, response });
            debug!(
                conversation_id = %id,
                position = conversation.messages.len() - 1,
                "Appended turn"
            );
            Ok(())
        })
    }

    fn get_messages(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<Vec<MessageTurn>>> {
        Box::pin(async move { self.with_conversation(id, |c| c.messages.clone()) })
    }

    fn get_recent_messages(
        &self,
        id: ConversationId,
        limit: usize,
    ) -> StoreFuture<'_, StoreResult<Vec<MessageTurn>>> {
        Box::pin(async move { self.with_conversation(id, |c| c.last_turns(limit).to_vec()) })
    }

    fn count_turns(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<u64>> {
        Box::pin(async move { self.with_conversation(id, |c| c.messages.len() as u64) })
    }

    fn delete_conversation(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.ensure_open()?;
            match self.conversations.remove(&id) {
                Some((_, removed)) => {
                    info!(
                        conversation_id = %id,
                        turns = removed.messages.len(),
                        "Deleted conversation"
                    );
                    Ok(())
                }
                None => Err(StoreError::NotFound(id)),
            }
        })
    }

    fn exists(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            self.ensure_open()?;
            Ok(self.conversations.contains_key(&id))
        })
    }

    fn list_conversations(
        &self,
        limit: usize,
    ) -> StoreFuture<'_, StoreResult<Vec<ConversationSummary>>> {
        Box::pin(async move {
            self.ensure_open()?;
            let mut summaries: Vec<ConversationSummary> = self
                .conversations
                .iter()
                .map(|entry| entry.value().summary())
                .collect();
            summaries.sort_by(|a, b| {
                b.updated_at
                    .cmp(&a.updated_at)
                    .then_with(|| a.conversation_id.cmp(&b.conversation_id))
            });
            summaries.truncate(limit);
            Ok(summaries)
        })
    }

    fn close(&self) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::AcqRel) {
                info!(
                    conversations = self.conversations.len(),
                    "Closed in-memory conversation store"
                );
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ConversationId {
        ConversationId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate() {
        let store = InMemoryConversationStore::new();
        store.create_conversation(id("c1")).await.unwrap();

        let err = store.create_conversation(id("c1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ref dup) if dup.as_str() == "c1"));
    }

    #[tokio::test]
    async fn test_append_updates_timestamp() {
        let store = InMemoryConversationStore::new();
        store.create_conversation(id("c1")).await.unwrap();
        let before = store.get_conversation(id("c1")).await.unwrap();

        store
            .add_message(id("c1"), "Hello".to_string(), "Hi there!".to_string())
            .await
            .unwrap();

        let after = store.get_conversation(id("c1")).await.unwrap();
        assert_eq!(after.messages, vec![MessageTurn::new("Hello", "Hi there!")]);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at > before.updated_at);
    }

    #[tokio::test]
    async fn test_append_to_missing_conversation_creates_nothing() {
        let store = InMemoryConversationStore::new();
        let err = store
            .add_message(id("ghost"), String::new(), String::new())
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(!store.exists(id("ghost")).await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_messages_and_count() {
        let store = InMemoryConversationStore::new();
        store.create_conversation(id("c1")).await.unwrap();
        for i in 0..4 {
            store
                .add_message(id("c1"), format!("q{i}"), format!("a{i}"))
                .await
                .unwrap();
        }

        let recent = store.get_recent_messages(id("c1"), 2).await.unwrap();
        assert_eq!(recent, vec![MessageTurn::new("q2", "a2"), MessageTurn::new("q3", "a3")]);
        assert_eq!(store.count_turns(id("c1")).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_list_orders_by_recent_activity() {
        let store = InMemoryConversationStore::new();
        store.create_conversation(id("old")).await.unwrap();
        store.create_conversation(id("new")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .add_message(id("old"), "bump".to_string(), "ok".to_string())
            .await
            .unwrap();

        let listed = store.list_conversations(10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].conversation_id.as_str(), "old");
        assert_eq!(listed[0].turn_count, 1);

        assert_eq!(store.list_conversations(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let store = InMemoryConversationStore::new();
        store.create_conversation(id("c1")).await.unwrap();
        store.close().await.unwrap();

        let err = store.exists(id("c1")).await.unwrap_err();
        assert!(matches!(err, StoreError::BackingStoreUnavailable(_)));
    }
}
