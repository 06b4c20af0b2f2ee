//! The conversation store contract.

use std::future::Future;
use std::pin::Pin;

use crate::conversations::core::errors::StoreResult;
use crate::conversations::core::ids::ConversationId;
use crate::conversations::core::types::{Conversation, ConversationSummary, MessageTurn};

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Durable storage of conversations and their turns.
///
/// Every operation is atomic per conversation. Different conversations never
/// contend with each other at this layer. Writes on the same conversation are
/// serialized by the backing store, so concurrent [`ConversationStore::add_message`]
/// calls each land exactly once.
///
/// Implementations are shared as one handle per process (`Arc<dyn ConversationStore>`)
/// and released with [`ConversationStore::close`] at shutdown.
pub trait ConversationStore: Send + Sync {
    /// Create an empty conversation.
    ///
    /// Insert-if-absent: an existing identifier is never overwritten.
    ///
    /// # Errors
    /// Returns `Conflict` if the identifier is taken, or a backing-store error.
    fn create_conversation(
        &self,
        id: ConversationId,
    ) -> StoreFuture<'_, StoreResult<ConversationId>>;

    /// Fetch the full record.
    ///
    /// # Errors
    /// Returns `NotFound` if absent, or a backing-store error.
    fn get_conversation(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<Conversation>>;

    /// Append one turn and refresh `updated_at`, as a single atomic update.
    ///
    /// Both texts may be empty. On failure nothing changes.
    ///
    /// # Errors
    /// Returns `NotFound` if absent, or a backing-store error.
    fn add_message(
        &self,
        id: ConversationId,
        human: String,
        response: String,
    ) -> StoreFuture<'_, StoreResult<()>>;

    /// Fetch all turns, oldest first.
    ///
    /// # Errors
    /// Returns `NotFound` if absent, or a backing-store error.
    fn get_messages(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<Vec<MessageTurn>>>;

    /// Fetch the last `limit` turns, oldest first.
    ///
    /// # Errors
    /// Returns `NotFound` if absent, or a backing-store error.
    fn get_recent_messages(
        &self,
        id: ConversationId,
        limit: usize,
    ) -> StoreFuture<'_, StoreResult<Vec<MessageTurn>>>;

    /// Number of stored turns.
    ///
    /// # Errors
    /// Returns `NotFound` if absent, or a backing-store error.
    fn count_turns(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<u64>>;

    /// Remove a conversation and all of its turns at once.
    ///
    /// # Errors
    /// Returns `NotFound` if absent, or a backing-store error.
    fn delete_conversation(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<()>>;

    /// Check whether a conversation exists. Absence is `Ok(false)`, never an error.
    ///
    /// # Errors
    /// Returns a backing-store error only.
    fn exists(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<bool>>;

    /// List conversations, most recently updated first.
    ///
    /// # Errors
    /// Returns a backing-store error.
    fn list_conversations(
        &self,
        limit: usize,
    ) -> StoreFuture<'_, StoreResult<Vec<ConversationSummary>>>;

    /// Release the backing-store connection. Later calls fail with
    /// `BackingStoreUnavailable`.
    ///
    /// # Errors
    /// Returns an error if the connection could not be closed cleanly.
    fn close(&self) -> StoreFuture<'_, StoreResult<()>>;
}
