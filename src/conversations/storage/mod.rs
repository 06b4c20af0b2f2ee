//! Conversation store contract and its backends.

pub mod memory_store;
pub mod sqlite_store;
pub mod store;

pub use memory_store::InMemoryConversationStore;
pub use sqlite_store::SqliteConversationStore;
pub use store::{ConversationStore, StoreFuture};
