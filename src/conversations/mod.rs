//! Conversation-state management.
//!
//! This module stores multi-turn dialogue between a human operator and an
//! assistant, keyed by conversation identifier:
//! - `core`: identifiers, records, configuration and errors
//! - `storage`: the `ConversationStore` trait with `SQLite` and in-memory backends
//! - `handler`: "read history, generate, persist" sequencing for orchestrators

pub mod core;
pub mod handler;
pub mod storage;

pub use self::core::{
    Config, Conversation, ConversationId, ConversationIdError, ConversationSummary, ErrorKind,
    HandlerConfig, MessageTurn, StorageConfig, StoreError, StoreResult,
};
pub use handler::{
    ConversationHandler, GenerateFuture, HandlerError, ResponseGenerator, TurnReply,
    allocate_conversation,
};
pub use storage::{
    ConversationStore, InMemoryConversationStore, SqliteConversationStore, StoreFuture,
};
