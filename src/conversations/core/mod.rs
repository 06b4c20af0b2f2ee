//! Core conversation types, identifiers, configuration and errors.

pub mod config;
pub mod errors;
pub mod ids;
pub mod types;

pub use config::{Config, HandlerConfig, StorageConfig};
pub use errors::{ErrorKind, StoreError, StoreResult};
pub use ids::{ConversationId, ConversationIdError};
pub use types::{Conversation, ConversationSummary, MessageTurn};
