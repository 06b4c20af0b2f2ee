//! Error types for the conversation store.

use thiserror::Error;

use crate::conversations::core::ids::{ConversationId, ConversationIdError};

/// Coarse classification of a [`StoreError`].
///
/// This is what an orchestrator matches on to decide between "tell the user",
/// "retry later" and "bug".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The referenced conversation does not exist.
    NotFound,
    /// The identifier is already taken.
    Conflict,
    /// Connection, transport or timeout failure of the backing store.
    BackingStoreUnavailable,
    /// The caller passed an invalid identifier or configuration.
    InvalidInput,
    /// Persisted data could not be decoded.
    Corrupt,
}

/// Conversation store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No conversation with this identifier exists.
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),
    /// A conversation with this identifier already exists.
    #[error("conversation already exists: {0}")]
    Conflict(ConversationId),
    /// The backing store failed or is closed.
    #[error("backing store unavailable: {0}")]
    BackingStoreUnavailable(String),
    /// The operation did not complete within the configured deadline.
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        /// Store operation name.
        operation: &'static str,
        /// Configured deadline.
        timeout_ms: u64,
    },
    /// Invalid conversation identifier.
    #[error("invalid conversation id: {0}")]
    InvalidId(#[from] ConversationIdError),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A stored row violates the record layout.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::BackingStoreUnavailable(_) | Self::Timeout { .. } | Self::Io(_) => {
                ErrorKind::BackingStoreUnavailable
            }
            Self::InvalidId(_) | Self::InvalidConfig(_) => ErrorKind::InvalidInput,
            Self::CorruptRecord(_) | Self::Serialization(_) => ErrorKind::Corrupt,
        }
    }

    /// Identifier the failure refers to, when there is one.
    #[must_use]
    pub const fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            Self::NotFound(id) | Self::Conflict(id) => Some(id),
            _ => None,
        }
    }

    /// True for `NotFound`.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::ConnectionClosed => {
                Self::BackingStoreUnavailable("connection closed".to_string())
            }
            other => Self::BackingStoreUnavailable(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::BackingStoreUnavailable(err.to_string())
    }
}

/// Convenience result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
