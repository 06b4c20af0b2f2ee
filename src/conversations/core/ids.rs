//! Conversation identifiers.
//!
//! Identifiers are opaque strings chosen by the caller. The store never
//! rewrites them; it only checks that they are safe to persist and to log.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Errors returned when parsing/validating a [`ConversationId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationIdError {
    /// Empty (or whitespace-only) identifier.
    Empty,
    /// Starts or ends with whitespace.
    SurroundingWhitespace,
    /// Exceeds the maximum accepted length.
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length received.
        got: usize,
    },
    /// Contains an ASCII control character.
    ControlChar {
        /// Byte index where it was found.
        index: usize,
    },
}

impl fmt::Display for ConversationIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "conversation id must not be empty"),
            Self::SurroundingWhitespace => {
                write!(f, "conversation id must not start or end with whitespace")
            }
            Self::TooLong { max, got } => {
                write!(f, "conversation id too long: got {got}, max {max}")
            }
            Self::ControlChar { index } => {
                write!(f, "conversation id contains a control character at index {index}")
            }
        }
    }
}

impl std::error::Error for ConversationIdError {}

/// Globally unique identifier of a conversation.
///
/// Examples:
/// - `5d0f9f8c-1f43-4a53-9a3b-2f9cb1e0a6f1` (generated)
/// - `c1` (caller supplied)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    /// Hard ceiling to keep keys index-friendly.
    pub const MAX_LEN: usize = 256;

    /// Build a validated `ConversationId`.
    ///
    /// Rules:
    /// - Not empty or whitespace-only.
    /// - No leading or trailing whitespace; the value is kept byte for byte.
    /// - At most [`Self::MAX_LEN`] bytes.
    /// - No ASCII control characters.
    ///
    /// # Errors
    /// Returns `ConversationIdError` if the input is empty, padded with whitespace,
    /// too long, or contains control characters.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ConversationIdError> {
        let s = raw.as_ref();

        if s.trim().is_empty() {
            return Err(ConversationIdError::Empty);
        }
        if s.trim() != s {
            return Err(ConversationIdError::SurroundingWhitespace);
        }
        if s.len() > Self::MAX_LEN {
            return Err(ConversationIdError::TooLong {
                max: Self::MAX_LEN,
                got: s.len(),
            });
        }
        if let Some(index) = s.bytes().position(|b| b.is_ascii_control()) {
            return Err(ConversationIdError::ControlChar { index });
        }

        Ok(Self(s.to_owned()))
    }

    /// Generate a fresh random identifier (UUID v4, hyphenated).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow as `&str`.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into `String`.
    #[inline]
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationId {
    type Err = ConversationIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ConversationId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<ConversationId> for String {
    fn from(value: ConversationId) -> Self {
        value.into_string()
    }
}

impl TryFrom<String> for ConversationId {
    type Error = ConversationIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ConversationId {
    type Error = ConversationIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_surrounding_whitespace() {
        for raw in [" c1", "c1 ", "  c1 ", "\tc1", "c1\n"] {
            assert_eq!(
                ConversationId::new(raw),
                Err(ConversationIdError::SurroundingWhitespace),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn test_keeps_inner_whitespace_verbatim() {
        let id = ConversationId::new("ward 3 / bed 12").unwrap();
        assert_eq!(id.as_str(), "ward 3 / bed 12");
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(ConversationId::new("   "), Err(ConversationIdError::Empty));
    }

    #[test]
    fn test_rejects_too_long() {
        let raw = "x".repeat(ConversationId::MAX_LEN + 1);
        assert_eq!(
            ConversationId::new(&raw),
            Err(ConversationIdError::TooLong {
                max: ConversationId::MAX_LEN,
                got: ConversationId::MAX_LEN + 1,
            })
        );
    }

    #[test]
    fn test_rejects_control_char() {
        assert_eq!(
            ConversationId::new("ab\u{0}c"),
            Err(ConversationIdError::ControlChar { index: 2 })
        );
    }

    #[test]
    fn test_generated_ids_differ() {
        let a = ConversationId::generate();
        let b = ConversationId::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_serde_validates() {
        let id: ConversationId = serde_json::from_str("\"c2\"").unwrap();
        assert_eq!(id.as_str(), "c2");
        assert!(serde_json::from_str::<ConversationId>("\"\"").is_err());
        assert!(serde_json::from_str::<ConversationId>("\" c2\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"c2\"");
    }
}
