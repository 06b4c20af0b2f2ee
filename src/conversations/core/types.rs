//! Conversation records and message turns.

use chrono::{DateTime, Duration, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::conversations::core::errors::{StoreError, StoreResult};
use crate::conversations::core::ids::ConversationId;

/// One human-input / assistant-response exchange.
///
/// Turns are immutable once appended; their position is their index in
/// [`Conversation::messages`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTurn {
    /// Text typed by the human operator.
    #[serde(rename = "patient")]
    pub human: String,
    /// Text returned by the assistant, stored verbatim.
    #[serde(rename = "bot")]
    pub response: String,
}

impl MessageTurn {
    /// Build a turn from its two halves.
    #[must_use]
    pub fn new(human: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            human: human.into(),
            response: response.into(),
        }
    }
}

/// A full conversation record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Primary key.
    pub conversation_id: ConversationId,
    /// Turns in append order.
    pub messages: Vec<MessageTurn>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last successful append (equals `created_at` until then).
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create an empty conversation stamped at `now`.
    #[must_use]
    pub const fn empty(conversation_id: ConversationId, now: DateTime<Utc>) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of turns.
    #[must_use]
    pub const fn turn_count(&self) -> usize {
        self.messages.len()
    }

    /// True if no turn has been appended yet.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The last `n` turns, oldest first.
    #[must_use]
    pub fn last_turns(&self, n: usize) -> &[MessageTurn] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    /// Listing view of this record.
    #[must_use]
    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            conversation_id: self.conversation_id.clone(),
            turn_count: self.messages.len() as u64,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Conversation metadata without its turns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Primary key.
    pub conversation_id: ConversationId,
    /// Number of stored turns.
    pub turn_count: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last successful append.
    pub updated_at: DateTime<Utc>,
}

/// Current time at the persisted precision (milliseconds).
#[must_use]
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Timestamp for an append following one stamped `previous`.
///
/// Never returns a value `<= previous`, even when the wall clock has not
/// advanced by a full millisecond or has stepped backwards.
#[must_use]
pub fn next_update_time(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + Duration::milliseconds(1);
    if now > floor { now } else { floor }
}

/// Decode a persisted millisecond timestamp.
///
/// # Errors
/// Returns `CorruptRecord` if the value is out of chrono's range.
pub fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::CorruptRecord(format!("invalid timestamp {ms}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_uses_persisted_field_names() {
        let turn = MessageTurn::new("Hello", "Hi there!");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["patient"], "Hello");
        assert_eq!(json["bot"], "Hi there!");
    }

    #[test]
    fn test_empty_conversation() {
        let now = now_millis();
        let conversation = Conversation::empty(ConversationId::new("c1").unwrap(), now);
        assert!(conversation.is_empty());
        assert_eq!(conversation.created_at, conversation.updated_at);
        assert_eq!(conversation.summary().turn_count, 0);
    }

    #[test]
    fn test_last_turns() {
        let mut conversation = Conversation::empty(ConversationId::generate(), now_millis());
        for i in 0..5 {
            conversation
                .messages
                .push(MessageTurn::new(format!("q{i}"), format!("a{i}")));
        }

        let last = conversation.last_turns(2);
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].human, "q3");
        assert_eq!(last[1].human, "q4");
        assert_eq!(conversation.last_turns(0).len(), 0);
        assert_eq!(conversation.last_turns(100).len(), 5);
    }

    #[test]
    fn test_next_update_time_is_strictly_increasing() {
        let previous = now_millis();
        assert_eq!(
            next_update_time(previous, previous),
            previous + Duration::milliseconds(1)
        );

        let earlier = previous - Duration::seconds(5);
        assert!(next_update_time(previous, earlier) > previous);

        let later = previous + Duration::seconds(5);
        assert_eq!(next_update_time(previous, later), later);
    }

    #[test]
    fn test_millis_round_trip() {
        let now = now_millis();
        assert_eq!(from_millis(now.timestamp_millis()).unwrap(), now);
        assert!(from_millis(i64::MAX).is_err());
    }
}
