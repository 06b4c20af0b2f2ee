//! Turn orchestration on top of a [`ConversationStore`].
//!
//! The response generator (local model, remote API, ...) is an external
//! collaborator behind [`ResponseGenerator`]; this module only sequences
//! "read history, generate, persist the turn".

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::conversations::core::config::HandlerConfig;
use crate::conversations::core::errors::StoreError;
use crate::conversations::core::ids::ConversationId;
use crate::conversations::core::types::MessageTurn;
use crate::conversations::storage::store::ConversationStore;

/// Boxed future returned by a [`ResponseGenerator`].
pub type GenerateFuture<'a> = Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>>;

/// Produces the assistant response for one human input.
pub trait ResponseGenerator: Send + Sync {
    /// Generate a response given the input and the prior turns (oldest first).
    ///
    /// # Errors
    /// Returns a human-readable reason when no response could be produced.
    fn generate<'a>(
        &'a self,
        user_input: &'a str,
        history: &'a [MessageTurn],
    ) -> GenerateFuture<'a>;
}

/// Errors raised by [`ConversationHandler`].
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The store rejected or failed the operation.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The response generator failed; nothing was persisted.
    #[error("response generation failed: {0}")]
    Generation(String),
    /// Every generated identifier collided with an existing conversation.
    #[error("no free conversation id after {attempts} attempts")]
    IdSpaceExhausted {
        /// Number of identifiers tried.
        attempts: usize,
    },
}

/// Result of one handled turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TurnReply {
    /// Conversation the turn was recorded in.
    pub conversation_id: ConversationId,
    /// Assistant response, as persisted.
    pub response: String,
    /// Index of the turn within the conversation as seen when history was read.
    pub turn_index: usize,
}

/// Create a conversation under a freshly generated identifier.
///
/// Uniqueness is enforced by the store's insert-if-absent create; a collision
/// just draws a new identifier, up to `max_attempts` times. At least one
/// identifier is always tried.
///
/// # Errors
/// Returns `IdSpaceExhausted` after `max_attempts` collisions, or the store error.
pub async fn allocate_conversation(
    store: &dyn ConversationStore,
    max_attempts: usize,
) -> Result<ConversationId, HandlerError> {
    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let candidate = ConversationId::generate();
        match store.create_conversation(candidate).await {
            Ok(id) => {
                info!(conversation_id = %id, attempt, "Started conversation");
                return Ok(id);
            }
            Err(StoreError::Conflict(taken)) => {
                warn!(conversation_id = %taken, attempt, "Generated id collided, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(HandlerError::IdSpaceExhausted {
        attempts: max_attempts,
    })
}

/// Sequences store calls around a response generator.
pub struct ConversationHandler<G> {
    store: Arc<dyn ConversationStore>,
    generator: G,
    config: HandlerConfig,
}

impl<G: ResponseGenerator> ConversationHandler<G> {
    /// Create a handler over a shared store handle.
    ///
    /// # Errors
    /// Returns `Store(InvalidConfig)` if the handler settings are invalid.
    pub fn new(
        store: Arc<dyn ConversationStore>,
        generator: G,
        config: HandlerConfig,
    ) -> Result<Self, HandlerError> {
        config.validate()?;
        Ok(Self {
            store,
            generator,
            config,
        })
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Allocate a fresh conversation with a generated identifier.
    ///
    /// # Errors
    /// See [`allocate_conversation`].
    pub async fn start_conversation(&self) -> Result<ConversationId, HandlerError> {
        allocate_conversation(self.store.as_ref(), self.config.max_id_attempts).await
    }

    /// Handle one human input: read history, generate, persist the turn.
    ///
    /// # Errors
    /// Returns `Store(NotFound)` for an unknown conversation, `Generation` if the
    /// generator fails (nothing is persisted), or any other store error.
    pub async fn handle_turn(
        &self,
        id: &ConversationId,
        user_input: &str,
    ) -> Result<TurnReply, HandlerError> {
        let conversation = self.store.get_conversation(id.clone()).await?;
        let turn_index = conversation.turn_count();
        debug!(conversation_id = %id, turn_index, "Generating response");

        let response = self
            .generator
            .generate(user_input, &conversation.messages)
            .await
            .map_err(HandlerError::Generation)?;

        self.store
            .add_message(id.clone(), user_input.to_string(), response.clone())
            .await?;

        Ok(TurnReply {
            conversation_id: id.clone(),
            response,
            turn_index,
        })
    }
}
