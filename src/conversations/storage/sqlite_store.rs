//! `SQLite`-backed conversation store.
//!
//! Layout: one row per conversation (with a denormalized `turn_count`) and one
//! row per turn keyed by `(conversation_id, position)`. All statements run on
//! the single `tokio-rusqlite` worker thread of the shared connection.

use std::time::{Duration, Instant};

use rusqlite::{OptionalExtension, TransactionBehavior};
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::conversations::core::config::StorageConfig;
use crate::conversations::core::errors::{StoreError, StoreResult};
use crate::conversations::core::ids::ConversationId;
use crate::conversations::core::types::{
    Conversation, ConversationSummary, MessageTurn, from_millis, now_millis,
};
use crate::conversations::storage::store::{ConversationStore, StoreFuture};

/// `(created_at, updated_at, turn_count)` as persisted.
type MetaRow = (i64, i64, i64);

/// `(conversation_id, turn_count, created_at, updated_at)` as persisted.
type SummaryRow = (String, i64, i64, i64);

/// `SQLite` implementation of [`ConversationStore`].
///
/// Writes run in one `BEGIN IMMEDIATE` transaction each and re-check the
/// operation deadline before committing, so a timed-out write never applies.
pub struct SqliteConversationStore {
    conn: Connection,
    conversations: String,
    turns: String,
    timeout: Duration,
}

impl SqliteConversationStore {
    /// Open (or create) the database file named in the config.
    ///
    /// # Errors
    /// Returns an error if the config is invalid or the database cannot be opened.
    pub async fn open(config: &StorageConfig) -> StoreResult<Self> {
        config.validate()?;
        let conn = Connection::open(&config.sqlite_path).await?;
        info!(path = %config.sqlite_path.display(), "Opened conversation database");
        Self::with_connection(conn, config).await
    }

    /// Open a private in-memory database (tests, ephemeral embedders).
    ///
    /// # Errors
    /// Returns an error if the config is invalid or the schema cannot be created.
    pub async fn open_in_memory(config: &StorageConfig) -> StoreResult<Self> {
        config.validate()?;
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn, config).await
    }

    /// Initialize the schema on an already opened connection.
    ///
    /// # Errors
    /// Returns an error if the config is invalid or database operations fail.
    pub async fn with_connection(conn: Connection, config: &StorageConfig) -> StoreResult<Self> {
        config.validate()?;
        let conversations = config.conversation_table.clone();
        let turns = config.turn_table.clone();
        let busy_timeout = config.busy_timeout();
        let (conv_table, turn_table) = (conversations.clone(), turns.clone());

        conn.call(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            let _journal: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            conn.pragma_update(None, "foreign_keys", true)?;
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {conv_table} (
                    conversation_id TEXT PRIMARY KEY NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    turn_count INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_{conv_table}_updated
                    ON {conv_table} (updated_at DESC);
                CREATE TABLE IF NOT EXISTS {turn_table} (
                    conversation_id TEXT NOT NULL
                        REFERENCES {conv_table} (conversation_id) ON DELETE CASCADE,
                    position INTEGER NOT NULL,
                    patient TEXT NOT NULL,
                    bot TEXT NOT NULL,
                    PRIMARY KEY (conversation_id, position)
                ) WITHOUT ROWID;"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            conversations,
            turns,
            timeout: config.operation_timeout(),
        })
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Run a read-only closure inside one deferred transaction, bounded by the
    /// operation deadline.
    async fn read<T, F>(&self, operation: &'static str, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<T> + Send + 'static,
    {
        let call = self.conn.call(move |conn| {
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        });

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(operation, timeout_ms = self.timeout_ms(), "Read timed out");
                Err(StoreError::Timeout {
                    operation,
                    timeout_ms: self.timeout_ms(),
                })
            }
        }
    }

    async fn write<T, F>(&self, operation: &'static str, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<StoreResult<T>> + Send + 'static,
    {
        self.write_until(Instant::now() + self.timeout, operation, f)
            .await
    }

    /// Run a mutating closure inside one `BEGIN IMMEDIATE` transaction.
    ///
    /// The closure's `Err` rolls the transaction back. Past `deadline` the
    /// transaction is rolled back as well and `Timeout` is returned.
    async fn write_until<T, F>(
        &self,
        deadline: Instant,
        operation: &'static str,
        f: F,
    ) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<StoreResult<T>> + Send + 'static,
    {
        let timeout_ms = self.timeout_ms();
        let expired = move || StoreError::Timeout {
            operation,
            timeout_ms,
        };

        let outcome = self
            .conn
            .call(move |conn| {
                if Instant::now() >= deadline {
                    return Ok(Err(expired()));
                }
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let outcome = f(&tx)?;
                if outcome.is_err() {
                    return Ok(outcome);
                }
                if Instant::now() >= deadline {
                    return Ok(Err(expired()));
                }
                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        if let Err(StoreError::Timeout { .. }) = &outcome {
            warn!(operation, timeout_ms, "Write timed out and was rolled back");
        }
        outcome
    }
}

fn query_meta(
    conn: &rusqlite::Connection,
    table: &str,
    key: &str,
) -> rusqlite::Result<Option<MetaRow>> {
    conn.query_row(
        &format!(
            "SELECT created_at, updated_at, turn_count FROM {table} WHERE conversation_id = ?1"
        ),
        rusqlite::params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .optional()
}

/// Turns in position order. A negative `limit` returns all of them; otherwise
/// only the last `limit`.
fn query_turns(
    conn: &rusqlite::Connection,
    table: &str,
    key: &str,
    limit: i64,
) -> rusqlite::Result<Vec<MessageTurn>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT patient, bot FROM (
             SELECT position, patient, bot FROM {table}
             WHERE conversation_id = ?1
             ORDER BY position DESC
             LIMIT ?2
         )
         ORDER BY position"
    ))?;
    let turns = stmt
        .query_map(rusqlite::params![key, limit], |row| {
            Ok(MessageTurn {
                human: row.get(0)?,
                response: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(turns)
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn to_count(raw: i64) -> StoreResult<u64> {
    u64::try_from(raw).map_err(|_| StoreError::CorruptRecord(format!("invalid turn count {raw}")))
}

impl ConversationStore for SqliteConversationStore {
    fn create_conversation(
        &self,
        id: ConversationId,
    ) -> StoreFuture<'_, StoreResult<ConversationId>> {
        Box::pin(async move {
            let table = self.conversations.clone();
            let key = id.to_string();
            let now = now_millis().timestamp_millis();

            let inserted = self
                .write("create_conversation", move |tx| {
                    let changed = tx.execute(
                        &format!(
                            "INSERT INTO {table} (conversation_id, created_at, updated_at, turn_count)
                             VALUES (?1, ?2, ?2, 0)
                             ON CONFLICT (conversation_id) DO NOTHING"
                        ),
                        rusqlite::params![key, now],
                    )?;
                    Ok(Ok(changed == 1))
                })
                .await?;

            if inserted {
                info!(conversation_id = %id, "Created conversation");
                Ok(id)
            } else {
                warn!(conversation_id = %id, "Conversation id already taken");
                Err(StoreError::Conflict(id))
            }
        })
    }

    fn get_conversation(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<Conversation>> {
        Box::pin(async move {
            let conv_table = self.conversations.clone();
            let turn_table = self.turns.clone();
            let key = id.to_string();

            let record = self
                .read("get_conversation", move |tx| {
                    let Some(meta) = query_meta(tx, &conv_table, &key)? else {
                        return Ok(None);
                    };
                    let turns = query_turns(tx, &turn_table, &key, -1)?;
                    Ok(Some((meta, turns)))
                })
                .await?;

            let Some(((created_at, updated_at, _), messages)) = record else {
                return Err(StoreError::NotFound(id));
            };
            debug!(conversation_id = %id, turns = messages.len(), "Loaded conversation");

            Ok(Conversation {
                conversation_id: id,
                messages,
                created_at: from_millis(created_at)?,
                updated_at: from_millis(updated_at)?,
            })
        })
    }

    fn add_message(
        &self,
        id: ConversationId,
        human: String,
        response: String,
    ) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let conv_table = self.conversations.clone();
            let turn_table = self.turns.clone();
            let key = id.to_string();
            let missing = id.clone();
            let now = now_millis().timestamp_millis();

            let position = self
                .write("add_message", move |tx| {
                    let position: Option<i64> = tx
                        .query_row(
                            &format!(
                                "UPDATE {conv_table}
                                 SET turn_count = turn_count + 1,
                                     updated_at = MAX(?2, updated_at + 1)
                                 WHERE conversation_id = ?1
                                 RETURNING turn_count - 1"
                            ),
                            rusqlite::params![key, now],
                            |row| row.get(0),
                        )
                        .optional()?;
                    let Some(position) = position else {
                        return Ok(Err(StoreError::NotFound(missing)));
                    };

                    tx.execute(
                        &format!(
                            "INSERT INTO {turn_table} (conversation_id, position, patient, bot)
                             VALUES (?1, ?2, ?3, ?4)"
                        ),
                        rusqlite::params![key, position, human, response],
                    )?;
                    Ok(Ok(position))
                })
                .await?;

            debug!(conversation_id = %id, position, "Appended turn");
            Ok(())
        })
    }

    fn get_messages(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<Vec<MessageTurn>>> {
        self.get_recent_messages(id, usize::MAX)
    }

    fn get_recent_messages(
        &self,
        id: ConversationId,
        limit: usize,
    ) -> StoreFuture<'_, StoreResult<Vec<MessageTurn>>> {
        Box::pin(async move {
            let conv_table = self.conversations.clone();
            let turn_table = self.turns.clone();
            let key = id.to_string();
            let limit = to_limit(limit);

            let turns = self
                .read("get_messages", move |tx| {
                    if query_meta(tx, &conv_table, &key)?.is_none() {
                        return Ok(None);
                    }
                    query_turns(tx, &turn_table, &key, limit).map(Some)
                })
                .await?;

            turns.ok_or(StoreError::NotFound(id))
        })
    }

    fn count_turns(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<u64>> {
        Box::pin(async move {
            let table = self.conversations.clone();
            let key = id.to_string();

            let meta = self
                .read("count_turns", move |tx| query_meta(tx, &table, &key))
                .await?;

            match meta {
                Some((_, _, count)) => to_count(count),
                None => Err(StoreError::NotFound(id)),
            }
        })
    }

    fn delete_conversation(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let conv_table = self.conversations.clone();
            let turn_table = self.turns.clone();
            let key = id.to_string();
            let missing = id.clone();

            let removed_turns = self
                .write("delete_conversation", move |tx| {
                    let removed_turns = tx.execute(
                        &format!("DELETE FROM {turn_table} WHERE conversation_id = ?1"),
                        rusqlite::params![key],
                    )?;
                    let removed = tx.execute(
                        &format!("DELETE FROM {conv_table} WHERE conversation_id = ?1"),
                        rusqlite::params![key],
                    )?;
                    if removed == 0 {
                        return Ok(Err(StoreError::NotFound(missing)));
                    }
                    Ok(Ok(removed_turns))
                })
                .await?;

            info!(conversation_id = %id, turns = removed_turns, "Deleted conversation");
            Ok(())
        })
    }

    fn exists(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let table = self.conversations.clone();
            let key = id.to_string();

            self.read("exists", move |tx| {
                tx.query_row(
                    &format!(
                        "SELECT EXISTS (SELECT 1 FROM {table} WHERE conversation_id = ?1)"
                    ),
                    rusqlite::params![key],
                    |row| row.get::<_, bool>(0),
                )
            })
            .await
        })
    }

    fn list_conversations(
        &self,
        limit: usize,
    ) -> StoreFuture<'_, StoreResult<Vec<ConversationSummary>>> {
        Box::pin(async move {
            let table = self.conversations.clone();
            let limit = to_limit(limit);

            let rows: Vec<SummaryRow> = self
                .read("list_conversations", move |tx| {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT conversation_id, turn_count, created_at, updated_at
                         FROM {table}
                         ORDER BY updated_at DESC, conversation_id
                         LIMIT ?1"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![limit], |row| {
                            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                        })?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await?;

            rows.into_iter()
                .map(|(raw_id, turn_count, created_at, updated_at)| {
                    let conversation_id = ConversationId::new(&raw_id).map_err(|err| {
                        StoreError::CorruptRecord(format!("stored id {raw_id:?}: {err}"))
                    })?;
                    Ok(ConversationSummary {
                        conversation_id,
                        turn_count: to_count(turn_count)?,
                        created_at: from_millis(created_at)?,
                        updated_at: from_millis(updated_at)?,
                    })
                })
                .collect()
        })
    }

    fn close(&self) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            match self.conn.clone().close().await {
                Ok(()) => {
                    info!("Closed conversation database");
                    Ok(())
                }
                Err(tokio_rusqlite::Error::ConnectionClosed) => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
    }
}
