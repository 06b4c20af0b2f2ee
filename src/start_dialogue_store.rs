//! Startup helpers for the `dialogue-store` admin binary.
//!
//! Opens the configured database once, runs a single command, prints the
//! result as JSON on stdout and closes the connection before exiting.
//! Logs go to stderr so the output stays machine-readable.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use crate::conversations::{
    Config, ConversationId, ConversationStore, ErrorKind, HandlerError, SqliteConversationStore,
    StoreError, allocate_conversation,
};

/// Command line of the admin tool.
#[derive(Debug, Parser)]
#[command(name = "dialogue-store", version, about = "Inspect and maintain stored conversations")]
pub struct Cli {
    /// Database file (overrides `DIALOGUE_STORE_PATH`).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Admin commands, one per store operation.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create an empty conversation
    Create {
        /// Identifier to use; a random one is generated when omitted
        #[arg(long)]
        id: Option<String>,
    },
    /// Print a full conversation record
    Show {
        /// Conversation identifier
        id: String,
    },
    /// Print the turns of a conversation
    Messages {
        /// Conversation identifier
        id: String,
        /// Only the last N turns
        #[arg(long)]
        last: Option<usize>,
    },
    /// Append one turn
    Append {
        /// Conversation identifier
        id: String,
        /// Human input text
        human: String,
        /// Assistant response text
        response: String,
    },
    /// Delete a conversation and its turns
    Delete {
        /// Conversation identifier
        id: String,
    },
    /// Report whether a conversation exists
    Exists {
        /// Conversation identifier
        id: String,
    },
    /// List conversations, most recently updated first
    List {
        /// Maximum number of rows
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

/// Run the admin tool with the process arguments.
///
/// # Returns
/// `ExitCode::SUCCESS` on success, `2` when the conversation does not exist,
/// `3` on an identifier conflict and `1` on any other failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match rt.block_on(execute(cli)) {
        Ok(output) => match write_json(&output) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!("Failed to write output: {e}");
                ExitCode::from(1)
            }
        },
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(exit_status(&e))
        }
    }
}

fn write_json(value: &Value) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

/// Map a failure to the process exit status.
#[must_use]
pub fn exit_status(err: &anyhow::Error) -> u8 {
    let kind = err.downcast_ref::<StoreError>().map(StoreError::kind).or_else(|| {
        match err.downcast_ref::<HandlerError>() {
            Some(HandlerError::Store(inner)) => Some(inner.kind()),
            _ => None,
        }
    });

    match kind {
        Some(ErrorKind::NotFound) => 2,
        Some(ErrorKind::Conflict) => 3,
        _ => 1,
    }
}

/// Open the store, run one command and close the store again.
///
/// The store is closed even when the command fails.
pub async fn execute(cli: Cli) -> anyhow::Result<Value> {
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(db) = cli.db {
        config.storage.sqlite_path = db;
    }

    let store = SqliteConversationStore::open(&config.storage)
        .await
        .with_context(|| {
            format!(
                "Failed to open {}",
                config.storage.sqlite_path.display()
            )
        })?;

    let outcome = dispatch(&store, &config, cli.command).await;
    let closed = store.close().await;
    let output = outcome?;
    closed?;
    Ok(output)
}

async fn dispatch(
    store: &dyn ConversationStore,
    config: &Config,
    command: Command,
) -> anyhow::Result<Value> {
    let output = match command {
        Command::Create { id: Some(raw) } => {
            let id = store.create_conversation(parse_id(&raw)?).await?;
            json!({ "conversation_id": id })
        }
        Command::Create { id: None } => {
            let id = allocate_conversation(store, config.handler.max_id_attempts).await?;
            json!({ "conversation_id": id })
        }
        Command::Show { id } => serde_json::to_value(store.get_conversation(parse_id(&id)?).await?)?,
        Command::Messages { id, last } => {
            let id = parse_id(&id)?;
            let turns = match last {
                Some(limit) => store.get_recent_messages(id, limit).await?,
                None => store.get_messages(id).await?,
            };
            serde_json::to_value(turns)?
        }
        Command::Append {
            id,
            human,
            response,
        } => {
            let id = parse_id(&id)?;
            store.add_message(id.clone(), human, response).await?;
            let turn_count = store.count_turns(id.clone()).await?;
            json!({ "conversation_id": id, "turn_count": turn_count })
        }
        Command::Delete { id } => {
            let id = parse_id(&id)?;
            store.delete_conversation(id.clone()).await?;
            json!({ "deleted": id })
        }
        Command::Exists { id } => {
            let id = parse_id(&id)?;
            let exists = store.exists(id.clone()).await?;
            json!({ "conversation_id": id, "exists": exists })
        }
        Command::List { limit } => serde_json::to_value(store.list_conversations(limit).await?)?,
    };
    Ok(output)
}

fn parse_id(raw: &str) -> Result<ConversationId, StoreError> {
    Ok(ConversationId::new(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> PathBuf {
        std::env::temp_dir().join(format!("dialogue-store-cli-{}.sqlite", uuid::Uuid::new_v4()))
    }

    fn cli(db: &PathBuf, args: &[&str]) -> Cli {
        let db = db.display().to_string();
        let mut argv = vec!["dialogue-store", "--db", db.as_str()];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_messages_with_limit() {
        let parsed = Cli::try_parse_from(["dialogue-store", "messages", "c1", "--last", "3"]).unwrap();
        assert!(parsed.db.is_none());
        assert!(matches!(
            parsed.command,
            Command::Messages { ref id, last: Some(3) } if id == "c1"
        ));
    }

    #[test]
    fn test_parse_rejects_missing_args() {
        assert!(Cli::try_parse_from(["dialogue-store", "append", "c1"]).is_err());
    }

    #[tokio::test]
    async fn test_commands_round_trip_through_database() {
        let db = temp_db();

        let created = execute(cli(&db, &["create", "--id", "c1"])).await.unwrap();
        assert_eq!(created["conversation_id"], "c1");

        let appended = execute(cli(&db, &["append", "c1", "Hello", "Hi there!"]))
            .await
            .unwrap();
        assert_eq!(appended["turn_count"], 1);

        let messages = execute(cli(&db, &["messages", "c1"])).await.unwrap();
        assert_eq!(messages[0]["patient"], "Hello");
        assert_eq!(messages[0]["bot"], "Hi there!");

        let duplicate = execute(cli(&db, &["create", "--id", "c1"])).await.unwrap_err();
        assert_eq!(exit_status(&duplicate), 3);

        execute(cli(&db, &["delete", "c1"])).await.unwrap();
        let exists = execute(cli(&db, &["exists", "c1"])).await.unwrap();
        assert_eq!(exists["exists"], false);

        let missing = execute(cli(&db, &["show", "c1"])).await.unwrap_err();
        assert_eq!(exit_status(&missing), 2);

        let generated = execute(cli(&db, &["create"])).await.unwrap();
        let listed = execute(cli(&db, &["list"])).await.unwrap();
        assert_eq!(listed[0]["conversation_id"], generated["conversation_id"]);

        for suffix in ["", "-wal", "-shm"] {
            let mut path = db.clone().into_os_string();
            path.push(suffix);
            let _ = std::fs::remove_file(path);
        }
    }
}
