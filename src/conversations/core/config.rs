//! Configuration for the conversation store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conversations::core::errors::{StoreError, StoreResult};

/// Environment variable naming a JSON configuration file.
pub const ENV_CONFIG_FILE: &str = "DIALOGUE_STORE_CONFIG";
/// Environment variable overriding [`StorageConfig::sqlite_path`].
pub const ENV_SQLITE_PATH: &str = "DIALOGUE_STORE_PATH";
/// Environment variable overriding [`StorageConfig::operation_timeout_ms`].
pub const ENV_TIMEOUT_MS: &str = "DIALOGUE_STORE_TIMEOUT_MS";
/// Environment variable overriding [`StorageConfig::busy_timeout_ms`].
pub const ENV_BUSY_TIMEOUT_MS: &str = "DIALOGUE_STORE_BUSY_TIMEOUT_MS";

/// Largest lock wait `SQLite` accepts, in milliseconds (`i32::MAX`).
pub const MAX_BUSY_TIMEOUT_MS: u64 = 0x7FFF_FFFF;

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage settings.
    pub storage: StorageConfig,
    /// Orchestration helper settings.
    pub handler: HandlerConfig,
}

impl Config {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or fails validation.
    pub fn from_json_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the process environment.
    ///
    /// Starts from the file named by `DIALOGUE_STORE_CONFIG` (or defaults)
    /// and applies the individual `DIALOGUE_STORE_*` overrides on top.
    ///
    /// # Errors
    /// Returns an error if a file or variable is malformed, or validation fails.
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an explicit variable lookup.
    ///
    /// # Errors
    /// Returns an error if a file or variable is malformed, or validation fails.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StoreResult<Self> {
        let mut config = match lookup(ENV_CONFIG_FILE) {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };

        if let Some(path) = lookup(ENV_SQLITE_PATH) {
            config.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            config.storage.operation_timeout_ms = parse_millis(ENV_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_BUSY_TIMEOUT_MS) {
            config.storage.busy_timeout_ms = parse_millis(ENV_BUSY_TIMEOUT_MS, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> StoreResult<()> {
        self.storage.validate()?;
        self.handler.validate()
    }
}

fn parse_millis(key: &str, raw: &str) -> StoreResult<u64> {
    raw.trim()
        .parse()
        .map_err(|err| StoreError::InvalidConfig(format!("{key}={raw:?}: {err}")))
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Conversation table name.
    pub conversation_table: String,
    /// Turn table name.
    pub turn_table: String,
    /// Deadline for a single store operation.
    pub operation_timeout_ms: u64,
    /// How long `SQLite` waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("conversations.sqlite"),
            conversation_table: "conversations".to_string(),
            turn_table: "conversation_turns".to_string(),
            operation_timeout_ms: 5_000,
            busy_timeout_ms: 2_000,
        }
    }
}

impl StorageConfig {
    /// Validate storage settings.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> StoreResult<()> {
        for (field, name) in [
            ("storage.conversation_table", &self.conversation_table),
            ("storage.turn_table", &self.turn_table),
        ] {
            if !is_sql_identifier(name) {
                return Err(StoreError::InvalidConfig(format!(
                    "{field} must match [A-Za-z_][A-Za-z0-9_]*, got {name:?}"
                )));
            }
        }

        if self.conversation_table.eq_ignore_ascii_case(&self.turn_table) {
            return Err(StoreError::InvalidConfig(
                "storage.conversation_table and storage.turn_table must differ".to_string(),
            ));
        }

        if self.operation_timeout_ms == 0 {
            return Err(StoreError::InvalidConfig(
                "storage.operation_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.busy_timeout_ms == 0 || self.busy_timeout_ms > self.operation_timeout_ms {
            return Err(StoreError::InvalidConfig(
                "storage.busy_timeout_ms must be > 0 and <= operation_timeout_ms".to_string(),
            ));
        }

        if self.busy_timeout_ms > MAX_BUSY_TIMEOUT_MS {
            return Err(StoreError::InvalidConfig(format!(
                "storage.busy_timeout_ms must be <= {MAX_BUSY_TIMEOUT_MS}, got {}",
                self.busy_timeout_ms
            )));
        }

        Ok(())
    }

    /// Operation deadline as a `Duration`.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Lock wait as a `Duration`.
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Settings for [`crate::conversations::ConversationHandler`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// How many generated identifiers to try before giving up on a collision streak.
    pub max_id_attempts: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self { max_id_attempts: 5 }
    }
}

impl HandlerConfig {
    /// Validate handler settings.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `max_id_attempts` is zero.
    pub fn validate(&self) -> StoreResult<()> {
        if self.max_id_attempts == 0 {
            return Err(StoreError::InvalidConfig(
                "handler.max_id_attempts must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.operation_timeout(), Duration::from_secs(5));
        assert_eq!(config.handler.max_id_attempts, 5);
    }

    #[test]
    fn test_rejects_bad_table_name() {
        let mut config = Config::default();
        config.storage.turn_table = "turns; DROP TABLE x".to_string();
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_same_tables() {
        let mut config = Config::default();
        config.storage.turn_table = "CONVERSATIONS".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_busy_timeout_above_deadline() {
        let mut config = Config::default();
        config.storage.busy_timeout_ms = config.storage.operation_timeout_ms + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_busy_timeout_sqlite_cannot_hold() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_TIMEOUT_MS, "3000000000"),
            (ENV_BUSY_TIMEOUT_MS, "3000000000"),
        ]);
        let result = Config::from_lookup(|key| vars.get(key).map(ToString::to_string));
        assert!(matches!(result, Err(StoreError::InvalidConfig(_))));

        let mut config = StorageConfig::default();
        config.operation_timeout_ms = MAX_BUSY_TIMEOUT_MS + 1;
        config.busy_timeout_ms = MAX_BUSY_TIMEOUT_MS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_id_attempts() {
        let mut config = Config::default();
        config.handler.max_id_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_SQLITE_PATH, "/tmp/chat.sqlite"),
            (ENV_TIMEOUT_MS, "900"),
            (ENV_BUSY_TIMEOUT_MS, " 300 "),
        ]);
        let config = Config::from_lookup(|key| vars.get(key).map(ToString::to_string)).unwrap();

        assert_eq!(config.storage.sqlite_path, PathBuf::from("/tmp/chat.sqlite"));
        assert_eq!(config.storage.operation_timeout_ms, 900);
        assert_eq!(config.storage.busy_timeout_ms, 300);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let result = Config::from_lookup(|key| (key == ENV_TIMEOUT_MS).then(|| "soon".to_string()));
        assert!(matches!(result, Err(StoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_json_file_with_partial_fields() {
        let path = std::env::temp_dir().join(format!(
            "dialogue-store-config-{}.json",
            uuid::Uuid::new_v4()
        ));
        std::fs::write(&path, r#"{"storage": {"turn_table": "turns"}}"#).unwrap();

        let config = Config::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.storage.turn_table, "turns");
        assert_eq!(config.storage.conversation_table, "conversations");
    }
}
