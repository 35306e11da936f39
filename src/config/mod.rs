//! Typed configuration
//!
//! Strongly-typed config with defaults, loaded once at startup from a
//! JSON/JSON5 file. Writes are synchronous whole-file overwrites; admin
//! list amendments persist before the change is acknowledged.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::ratelimit::{Quota, RateQuotas};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BotConfig {
    /// Prefix that marks a chat message as a command.
    pub command_prefix: String,
    /// Hex SHA-256 of the owner's subject id (`banter hash-id`). Never
    /// the plaintext id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_hash: Option<String>,
    /// Admin subject ids.
    pub admins: Vec<String>,
    pub rate: RateConfig,
    pub fun: FunConfig,
    /// Audit log location; defaults next to the config file's directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            command_prefix: "!".to_string(),
            owner_hash: None,
            admins: Vec::new(),
            rate: RateConfig::default(),
            fun: FunConfig::default(),
            audit_log: None,
        }
    }
}

impl BotConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_prefix.is_empty() {
            return Err(ConfigError::Invalid("commandPrefix is empty".to_string()));
        }
        if self.command_prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid(
                "commandPrefix contains whitespace".to_string(),
            ));
        }
        if self.fun.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "fun.tickIntervalMs must be positive".to_string(),
            ));
        }
        if self.fun.max_duration_secs == 0 {
            return Err(ConfigError::Invalid(
                "fun.maxDurationSecs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Rate-limit quotas, all per trailing minute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateConfig {
    pub commands_per_minute: usize,
    pub messages_per_minute: usize,
    pub fun_starts_per_minute: usize,
    pub admin_actions_per_minute: usize,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            commands_per_minute: 30,
            messages_per_minute: 50,
            fun_starts_per_minute: 5,
            admin_actions_per_minute: 20,
        }
    }
}

impl RateConfig {
    pub fn quotas(&self) -> RateQuotas {
        RateQuotas {
            commands: Quota::per_minute(self.commands_per_minute),
            messages: Quota::per_minute(self.messages_per_minute),
            fun_starts: Quota::per_minute(self.fun_starts_per_minute),
            admin_actions: Quota::per_minute(self.admin_actions_per_minute),
        }
    }
}

/// Fun-loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FunConfig {
    /// Base tick interval.
    pub tick_interval_ms: u64,
    /// Upper bound on per-tick jitter added to the base interval.
    pub jitter_ms: u64,
    /// Auto-expiry bound measured from loop creation.
    pub max_duration_secs: u64,
    /// Optional template-set file overriding the built-in sets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub templates_path: Option<PathBuf>,
}

impl Default for FunConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            jitter_ms: 250,
            max_duration_secs: 300,
            templates_path: None,
        }
    }
}

impl FunConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("banterbot").join("config.json"))
        .unwrap_or_else(|| PathBuf::from("banterbot.json"))
}

/// File-backed configuration store.
///
/// Reads once at construction; every mutation re-serializes the whole
/// file and writes it synchronously before the in-memory copy changes.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    config: RwLock<BotConfig>,
}

impl ConfigStore {
    /// Load from `path`, or start from defaults if the file is absent.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let config: BotConfig =
                json5::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
            config.validate()?;
            config
        } else {
            BotConfig::default()
        };
        Ok(Self {
            path,
            config: RwLock::new(config),
        })
    }

    /// In-memory store for tests and the REPL.
    pub fn in_memory(path: impl AsRef<Path>, config: BotConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config: RwLock::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current configuration snapshot.
    pub fn get(&self) -> BotConfig {
        self.config.read().clone()
    }

    pub fn command_prefix(&self) -> String {
        self.config.read().command_prefix.clone()
    }

    /// Persist the current configuration (whole-file replace).
    pub fn save(&self) -> Result<(), ConfigError> {
        let config = self.config.read().clone();
        self.persist(&config)
    }

    /// Add an admin id: persisted to disk first, committed to memory only
    /// on success. Returns false if already present.
    pub fn add_admin(&self, id: &str) -> Result<bool, ConfigError> {
        let mut guard = self.config.write();
        if guard.admins.iter().any(|a| a == id) {
            return Ok(false);
        }
        let mut updated = guard.clone();
        updated.admins.push(id.to_string());
        self.persist(&updated)?;
        *guard = updated;
        Ok(true)
    }

    /// Remove an admin id with the same persist-then-commit discipline.
    /// Returns false if the id was not listed.
    pub fn remove_admin(&self, id: &str) -> Result<bool, ConfigError> {
        let mut guard = self.config.write();
        if !guard.admins.iter().any(|a| a == id) {
            return Ok(false);
        }
        let mut updated = guard.clone();
        updated.admins.retain(|a| a != id);
        self.persist(&updated)?;
        *guard = updated;
        Ok(true)
    }

    fn persist(&self, config: &BotConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(config)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.rate.commands_per_minute, 30);
        assert_eq!(config.fun.tick_interval_ms, 500);
        assert_eq!(config.fun.max_duration_secs, 300);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let config: BotConfig = json5::from_str("{}").unwrap();
        assert_eq!(config.command_prefix, "!");
        assert!(config.admins.is_empty());
    }

    #[test]
    fn test_json5_comments_accepted() {
        let config: BotConfig = json5::from_str(
            r#"{
                // the dispatch prefix
                commandPrefix: "?",
                admins: ["admin1"],
            }"#,
        )
        .unwrap();
        assert_eq!(config.command_prefix, "?");
        assert_eq!(config.admins, vec!["admin1"]);
    }

    #[test]
    fn test_validate_rejects_bad_prefix() {
        let mut config = BotConfig::default();
        config.command_prefix = String::new();
        assert!(config.validate().is_err());

        config.command_prefix = "! ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load_or_default(dir.path().join("config.json")).unwrap();
        assert_eq!(store.get().command_prefix, "!");
    }

    #[test]
    fn test_add_admin_persists_before_ack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load_or_default(&path).unwrap();

        assert!(store.add_admin("admin1").unwrap());
        assert!(!store.add_admin("admin1").unwrap());

        // A fresh load sees the persisted admin.
        let reloaded = ConfigStore::load_or_default(&path).unwrap();
        assert_eq!(reloaded.get().admins, vec!["admin1"]);
    }

    #[test]
    fn test_remove_admin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load_or_default(&path).unwrap();

        store.add_admin("admin1").unwrap();
        assert!(store.remove_admin("admin1").unwrap());
        assert!(!store.remove_admin("admin1").unwrap());

        let reloaded = ConfigStore::load_or_default(&path).unwrap();
        assert!(reloaded.get().admins.is_empty());
    }

    #[test]
    fn test_save_is_whole_file_replace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ \"admins\": [\"a\", \"b\"] }").unwrap();

        let store = ConfigStore::load_or_default(&path).unwrap();
        store.remove_admin("a").unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: BotConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.admins, vec!["b"]);
    }
}
