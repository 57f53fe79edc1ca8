use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::sqlite::{SqliteLedger, SqliteOptions};

/// Environment variable overriding [`LedgerConfig::database_path`].
pub const ENV_DATABASE_PATH: &str = "CMP_DATABASE_PATH";
/// Environment variable overriding [`LedgerConfig::env`].
pub const ENV_NAME: &str = "CMP_ENV";

/// Ledger settings, read from TOML with environment overrides.
///
/// Every field has a default, so an empty file is a valid config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub database_path: PathBuf,
    /// Deployment name; `production` lowers default log verbosity.
    pub env: String,
    pub busy_timeout_ms: u64,
    pub max_append_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Pending appends the single-writer service will queue.
    pub queue_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("cmp.db"),
            env: "development".into(),
            busy_timeout_ms: 5_000,
            max_append_attempts: 5,
            retry_backoff_ms: 10,
            queue_capacity: 1024,
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, LedgerError> {
        let config: Self = toml::from_str(s).map_err(|e| LedgerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML config file.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Apply [`ENV_DATABASE_PATH`] and [`ENV_NAME`] from the process environment.
    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(path) = lookup(ENV_DATABASE_PATH).filter(|p| !p.is_empty()) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(env) = lookup(ENV_NAME).filter(|e| !e.is_empty()) {
            self.env = env;
        }
        self
    }

    pub fn is_production(&self) -> bool {
        self.env.eq_ignore_ascii_case("production")
    }

    pub fn sqlite_options(&self) -> SqliteOptions {
        SqliteOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            max_append_attempts: self.max_append_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Open the configured database.
    pub fn open_ledger(&self) -> Result<SqliteLedger, LedgerError> {
        SqliteLedger::open_with(&self.database_path, self.sqlite_options())
    }

    fn validate(&self) -> Result<(), LedgerError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(LedgerError::Config("database_path must not be empty".into()));
        }
        if self.max_append_attempts == 0 {
            return Err(LedgerError::Config("max_append_attempts must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(LedgerError::Config("queue_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn default_config() {
        let c = LedgerConfig::default();
        assert_eq!(c.database_path, PathBuf::from("cmp.db"));
        assert_eq!(c.env, "development");
        assert!(!c.is_production());
        assert_eq!(c.max_append_attempts, 5);
        assert_eq!(c.queue_capacity, 1024);
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(LedgerConfig::from_toml_str("").unwrap(), LedgerConfig::default());
    }

    #[test]
    fn partial_toml_overrides_fields() {
        let c = LedgerConfig::from_toml_str(
            r#"
            database_path = "/var/lib/cmp/ledger.db"
            env = "production"
            busy_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(c.database_path, PathBuf::from("/var/lib/cmp/ledger.db"));
        assert!(c.is_production());
        assert_eq!(c.sqlite_options().busy_timeout, Duration::from_millis(250));
        assert_eq!(c.retry_backoff_ms, 10);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            LedgerConfig::from_toml_str("max_append_attempts = 0"),
            Err(LedgerError::Config(_))
        ));
        assert!(matches!(
            LedgerConfig::from_toml_str("queue_capacity = \"lots\""),
            Err(LedgerError::Config(_))
        ));
    }

    #[test]
    fn overrides_take_precedence() {
        let vars: HashMap<&str, &str> = [
            (ENV_DATABASE_PATH, "/tmp/other.db"),
            (ENV_NAME, "Production"),
        ]
        .into_iter()
        .collect();
        let c = LedgerConfig::default()
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(c.database_path, PathBuf::from("/tmp/other.db"));
        assert!(c.is_production());
    }

    #[test]
    fn empty_overrides_are_ignored() {
        let c = LedgerConfig::default().apply_overrides(|_| Some(String::new()));
        assert_eq!(c, LedgerConfig::default());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmp.toml");
        std::fs::write(&path, "queue_capacity = 8\n").unwrap();
        assert_eq!(LedgerConfig::load(&path).unwrap().queue_capacity, 8);
        assert!(LedgerConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
