mod database;

pub use database::DatabaseConfig;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MigrateError, Result};

/// Root configuration for stratum, loaded from `stratum.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumConfig {
    /// Target database.
    pub database: DatabaseConfig,

    /// Migration discovery and ledger settings.
    #[serde(default)]
    pub migrations: MigrationsConfig,
}

impl StratumConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MigrateError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        // Substitute environment variables
        let content = substitute_env_vars(content);

        toml::from_str(&content)
            .map_err(|e| MigrateError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Configuration with defaults for everything but the database URL.
    pub fn default_with_database_url(url: &str) -> Self {
        Self {
            database: DatabaseConfig {
                url: url.to_string(),
                ..Default::default()
            },
            migrations: MigrationsConfig::default(),
        }
    }
}

/// Migration discovery and ledger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Directory containing `NNNN_name.up.sql` / `NNNN_name.down.sql` files.
    #[serde(default = "default_dir")]
    pub dir: String,

    /// Ledger table name.
    #[serde(default = "default_table")]
    pub table: String,

    /// How long to wait for the migration lock before giving up, in seconds.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            table: default_table(),
            lock_timeout_secs: default_lock_timeout(),
        }
    }
}

fn default_dir() -> String {
    "migrations".to_string()
}

fn default_table() -> String {
    "stratum_migrations".to_string()
}

fn default_lock_timeout() -> u64 {
    30
}

/// Substitute `${VAR_NAME}` placeholders with environment variable values.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}
