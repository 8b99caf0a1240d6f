mod migrate;
mod new;

use std::path::Path;

use clap::{Parser, Subcommand};

use stratum_core::config::{MigrationsConfig, StratumConfig};
use stratum_core::error::{MigrateError, Result};

/// Schema migrations for PostgreSQL.
#[derive(Parser)]
#[command(name = "stratum")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path.
    #[arg(short, long, default_value = "stratum.toml", global = true)]
    pub config: String,

    /// Migrations directory (overrides configuration).
    #[arg(short, long, global = true)]
    pub migrations_dir: Option<String>,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Apply all pending migrations.
    Up,

    /// Apply pending migrations up to and including VERSION.
    UpTo { version: i64 },

    /// Revert the most recently applied migrations.
    Down {
        /// Number of migrations to revert.
        #[arg(default_value = "1")]
        count: usize,
    },

    /// Revert every applied migration above VERSION (0 reverts everything).
    DownTo { version: i64 },

    /// Show applied and pending migrations.
    Status,

    /// Create the next migration's up/down file pair.
    New {
        /// Migration name (e.g., "create_users").
        name: String,
    },
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match &self.command {
            Commands::New { name } => new::create_migration(&self.resolve_migrations_dir(), name),
            _ => migrate::execute(&self).await,
        }
    }

    /// Migrations directory for commands that never touch the database.
    fn resolve_migrations_dir(&self) -> String {
        if let Some(dir) = &self.migrations_dir {
            return dir.clone();
        }
        if Path::new(&self.config).exists() {
            if let Ok(config) = StratumConfig::from_file(&self.config) {
                return config.migrations.dir;
            }
        }
        MigrationsConfig::default().dir
    }
}

/// Load configuration, falling back to DATABASE_URL when no file exists.
pub fn load_config(path: &str) -> Result<StratumConfig> {
    if Path::new(path).exists() {
        return StratumConfig::from_file(path);
    }
    if let Ok(url) = std::env::var("DATABASE_URL") {
        return Ok(StratumConfig::default_with_database_url(&url));
    }
    Err(MigrateError::Config(format!(
        "{} not found and DATABASE_URL is not set",
        path
    )))
}

/// Process exit code for a failed run.
///
/// 2 = lock timeout, 3 = pre-flight validation failure, 4 = execution or
/// ledger-write failure, 1 = anything else.
pub fn exit_code(err: &MigrateError) -> u8 {
    match err {
        MigrateError::LockTimeout { .. } => 2,
        e if e.is_preflight() => 3,
        MigrateError::Execution { .. } | MigrateError::LedgerWrite { .. } => 4,
        _ => 1,
    }
}
