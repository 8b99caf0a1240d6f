use std::time::Duration;

use thiserror::Error;

pub use crate::migration::Direction;

/// Core error type for stratum operations.
///
/// Pre-flight variants (`Discovery`, `DuplicateVersion`, `HistoryMismatch`,
/// `OutOfOrder`, `ChecksumMismatch`, `UnknownVersion`, `Irreversible`) are
/// raised before any transaction opens; the store is untouched and the run
/// is safe to retry once the cause is fixed. Mid-run variants (`Execution`,
/// `LedgerWrite`) abort the current unit's transaction and the run, leaving
/// the ledger as of the last committed unit.
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Migration discovery failed: {0}")]
    Discovery(String),

    #[error("Duplicate migration version {version}: {first} and {second}")]
    DuplicateVersion {
        version: i64,
        first: String,
        second: String,
    },

    #[error("Ledger records version {version} but the migration source no longer provides it")]
    HistoryMismatch { version: i64 },

    #[error(
        "Version {version} ({name}) is unapplied but version {applied} is already applied; \
         refusing to apply out of order"
    )]
    OutOfOrder {
        version: i64,
        name: String,
        applied: i64,
    },

    #[error("Checksum mismatch for version {version} ({name}): content changed since it was applied")]
    ChecksumMismatch { version: i64, name: String },

    #[error("Target version {0} is not known to the migration source")]
    UnknownVersion(i64),

    #[error("Version {version} ({name}) has no down migration")]
    Irreversible { version: i64, name: String },

    #[error("Timed out after {waited:?} waiting for the migration lock")]
    LockTimeout { waited: Duration },

    #[error("Migration ledger is unavailable: {0}")]
    LedgerUnavailable(#[source] sqlx::Error),

    #[error("Failed to record version {version} in the ledger: {source}")]
    LedgerWrite {
        version: i64,
        #[source]
        source: sqlx::Error,
    },

    #[error("Migration {version} ({name}) failed during {direction}: {source}")]
    Execution {
        version: i64,
        name: String,
        direction: Direction,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// True for validation errors raised before any transaction opened.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            MigrateError::Discovery(_)
                | MigrateError::DuplicateVersion { .. }
                | MigrateError::HistoryMismatch { .. }
                | MigrateError::OutOfOrder { .. }
                | MigrateError::ChecksumMismatch { .. }
                | MigrateError::UnknownVersion(_)
                | MigrateError::Irreversible { .. }
        )
    }
}

/// Result type alias using MigrateError.
pub type Result<T> = std::result::Result<T, MigrateError>;
