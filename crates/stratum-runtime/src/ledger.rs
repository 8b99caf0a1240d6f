//! Persisted record of applied migrations, colocated with the target store.

use sqlx::{PgConnection, Row};
use tracing::debug;

use stratum_core::error::{MigrateError, Result};
use stratum_core::migration::{AppliedMigration, Migration};

/// Default ledger table name.
pub const DEFAULT_TABLE: &str = "stratum_migrations";

/// The ledger: one row per applied version.
///
/// Only the runner mutates the ledger, and only inside the same transaction
/// as the corresponding schema change. Reads tolerate a ledger that does not
/// exist yet; creation happens on the first write path via [`Ledger::ensure`].
pub struct Ledger {
    table: String,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE)
    }
}

impl Ledger {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Create the ledger table if it does not exist.
    pub async fn ensure(&self, conn: &mut PgConnection) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{}" (
                version BIGINT PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                checksum TEXT
            )
            "#,
            self.table
        ))
        .execute(conn)
        .await?;

        Ok(())
    }

    /// All applied migrations, ordered by version.
    ///
    /// A ledger table that does not exist yet reads as empty history; any
    /// other read failure is `LedgerUnavailable`.
    pub async fn applied(&self, conn: &mut PgConnection) -> Result<Vec<AppliedMigration>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT version, name, applied_at, checksum
            FROM "{}"
            ORDER BY version ASC
            "#,
            self.table
        ))
        .fetch_all(conn)
        .await;

        match rows {
            Ok(rows) => Ok(rows
                .iter()
                .map(|row| AppliedMigration {
                    version: row.get("version"),
                    name: row.get("name"),
                    applied_at: row.get("applied_at"),
                    checksum: row.get("checksum"),
                })
                .collect()),
            Err(e) if is_undefined_table(&e) => {
                debug!("Ledger table \"{}\" does not exist yet", self.table);
                Ok(Vec::new())
            }
            Err(e) => Err(MigrateError::LedgerUnavailable(e)),
        }
    }

    /// Record a migration as applied.
    ///
    /// Must run on the same transaction as the migration's forward script. A
    /// uniqueness violation here signals a concurrency or ordering bug and
    /// aborts the enclosing transaction.
    pub async fn record_applied(
        &self,
        conn: &mut PgConnection,
        migration: &Migration,
    ) -> Result<()> {
        sqlx::query(&format!(
            r#"INSERT INTO "{}" (version, name, checksum) VALUES ($1, $2, $3)"#,
            self.table
        ))
        .bind(migration.version)
        .bind(&migration.name)
        .bind(migration.checksum())
        .execute(conn)
        .await
        .map_err(|e| MigrateError::LedgerWrite {
            version: migration.version,
            source: e,
        })?;

        Ok(())
    }

    /// Remove a migration's ledger entry.
    ///
    /// Must run on the same transaction as the migration's backward script.
    pub async fn record_reverted(&self, conn: &mut PgConnection, version: i64) -> Result<()> {
        let result = sqlx::query(&format!(r#"DELETE FROM "{}" WHERE version = $1"#, self.table))
            .bind(version)
            .execute(conn)
            .await
            .map_err(|e| MigrateError::LedgerWrite { version, source: e })?;

        // A revert for a version the ledger never recorded is an ordering bug.
        if result.rows_affected() == 0 {
            return Err(MigrateError::LedgerWrite {
                version,
                source: sqlx::Error::RowNotFound,
            });
        }

        Ok(())
    }
}

fn is_undefined_table(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("42P01")
    )
}
