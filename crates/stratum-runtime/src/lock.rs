//! Store-scoped mutual exclusion for migration runs.

use std::time::{Duration, Instant};

use sqlx::{Connection, PgConnection, PgPool};
use tracing::{debug, warn};

use stratum_core::error::{MigrateError, Result};

/// Upper 32 bits of every stratum advisory-lock key ("STRM" in hex).
const LOCK_SPACE: i64 = 0x5354_524D;

/// How often to re-try a contended lock.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A held migration lock.
///
/// Wraps a PostgreSQL advisory lock taken on a dedicated session that lives
/// exactly as long as the handle. The key combines [`LOCK_SPACE`] with the
/// target database's OID, so two runs against the same database serialize
/// while runs against different databases never contend.
///
/// The session is the lock's lifetime guarantee: advisory locks are released
/// by the server when their session ends, so a crashed process cannot leave
/// the store locked.
pub struct MigrationLock {
    conn: PgConnection,
    key: i64,
}

impl MigrationLock {
    /// Acquire the lock, polling until granted or `timeout` elapses.
    pub async fn acquire(pool: &PgPool, timeout: Duration) -> Result<Self> {
        // The lock must live and die with one session, so detach a
        // connection from the pool rather than borrowing one.
        let mut conn = pool.acquire().await?.detach();

        let oid: i64 = sqlx::query_scalar(
            "SELECT oid::int8 FROM pg_database WHERE datname = current_database()",
        )
        .fetch_one(&mut conn)
        .await?;
        let key = (LOCK_SPACE << 32) | oid;

        let started = Instant::now();
        loop {
            let granted: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
                .bind(key)
                .fetch_one(&mut conn)
                .await?;

            if granted {
                debug!(key, "Migration lock acquired");
                return Ok(Self { conn, key });
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(MigrateError::LockTimeout { waited: timeout });
            }

            debug!(key, "Migration lock contended, retrying");
            tokio::time::sleep(POLL_INTERVAL.min(timeout - elapsed)).await;
        }
    }

    /// The session holding the lock.
    ///
    /// All run work goes through this connection so the lock and every
    /// migration transaction share one session.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// Unlock and end the session.
    pub async fn release(mut self) -> Result<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .execute(&mut self.conn)
            .await?;
        debug!(key = self.key, "Migration lock released");

        if let Err(e) = self.conn.close().await {
            warn!("Failed to close lock session: {}", e);
        }

        Ok(())
    }
}
