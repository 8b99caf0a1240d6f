//! The migration runner.
//!
//! One run: acquire the store lock, read source and ledger, validate
//! history, compute the plan, execute each unit in its own transaction with
//! the matching ledger write, release the lock on every exit path.

use std::sync::Arc;
use std::time::Duration;

use sqlx::{Connection, PgConnection, PgPool};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stratum_core::error::{MigrateError, Result};
use stratum_core::migration::{AppliedMigration, Direction, Migration};

use crate::ledger::Ledger;
use crate::lock::MigrationLock;
use crate::plan::{self, PlanStep, RevertScope};
use crate::source::MigrationSource;

/// Default wait for the migration lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Summary of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Units executed and committed, in execution order.
    pub executed: Vec<ExecutedStep>,
    /// True when the run stopped early because cancellation was requested.
    /// Everything in `executed` is committed regardless.
    pub interrupted: bool,
}

impl RunReport {
    fn empty() -> Self {
        Self {
            executed: Vec::new(),
            interrupted: false,
        }
    }
}

/// One committed unit.
#[derive(Debug, Clone)]
pub struct ExecutedStep {
    pub version: i64,
    pub name: String,
    pub direction: Direction,
}

/// Read-only view of applied history and pending work.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub applied: Vec<AppliedStatus>,
    pub pending: Vec<PendingStatus>,
}

/// One applied ledger entry, annotated against the current source.
#[derive(Debug, Clone)]
pub struct AppliedStatus {
    pub entry: AppliedMigration,
    /// The source still provides this unit.
    pub known: bool,
    /// The unit carries a down script.
    pub has_down: bool,
    /// Stored checksum no longer matches the unit's content.
    pub drifted: bool,
}

/// One unapplied unit.
#[derive(Debug, Clone)]
pub struct PendingStatus {
    pub version: i64,
    pub name: String,
}

enum Request {
    Up { target: Option<i64> },
    Down { scope: RevertScope },
}

/// Executes migration runs against a target store.
pub struct Runner {
    pool: PgPool,
    source: Arc<dyn MigrationSource>,
    ledger: Ledger,
    lock_timeout: Duration,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(pool: PgPool, source: Arc<dyn MigrationSource>) -> Self {
        Self {
            pool,
            source,
            ledger: Ledger::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Stop between units when this token fires. The in-flight unit's
    /// transaction always finishes or rolls back whole.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Apply every pending migration, oldest first.
    pub async fn up(&self) -> Result<RunReport> {
        self.run(Request::Up { target: None }).await
    }

    /// Apply pending migrations up to and including `version`.
    pub async fn up_to(&self, version: i64) -> Result<RunReport> {
        self.run(Request::Up {
            target: Some(version),
        })
        .await
    }

    /// Revert the `n` most recently applied migrations.
    pub async fn down(&self, n: usize) -> Result<RunReport> {
        self.run(Request::Down {
            scope: RevertScope::Steps(n),
        })
        .await
    }

    /// Revert every applied migration above `version`. Zero reverts
    /// everything.
    pub async fn down_to(&self, version: i64) -> Result<RunReport> {
        self.run(Request::Down {
            scope: RevertScope::ToVersion(version),
        })
        .await
    }

    /// Applied history plus pending work. Read-only, takes no lock.
    pub async fn status(&self) -> Result<StatusReport> {
        let available = self.source.load()?;

        let mut conn = self.pool.acquire().await?;
        let applied = self.ledger.applied(&mut conn).await?;

        let applied_versions: std::collections::HashSet<i64> =
            applied.iter().map(|e| e.version).collect();

        let applied = applied
            .into_iter()
            .map(|entry| {
                let unit = available.iter().find(|m| m.version == entry.version);
                AppliedStatus {
                    known: unit.is_some(),
                    has_down: unit.map_or(false, Migration::has_down),
                    drifted: match (&entry.checksum, unit) {
                        (Some(stored), Some(unit)) => *stored != unit.checksum(),
                        _ => false,
                    },
                    entry,
                }
            })
            .collect();

        let pending = available
            .iter()
            .filter(|m| !applied_versions.contains(&m.version))
            .map(|m| PendingStatus {
                version: m.version,
                name: m.name.clone(),
            })
            .collect();

        Ok(StatusReport { applied, pending })
    }

    async fn run(&self, request: Request) -> Result<RunReport> {
        // Discovery runs before locking; a broken source should not take the
        // lock at all.
        let available = self.source.load()?;

        let mut lock = MigrationLock::acquire(&self.pool, self.lock_timeout).await?;

        let result = self.run_locked(&available, &request, lock.conn()).await;

        // Always release, even on error
        if let Err(e) = lock.release().await {
            warn!("Failed to release migration lock: {}", e);
        }

        result
    }

    async fn run_locked(
        &self,
        available: &[Migration],
        request: &Request,
        conn: &mut PgConnection,
    ) -> Result<RunReport> {
        let applied = self.ledger.applied(conn).await?;
        plan::validate_history(available, &applied)?;

        let steps = match request {
            Request::Up { target } => plan::plan_up(available, &applied, *target)?,
            Request::Down { scope } => plan::plan_down(available, &applied, *scope)?,
        };

        if steps.is_empty() {
            info!("Ledger is up to date, nothing to do");
            return Ok(RunReport::empty());
        }
        debug!(steps = steps.len(), "Computed migration plan");

        // First write path: a forward plan may be writing the very first
        // ledger entry.
        if matches!(request, Request::Up { .. }) {
            self.ledger.ensure(conn).await?;
        }

        let mut report = RunReport::empty();
        for step in &steps {
            if self.cancel.is_cancelled() {
                info!(
                    "Cancellation requested, stopping before version {}",
                    step.migration.version
                );
                report.interrupted = true;
                break;
            }

            self.execute_step(step, conn).await?;
            report.executed.push(ExecutedStep {
                version: step.migration.version,
                name: step.migration.name.clone(),
                direction: step.direction,
            });
        }

        Ok(report)
    }

    /// Run one unit inside its own transaction.
    ///
    /// The script statements and the ledger write commit together; on any
    /// failure the dropped transaction rolls both back and the error aborts
    /// the whole run.
    async fn execute_step(&self, step: &PlanStep, conn: &mut PgConnection) -> Result<()> {
        let migration = &step.migration;
        match step.direction {
            Direction::Up => debug!("Applying {} ({})", migration.version, migration.name),
            Direction::Down => debug!("Reverting {} ({})", migration.version, migration.name),
        }

        let script = match step.direction {
            Direction::Up => &migration.up,
            Direction::Down => {
                migration
                    .down
                    .as_ref()
                    .ok_or_else(|| MigrateError::Irreversible {
                        version: migration.version,
                        name: migration.name.clone(),
                    })?
            }
        };

        let mut tx = conn.begin().await?;

        for statement in script.statements() {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| MigrateError::Execution {
                    version: migration.version,
                    name: migration.name.clone(),
                    direction: step.direction,
                    source: e,
                })?;
        }

        match step.direction {
            Direction::Up => self.ledger.record_applied(&mut *tx, migration).await?,
            Direction::Down => {
                self.ledger
                    .record_reverted(&mut *tx, migration.version)
                    .await?
            }
        }

        tx.commit().await?;

        match step.direction {
            Direction::Up => info!("Applied {} ({})", migration.version, migration.name),
            Direction::Down => info!("Reverted {} ({})", migration.version, migration.name),
        }
        Ok(())
    }
}
