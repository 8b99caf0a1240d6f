//! End-to-end runner behavior against a real PostgreSQL.
//!
//! Each test uses its own ledger table and its own target tables, so tests
//! can run concurrently against one shared database. Runs still serialize on
//! the store-wide migration lock, which is the behavior under test anyway.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use stratum_core::error::MigrateError;
use stratum_core::migration::{Migration, Script};
use stratum_runtime::ledger::Ledger;
use stratum_runtime::lock::MigrationLock;
use stratum_runtime::runner::Runner;
use stratum_runtime::source::StaticSource;

fn example_migrations(prefix: &str) -> Vec<Migration> {
    vec![
        Migration::new(
            1,
            "create_users",
            Script::new(format!("CREATE TABLE {prefix}_users (id BIGINT PRIMARY KEY, username TEXT NOT NULL)")),
        )
        .with_down(Script::new(format!("DROP TABLE {prefix}_users"))),
        Migration::new(
            2,
            "add_email_column",
            Script::new(format!("ALTER TABLE {prefix}_users ADD COLUMN email TEXT")),
        )
        .with_down(Script::new(format!("ALTER TABLE {prefix}_users DROP COLUMN email"))),
        Migration::new(
            3,
            "add_index",
            Script::new(format!("CREATE INDEX {prefix}_users_email_idx ON {prefix}_users (email)")),
        )
        .with_down(Script::new(format!("DROP INDEX {prefix}_users_email_idx"))),
    ]
}

fn runner(pool: &sqlx::PgPool, migrations: Vec<Migration>, ledger_table: &str) -> Runner {
    Runner::new(pool.clone(), Arc::new(StaticSource::new(migrations)))
        .with_ledger(Ledger::new(ledger_table))
}

#[tokio::test]
async fn up_applies_everything_in_order() {
    let Some(pool) = common::test_pool().await else { return };
    common::drop_tables(&pool, &["ledger_up", "up_users"]).await;

    let report = runner(&pool, example_migrations("up"), "ledger_up")
        .up()
        .await
        .unwrap();

    let versions: Vec<i64> = report.executed.iter().map(|s| s.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    assert!(!report.interrupted);

    let rows = common::ledger_rows(&pool, "ledger_up").await;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].1, "create_users");
    assert!(rows.iter().all(|(_, _, checksum)| checksum.is_some()));

    assert!(common::table_exists(&pool, "up_users").await);
    assert!(common::column_exists(&pool, "up_users", "email").await);
    assert!(common::index_exists(&pool, "up_users_email_idx").await);
}

#[tokio::test]
async fn up_twice_is_idempotent() {
    let Some(pool) = common::test_pool().await else { return };
    common::drop_tables(&pool, &["ledger_idem", "idem_users"]).await;

    let runner = runner(&pool, example_migrations("idem"), "ledger_idem");

    let first = runner.up().await.unwrap();
    assert_eq!(first.executed.len(), 3);

    let before: Vec<(i64, String, chrono::DateTime<chrono::Utc>, Option<String>)> =
        sqlx::query_as("SELECT version, name, applied_at, checksum FROM ledger_idem ORDER BY version")
            .fetch_all(&pool)
            .await
            .unwrap();

    let second = runner.up().await.unwrap();
    assert!(second.executed.is_empty());

    let after: Vec<(i64, String, chrono::DateTime<chrono::Utc>, Option<String>)> =
        sqlx::query_as("SELECT version, name, applied_at, checksum FROM ledger_idem ORDER BY version")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn example_scenario_up_down_up_to() {
    let Some(pool) = common::test_pool().await else { return };
    common::drop_tables(&pool, &["ledger_scenario", "scenario_users"]).await;

    let runner = runner(&pool, example_migrations("scenario"), "ledger_scenario");

    // up: applies v1, v2, v3 in order
    let report = runner.up().await.unwrap();
    assert_eq!(
        report.executed.iter().map(|s| s.version).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    // down 2: reverts v3 then v2
    let report = runner.down(2).await.unwrap();
    assert_eq!(
        report.executed.iter().map(|s| s.version).collect::<Vec<_>>(),
        vec![3, 2]
    );
    let rows = common::ledger_rows(&pool, "ledger_scenario").await;
    assert_eq!(rows.iter().map(|r| r.0).collect::<Vec<_>>(), vec![1]);

    // up-to 2: re-applies v2 only
    let report = runner.up_to(2).await.unwrap();
    assert_eq!(
        report.executed.iter().map(|s| s.version).collect::<Vec<_>>(),
        vec![2]
    );
    let rows = common::ledger_rows(&pool, "ledger_scenario").await;
    assert_eq!(rows.iter().map(|r| r.0).collect::<Vec<_>>(), vec![1, 2]);
}

#[tokio::test]
async fn round_trip_restores_v1_schema() {
    let Some(pool) = common::test_pool().await else { return };
    common::drop_tables(&pool, &["ledger_rt", "rt_users"]).await;

    let runner = runner(&pool, example_migrations("rt"), "ledger_rt");

    runner.up().await.unwrap();
    runner.down_to(1).await.unwrap();

    let rows = common::ledger_rows(&pool, "ledger_rt").await;
    assert_eq!(rows.iter().map(|r| r.0).collect::<Vec<_>>(), vec![1]);

    // Schema equals the state observed right after v1.
    assert!(common::table_exists(&pool, "rt_users").await);
    assert!(!common::column_exists(&pool, "rt_users", "email").await);
    assert!(!common::index_exists(&pool, "rt_users_email_idx").await);
}

#[tokio::test]
async fn down_to_zero_reverts_everything() {
    let Some(pool) = common::test_pool().await else { return };
    common::drop_tables(&pool, &["ledger_zero", "zero_users"]).await;

    let runner = runner(&pool, example_migrations("zero"), "ledger_zero");

    runner.up().await.unwrap();
    let report = runner.down_to(0).await.unwrap();
    assert_eq!(
        report.executed.iter().map(|s| s.version).collect::<Vec<_>>(),
        vec![3, 2, 1]
    );

    assert!(common::ledger_rows(&pool, "ledger_zero").await.is_empty());
    assert!(!common::table_exists(&pool, "zero_users").await);
}

#[tokio::test]
async fn failed_unit_aborts_atomically() {
    let Some(pool) = common::test_pool().await else { return };
    common::drop_tables(&pool, &["ledger_abort", "abort_a", "abort_b", "abort_c"]).await;

    let migrations = vec![
        Migration::new(1, "a", Script::new("CREATE TABLE abort_a (id BIGINT)")),
        // Multi-statement unit: the first statement succeeds, the second
        // fails. Neither may survive.
        Migration::new(
            2,
            "b",
            Script::new(
                "CREATE TABLE abort_b (id BIGINT);\nINSERT INTO abort_b VALUES ('not a number')",
            ),
        ),
        Migration::new(3, "c", Script::new("CREATE TABLE abort_c (id BIGINT)")),
    ];

    let err = runner(&pool, migrations, "ledger_abort").up().await.unwrap_err();
    match err {
        MigrateError::Execution { version, ref name, .. } => {
            assert_eq!(version, 2);
            assert_eq!(name, "b");
        }
        other => panic!("expected Execution error, got {other:?}"),
    }

    // v1 committed, v2 rolled back whole, v3 never attempted.
    let rows = common::ledger_rows(&pool, "ledger_abort").await;
    assert_eq!(rows.iter().map(|r| r.0).collect::<Vec<_>>(), vec![1]);
    assert!(common::table_exists(&pool, "abort_a").await);
    assert!(!common::table_exists(&pool, "abort_b").await);
    assert!(!common::table_exists(&pool, "abort_c").await);
}

#[tokio::test]
async fn concurrent_runs_apply_exactly_once() {
    let Some(pool) = common::test_pool().await else { return };
    common::drop_tables(&pool, &["ledger_race", "race_users"]).await;

    let a = runner(&pool, example_migrations("race"), "ledger_race");
    let b = runner(&pool, example_migrations("race"), "ledger_race");

    let (ra, rb) = tokio::join!(a.up(), b.up());
    let ra = ra.unwrap();
    let rb = rb.unwrap();

    // One run does the work; the other finds nothing pending.
    assert_eq!(ra.executed.len() + rb.executed.len(), 3);
    assert!(ra.executed.is_empty() || rb.executed.is_empty());

    let rows = common::ledger_rows(&pool, "ledger_race").await;
    assert_eq!(rows.iter().map(|r| r.0).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[tokio::test]
async fn contended_lock_times_out_cleanly() {
    let Some(pool) = common::test_pool().await else { return };
    common::drop_tables(&pool, &["ledger_lock", "lock_users"]).await;

    let lock = MigrationLock::acquire(&pool, Duration::from_secs(5))
        .await
        .unwrap();

    let err = runner(&pool, example_migrations("lock"), "ledger_lock")
        .with_lock_timeout(Duration::from_millis(300))
        .up()
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::LockTimeout { .. }));

    // No partial writes happened while locked out.
    assert!(!common::table_exists(&pool, "lock_users").await);

    lock.release().await.unwrap();
}

#[tokio::test]
async fn missing_applied_unit_is_a_history_mismatch() {
    let Some(pool) = common::test_pool().await else { return };
    common::drop_tables(&pool, &["ledger_gone", "gone_users"]).await;

    let migrations = example_migrations("gone");
    runner(&pool, migrations.clone(), "ledger_gone").up().await.unwrap();

    // The source no longer provides v1.
    let err = runner(&pool, migrations[1..].to_vec(), "ledger_gone")
        .up()
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::HistoryMismatch { version: 1 }));
}

#[tokio::test]
async fn edited_applied_unit_is_a_checksum_mismatch() {
    let Some(pool) = common::test_pool().await else { return };
    common::drop_tables(&pool, &["ledger_drift", "drift_users"]).await;

    let mut migrations = example_migrations("drift");
    runner(&pool, migrations.clone(), "ledger_drift").up().await.unwrap();

    migrations[0].up = Script::new("CREATE TABLE drift_users (id BIGINT, renamed TEXT)");
    let err = runner(&pool, migrations, "ledger_drift").up().await.unwrap_err();
    assert!(matches!(err, MigrateError::ChecksumMismatch { version: 1, .. }));
}

#[tokio::test]
async fn late_arriving_lower_version_is_out_of_order() {
    let Some(pool) = common::test_pool().await else { return };
    common::drop_tables(&pool, &["ledger_order", "order_users"]).await;

    // v2 does not exist yet; applying v1 then v3 is a legal value gap.
    let sparse = vec![
        Migration::new(1, "a", Script::new("CREATE TABLE order_users (id BIGINT)")),
        Migration::new(3, "c", Script::new("ALTER TABLE order_users ADD COLUMN c TEXT")),
    ];
    let report = runner(&pool, sparse.clone(), "ledger_order").up().await.unwrap();
    assert_eq!(
        report.executed.iter().map(|s| s.version).collect::<Vec<_>>(),
        vec![1, 3]
    );

    // v2 then appears in the source below the applied high-water mark.
    let with_late = vec![
        sparse[0].clone(),
        Migration::new(2, "b", Script::new("ALTER TABLE order_users ADD COLUMN b TEXT")),
        sparse[1].clone(),
    ];
    let err = runner(&pool, with_late, "ledger_order").up().await.unwrap_err();
    assert!(matches!(err, MigrateError::OutOfOrder { version: 2, .. }));
}

#[tokio::test]
async fn cancellation_stops_between_units() {
    let Some(pool) = common::test_pool().await else { return };
    common::drop_tables(&pool, &["ledger_cancel", "cancel_users"]).await;

    let token = CancellationToken::new();
    token.cancel();

    let report = runner(&pool, example_migrations("cancel"), "ledger_cancel")
        .with_cancellation(token)
        .up()
        .await
        .unwrap();

    assert!(report.interrupted);
    assert!(report.executed.is_empty());
    assert!(!common::table_exists(&pool, "cancel_users").await);
}

#[tokio::test]
async fn status_reports_applied_and_pending() {
    let Some(pool) = common::test_pool().await else { return };
    common::drop_tables(&pool, &["ledger_status", "status_users"]).await;

    let migrations = example_migrations("status");
    let runner = runner(&pool, migrations, "ledger_status");

    // Before anything runs, reads must not create the ledger.
    let status = runner.status().await.unwrap();
    assert!(status.applied.is_empty());
    assert_eq!(status.pending.len(), 3);
    assert!(!common::table_exists(&pool, "ledger_status").await);

    runner.up_to(2).await.unwrap();

    let status = runner.status().await.unwrap();
    assert_eq!(status.applied.len(), 2);
    assert!(status.applied.iter().all(|a| a.known && a.has_down && !a.drifted));
    assert_eq!(status.pending.len(), 1);
    assert_eq!(status.pending[0].version, 3);
}

#[tokio::test]
async fn reverting_a_unit_without_down_is_rejected_preflight() {
    let Some(pool) = common::test_pool().await else { return };
    common::drop_tables(&pool, &["ledger_nodown", "nodown_a", "nodown_b"]).await;

    let migrations = vec![
        Migration::new(1, "a", Script::new("CREATE TABLE nodown_a (id BIGINT)"))
            .with_down(Script::new("DROP TABLE nodown_a")),
        Migration::new(2, "b", Script::new("CREATE TABLE nodown_b (id BIGINT)")),
    ];

    let runner = runner(&pool, migrations, "ledger_nodown");
    runner.up().await.unwrap();

    let err = runner.down(2).await.unwrap_err();
    assert!(matches!(err, MigrateError::Irreversible { version: 2, .. }));

    // Pre-flight: nothing was reverted, not even the reversible v1.
    let rows = common::ledger_rows(&pool, "ledger_nodown").await;
    assert_eq!(rows.iter().map(|r| r.0).collect::<Vec<_>>(), vec![1, 2]);
    assert!(common::table_exists(&pool, "nodown_a").await);
    assert!(common::table_exists(&pool, "nodown_b").await);
}
