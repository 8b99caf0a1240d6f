//! Shared setup for integration tests.
//!
//! These tests need a real PostgreSQL instance. Configuration is explicit:
//! set TEST_DATABASE_URL to opt in (DATABASE_URL is never read, to keep
//! tests away from production databases). When unset, every test skips.

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Connect to the test database, or `None` to skip the calling test.
pub async fn test_pool() -> Option<PgPool> {
    let url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("TEST_DATABASE_URL not set; skipping database test");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    Some(pool)
}

/// Drop leftover tables so reruns start clean.
pub async fn drop_tables(pool: &PgPool, tables: &[&str]) {
    for table in tables {
        sqlx::query(&format!(r#"DROP TABLE IF EXISTS "{table}" CASCADE"#))
            .execute(pool)
            .await
            .expect("failed to drop test table");
    }
}

/// Does a table exist in the current database?
pub async fn table_exists(pool: &PgPool, table: &str) -> bool {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
    )
    .bind(table)
    .fetch_one(pool)
    .await
    .expect("failed to query information_schema.tables")
}

/// Does a column exist on a table?
pub async fn column_exists(pool: &PgPool, table: &str, column: &str) -> bool {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.columns \
         WHERE table_name = $1 AND column_name = $2)",
    )
    .bind(table)
    .bind(column)
    .fetch_one(pool)
    .await
    .expect("failed to query information_schema.columns")
}

/// Does an index exist in the current schema?
pub async fn index_exists(pool: &PgPool, index: &str) -> bool {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_indexes WHERE indexname = $1)")
        .bind(index)
        .fetch_one(pool)
        .await
        .expect("failed to query pg_indexes")
}

/// Ledger rows as plain tuples, ordered by version.
pub async fn ledger_rows(pool: &PgPool, table: &str) -> Vec<(i64, String, Option<String>)> {
    sqlx::query_as(&format!(
        r#"SELECT version, name, checksum FROM "{table}" ORDER BY version"#
    ))
    .fetch_all(pool)
    .await
    .expect("failed to read ledger table")
}
