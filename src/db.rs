//! SQLite schema management.

use anyhow::Result;
use sqlx::SqlitePool;

/// Schema for buckets, objects and document pointers.
const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Run the embedded migration statements one by one. Idempotent.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}
