// Migration Runner

use crate::error::map_sqlx_error;
use sqlx::SqlitePool;
use tracing::info;
use utagms_core::error::Result;

const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "Job records and project groups",
        include_str!("../migrations/001_job_records.sql"),
    ),
    (
        2,
        "Task queue",
        include_str!("../migrations/002_task_queue.sql"),
    ),
    (3, "Blob store", include_str!("../migrations/003_blobs.sql")),
    (
        4,
        "Task queue job index",
        include_str!("../migrations/004_task_queue_job_index.sql"),
    ),
];

/// Run database migrations
///
/// Every database gets the full schema, so the store, queue and blob
/// adapters may share one file or use separate ones.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;

    let current_version: i64 = if table_exists > 0 {
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await
            .map_err(map_sqlx_error)?
            .unwrap_or(0)
    } else {
        0
    };

    info!("Current schema version: {}", current_version);

    for (version, description, sql) in MIGRATIONS {
        if current_version < *version {
            info!("Applying migration {:03}: {}", version, description);
            apply_migration(pool, sql).await?;
        }
    }

    info!("All migrations applied successfully");
    Ok(())
}

/// Apply a single migration SQL file
async fn apply_migration(pool: &SqlitePool, sql: &str) -> Result<()> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;

    // Split by semicolon and execute each statement
    for statement in sql.split(';') {
        let clean_statement: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        if !clean_statement.is_empty() {
            sqlx::query(&clean_statement)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
    }

    tx.commit().await.map_err(map_sqlx_error)?;
    Ok(())
}
