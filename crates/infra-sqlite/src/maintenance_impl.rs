// SQLite Maintenance Implementation
use crate::error::map_sqlx_error;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;
use utagms_core::error::Result;
use utagms_core::port::{Maintenance, MaintenanceStats, TimeProvider};

/// SQLite maintenance implementation
pub struct SqliteMaintenance {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteMaintenance {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    async fn db_size_bytes(&self) -> Result<i64> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(page_count * page_size)
    }

    async fn count(&self, sql: &str) -> Result<i64> {
        sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

fn to_mb(bytes: i64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn vacuum(&self) -> Result<f64> {
        info!("Running VACUUM to optimize database...");

        let size_before = to_mb(self.db_size_bytes().await?);

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let size_after = to_mb(self.db_size_bytes().await?);
        let reclaimed = (size_before - size_after).max(0.0);

        info!(
            size_before_mb = size_before,
            size_after_mb = size_after,
            reclaimed_mb = reclaimed,
            "VACUUM completed"
        );

        Ok(reclaimed)
    }

    async fn purge_acked_messages(&self, retention_hours: i64) -> Result<i64> {
        let cutoff = self.time_provider.now_millis() - retention_hours * 60 * 60 * 1000;

        let result = sqlx::query("DELETE FROM task_messages WHERE acked_at IS NOT NULL AND acked_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let deleted = result.rows_affected() as i64;
        info!(deleted_messages = deleted, cutoff = cutoff, "Acked message purge completed");

        Ok(deleted)
    }

    async fn get_stats(&self) -> Result<MaintenanceStats> {
        let db_size_bytes = self.db_size_bytes().await?;

        Ok(MaintenanceStats {
            db_size_mb: to_mb(db_size_bytes),
            db_size_bytes,
            job_count: self.count("SELECT COUNT(*) FROM job_records").await?,
            terminal_job_count: self
                .count(
                    "SELECT COUNT(*) FROM job_records WHERE status IN ('SUCCEEDED', 'FAILED', 'CANCELLED')",
                )
                .await?,
            outstanding_message_count: self
                .count("SELECT COUNT(*) FROM task_messages WHERE acked_at IS NULL")
                .await?,
            acked_message_count: self
                .count("SELECT COUNT(*) FROM task_messages WHERE acked_at IS NOT NULL")
                .await?,
            blob_count: self.count("SELECT COUNT(*) FROM blobs").await?,
        })
    }
}
