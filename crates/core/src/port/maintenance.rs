// DB Maintenance port
use crate::error::Result;
use async_trait::async_trait;

/// Database maintenance statistics
#[derive(Debug, Clone)]
pub struct MaintenanceStats {
    pub db_size_mb: f64,
    pub db_size_bytes: i64,
    pub job_count: i64,
    pub terminal_job_count: i64,
    pub outstanding_message_count: i64,
    pub acked_message_count: i64,
    pub blob_count: i64,
}

/// Maintenance configuration
///
/// Job records are never purged: failed jobs stay queryable with their cause.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Retention period for acknowledged queue messages (hours)
    pub acked_retention_hours: i64,

    /// Maximum DB size before forcing VACUUM (MB)
    pub max_db_size_mb: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            acked_retention_hours: 24, // Keep acked messages for a day
            max_db_size_mb: 1000.0,    // 1GB max
        }
    }
}

/// Database maintenance operations
#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Run VACUUM to reclaim space and optimize DB
    ///
    /// # Returns
    /// Space reclaimed in MB
    async fn vacuum(&self) -> Result<f64>;

    /// Delete acknowledged queue messages older than the retention period
    ///
    /// # Returns
    /// Number of messages deleted
    async fn purge_acked_messages(&self, retention_hours: i64) -> Result<i64>;

    /// Get maintenance statistics
    async fn get_stats(&self) -> Result<MaintenanceStats>;

    /// Run full maintenance (purge + VACUUM when the DB is large)
    async fn run_full_maintenance(&self, config: &MaintenanceConfig) -> Result<MaintenanceStats> {
        let stats_before = self.get_stats().await?;

        let purged = self
            .purge_acked_messages(config.acked_retention_hours)
            .await?;

        let reclaimed_mb = if stats_before.db_size_mb > config.max_db_size_mb {
            self.vacuum().await?
        } else {
            0.0
        };

        let stats_after = self.get_stats().await?;

        tracing::info!(
            purged_messages = purged,
            reclaimed_mb = reclaimed_mb,
            db_size_mb = stats_after.db_size_mb,
            "Maintenance completed"
        );

        Ok(stats_after)
    }
}
