// Maintenance Service
// Periodic purge of acknowledged queue messages and DB compaction

use crate::application::worker::ShutdownToken;
use crate::error::Result;
use crate::port::{Maintenance, MaintenanceConfig, MaintenanceStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Maintenance scheduler
///
/// Runs periodic maintenance operations in the background
pub struct MaintenanceScheduler {
    maintenance: Arc<dyn Maintenance>,
    config: MaintenanceConfig,
    interval_hours: u64,
}

impl MaintenanceScheduler {
    /// Create a new maintenance scheduler
    ///
    /// # Arguments
    /// * `maintenance` - Maintenance implementation
    /// * `config` - Maintenance configuration
    /// * `interval_hours` - How often to run maintenance (hours)
    pub fn new(
        maintenance: Arc<dyn Maintenance>,
        config: MaintenanceConfig,
        interval_hours: u64,
    ) -> Self {
        Self {
            maintenance,
            config,
            interval_hours: interval_hours.max(1),
        }
    }

    /// Run maintenance loop until shutdown
    ///
    /// The first tick fires immediately, so maintenance also runs at startup.
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_hours = self.interval_hours,
            acked_retention_hours = self.config.acked_retention_hours,
            "Maintenance scheduler started"
        );

        let mut tick = interval(Duration::from_secs(self.interval_hours * 3600));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.wait() => break,
            }

            match self.maintenance.run_full_maintenance(&self.config).await {
                Ok(stats) => {
                    info!(
                        db_size_mb = stats.db_size_mb,
                        job_count = stats.job_count,
                        terminal_jobs = stats.terminal_job_count,
                        outstanding_messages = stats.outstanding_message_count,
                        blobs = stats.blob_count,
                        "Scheduled maintenance completed successfully"
                    );
                }
                Err(e) => {
                    error!(error = ?e, "Scheduled maintenance failed");
                }
            }
        }

        info!("Maintenance scheduler stopped");
    }

    /// Run maintenance immediately (for manual trigger)
    pub async fn run_now(&self) -> Result<MaintenanceStats> {
        info!("Running manual maintenance...");
        self.maintenance.run_full_maintenance(&self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingMaintenance {
        purges: AtomicUsize,
        vacuums: AtomicUsize,
        size_mb: f64,
    }

    #[async_trait]
    impl Maintenance for CountingMaintenance {
        async fn vacuum(&self) -> Result<f64> {
            self.vacuums.fetch_add(1, Ordering::SeqCst);
            Ok(1.0)
        }

        async fn purge_acked_messages(&self, _retention_hours: i64) -> Result<i64> {
            self.purges.fetch_add(1, Ordering::SeqCst);
            Ok(3)
        }

        async fn get_stats(&self) -> Result<MaintenanceStats> {
            Ok(MaintenanceStats {
                db_size_mb: self.size_mb,
                db_size_bytes: (self.size_mb * 1024.0 * 1024.0) as i64,
                job_count: 0,
                terminal_job_count: 0,
                outstanding_message_count: 0,
                acked_message_count: 0,
                blob_count: 0,
            })
        }
    }

    #[tokio::test]
    async fn test_vacuum_only_when_oversized() {
        let small = Arc::new(CountingMaintenance::default());
        MaintenanceScheduler::new(small.clone(), MaintenanceConfig::default(), 24)
            .run_now()
            .await
            .unwrap();
        assert_eq!(small.purges.load(Ordering::SeqCst), 1);
        assert_eq!(small.vacuums.load(Ordering::SeqCst), 0);

        let large = Arc::new(CountingMaintenance {
            size_mb: 5000.0,
            ..Default::default()
        });
        MaintenanceScheduler::new(large.clone(), MaintenanceConfig::default(), 24)
            .run_now()
            .await
            .unwrap();
        assert_eq!(large.vacuums.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_runs_at_startup_and_stops_on_shutdown() {
        let maintenance = Arc::new(CountingMaintenance::default());
        let (tx, token) = crate::application::worker::shutdown_channel();
        let scheduler = MaintenanceScheduler::new(maintenance.clone(), MaintenanceConfig::default(), 1);
        let handle = tokio::spawn(scheduler.run(token));

        for _ in 0..100 {
            if maintenance.purges.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.shutdown();
        handle.await.unwrap();
        assert_eq!(maintenance.purges.load(Ordering::SeqCst), 1);
    }
}
