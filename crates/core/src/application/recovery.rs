// Crash recovery: lost workers and lost publishes
use crate::application::worker::constants::DEFAULT_STALE_PENDING_MS;
use crate::application::worker::ShutdownToken;
use crate::domain::{JobError, JobErrorKind, JobRecord, JobStatus, TaskDescriptor};
use crate::error::Result;
use crate::port::{JobRepository, TaskQueue, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// What one recovery sweep did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// RUNNING jobs whose lease expired, now FAILED (or CANCELLED if requested)
    pub lost: usize,
    /// PENDING jobs whose descriptor was published again
    pub republished: usize,
}

/// Crash recovery service
///
/// Runs at daemon startup and periodically afterwards.
pub struct RecoveryService {
    job_repo: Arc<dyn JobRepository>,
    queue: Arc<dyn TaskQueue>,
    time_provider: Arc<dyn TimeProvider>,
    stale_pending_ms: i64,
}

impl RecoveryService {
    /// Create a new recovery service
    ///
    /// # Arguments
    /// * `stale_pending_ms` - Pending age before republishing (default: 5 minutes)
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        queue: Arc<dyn TaskQueue>,
        time_provider: Arc<dyn TimeProvider>,
        stale_pending_ms: Option<i64>,
    ) -> Self {
        Self {
            job_repo,
            queue,
            time_provider,
            stale_pending_ms: stale_pending_ms.unwrap_or(DEFAULT_STALE_PENDING_MS),
        }
    }

    /// Run both sweeps once
    pub async fn run_once(&self) -> Result<RecoveryReport> {
        let lost = self.recover_expired_leases().await?;
        let republished = self.republish_stale_pending().await?;
        Ok(RecoveryReport { lost, republished })
    }

    /// Fail RUNNING jobs whose owner stopped renewing its lease
    ///
    /// A job with a pending cancel request is cancelled instead.
    pub async fn recover_expired_leases(&self) -> Result<usize> {
        let now = self.time_provider.now_millis();
        let expired = self.job_repo.find_expired_leases(now).await?;
        let mut recovered = 0;

        for mut job in expired {
            warn!(
                job_id = %job.id,
                worker_id = ?job.worker_id,
                lease_expires_at = ?job.lease_expires_at,
                "Lease expired, declaring worker lost"
            );

            if let Err(e) = mark_lost(&mut job, now) {
                error!(job_id = %job.id, error = %e, "Cannot mark job lost");
                continue;
            }
            // A concurrent renewal or finish wins
            if self
                .job_repo
                .compare_and_set(JobStatus::Running, &mut job)
                .await?
            {
                recovered += 1;
            }
        }

        if recovered > 0 {
            info!(recovered, "Expired leases recovered");
        }
        Ok(recovered)
    }

    /// Publish descriptors again for jobs still PENDING after the threshold
    ///
    /// Only jobs with no unacknowledged message are republished; a job whose
    /// descriptor is merely waiting behind a busy pool is left alone.
    pub async fn republish_stale_pending(&self) -> Result<usize> {
        let now = self.time_provider.now_millis();
        let stale = self
            .job_repo
            .find_stale_pending(now - self.stale_pending_ms)
            .await?;

        let mut republished = 0;
        for job in &stale {
            if self.queue.has_outstanding(&job.id).await? {
                continue;
            }
            self.queue
                .publish(&TaskDescriptor {
                    job_id: job.id.clone(),
                    input_ref: job.input_ref.clone(),
                    enqueued_at: now,
                })
                .await?;
            republished += 1;
        }

        if republished > 0 {
            info!(republished, "Stale pending jobs republished");
        }
        Ok(republished)
    }

    /// Periodic loop (background task) until shutdown
    pub async fn run(self, every: Duration, mut shutdown: ShutdownToken) {
        info!(interval_secs = every.as_secs(), "Recovery loop started");
        loop {
            if shutdown.sleep(every).await {
                break;
            }
            if let Err(e) = self.run_once().await {
                error!(error = %e, "Recovery sweep failed");
            }
        }
        info!("Recovery loop stopped");
    }
}

fn mark_lost(job: &mut JobRecord, now: i64) -> crate::domain::error::Result<()> {
    if job.cancel_requested {
        return job.cancel(now);
    }
    let error = JobError::new(
        JobErrorKind::WorkerLost,
        format!(
            "Worker {} stopped renewing its lease",
            job.worker_id.as_deref().unwrap_or("unknown")
        ),
        job.attempt_count,
    );
    job.fail(now, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::gateway::SubmitRequest;
    use crate::application::test_support::{feasible_problem, Harness};

    async fn submit(h: &Harness) -> String {
        h.gateway
            .submit(SubmitRequest {
                project_id: "p".into(),
                name: "n".into(),
                problem: feasible_problem(),
            })
            .await
            .unwrap()
    }

    fn service(h: &Harness) -> RecoveryService {
        RecoveryService::new(
            Arc::new(h.repo.clone()),
            Arc::new(h.queue.clone()),
            h.clock.clone(),
            Some(60_000),
        )
    }

    async fn claim(h: &Harness, id: &str, lease_ms: i64) -> JobRecord {
        let mut job = h.gateway.get_status(id).await.unwrap();
        let now = h.clock.now_millis();
        job.start(now, "w-dead", now + lease_ms).unwrap();
        job.begin_attempt().unwrap();
        assert!(h.repo.compare_and_set(JobStatus::Pending, &mut job).await.unwrap());
        job
    }

    #[tokio::test]
    async fn test_expired_lease_marks_worker_lost() {
        let h = Harness::new();
        let id = submit(&h).await;
        claim(&h, &id, 10_000).await;
        let recovery = service(&h);

        assert_eq!(recovery.recover_expired_leases().await.unwrap(), 0);

        h.clock.advance(10_001);
        assert_eq!(recovery.recover_expired_leases().await.unwrap(), 1);

        let job = h.gateway.get_status(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let error = job.error.unwrap();
        assert_eq!(error.kind, JobErrorKind::WorkerLost);
        assert_eq!(error.attempt, 1);
        assert!(job.lease_expires_at.is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_with_cancel_request_is_cancelled() {
        let h = Harness::new();
        let id = submit(&h).await;
        claim(&h, &id, 1_000).await;
        h.gateway.cancel(&id).await.unwrap();

        h.clock.advance(5_000);
        service(&h).run_once().await.unwrap();
        assert_eq!(
            h.gateway.get_status(&id).await.unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_stale_pending_republished() {
        let h = Harness::new();
        h.queue.set_unavailable(true);
        let id = submit(&h).await;
        h.queue.set_unavailable(false);
        assert_eq!(h.queue.published_count(&id), 0);

        let recovery = service(&h);
        assert_eq!(recovery.run_once().await.unwrap(), RecoveryReport::default());

        h.clock.advance(60_001);
        let report = recovery.run_once().await.unwrap();
        assert_eq!(report.republished, 1);
        assert_eq!(h.queue.published_count(&id), 1);
    }

    #[tokio::test]
    async fn test_queued_descriptor_is_not_republished() {
        let h = Harness::new();
        let id = submit(&h).await;
        assert_eq!(h.queue.published_count(&id), 1);

        let recovery = service(&h);
        h.clock.advance(60_001);
        for _ in 0..5 {
            assert_eq!(recovery.run_once().await.unwrap().republished, 0);
            h.clock.advance(30_000);
        }
        assert_eq!(h.queue.published_count(&id), 1);
        assert_eq!(h.queue.outstanding().await.unwrap(), 1);

        // Once the message is gone the job qualifies again
        let delivery = h.queue.receive(Duration::from_secs(30)).await.unwrap().unwrap();
        assert!(h.queue.ack(&delivery.receipt).await.unwrap());
        assert_eq!(recovery.run_once().await.unwrap().republished, 1);
        assert_eq!(recovery.run_once().await.unwrap().republished, 0);
        assert_eq!(h.queue.published_count(&id), 2);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let h = Harness::new();
        let (tx, token) = crate::application::worker::shutdown_channel();
        let handle = tokio::spawn(service(&h).run(Duration::from_secs(3600), token));
        tx.shutdown();
        handle.await.unwrap();
    }
}
