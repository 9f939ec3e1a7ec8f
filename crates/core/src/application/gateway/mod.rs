// Job Gateway - boundary API for submitting, observing and cancelling jobs

pub mod submit;

#[cfg(test)]
mod submit_test;

pub use submit::{SubmitItem, SubmitRequest};

use crate::application::worker::constants::{DEFAULT_MAX_ATTEMPTS, MAX_CAS_RETRIES};
use crate::domain::{JobError, JobId, JobRecord, JobStatus, SolverOutcome};
use crate::error::{AppError, Result};
use crate::port::{
    get_json, BlobStore, IdProvider, JobRepository, TaskQueue, TimeProvider,
    TransactionalJobRepository,
};
use std::sync::Arc;
use tracing::info;

/// Outcome of a terminal job
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded(SolverOutcome),
    Failed(JobError),
    Cancelled,
}

pub struct JobGateway {
    job_repo: Arc<dyn JobRepository>,
    tx_repo: Arc<dyn TransactionalJobRepository>,
    queue: Arc<dyn TaskQueue>,
    blobs: Arc<dyn BlobStore>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    max_attempts: u32,
}

impl JobGateway {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        tx_repo: Arc<dyn TransactionalJobRepository>,
        queue: Arc<dyn TaskQueue>,
        blobs: Arc<dyn BlobStore>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            job_repo,
            tx_repo,
            queue,
            blobs,
            id_provider,
            time_provider,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Retry budget given to new jobs
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn submit_context(&self) -> submit::SubmitContext<'_> {
        submit::SubmitContext {
            job_repo: self.tx_repo.as_ref(),
            queue: self.queue.as_ref(),
            blobs: self.blobs.as_ref(),
            id_provider: self.id_provider.as_ref(),
            time_provider: self.time_provider.as_ref(),
            max_attempts: self.max_attempts,
        }
    }

    /// Submit one problem in a fresh group
    ///
    /// # Errors
    /// - AppError::Validation if the request is malformed (nothing is written)
    pub async fn submit(&self, req: SubmitRequest) -> Result<JobId> {
        let item = SubmitItem {
            name: req.name,
            problem: req.problem,
        };
        let mut ids = submit::execute(&self.submit_context(), &req.project_id, vec![item]).await?;
        ids.pop()
            .ok_or_else(|| AppError::Internal("submission produced no job".to_string()))
    }

    /// Submit several problems of one project as a single group
    pub async fn submit_group(
        &self,
        project_id: &str,
        items: Vec<SubmitItem>,
    ) -> Result<Vec<JobId>> {
        submit::execute(&self.submit_context(), project_id, items).await
    }

    /// Current record of a job
    pub async fn get_status(&self, job_id: &str) -> Result<JobRecord> {
        self.job_repo
            .find_by_id(&job_id.to_string())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))
    }

    /// Best-effort cancellation
    ///
    /// PENDING jobs are cancelled at once. RUNNING jobs are flagged and the
    /// owning worker ends them at its next check. Terminal jobs are returned
    /// unchanged.
    pub async fn cancel(&self, job_id: &str) -> Result<JobRecord> {
        for _ in 0..MAX_CAS_RETRIES {
            let mut job = self.get_status(job_id).await?;
            let expected = job.status;
            match expected {
                JobStatus::Pending => job.cancel(self.time_provider.now_millis())?,
                JobStatus::Running if job.cancel_requested => return Ok(job),
                JobStatus::Running => job.request_cancel()?,
                _ => return Ok(job),
            }

            if self.job_repo.compare_and_set(expected, &mut job).await? {
                info!(
                    job_id = %job_id,
                    from = %expected,
                    status = %job.status,
                    "Cancel recorded"
                );
                return Ok(job);
            }
        }
        Err(AppError::Conflict(format!(
            "Job {} kept changing while cancelling",
            job_id
        )))
    }

    /// Outcome of a terminal job
    ///
    /// # Errors
    /// - AppError::NotFound if the job is unknown
    /// - AppError::NotReady while the job is PENDING or RUNNING
    pub async fn get_result(&self, job_id: &str) -> Result<JobOutcome> {
        let job = self.get_status(job_id).await?;
        match job.status {
            JobStatus::Succeeded => {
                let result_ref = job.result_ref.ok_or_else(|| {
                    AppError::Internal(format!("Job {} succeeded without a result", job_id))
                })?;
                let outcome = get_json(self.blobs.as_ref(), &result_ref).await?;
                Ok(JobOutcome::Succeeded(outcome))
            }
            JobStatus::Failed => job.error.map(JobOutcome::Failed).ok_or_else(|| {
                AppError::Internal(format!("Job {} failed without an error", job_id))
            }),
            JobStatus::Cancelled => Ok(JobOutcome::Cancelled),
            status => Err(AppError::NotReady(format!("Job {} is {}", job_id, status))),
        }
    }

    /// Jobs of the project's latest submission group
    pub async fn project_jobs(&self, project_id: &str) -> Result<Vec<JobRecord>> {
        match self.job_repo.latest_group(project_id).await? {
            Some(group) => self.job_repo.find_by_project_group(project_id, group).await,
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{feasible_problem, Harness};

    fn request(project: &str) -> SubmitRequest {
        SubmitRequest {
            project_id: project.to_string(),
            name: "main".to_string(),
            problem: feasible_problem(),
        }
    }

    #[tokio::test]
    async fn test_submit_then_status_is_pending() {
        let h = Harness::new();
        let id = h.gateway.submit(request("p1")).await.unwrap();

        let job = h.gateway.get_status(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.group, 1);
        assert_eq!(job.attempt_count, 0);
        assert_eq!(h.queue.published_count(&id), 1);
    }

    #[tokio::test]
    async fn test_invalid_submission_never_reaches_queue() {
        let h = Harness::new();
        let mut req = request("p1");
        req.problem.criteria.clear();

        let err = tokio_test::assert_err!(h.gateway.submit(req).await);
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(h.queue.outstanding().await.unwrap(), 0);
        assert!(h.blobs.is_empty());
        assert_eq!(h.repo.latest_group("p1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_publish_failure_still_returns_id() {
        let h = Harness::new();
        h.queue.set_unavailable(true);

        let id = h.gateway.submit(request("p1")).await.unwrap();
        let job = h.gateway.get_status(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_failed_insert_removes_payloads() {
        let h = Harness::new();
        h.repo.set_unavailable(true);

        let items = vec![
            SubmitItem {
                name: "a".into(),
                problem: feasible_problem(),
            },
            SubmitItem {
                name: "b".into(),
                problem: feasible_problem(),
            },
        ];
        let err = tokio_test::assert_err!(h.gateway.submit_group("p1", items).await);
        assert!(matches!(err, AppError::Database(_)));
        assert!(h.blobs.is_empty());
        assert_eq!(h.queue.outstanding().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_job_not_found() {
        let h = Harness::new();
        assert!(matches!(
            h.gateway.get_status("nope").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            h.gateway.get_result("nope").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_result_not_ready_while_pending() {
        let h = Harness::new();
        let id = h.gateway.submit(request("p1")).await.unwrap();
        assert!(matches!(
            h.gateway.get_result(&id).await,
            Err(AppError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_pending_and_terminal_is_stable() {
        let h = Harness::new();
        let id = h.gateway.submit(request("p1")).await.unwrap();

        let cancelled = h.gateway.cancel(&id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.finished_at.is_some());

        let again = h.gateway.cancel(&id).await.unwrap();
        assert_eq!(again.status, JobStatus::Cancelled);
        assert_eq!(again.version, cancelled.version);
        assert_eq!(h.gateway.get_result(&id).await.unwrap(), JobOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_running_sets_flag() {
        let h = Harness::new();
        let id = h.gateway.submit(request("p1")).await.unwrap();

        let mut job = h.gateway.get_status(&id).await.unwrap();
        job.start(h.clock.now_millis(), "w-0", i64::MAX).unwrap();
        assert!(h.repo.compare_and_set(JobStatus::Pending, &mut job).await.unwrap());

        let flagged = h.gateway.cancel(&id).await.unwrap();
        assert_eq!(flagged.status, JobStatus::Running);
        assert!(flagged.cancel_requested);
    }

    #[tokio::test]
    async fn test_groups_and_project_jobs() {
        let h = Harness::new();
        assert!(h.gateway.project_jobs("p1").await.unwrap().is_empty());

        h.gateway.submit(request("p1")).await.unwrap();
        let items = vec![
            SubmitItem {
                name: "a".into(),
                problem: feasible_problem(),
            },
            SubmitItem {
                name: "b".into(),
                problem: feasible_problem(),
            },
        ];
        let ids = h.gateway.submit_group("p1", items).await.unwrap();
        assert_eq!(ids.len(), 2);

        let latest = h.gateway.project_jobs("p1").await.unwrap();
        assert_eq!(latest.len(), 2);
        assert!(latest.iter().all(|j| j.group == 2));

        // Other projects number their groups independently
        let other = h.gateway.submit(request("p2")).await.unwrap();
        assert_eq!(h.gateway.get_status(&other).await.unwrap().group, 1);
    }

    #[tokio::test]
    async fn test_group_rejected_as_a_whole() {
        let h = Harness::new();
        let mut bad = feasible_problem();
        bad.alternatives.clear();
        let items = vec![
            SubmitItem {
                name: "good".into(),
                problem: feasible_problem(),
            },
            SubmitItem {
                name: "bad".into(),
                problem: bad,
            },
        ];
        assert!(h.gateway.submit_group("p1", items).await.is_err());
        assert!(h.gateway.project_jobs("p1").await.unwrap().is_empty());
        assert!(h.gateway.submit_group("p1", vec![]).await.is_err());
    }
}
