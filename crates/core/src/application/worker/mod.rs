// Worker - claims deliveries and drives one job at a time to a terminal state

pub mod constants;
mod pool;
mod shutdown;


use constants::*;
pub use pool::WorkerPool;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::error::Result as DomainResult;
use crate::domain::{
    BlobRef, DecisionProblem, Delivery, DeliveryReceipt, JobError, JobErrorKind, JobRecord,
    JobStatus, SolverOutcome,
};
use crate::error::{AppError, Result};
use crate::port::{
    get_json, put_json, BlobStore, JobRepository, Solver, SolverError, TaskQueue, TimeProvider,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Per-worker knobs
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub worker_id: String,
    /// Deadline of one solver attempt
    pub attempt_deadline: Duration,
    /// Visibility timeout requested on receive
    pub visibility_timeout: Duration,
    /// Slack on top of the deadline for leases and visibility extensions
    pub lease_grace: Duration,
}

impl WorkerSettings {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            attempt_deadline: DEFAULT_ATTEMPT_DEADLINE,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            lease_grace: DEFAULT_LEASE_GRACE,
        }
    }

    fn lease_span(&self) -> Duration {
        self.attempt_deadline + self.lease_grace
    }
}

/// Terminal state decided by the attempt loop
#[derive(Debug)]
enum Verdict {
    Succeeded(BlobRef),
    Failed(JobError),
    Cancelled,
}

/// Whether this worker still owns the running record
#[derive(Debug, PartialEq, Eq)]
enum Ownership {
    Held,
    CancelRequested,
    /// Record left RUNNING or changed owner (lease declared lost)
    Lost,
}

/// Worker processes deliveries from the task queue
pub struct Worker {
    settings: WorkerSettings,
    job_repo: Arc<dyn JobRepository>,
    queue: Arc<dyn TaskQueue>,
    blobs: Arc<dyn BlobStore>,
    solver: Arc<dyn Solver>,
    retry_policy: Arc<RetryPolicy>,
    time_provider: Arc<dyn TimeProvider>,
}

impl Worker {
    pub fn new(
        settings: WorkerSettings,
        job_repo: Arc<dyn JobRepository>,
        queue: Arc<dyn TaskQueue>,
        blobs: Arc<dyn BlobStore>,
        solver: Arc<dyn Solver>,
        retry_policy: Arc<RetryPolicy>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            settings,
            job_repo,
            queue,
            blobs,
            solver,
            retry_policy,
            time_provider,
        }
    }

    pub fn id(&self) -> &str {
        &self.settings.worker_id
    }

    /// Run worker loop with graceful shutdown support
    ///
    /// The job in hand is always finished; shutdown is only observed between jobs.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(worker_id = %self.id(), "Worker started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            match self.process_next_job().await {
                Ok(true) => {}
                Ok(false) => {
                    // No delivery available, sleep briefly (or wait for shutdown)
                    if shutdown.sleep(IDLE_SLEEP_DURATION).await {
                        info!(worker_id = %self.id(), "Worker interrupted during idle");
                        break;
                    }
                }
                Err(e) => {
                    error!(worker_id = %self.id(), error = %e, "Worker error");
                    if shutdown.sleep(ERROR_RECOVERY_SLEEP_DURATION).await {
                        info!(worker_id = %self.id(), "Worker interrupted during error recovery");
                        break;
                    }
                }
            }
        }
        info!(worker_id = %self.id(), "Worker stopped");
        Ok(())
    }

    /// Claim and handle one delivery (returns true if a delivery was consumed)
    ///
    /// On error the delivery is released for redelivery instead of acked.
    pub async fn process_next_job(&self) -> Result<bool> {
        let Some(delivery) = self.queue.receive(self.settings.visibility_timeout).await? else {
            return Ok(false);
        };

        if let Err(e) = self.handle_delivery(&delivery).await {
            warn!(
                job_id = %delivery.descriptor.job_id,
                error = %e,
                "Releasing delivery after error"
            );
            if let Err(release_err) = self.queue.release(&delivery.receipt).await {
                warn!(
                    job_id = %delivery.descriptor.job_id,
                    error = %release_err,
                    "Release failed; delivery reappears after its visibility timeout"
                );
            }
            return Err(e);
        }
        Ok(true)
    }

    async fn handle_delivery(&self, delivery: &Delivery) -> Result<()> {
        let job_id = &delivery.descriptor.job_id;

        let Some(mut job) = self.job_repo.find_by_id(job_id).await? else {
            warn!(job_id = %job_id, "Delivery for unknown job, dropping");
            return self.ack(delivery).await;
        };

        let now = self.time_provider.now_millis();
        match job.status {
            JobStatus::Pending => {}
            JobStatus::Running if self.may_take_over(&job, now) => {
                info!(
                    job_id = %job_id,
                    previous_worker = ?job.worker_id,
                    delivery_count = delivery.delivery_count,
                    "Resuming a running job left behind by its owner"
                );
            }
            JobStatus::Running => {
                info!(
                    job_id = %job_id,
                    delivery_count = delivery.delivery_count,
                    "Duplicate delivery of a job leased elsewhere, dropping"
                );
                return self.ack(delivery).await;
            }
            status => {
                debug!(job_id = %job_id, status = %status, "Job already terminal, dropping delivery");
                return self.ack(delivery).await;
            }
        }

        // Payload first: an unreachable blob store must leave the record untouched
        let problem = match get_json::<DecisionProblem>(self.blobs.as_ref(), &job.input_ref).await
        {
            Ok(problem) => Ok(Arc::new(problem)),
            Err(e) if e.is_infrastructure() => return Err(e),
            Err(e) => Err(e),
        };

        let expected = job.status;
        let resumed = expected == JobStatus::Running;
        let now = self.time_provider.now_millis();
        if resumed {
            job.take_over(self.id(), self.lease_deadline(now))?;
        } else {
            job.start(now, self.id(), self.lease_deadline(now))?;
        }
        if !self.job_repo.compare_and_set(expected, &mut job).await? {
            info!(job_id = %job_id, "Lost the claim race, dropping delivery");
            return self.ack(delivery).await;
        }
        info!(
            job_id = %job_id,
            worker_id = %self.id(),
            delivery_count = delivery.delivery_count,
            resumed,
            "Job claimed"
        );

        match self.run_claimed(&mut job, problem, delivery, resumed).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.hand_back(&mut job).await;
                Err(e)
            }
        }
    }

    /// Everything after a successful claim: attempts, terminal write, ack
    async fn run_claimed(
        &self,
        job: &mut JobRecord,
        problem: Result<Arc<DecisionProblem>>,
        delivery: &Delivery,
        resumed: bool,
    ) -> Result<()> {
        let verdict = match problem {
            Ok(problem) => self.execute(job, problem, &delivery.receipt, resumed).await?,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Input payload unusable");
                Some(Verdict::Failed(JobError::new(
                    JobErrorKind::SolverResourceError,
                    format!("Input payload unavailable: {}", e),
                    job.attempt_count,
                )))
            }
        };

        if let Some(verdict) = verdict {
            if let Some(done) = self.finish(job, verdict).await? {
                info!(
                    job_id = %done.id,
                    status = %done.status,
                    attempts = done.attempt_count,
                    "Job finished"
                );
            }
        }

        // Ack only once the terminal state is durable
        self.ack(delivery).await
    }

    /// Attempt loop: run the solver until success, a final failure or a cancel
    ///
    /// A resumed job re-runs its interrupted attempt under the same number,
    /// so infrastructure faults never eat into the retry budget.
    /// Returns None if ownership of the record was lost.
    async fn execute(
        &self,
        job: &mut JobRecord,
        problem: Arc<DecisionProblem>,
        receipt: &DeliveryReceipt,
        resumed: bool,
    ) -> Result<Option<Verdict>> {
        let mut rerun = resumed && job.attempt_count > 0;
        loop {
            let lease = self.lease_deadline(self.time_provider.now_millis());
            let counted = !std::mem::take(&mut rerun);
            let attempt = match self
                .save_running(job, move |j| {
                    if counted {
                        j.begin_attempt()?;
                    }
                    j.renew_lease(lease)
                })
                .await?
            {
                Ownership::Held => job.attempt_count,
                Ownership::CancelRequested => return Ok(Some(Verdict::Cancelled)),
                Ownership::Lost => return Ok(None),
            };

            self.extend_visibility(receipt, &job.id, self.settings.lease_span())
                .await;
            let result = self
                .attempt(&job.id, Arc::clone(&problem), attempt, lease)
                .await;

            if !self.refresh(job).await? {
                warn!(job_id = %job.id, "Lease lost during attempt, dropping result");
                return Ok(None);
            }
            if job.cancel_requested {
                info!(job_id = %job.id, attempt, "Cancel observed after attempt");
                return Ok(Some(Verdict::Cancelled));
            }

            let err = match result {
                Ok(outcome) => {
                    let result_ref = put_json(self.blobs.as_ref(), &outcome).await?;
                    return Ok(Some(Verdict::Succeeded(result_ref)));
                }
                Err(err) => err,
            };

            match self.retry_policy.should_retry(job, &err) {
                RetryDecision::Retry(delay_ms) => {
                    let delay = Duration::from_millis(delay_ms.max(0) as u64);
                    match self.backoff(job, receipt, delay).await? {
                        Ownership::Held => {}
                        Ownership::CancelRequested => return Ok(Some(Verdict::Cancelled)),
                        Ownership::Lost => return Ok(None),
                    }
                }
                RetryDecision::Failed => {
                    return Ok(Some(Verdict::Failed(err.to_job_error(attempt))));
                }
            }
        }
    }

    /// One solver invocation on a spawned task (panic isolation)
    ///
    /// `lease_expires_at` bounds the whole attempt: it is abandoned while the
    /// lease still has room left for recording the verdict.
    async fn attempt(
        &self,
        job_id: &str,
        problem: Arc<DecisionProblem>,
        attempt: u32,
        lease_expires_at: i64,
    ) -> std::result::Result<SolverOutcome, SolverError> {
        let deadline = self.settings.attempt_deadline;
        let solver = Arc::clone(&self.solver);
        let bound = self.attempt_bound(lease_expires_at);

        info!(
            job_id = %job_id,
            attempt,
            deadline_ms = deadline.as_millis() as u64,
            "Invoking solver"
        );

        let handle = tokio::spawn(async move { solver.invoke(&problem, deadline).await });
        let abort = handle.abort_handle();

        // The adapter enforces its own deadline; this bounds adapters that do not
        let result = match tokio::time::timeout(bound, handle).await
        {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                let reason = panic_message(join_err);
                error!(job_id = %job_id, attempt, reason = %reason, "Solver attempt panicked");
                Err(SolverError::Crash {
                    reason,
                    exit_code: None,
                    stderr: None,
                })
            }
            Err(_) => {
                abort.abort();
                warn!(job_id = %job_id, attempt, "Solver overran its deadline, attempt aborted");
                Err(SolverError::Timeout {
                    after_ms: deadline.as_millis() as i64,
                    stderr: None,
                })
            }
        };

        match &result {
            Ok(outcome) => info!(
                job_id = %job_id,
                attempt,
                infeasible = outcome.is_infeasible(),
                "Solver attempt finished"
            ),
            Err(e) => warn!(job_id = %job_id, attempt, error = %e, "Solver attempt failed"),
        }
        result
    }

    /// Wait out a retry delay, renewing the lease and watching for cancellation
    async fn backoff(
        &self,
        job: &mut JobRecord,
        receipt: &DeliveryReceipt,
        delay: Duration,
    ) -> Result<Ownership> {
        let lease = self.lease_deadline(self.time_provider.now_millis()) + delay.as_millis() as i64;
        let held = self.save_running(job, move |j| j.renew_lease(lease)).await?;
        if held != Ownership::Held {
            return Ok(held);
        }
        self.extend_visibility(receipt, &job.id, self.settings.lease_span() + delay)
            .await;

        let mut remaining = delay;
        while !remaining.is_zero() {
            let step = remaining.min(CANCEL_POLL_INTERVAL);
            tokio::time::sleep(step).await;
            remaining -= step;

            if !self.refresh(job).await? {
                return Ok(Ownership::Lost);
            }
            if job.cancel_requested {
                info!(job_id = %job.id, "Cancel observed during backoff");
                return Ok(Ownership::CancelRequested);
            }
        }
        Ok(Ownership::Held)
    }

    /// Write the terminal state
    ///
    /// A cancel request observed at this point wins over the verdict.
    async fn finish(&self, job: &mut JobRecord, verdict: Verdict) -> Result<Option<JobRecord>> {
        for _ in 0..MAX_CAS_RETRIES {
            let now = self.time_provider.now_millis();
            let mut next = job.clone();
            if next.cancel_requested {
                next.cancel(now)?;
            } else {
                match &verdict {
                    Verdict::Succeeded(result_ref) => next.succeed(now, result_ref.clone())?,
                    Verdict::Failed(error) => next.fail(now, error.clone())?,
                    Verdict::Cancelled => next.cancel(now)?,
                }
            }

            if self
                .job_repo
                .compare_and_set(JobStatus::Running, &mut next)
                .await?
            {
                return Ok(Some(next));
            }
            if !self.refresh(job).await? {
                warn!(job_id = %job.id, "Job left RUNNING before its verdict was written");
                return Ok(None);
            }
        }
        Err(AppError::Conflict(format!(
            "Job {} stayed contended while writing its terminal state",
            job.id
        )))
    }

    /// Apply `apply` to the running record and persist it with compare-and-set
    ///
    /// Lost races reload the record and reapply; a cancel request seen on
    /// reload stops the update.
    async fn save_running<F>(&self, job: &mut JobRecord, apply: F) -> Result<Ownership>
    where
        F: Fn(&mut JobRecord) -> DomainResult<()> + Send + Sync,
    {
        for _ in 0..MAX_CAS_RETRIES {
            if job.cancel_requested {
                return Ok(Ownership::CancelRequested);
            }
            let mut next = job.clone();
            apply(&mut next)?;
            if self
                .job_repo
                .compare_and_set(JobStatus::Running, &mut next)
                .await?
            {
                *job = next;
                return Ok(Ownership::Held);
            }
            if !self.refresh(job).await? {
                return Ok(Ownership::Lost);
            }
        }
        Err(AppError::Conflict(format!("Job {} stayed contended", job.id)))
    }

    /// Expire this worker's lease after an infrastructure fault
    ///
    /// The released delivery may land on any worker of the pool; an expired
    /// lease lets that worker resume the job instead of dropping it.
    async fn hand_back(&self, job: &mut JobRecord) {
        if job.status != JobStatus::Running || job.worker_id.as_deref() != Some(self.id()) {
            return;
        }
        let now = self.time_provider.now_millis();
        match self.save_running(job, move |j| j.renew_lease(now)).await {
            Ok(Ownership::Held) => debug!(job_id = %job.id, "Lease handed back"),
            Ok(_) => {}
            Err(e) => warn!(
                job_id = %job.id,
                error = %e,
                "Could not hand back lease; the job resumes once it expires"
            ),
        }
    }

    /// Reload the record; false if this worker no longer owns it
    async fn refresh(&self, job: &mut JobRecord) -> Result<bool> {
        match self.job_repo.find_by_id(&job.id).await? {
            Some(fresh)
                if fresh.status == JobStatus::Running
                    && fresh.worker_id.as_deref() == Some(self.id()) =>
            {
                *job = fresh;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend_visibility(&self, receipt: &DeliveryReceipt, job_id: &str, span: Duration) {
        match self.queue.extend(receipt, span).await {
            Ok(true) => {}
            Ok(false) => warn!(job_id = %job_id, "Delivery receipt went stale, message may be redelivered"),
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to extend delivery visibility"),
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        if !self.queue.ack(&delivery.receipt).await? {
            warn!(
                job_id = %delivery.descriptor.job_id,
                "Ack with stale receipt ignored"
            );
        }
        Ok(())
    }

    fn lease_deadline(&self, now_millis: i64) -> i64 {
        now_millis + self.settings.lease_span().as_millis() as i64
    }

    /// Time left on the lease, minus half the grace reserved for the verdict write
    fn attempt_bound(&self, lease_expires_at: i64) -> Duration {
        let reserve = self.settings.lease_grace.as_millis() as i64 / 2;
        let left = lease_expires_at - self.time_provider.now_millis() - reserve;
        Duration::from_millis(left.max(0) as u64)
    }

    /// A running job may be resumed by its own worker (after an
    /// infrastructure fault) or by anyone once the lease has lapsed
    fn may_take_over(&self, job: &JobRecord, now_millis: i64) -> bool {
        job.worker_id.as_deref() == Some(self.id()) || job.lease_expired(now_millis)
    }
}

fn panic_message(join_err: tokio::task::JoinError) -> String {
    if !join_err.is_panic() {
        return format!("solver task cancelled: {}", join_err);
    }
    let payload = join_err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("solver panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("solver panicked: {}", msg)
    } else {
        "solver panicked".to_string()
    }
}
