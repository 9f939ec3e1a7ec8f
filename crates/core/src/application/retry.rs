// Retry policy for transient solver failures
use crate::domain::JobRecord;
use crate::port::SolverError;
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the attempt after a backoff delay in ms
    Retry(i64),
    /// Do not retry, job has failed permanently
    Failed,
}

/// Retry policy
///
/// Only timeouts and resource errors are retried, and only while the
/// attempt budget lasts. A crash is reported at once: rerunning the same
/// input would crash again.
///
/// The budget is the job's own `max_attempts`, lowered to the worker-side
/// cap when one is configured.
pub struct RetryPolicy {
    base_delay_ms: i64,
    backoff_factor: f64,
    max_delay_ms: i64,
    max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    /// * `base_delay_ms` - Delay before the second attempt (default: 1000)
    pub fn new(base_delay_ms: i64) -> Self {
        Self {
            base_delay_ms,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
            max_attempts: None,
        }
    }

    /// Cap every job's attempt budget at `max_attempts`
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Attempts `job` may use in total
    pub fn attempt_budget(&self, job: &JobRecord) -> u32 {
        match self.max_attempts {
            Some(cap) => job.max_attempts.min(cap),
            None => job.max_attempts,
        }
    }

    /// Decide what to do after attempt `job.attempt_count` failed with `error`
    ///
    /// Backoff formula:
    /// delay = min(base_delay * 2^(attempt - 1), max_delay) * jitter(0.9..1.1)
    pub fn should_retry(&self, job: &JobRecord, error: &SolverError) -> RetryDecision {
        if !error.is_retryable() {
            warn!(
                job_id = %job.id,
                attempt = job.attempt_count,
                error = %error,
                "Solver error is not retryable"
            );
            return RetryDecision::Failed;
        }

        let budget = self.attempt_budget(job);
        if job.attempt_count >= budget {
            warn!(
                job_id = %job.id,
                attempts = job.attempt_count,
                max_attempts = budget,
                "Max retry attempts reached"
            );
            return RetryDecision::Failed;
        }

        let delay_ms = self.backoff_delay(&job.id, job.attempt_count);

        info!(
            job_id = %job.id,
            attempt = job.attempt_count,
            max_attempts = budget,
            delay_ms = delay_ms,
            "Scheduling retry"
        );

        RetryDecision::Retry(delay_ms)
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn backoff_delay(&self, job_id: &str, attempt: u32) -> i64 {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let raw = self.base_delay_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);

        // ±10% jitter seeded by the job id keeps retries of a burst apart
        let jitter_seed = job_id.chars().map(|c| c as u32).sum::<u32>();
        let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0);

        (capped * jitter_factor) as i64
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1000)
    }
}
