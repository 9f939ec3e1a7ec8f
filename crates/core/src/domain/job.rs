// Job Record Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job ID (UUID v4)
pub type JobId = String;

/// Ownership context supplied by the caller (authorization happens upstream)
pub type ProjectId = String;

/// Jobs of one project submitted together share a group number (starts at 1)
pub type GroupNumber = i64;

/// Opaque reference into the blob store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job Status
///
/// `Pending -> Running -> {Succeeded | Failed}` is the only forward path;
/// `Cancelled` is reachable from `Pending` or `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCEEDED" => Ok(JobStatus::Succeeded),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Recorded cause of a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobErrorKind {
    SolverTimeout,
    SolverCrash,
    SolverResourceError,
    /// Lease expired without the owning worker finishing the job
    WorkerLost,
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobErrorKind::SolverTimeout => "SOLVER_TIMEOUT",
            JobErrorKind::SolverCrash => "SOLVER_CRASH",
            JobErrorKind::SolverResourceError => "SOLVER_RESOURCE_ERROR",
            JobErrorKind::WorkerLost => "WORKER_LOST",
        };
        f.write_str(s)
    }
}

/// Structured failure detail stored on the record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
    /// Attempt that produced this error (1-based, 0 if no attempt ran)
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>, attempt: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            attempt,
            exit_code: None,
            stderr: None,
        }
    }
}

/// Job Record - durable state of one submitted computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub project_id: ProjectId,
    pub name: String,
    pub group: GroupNumber,

    pub status: JobStatus,
    pub input_ref: BlobRef,
    pub result_ref: Option<BlobRef>,
    pub error: Option<JobError>,

    pub created_at: i64, // epoch ms
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,

    pub attempt_count: u32,
    pub max_attempts: u32,
    pub cancel_requested: bool,

    // Lease held by the owning worker while RUNNING
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<i64>,

    /// Optimistic concurrency counter, bumped by every compare-and-set
    pub version: i64,
}

impl JobRecord {
    /// Create a new pending record
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `project_id` - Owning project
    /// * `name` - Caller-visible label
    /// * `group` - Submission group within the project
    /// * `input_ref` - Reference to the stored problem payload
    /// * `max_attempts` - Retry budget for transient solver failures
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        project_id: impl Into<String>,
        name: impl Into<String>,
        group: GroupNumber,
        input_ref: BlobRef,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            name: name.into(),
            group,
            status: JobStatus::Pending,
            input_ref,
            result_ref: None,
            error: None,
            created_at,
            started_at: None,
            finished_at: None,
            attempt_count: 0,
            max_attempts,
            cancel_requested: false,
            worker_id: None,
            lease_expires_at: None,
            version: 0,
        }
    }

    /// Create a test record with deterministic ID and timestamp.
    ///
    /// Uses a simple counter for deterministic test IDs (test-1, test-2, ...).
    /// Timestamps start at 1000 and increment by 1000.
    ///
    /// **Note**: This method should only be used in tests. For production code,
    /// always inject ID and time via providers.
    pub fn new_test(project_id: impl Into<String>, input_ref: BlobRef) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let id = format!("test-{}", counter);
        let created_at = (counter * 1000) as i64;

        Self::new(id, created_at, project_id, "test", 1, input_ref, 3)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn invalid(&self, to: JobStatus) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    /// PENDING -> RUNNING, taking the lease
    pub fn start(&mut self, now_millis: i64, worker_id: &str, lease_expires_at: i64) -> Result<()> {
        if self.status != JobStatus::Pending {
            return Err(self.invalid(JobStatus::Running));
        }
        self.status = JobStatus::Running;
        self.started_at = Some(now_millis.max(self.created_at));
        self.worker_id = Some(worker_id.to_string());
        self.lease_expires_at = Some(lease_expires_at);
        Ok(())
    }

    /// Extend the lease of a running job
    pub fn renew_lease(&mut self, lease_expires_at: i64) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(self.invalid(JobStatus::Running));
        }
        self.lease_expires_at = Some(lease_expires_at);
        Ok(())
    }

    /// Whether the lease of a running job has lapsed at `now_millis`
    pub fn lease_expired(&self, now_millis: i64) -> bool {
        self.status == JobStatus::Running
            && self.lease_expires_at.map_or(true, |at| at <= now_millis)
    }

    /// Move a running job to `worker_id` with a fresh lease
    ///
    /// Used when a delivery is redelivered after its owner gave it back or
    /// stopped renewing. Attempts and timestamps carry over.
    pub fn take_over(&mut self, worker_id: &str, lease_expires_at: i64) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(self.invalid(JobStatus::Running));
        }
        self.worker_id = Some(worker_id.to_string());
        self.lease_expires_at = Some(lease_expires_at);
        Ok(())
    }

    /// Count a new solver attempt, returning its 1-based number
    pub fn begin_attempt(&mut self) -> Result<u32> {
        if self.status != JobStatus::Running {
            return Err(self.invalid(JobStatus::Running));
        }
        self.attempt_count += 1;
        Ok(self.attempt_count)
    }

    /// Flag a running job for cooperative cancellation
    pub fn request_cancel(&mut self) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(self.invalid(JobStatus::Cancelled));
        }
        self.cancel_requested = true;
        Ok(())
    }

    /// RUNNING -> SUCCEEDED
    pub fn succeed(&mut self, now_millis: i64, result_ref: BlobRef) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(self.invalid(JobStatus::Succeeded));
        }
        self.status = JobStatus::Succeeded;
        self.result_ref = Some(result_ref);
        self.finish(now_millis);
        Ok(())
    }

    /// RUNNING -> FAILED
    pub fn fail(&mut self, now_millis: i64, error: JobError) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(self.invalid(JobStatus::Failed));
        }
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.finish(now_millis);
        Ok(())
    }

    /// PENDING | RUNNING -> CANCELLED
    pub fn cancel(&mut self, now_millis: i64) -> Result<()> {
        if !matches!(self.status, JobStatus::Pending | JobStatus::Running) {
            return Err(self.invalid(JobStatus::Cancelled));
        }
        self.status = JobStatus::Cancelled;
        self.finish(now_millis);
        Ok(())
    }

    fn finish(&mut self, now_millis: i64) {
        let floor = self.started_at.unwrap_or(self.created_at);
        self.finished_at = Some(now_millis.max(floor));
        self.worker_id = None;
        self.lease_expires_at = None;
    }
}
