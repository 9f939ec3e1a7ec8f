// Domain Layer - Pure business logic and entities

pub mod error;
pub mod job;
pub mod outcome;
pub mod problem;
pub mod task;

// Re-exports
pub use error::DomainError;
pub use job::{
    BlobRef, GroupNumber, JobError, JobErrorKind, JobId, JobRecord, JobStatus, ProjectId,
};
pub use outcome::{Infeasibility, Inconsistency, InconsistencyKind, Solution, SolverOutcome};
pub use problem::{validate_problem, DecisionProblem};
pub use task::{Delivery, DeliveryReceipt, TaskDescriptor};
