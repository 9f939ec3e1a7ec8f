// Application Layer - Use Cases and Business Logic

pub mod gateway;
pub mod maintenance;
pub mod recovery;
pub mod retry;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports
pub use gateway::{JobGateway, JobOutcome, SubmitItem, SubmitRequest};
pub use maintenance::MaintenanceScheduler;
pub use recovery::{RecoveryReport, RecoveryService};
pub use retry::{RetryDecision, RetryPolicy};
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker, WorkerPool, WorkerSettings};
