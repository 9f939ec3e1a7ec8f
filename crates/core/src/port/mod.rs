// Port Layer - Interfaces for external dependencies

pub mod blob_store;
pub mod id_provider; // For deterministic testing
pub mod job_repository;
pub mod maintenance;
pub mod solver;
pub mod task_queue;
pub mod time_provider;
pub mod transaction;

// Re-exports
pub use blob_store::{get_json, put_json, BlobStore};
pub use id_provider::IdProvider;
pub use job_repository::JobRepository;
pub use maintenance::{Maintenance, MaintenanceConfig, MaintenanceStats};
pub use solver::{Solver, SolverError};
pub use task_queue::TaskQueue;
pub use time_provider::TimeProvider;
pub use transaction::{JobRepositoryTransaction, Transaction, TransactionalJobRepository};
