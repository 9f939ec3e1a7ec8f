// UTA-GMS Infrastructure - SQLite Adapter
// Implements: JobRepository, TransactionalJobRepository, TaskQueue, BlobStore, Maintenance

mod blob_store;
mod connection;
mod error;
mod job_repository;
mod maintenance_impl;
mod migration;
mod task_queue;
mod transaction;

pub use blob_store::SqliteBlobStore;
pub use connection::create_pool;
pub use job_repository::SqliteJobRepository;
pub use maintenance_impl::SqliteMaintenance;
pub use migration::run_migrations;
pub use task_queue::SqliteTaskQueue;
pub use transaction::SqliteJobTransaction;

pub use sqlx::SqlitePool;
