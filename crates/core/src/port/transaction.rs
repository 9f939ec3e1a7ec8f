// Transaction port for atomic operations

use crate::domain::{GroupNumber, JobRecord};
use crate::error::Result;
use async_trait::async_trait;

/// Transaction trait for atomic multi-step operations
#[async_trait]
pub trait Transaction: Send {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Transactional JobRepository operations
#[async_trait]
pub trait TransactionalJobRepository: Send + Sync {
    /// Begin a new transaction
    async fn begin_transaction(&self) -> Result<Box<dyn JobRepositoryTransaction>>;
}

/// JobRepository operations within a transaction
#[async_trait]
pub trait JobRepositoryTransaction: Transaction {
    /// Allocate the next submission group for a project (within transaction)
    async fn next_group(&mut self, project_id: &str) -> Result<GroupNumber>;

    /// Insert job record (within transaction)
    async fn insert(&mut self, job: &JobRecord) -> Result<()>;
}
