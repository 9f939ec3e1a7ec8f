// Job Record Store Port (Interface)

use crate::domain::{GroupNumber, JobId, JobRecord, JobStatus};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for JobRecord persistence
///
/// All mutations after insert go through `compare_and_set`; there is no
/// unconditional update.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new record
    async fn insert(&self, job: &JobRecord) -> Result<()>;

    /// Find record by ID
    async fn find_by_id(&self, id: &JobId) -> Result<Option<JobRecord>>;

    /// Replace the stored record if it is still in status `expected` at version `job.version`
    ///
    /// Returns false when another writer got there first. On success
    /// `job.version` is advanced to the stored version.
    async fn compare_and_set(&self, expected: JobStatus, job: &mut JobRecord) -> Result<bool>;

    /// Latest submission group of a project (None if the project has no jobs)
    async fn latest_group(&self, project_id: &str) -> Result<Option<GroupNumber>>;

    /// All records of one submission group
    async fn find_by_project_group(
        &self,
        project_id: &str,
        group: GroupNumber,
    ) -> Result<Vec<JobRecord>>;

    /// RUNNING records whose lease expired before `now_millis`
    async fn find_expired_leases(&self, now_millis: i64) -> Result<Vec<JobRecord>>;

    /// PENDING records created before `created_before`
    async fn find_stale_pending(&self, created_before: i64) -> Result<Vec<JobRecord>>;

    /// Count records by status
    async fn count_by_status(&self, status: JobStatus) -> Result<i64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use crate::port::transaction::{
        JobRepositoryTransaction, Transaction, TransactionalJobRepository,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MemoryState {
        jobs: HashMap<JobId, JobRecord>,
        groups: HashMap<String, GroupNumber>,
    }

    /// In-memory Job Record Store
    #[derive(Clone, Default)]
    pub struct InMemoryJobRepository {
        state: Arc<Mutex<MemoryState>>,
        unavailable: Arc<AtomicBool>,
    }

    impl InMemoryJobRepository {
        pub fn new() -> Self {
            Self::default()
        }

        /// Simulate an unreachable store
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        fn check(&self) -> Result<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AppError::Database("store unreachable".to_string()));
            }
            Ok(())
        }

        fn filtered(&self, pred: impl Fn(&JobRecord) -> bool) -> Result<Vec<JobRecord>> {
            self.check()?;
            let state = self.state.lock().unwrap();
            let mut jobs: Vec<JobRecord> = state.jobs.values().filter(|j| pred(*j)).cloned().collect();
            jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(jobs)
        }
    }

    #[async_trait]
    impl JobRepository for InMemoryJobRepository {
        async fn insert(&self, job: &JobRecord) -> Result<()> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            if state.jobs.contains_key(&job.id) {
                return Err(AppError::Conflict(format!("Job {} already exists", job.id)));
            }
            state.jobs.insert(job.id.clone(), job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<JobRecord>> {
            self.check()?;
            Ok(self.state.lock().unwrap().jobs.get(id).cloned())
        }

        async fn compare_and_set(&self, expected: JobStatus, job: &mut JobRecord) -> Result<bool> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            let Some(stored) = state.jobs.get_mut(&job.id) else {
                return Err(AppError::NotFound(format!("Job {} not found", job.id)));
            };
            if stored.status != expected || stored.version != job.version {
                return Ok(false);
            }
            job.version += 1;
            *stored = job.clone();
            Ok(true)
        }

        async fn latest_group(&self, project_id: &str) -> Result<Option<GroupNumber>> {
            self.check()?;
            Ok(self.state.lock().unwrap().groups.get(project_id).copied())
        }

        async fn find_by_project_group(
            &self,
            project_id: &str,
            group: GroupNumber,
        ) -> Result<Vec<JobRecord>> {
            self.filtered(|j| j.project_id == project_id && j.group == group)
        }

        async fn find_expired_leases(&self, now_millis: i64) -> Result<Vec<JobRecord>> {
            self.filtered(|j| {
                j.status == JobStatus::Running && j.lease_expires_at.map_or(true, |l| l < now_millis)
            })
        }

        async fn find_stale_pending(&self, created_before: i64) -> Result<Vec<JobRecord>> {
            self.filtered(|j| j.status == JobStatus::Pending && j.created_at < created_before)
        }

        async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
            Ok(self.filtered(|j| j.status == status)?.len() as i64)
        }
    }

    #[async_trait]
    impl TransactionalJobRepository for InMemoryJobRepository {
        async fn begin_transaction(&self) -> Result<Box<dyn JobRepositoryTransaction>> {
            self.check()?;
            Ok(Box::new(InMemoryTransaction {
                state: Arc::clone(&self.state),
                groups: HashMap::new(),
                inserts: Vec::new(),
            }))
        }
    }

    /// Buffers writes until commit
    pub struct InMemoryTransaction {
        state: Arc<Mutex<MemoryState>>,
        groups: HashMap<String, GroupNumber>,
        inserts: Vec<JobRecord>,
    }

    #[async_trait]
    impl Transaction for InMemoryTransaction {
        async fn commit(self: Box<Self>) -> Result<()> {
            let InMemoryTransaction {
                state,
                groups,
                inserts,
            } = *self;
            let mut state = state.lock().unwrap();
            if let Some(dup) = inserts.iter().find(|j| state.jobs.contains_key(&j.id)) {
                return Err(AppError::Conflict(format!("Job {} already exists", dup.id)));
            }
            for (project, group) in groups {
                let current = state.groups.entry(project).or_insert(0);
                *current = (*current).max(group);
            }
            for job in inserts {
                state.jobs.insert(job.id.clone(), job);
            }
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl JobRepositoryTransaction for InMemoryTransaction {
        async fn next_group(&mut self, project_id: &str) -> Result<GroupNumber> {
            let committed = self
                .state
                .lock()
                .unwrap()
                .groups
                .get(project_id)
                .copied()
                .unwrap_or(0);
            let current = self.groups.get(project_id).copied().unwrap_or(committed);
            let next = current.max(committed) + 1;
            self.groups.insert(project_id.to_string(), next);
            Ok(next)
        }

        async fn insert(&mut self, job: &JobRecord) -> Result<()> {
            self.inserts.push(job.clone());
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::domain::BlobRef;

        #[tokio::test]
        async fn test_compare_and_set_rejects_stale_writer() {
            let repo = InMemoryJobRepository::new();
            let job = JobRecord::new_test("p", BlobRef::new("in"));
            repo.insert(&job).await.unwrap();

            let mut first = repo.find_by_id(&job.id).await.unwrap().unwrap();
            let mut second = first.clone();

            first.start(5000, "w1", 9000).unwrap();
            second.start(5000, "w2", 9000).unwrap();

            assert!(repo.compare_and_set(JobStatus::Pending, &mut first).await.unwrap());
            assert!(!repo.compare_and_set(JobStatus::Pending, &mut second).await.unwrap());

            let stored = repo.find_by_id(&job.id).await.unwrap().unwrap();
            assert_eq!(stored.worker_id.as_deref(), Some("w1"));
            assert_eq!(stored.version, 1);
        }

        #[tokio::test]
        async fn test_transaction_allocates_groups() {
            let repo = InMemoryJobRepository::new();
            let mut tx = repo.begin_transaction().await.unwrap();
            assert_eq!(tx.next_group("p").await.unwrap(), 1);
            tx.commit().await.unwrap();

            let mut tx = repo.begin_transaction().await.unwrap();
            assert_eq!(tx.next_group("p").await.unwrap(), 2);
            tx.rollback().await.unwrap();

            assert_eq!(repo.latest_group("p").await.unwrap(), Some(1));
        }
    }
}
