//! Shared fixtures: a file-backed SQLite stack behind the gateway

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use utagms_core::application::{JobGateway, RetryPolicy, Worker, WorkerSettings};
use utagms_core::domain::problem::{Alternative, Criterion, PairwiseComparison, PreferenceType};
use utagms_core::domain::{DecisionProblem, JobRecord, JobStatus};
use utagms_core::port::id_provider::UuidProvider;
use utagms_core::port::time_provider::SystemTimeProvider;
use utagms_core::port::{BlobStore, JobRepository, Solver, TaskQueue, TimeProvider};
use utagms_infra_sqlite::{
    create_pool, run_migrations, SqliteBlobStore, SqliteJobRepository, SqlitePool,
    SqliteTaskQueue,
};

/// Temporary database file, removed on drop
pub struct TestDb {
    path: PathBuf,
    pub pool: SqlitePool,
}

impl TestDb {
    pub async fn new() -> Self {
        let path = std::env::temp_dir().join(format!("utagms-it-{}.db", uuid::Uuid::new_v4()));
        let pool = create_pool(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        Self { path, pool }
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
        }
    }
}

/// Real adapters wired the way the daemon wires them
pub struct Stack {
    pub db: TestDb,
    pub repo: Arc<SqliteJobRepository>,
    pub queue: Arc<SqliteTaskQueue>,
    pub blobs: Arc<SqliteBlobStore>,
    pub time: Arc<dyn TimeProvider>,
    pub gateway: JobGateway,
}

impl Stack {
    pub async fn new(max_attempts: u32) -> Self {
        let db = TestDb::new().await;
        let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let repo = Arc::new(SqliteJobRepository::new(db.pool.clone()));
        let queue = Arc::new(SqliteTaskQueue::new(db.pool.clone(), time.clone()));
        let blobs = Arc::new(SqliteBlobStore::new(db.pool.clone(), time.clone()));
        let gateway = JobGateway::new(
            repo.clone(),
            repo.clone(),
            queue.clone(),
            blobs.clone(),
            Arc::new(UuidProvider),
            time.clone(),
        )
        .with_max_attempts(max_attempts);

        Self {
            db,
            repo,
            queue,
            blobs,
            time,
            gateway,
        }
    }

    pub fn worker(&self, id: &str, solver: Arc<dyn Solver>, deadline: Duration) -> Worker {
        let mut settings = WorkerSettings::new(id);
        settings.attempt_deadline = deadline;
        settings.lease_grace = Duration::from_millis(500);
        settings.visibility_timeout = Duration::from_secs(30);

        Worker::new(
            settings,
            self.repo.clone() as Arc<dyn JobRepository>,
            self.queue.clone() as Arc<dyn TaskQueue>,
            self.blobs.clone() as Arc<dyn BlobStore>,
            solver,
            Arc::new(RetryPolicy::new(1)),
            self.time.clone(),
        )
    }

    /// Poll until the job is terminal
    pub async fn wait_terminal(&self, job_id: &str) -> JobRecord {
        for _ in 0..500 {
            let job = self.gateway.get_status(job_id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal status", job_id);
    }

    pub async fn wait_status(&self, job_id: &str, status: JobStatus) -> JobRecord {
        for _ in 0..500 {
            let job = self.gateway.get_status(job_id).await.unwrap();
            if job.status == status {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {}", job_id, status);
    }
}

/// 3 criteria x 5 alternatives, no preference information
pub fn feasible_problem() -> DecisionProblem {
    let criteria = vec![
        criterion("price", false, 2),
        criterion("comfort", true, 0),
        criterion("range", true, 3),
    ];
    let rows = [
        ("a1", 30.0, 5.0, 400.0),
        ("a2", 25.0, 3.0, 350.0),
        ("a3", 40.0, 5.0, 500.0),
        ("a4", 20.0, 1.0, 250.0),
        ("a5", 35.0, 4.0, 450.0),
    ];
    let alternatives = rows
        .iter()
        .map(|(id, price, comfort, range)| Alternative {
            id: id.to_string(),
            name: id.to_uppercase(),
            performances: BTreeMap::from([
                ("price".to_string(), *price),
                ("comfort".to_string(), *comfort),
                ("range".to_string(), *range),
            ]),
        })
        .collect();

    DecisionProblem {
        criteria,
        alternatives,
        comparisons: vec![],
        preference_intensities: vec![],
        positions: vec![],
        samples: 0,
    }
}

/// `a1 > a2` together with `a2 > a1`
pub fn contradictory_problem() -> DecisionProblem {
    let mut problem = feasible_problem();
    problem.comparisons = vec![prefer("a1", "a2"), prefer("a2", "a1")];
    problem
}

fn criterion(id: &str, gain: bool, linear_segments: u32) -> Criterion {
    Criterion {
        id: id.to_string(),
        name: id.to_string(),
        gain,
        linear_segments,
    }
}

fn prefer(a: &str, b: &str) -> PairwiseComparison {
    PairwiseComparison {
        alternative_1: a.to_string(),
        alternative_2: b.to_string(),
        kind: PreferenceType::Preference,
    }
}
