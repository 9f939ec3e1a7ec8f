// Shared fixtures for application tests

use crate::application::gateway::JobGateway;
use crate::application::retry::RetryPolicy;
use crate::application::worker::{Worker, WorkerSettings};
use crate::domain::problem::{Alternative, Criterion, PairwiseComparison, PreferenceType};
use crate::domain::DecisionProblem;
use crate::port::blob_store::mocks::InMemoryBlobStore;
use crate::port::id_provider::mocks::SequentialIdProvider;
use crate::port::job_repository::mocks::InMemoryJobRepository;
use crate::port::task_queue::mocks::InMemoryTaskQueue;
use crate::port::time_provider::mocks::ManualClock;
use crate::port::Solver;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// 3 criteria x 5 alternatives, no preference information
pub fn feasible_problem() -> DecisionProblem {
    let criteria = vec![
        Criterion {
            id: "price".into(),
            name: "Price".into(),
            gain: false,
            linear_segments: 2,
        },
        Criterion {
            id: "comfort".into(),
            name: "Comfort".into(),
            gain: true,
            linear_segments: 0,
        },
        Criterion {
            id: "range".into(),
            name: "Range".into(),
            gain: true,
            linear_segments: 3,
        },
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

/// Feasible problem plus `a1 > a2` and `a2 > a1`
pub fn contradictory_problem() -> DecisionProblem {
    let mut problem = feasible_problem();
    problem.comparisons = vec![
        PairwiseComparison {
            alternative_1: "a1".into(),
            alternative_2: "a2".into(),
            kind: PreferenceType::Preference,
        },
        PairwiseComparison {
            alternative_1: "a2".into(),
            alternative_2: "a1".into(),
            kind: PreferenceType::Preference,
        },
    ];
    problem
}

/// In-memory store, queue and blob store behind a gateway
pub struct Harness {
    pub repo: InMemoryJobRepository,
    pub queue: InMemoryTaskQueue,
    pub blobs: InMemoryBlobStore,
    pub clock: Arc<ManualClock>,
    pub gateway: JobGateway,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_max_attempts(3)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let repo = InMemoryJobRepository::new();
        let queue = InMemoryTaskQueue::new(clock.clone());
        let blobs = InMemoryBlobStore::new();
        let gateway = JobGateway::new(
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(queue.clone()),
            Arc::new(blobs.clone()),
            Arc::new(SequentialIdProvider::new("job")),
            clock.clone(),
        )
        .with_max_attempts(max_attempts);
        Self {
            repo,
            queue,
            blobs,
            clock,
            gateway,
        }
    }

    /// Worker with short deadlines and near-zero backoff
    pub fn worker(&self, id: &str, solver: Arc<dyn Solver>) -> Worker {
        let mut settings = WorkerSettings::new(id);
        settings.attempt_deadline = Duration::from_millis(200);
        settings.lease_grace = Duration::from_millis(200);
        settings.visibility_timeout = Duration::from_secs(30);
        self.worker_with(settings, solver)
    }

    pub fn worker_with(&self, settings: WorkerSettings, solver: Arc<dyn Solver>) -> Worker {
        Worker::new(
            settings,
            Arc::new(self.repo.clone()),
            Arc::new(self.queue.clone()),
            Arc::new(self.blobs.clone()),
            solver,
            Arc::new(RetryPolicy::new(1)),
            self.clock.clone(),
        )
    }
}
