// Solver Adapter Port
// Abstraction over the UTA-GMS engine (external process or in-process library)

use crate::domain::{DecisionProblem, JobError, JobErrorKind, SolverOutcome};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single solver invocation
#[derive(Error, Debug, Clone)]
pub enum SolverError {
    /// Deadline elapsed; the underlying process was terminated
    #[error("Solver timed out after {after_ms}ms")]
    Timeout {
        after_ms: i64,
        stderr: Option<String>,
    },

    /// Non-zero exit or malformed output
    #[error("Solver crashed: {reason}")]
    Crash {
        reason: String,
        exit_code: Option<i32>,
        stderr: Option<String>,
    },

    /// Solver binary, sampler or another external resource is unavailable
    #[error("Solver resource unavailable: {0}")]
    Resource(String),
}

impl SolverError {
    /// Timeouts and resource errors are transient; a crash points at the data
    pub fn is_retryable(&self) -> bool {
        matches!(self, SolverError::Timeout { .. } | SolverError::Resource(_))
    }

    pub fn kind(&self) -> JobErrorKind {
        match self {
            SolverError::Timeout { .. } => JobErrorKind::SolverTimeout,
            SolverError::Crash { .. } => JobErrorKind::SolverCrash,
            SolverError::Resource(_) => JobErrorKind::SolverResourceError,
        }
    }

    /// Record this error as the cause of a failed job
    pub fn to_job_error(&self, attempt: u32) -> JobError {
        let mut error = JobError::new(self.kind(), self.to_string(), attempt);
        match self {
            SolverError::Timeout { stderr, .. } => error.stderr = stderr.clone(),
            SolverError::Crash {
                exit_code, stderr, ..
            } => {
                error.exit_code = *exit_code;
                error.stderr = stderr.clone();
            }
            SolverError::Resource(_) => {}
        }
        error
    }
}

/// Solver trait
///
/// Implementations:
/// - SubprocessSolver: spawns the engine as an external process
/// - mocks::ScriptedSolver: scripted behaviors for tests
#[async_trait]
pub trait Solver: Send + Sync {
    /// Run one invocation bounded by `deadline`
    ///
    /// Infeasible preference constraints are a successful outcome.
    ///
    /// # Errors
    /// - SolverError::Timeout if the deadline elapses
    /// - SolverError::Crash on non-zero exit or malformed output
    /// - SolverError::Resource if external resources are unavailable
    async fn invoke(
        &self,
        problem: &DecisionProblem,
        deadline: Duration,
    ) -> Result<SolverOutcome, SolverError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::outcome::{Inconsistency, InconsistencyKind, Infeasibility, RankedAlternative, Solution};
    use crate::domain::problem::PreferenceType;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::{Arc, Mutex};

    /// Mock solver behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Additive ranking over normalized performances; cyclic preferences are infeasible
        Rank,
        /// Sleep through the whole deadline, then report a timeout
        Hang,
        /// Fail with a crash (malformed output)
        Crash(String),
        /// Fail with a resource error
        ResourceUnavailable(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep, then rank
        Slow(Duration),
    }

    /// Scripted solver: consumes queued behaviors, then repeats the fallback
    pub struct ScriptedSolver {
        script: Mutex<VecDeque<MockBehavior>>,
        fallback: MockBehavior,
        call_count: Arc<Mutex<usize>>,
    }

    impl ScriptedSolver {
        pub fn new(fallback: MockBehavior) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback,
                call_count: Arc::new(Mutex::new(0)),
            }
        }

        pub fn ranking() -> Self {
            Self::new(MockBehavior::Rank)
        }

        pub fn hanging() -> Self {
            Self::new(MockBehavior::Hang)
        }

        /// Play `script` in order before falling back
        pub fn with_script(self, script: impl IntoIterator<Item = MockBehavior>) -> Self {
            self.script.lock().unwrap().extend(script);
            self
        }

        pub fn call_count(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Solver for ScriptedSolver {
        async fn invoke(
            &self,
            problem: &DecisionProblem,
            deadline: Duration,
        ) -> Result<SolverOutcome, SolverError> {
            *self.call_count.lock().unwrap() += 1;

            let behavior = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());

            match behavior {
                MockBehavior::Rank => Ok(rank(problem)),
                MockBehavior::Hang => {
                    tokio::time::sleep(deadline).await;
                    Err(SolverError::Timeout {
                        after_ms: deadline.as_millis() as i64,
                        stderr: None,
                    })
                }
                MockBehavior::Crash(msg) => Err(SolverError::Crash {
                    reason: msg,
                    exit_code: Some(1),
                    stderr: Some("Traceback (most recent call last)".to_string()),
                }),
                MockBehavior::ResourceUnavailable(msg) => Err(SolverError::Resource(msg)),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
                MockBehavior::Slow(delay) => {
                    if delay >= deadline {
                        tokio::time::sleep(deadline).await;
                        return Err(SolverError::Timeout {
                            after_ms: deadline.as_millis() as i64,
                            stderr: None,
                        });
                    }
                    tokio::time::sleep(delay).await;
                    Ok(rank(problem))
                }
            }
        }
    }

    /// Strict preference `a > b` contradicted by a path `b -> ... -> a`
    fn find_inconsistencies(problem: &DecisionProblem) -> Vec<Inconsistency> {
        let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
        for cmp in &problem.comparisons {
            edges
                .entry(cmp.alternative_1.as_str())
                .or_default()
                .push(cmp.alternative_2.as_str());
            if cmp.kind == PreferenceType::Indifference {
                edges
                    .entry(cmp.alternative_2.as_str())
                    .or_default()
                    .push(cmp.alternative_1.as_str());
            }
        }

        let reaches = |from: &str, to: &str| -> bool {
            let mut seen = HashSet::new();
            let mut stack = vec![from];
            while let Some(node) = stack.pop() {
                if node == to {
                    return true;
                }
                if seen.insert(node) {
                    stack.extend(edges.get(node).into_iter().flatten().copied());
                }
            }
            false
        };

        let mut found = Vec::new();
        let mut group = 0;
        for cmp in &problem.comparisons {
            if cmp.kind == PreferenceType::Preference
                && reaches(&cmp.alternative_2, &cmp.alternative_1)
            {
                group += 1;
                found.push(Inconsistency {
                    group,
                    kind: InconsistencyKind::Preference,
                    data: format!("{} > {}", cmp.alternative_1, cmp.alternative_2),
                });
            }
        }
        found
    }

    fn rank(problem: &DecisionProblem) -> SolverOutcome {
        let inconsistencies = find_inconsistencies(problem);
        if !inconsistencies.is_empty() {
            return SolverOutcome::Infeasible(Infeasibility { inconsistencies });
        }

        let mut values: Vec<(String, f64)> = problem
            .alternatives
            .iter()
            .map(|alt| {
                let total: f64 = problem
                    .criteria
                    .iter()
                    .map(|c| {
                        let column = problem
                            .alternatives
                            .iter()
                            .filter_map(|a| a.performances.get(&c.id).copied());
                        let (min, max) = column.fold((f64::MAX, f64::MIN), |(lo, hi), v| {
                            (lo.min(v), hi.max(v))
                        });
                        let v = alt.performances.get(&c.id).copied().unwrap_or(min);
                        if max <= min {
                            1.0
                        } else if c.gain {
                            (v - min) / (max - min)
                        } else {
                            (max - v) / (max - min)
                        }
                    })
                    .sum();
                (alt.id.clone(), total / problem.criteria.len().max(1) as f64)
            })
            .collect();

        values.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let ranking = values
            .into_iter()
            .enumerate()
            .map(|(i, (alternative, value))| RankedAlternative {
                alternative,
                position: i as u32 + 1,
                value,
            })
            .collect();

        SolverOutcome::Solved(Solution {
            ranking,
            extreme_ranks: vec![],
            functions: vec![],
            necessary: vec![],
            possible: vec![],
            acceptability_indices: vec![],
            pairwise_winnings: vec![],
            samples_used: 0,
            sampler_error: if problem.sampler_enabled() {
                None
            } else {
                Some("Sampler turned off".to_string())
            },
        })
    }
}
