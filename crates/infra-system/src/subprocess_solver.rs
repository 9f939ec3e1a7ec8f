// Subprocess solver adapter
// Runs the UTA-GMS engine as a child process: JSON in on stdin, JSON out on stdout.
use async_trait::async_trait;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use utagms_core::domain::{DecisionProblem, SolverOutcome};
use utagms_core::port::{Solver, SolverError};

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Upper bound on captured stderr kept for diagnostics (tail is kept)
const MAX_STDERR_BYTES: usize = 8 * 1024;

/// Time allowed for pipes to drain once the child is gone
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// How the solver process is launched
#[derive(Debug, Clone)]
pub struct SolverCommandConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Polytope sampler jar, required only when a problem asks for samples
    pub sampler_path: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    /// Environment variables passed through to the child; everything else is cleared
    pub env_allowlist: Vec<String>,
    /// Wait between SIGTERM and SIGKILL
    pub kill_grace: Duration,
}

impl SolverCommandConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            sampler_path: None,
            working_dir: None,
            env_allowlist: vec!["PATH".to_string(), "HOME".to_string()],
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sampler(mut self, path: impl Into<PathBuf>) -> Self {
        self.sampler_path = Some(path.into());
        self
    }
}

/// Stdin document: the problem plus sampler settings
#[derive(Serialize)]
struct SolverRequest<'a> {
    #[serde(flatten)]
    problem: &'a DecisionProblem,
    sampler_path: Option<&'a Path>,
    number_of_samples: u32,
}

/// One running attempt
///
/// Owns the child and its pipe readers. Dropping it kills the child
/// (`kill_on_drop`) and stops the readers.
pub struct SolverInvocation {
    child: Child,
    started: Instant,
    deadline: Duration,
    stdout: JoinHandle<io::Result<Vec<u8>>>,
    stderr: JoinHandle<io::Result<Vec<u8>>>,
}

impl SolverInvocation {
    /// Spawn the solver and feed it `input` on stdin
    pub fn spawn(
        config: &SolverCommandConfig,
        env: Vec<(String, String)>,
        input: Vec<u8>,
        deadline: Duration,
    ) -> Result<Self, SolverError> {
        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .env_clear()
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }
        // Own process group, so helpers the engine launches (the sampler JVM)
        // are signalled together with it
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            SolverError::Resource(format!(
                "cannot spawn solver {}: {}",
                config.program.display(),
                e
            ))
        })?;

        let stdout = child.stdout.take().map(read_all);
        let stderr = child.stderr.take().map(read_all);
        let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
            return Err(SolverError::Resource("solver pipes unavailable".to_string()));
        };

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                // A solver may exit before reading everything; the broken pipe is not our error
                if let Err(e) = stdin.write_all(&input).await {
                    debug!(error = %e, "Solver stdin closed early");
                }
            });
        }

        Ok(Self {
            child,
            started: Instant::now(),
            deadline,
            stdout,
            stderr,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Wait for the child within the deadline and decode its outcome
    pub async fn wait(mut self, kill_grace: Duration) -> Result<SolverOutcome, SolverError> {
        let remaining = self.deadline.saturating_sub(self.elapsed());
        let status = match timeout(remaining, self.child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(SolverError::Crash {
                    reason: format!("failed to wait for solver: {}", e),
                    exit_code: None,
                    stderr: None,
                })
            }
            Err(_) => {
                self.terminate(kill_grace).await;
                let stderr = self.captured_stderr().await;
                return Err(SolverError::Timeout {
                    after_ms: self.deadline.as_millis() as i64,
                    stderr,
                });
            }
        };

        let stdout = drain(&mut self.stdout).await;
        let stderr = self.captured_stderr().await;
        decode_outcome(status, &stdout, stderr)
    }

    /// SIGTERM to the process group, then SIGKILL after `grace`; the child is
    /// reaped either way
    async fn terminate(&mut self, grace: Duration) {
        let pid = self.child.id();

        #[cfg(unix)]
        {
            if let Some(pid) = pid {
                info!(pid = %pid, "Sending SIGTERM to solver process group");
                if signal_group(pid, Signal::SIGTERM) {
                    if let Ok(Ok(_)) = timeout(grace, self.child.wait()).await {
                        // The leader is gone; helpers that ignored SIGTERM are not
                        signal_group(pid, Signal::SIGKILL);
                        return;
                    }
                }
                warn!(pid = %pid, grace_ms = grace.as_millis() as u64, "Solver still running, sending SIGKILL");
                signal_group(pid, Signal::SIGKILL);
            }
        }

        if let Err(e) = self.child.kill().await {
            warn!(pid = ?pid, error = %e, "Failed to kill solver");
        }
    }

    async fn captured_stderr(&mut self) -> Option<String> {
        let bytes = drain(&mut self.stderr).await;
        if bytes.is_empty() {
            None
        } else {
            Some(truncate_tail(&String::from_utf8_lossy(&bytes), MAX_STDERR_BYTES))
        }
    }
}

impl Drop for SolverInvocation {
    fn drop(&mut self) {
        // Still unreaped means the attempt was abandoned mid-run
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                signal_group(pid, Signal::SIGKILL);
            }
        }
        self.stdout.abort();
        self.stderr.abort();
    }
}

/// Signal every process in the group led by `pid`; false if nothing was there
#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) -> bool {
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) => true,
        Err(e) => {
            debug!(pid, signal = ?signal, error = %e, "Process group signal not delivered");
            false
        }
    }
}

fn read_all<R>(mut reader: R) -> JoinHandle<io::Result<Vec<u8>>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    })
}

/// Orphaned grandchildren can hold a pipe open; give up after a short wait
async fn drain(handle: &mut JoinHandle<io::Result<Vec<u8>>>) -> Vec<u8> {
    match timeout(OUTPUT_DRAIN_TIMEOUT, handle).await {
        Ok(Ok(Ok(bytes))) => bytes,
        _ => Vec::new(),
    }
}

fn decode_outcome(
    status: ExitStatus,
    stdout: &[u8],
    stderr: Option<String>,
) -> Result<SolverOutcome, SolverError> {
    if !status.success() {
        return Err(SolverError::Crash {
            reason: format!("solver exited with {}", status),
            exit_code: status.code(),
            stderr,
        });
    }

    serde_json::from_slice(stdout).map_err(|e| SolverError::Crash {
        reason: format!("malformed solver output: {}", e),
        exit_code: status.code(),
        stderr,
    })
}

/// Keep the last `max` bytes, cut on a char boundary
fn truncate_tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &s[start..])
}

/// Keep allowlisted variables only
fn filter_env(
    vars: impl Iterator<Item = (String, String)>,
    allowlist: &[String],
) -> Vec<(String, String)> {
    vars.filter(|(k, _)| allowlist.contains(k)).collect()
}

/// Solver adapter spawning one process per attempt
pub struct SubprocessSolver {
    config: SolverCommandConfig,
}

impl SubprocessSolver {
    pub fn new(config: SolverCommandConfig) -> Self {
        Self { config }
    }

    async fn check_sampler(&self, problem: &DecisionProblem) -> Result<(), SolverError> {
        if !problem.sampler_enabled() {
            return Ok(());
        }
        let Some(path) = &self.config.sampler_path else {
            return Err(SolverError::Resource(
                "samples requested but no sampler is configured".to_string(),
            ));
        };
        if tokio::fs::metadata(path).await.is_err() {
            return Err(SolverError::Resource(format!(
                "sampler not found at {}",
                path.display()
            )));
        }
        Ok(())
    }

    fn encode_request(&self, problem: &DecisionProblem) -> Result<Vec<u8>, SolverError> {
        let request = SolverRequest {
            problem,
            sampler_path: self.config.sampler_path.as_deref(),
            number_of_samples: problem.samples,
        };
        serde_json::to_vec(&request).map_err(|e| SolverError::Crash {
            reason: format!("cannot encode solver request: {}", e),
            exit_code: None,
            stderr: None,
        })
    }
}

#[async_trait]
impl Solver for SubprocessSolver {
    async fn invoke(
        &self,
        problem: &DecisionProblem,
        deadline: Duration,
    ) -> Result<SolverOutcome, SolverError> {
        self.check_sampler(problem).await?;
        let input = self.encode_request(problem)?;
        let env = filter_env(std::env::vars(), &self.config.env_allowlist);

        let invocation = SolverInvocation::spawn(&self.config, env, input, deadline)?;
        info!(
            program = %self.config.program.display(),
            pid = ?invocation.pid(),
            deadline_ms = deadline.as_millis() as u64,
            samples = problem.samples,
            "Solver started"
        );

        let started = Instant::now();
        let result = invocation.wait(self.config.kill_grace).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(outcome) => info!(
                duration_ms = duration_ms,
                infeasible = outcome.is_infeasible(),
                "Solver finished"
            ),
            Err(e) => warn!(duration_ms = duration_ms, error = %e, "Solver failed"),
        }
        result
    }
}
