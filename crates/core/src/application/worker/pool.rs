// Worker Pool - bounded set of concurrent workers sharing one queue and store

use super::{ShutdownToken, Worker};
use crate::error::{AppError, Result};
use tokio::task::JoinSet;
use tracing::{error, info};

pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Build `size` workers; `build` receives the worker index
    ///
    /// # Errors
    /// - AppError::Config if size is 0
    pub fn new(size: usize, build: impl Fn(usize) -> Worker) -> Result<Self> {
        if size == 0 {
            return Err(AppError::Config("pool_size must be at least 1".to_string()));
        }
        Ok(Self {
            workers: (0..size).map(build).collect(),
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Run every worker until shutdown; returns once all of them stopped
    pub async fn run(self, shutdown: ShutdownToken) -> Result<()> {
        let size = self.workers.len();
        let mut set = JoinSet::new();
        for worker in self.workers {
            let token = shutdown.clone();
            set.spawn(async move {
                let id = worker.id().to_string();
                (id, worker.run(token).await)
            });
        }
        info!(pool_size = size, "Worker pool started");

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((worker_id, Err(e))) => {
                    error!(worker_id = %worker_id, error = %e, "Worker exited with error")
                }
                Err(join_err) => error!(error = %join_err, "Worker task aborted"),
            }
        }

        info!("Worker pool stopped");
        Ok(())
    }
}
