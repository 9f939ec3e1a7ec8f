//! UTA-GMS worker daemon - Main Entry Point
//! Runs the worker pool, crash recovery and maintenance over SQLite.

mod config;
mod logging;
mod telemetry;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use utagms_core::application::{
    shutdown_channel, MaintenanceScheduler, RecoveryService, ShutdownToken, Worker, WorkerPool,
};
use utagms_core::port::time_provider::SystemTimeProvider;
use utagms_core::port::{BlobStore, JobRepository, Solver, TaskQueue, TimeProvider};
use utagms_infra_sqlite::{
    create_pool, run_migrations, SqliteBlobStore, SqliteJobRepository, SqliteMaintenance,
    SqlitePool, SqliteTaskQueue,
};
use utagms_infra_system::SubprocessSolver;

use crate::config::{database_dir, Settings};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const BACKGROUND_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging (keep the guard alive for the file writer)
    let _log_guard = logging::init()?;
    info!("UTA-GMS worker v{} starting...", VERSION);

    // 2. Configuration
    let settings = Settings::load()?;
    info!(
        store_url = %settings.store_url,
        queue_url = %settings.queue_url,
        pool_size = settings.pool_size,
        attempt_deadline_secs = settings.attempt_deadline_secs,
        max_attempts = settings.max_attempts,
        solver = %settings.solver_program,
        "Configuration loaded"
    );

    // 3. Databases
    let store_pool = open_database(&settings.store_url).await?;
    let queue_pool = if settings.queue_url == settings.store_url {
        store_pool.clone()
    } else {
        open_database(&settings.queue_url).await?
    };

    // 4. Dependencies (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let job_repo: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(store_pool.clone()));
    let queue: Arc<dyn TaskQueue> = Arc::new(SqliteTaskQueue::new(
        queue_pool.clone(),
        time_provider.clone(),
    ));
    let blobs: Arc<dyn BlobStore> = Arc::new(SqliteBlobStore::new(
        store_pool.clone(),
        time_provider.clone(),
    ));
    let solver: Arc<dyn Solver> = Arc::new(SubprocessSolver::new(settings.solver_config()));
    let retry_policy = Arc::new(settings.retry_policy());

    // 5. Crash recovery before taking new work
    info!("Running crash recovery...");
    let recovery = RecoveryService::new(
        job_repo.clone(),
        queue.clone(),
        time_provider.clone(),
        Some(settings.stale_pending_ms()),
    );
    match recovery.run_once().await {
        Ok(report) => info!(
            lost_jobs = report.lost,
            republished_jobs = report.republished,
            "Crash recovery completed"
        ),
        Err(e) => error!(error = %e, "Crash recovery failed"),
    }

    // 6. Worker pool
    let instance = std::process::id();
    let pool = WorkerPool::new(settings.pool_size, |index| {
        Worker::new(
            settings.worker_settings(format!("worker-{}-{}", instance, index)),
            job_repo.clone(),
            queue.clone(),
            blobs.clone(),
            solver.clone(),
            retry_policy.clone(),
            time_provider.clone(),
        )
    })?;

    let (shutdown_tx, shutdown) = shutdown_channel();
    info!(pool_size = pool.size(), "Starting workers...");
    let pool_handle = tokio::spawn(pool.run(shutdown.clone()));

    // 7. Background services
    let mut background: Vec<JoinHandle<()>> = vec![tokio::spawn(
        recovery.run(settings.recovery_interval(), shutdown.clone()),
    )];
    background.push(spawn_maintenance(
        &settings,
        store_pool.clone(),
        &time_provider,
        shutdown.clone(),
    ));
    if settings.queue_url != settings.store_url {
        background.push(spawn_maintenance(
            &settings,
            queue_pool.clone(),
            &time_provider,
            shutdown.clone(),
        ));
    }

    info!("System ready. Waiting for tasks...");

    // 8. Wait for shutdown signal
    wait_for_signal().await?;
    info!("Shutdown signal received. Finishing in-flight jobs...");

    // 9. Graceful shutdown, bounded
    shutdown_tx.shutdown();
    match tokio::time::timeout(settings.shutdown_timeout(), pool_handle).await {
        Ok(Ok(Ok(()))) => info!("Workers stopped"),
        Ok(Ok(Err(e))) => error!(error = %e, "Worker pool failed"),
        Ok(Err(e)) => error!(error = %e, "Worker pool task panicked"),
        Err(_) => warn!(
            timeout_secs = settings.shutdown_timeout_secs,
            "Workers did not stop in time; their jobs will be recovered after lease expiry"
        ),
    }
    for handle in background {
        let _ = tokio::time::timeout(BACKGROUND_STOP_TIMEOUT, handle).await;
    }

    store_pool.close().await;
    queue_pool.close().await;
    telemetry::shutdown();

    info!("Shutdown complete.");
    Ok(())
}

async fn open_database(url: &str) -> Result<SqlitePool> {
    if let Some(dir) = database_dir(url) {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create database directory {}", dir.display()))?;
    }

    info!(url = %url, "Initializing database...");
    let pool = create_pool(url)
        .await
        .with_context(|| format!("DB pool creation failed for {}", url))?;
    run_migrations(&pool).await.context("Migration failed")?;
    Ok(pool)
}

fn spawn_maintenance(
    settings: &Settings,
    pool: SqlitePool,
    time_provider: &Arc<dyn TimeProvider>,
    shutdown: ShutdownToken,
) -> JoinHandle<()> {
    let scheduler = MaintenanceScheduler::new(
        Arc::new(SqliteMaintenance::new(pool, time_provider.clone())),
        settings.maintenance_config(),
        settings.maintenance_interval_hours,
    );
    tokio::spawn(scheduler.run(shutdown))
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}
