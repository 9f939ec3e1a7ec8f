//! Daemon configuration
//!
//! Layers, lowest first: built-in defaults, an optional `utagms.toml`
//! (or the file named by `UTAGMS_CONFIG`), then `UTAGMS_*` variables.

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use utagms_core::application::{RetryPolicy, WorkerSettings};
use utagms_core::port::MaintenanceConfig;
use utagms_infra_system::SolverCommandConfig;

const DEFAULT_DB_URL: &str = "sqlite://~/.utagms/jobs.db";
const DEFAULT_CONFIG_FILE: &str = "utagms.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub store_url: String,
    pub queue_url: String,
    pub pool_size: usize,
    pub attempt_deadline_secs: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: i64,
    pub visibility_timeout_secs: u64,
    pub lease_grace_secs: u64,
    pub recovery_interval_secs: u64,
    pub stale_pending_secs: u64,
    pub maintenance_interval_hours: u64,
    pub acked_retention_hours: i64,
    pub max_db_size_mb: f64,
    pub shutdown_timeout_secs: u64,
    pub solver_program: String,
    pub solver_args: Vec<String>,
    #[serde(default)]
    pub sampler_path: Option<String>,
    pub solver_env_allowlist: Vec<String>,
}

impl Settings {
    /// Load from the default file location and the process environment
    pub fn load() -> Result<Self> {
        let file = std::env::var("UTAGMS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_sources(Some(&file), Environment::with_prefix("UTAGMS"))
    }

    fn from_sources(file: Option<&str>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("store_url", DEFAULT_DB_URL)?
            .set_default("queue_url", DEFAULT_DB_URL)?
            .set_default("pool_size", 2)?
            .set_default("attempt_deadline_secs", 300)?
            .set_default("max_attempts", 3)?
            .set_default("retry_base_delay_ms", 1000)?
            .set_default("visibility_timeout_secs", 60)?
            .set_default("lease_grace_secs", 30)?
            .set_default("recovery_interval_secs", 30)?
            .set_default("stale_pending_secs", 300)?
            .set_default("maintenance_interval_hours", 24)?
            .set_default("acked_retention_hours", 24)?
            .set_default("max_db_size_mb", 1000.0)?
            .set_default("shutdown_timeout_secs", 30)?
            .set_default("solver_program", "utagms-solver")?
            .set_default("solver_args", Vec::<String>::new())?
            .set_default(
                "solver_env_allowlist",
                vec!["PATH".to_string(), "HOME".to_string(), "JAVA_HOME".to_string()],
            )?;

        if let Some(file) = file {
            builder = builder.add_source(File::with_name(file).required(false));
        }

        let settings: Settings = builder
            .add_source(
                env.try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("solver_args")
                    .with_list_parse_key("solver_env_allowlist"),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.expanded().validate()
    }

    fn expanded(mut self) -> Self {
        self.store_url = shellexpand::tilde(&self.store_url).into_owned();
        self.queue_url = shellexpand::tilde(&self.queue_url).into_owned();
        self.sampler_path = self
            .sampler_path
            .map(|p| shellexpand::tilde(&p).into_owned());
        self
    }

    fn validate(self) -> Result<Self> {
        if self.pool_size == 0 {
            bail!("pool_size must be at least 1");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.attempt_deadline_secs == 0 {
            bail!("attempt_deadline_secs must be greater than 0");
        }
        if self.visibility_timeout_secs == 0 {
            bail!("visibility_timeout_secs must be greater than 0");
        }
        if self.solver_program.trim().is_empty() {
            bail!("solver_program cannot be empty");
        }
        Ok(self)
    }

    pub fn worker_settings(&self, worker_id: impl Into<String>) -> WorkerSettings {
        let mut settings = WorkerSettings::new(worker_id);
        settings.attempt_deadline = Duration::from_secs(self.attempt_deadline_secs);
        settings.visibility_timeout = Duration::from_secs(self.visibility_timeout_secs);
        settings.lease_grace = Duration::from_secs(self.lease_grace_secs);
        settings
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_base_delay_ms).with_max_attempts(self.max_attempts)
    }

    pub fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            acked_retention_hours: self.acked_retention_hours,
            max_db_size_mb: self.max_db_size_mb,
        }
    }

    pub fn solver_config(&self) -> SolverCommandConfig {
        let mut config = SolverCommandConfig::new(&self.solver_program).with_args(self.solver_args.clone());
        config.sampler_path = self.sampler_path.as_ref().map(PathBuf::from);
        config.env_allowlist = self.solver_env_allowlist.clone();
        config
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs.max(1))
    }

    pub fn stale_pending_ms(&self) -> i64 {
        (self.stale_pending_secs * 1000) as i64
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Parent directory of a file-backed SQLite URL, if any
pub fn database_dir(url: &str) -> Option<PathBuf> {
    if url.contains(":memory:") {
        return None;
    }
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or(path);
    PathBuf::from(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
}
