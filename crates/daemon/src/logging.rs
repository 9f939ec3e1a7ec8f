//! Logging setup
//!
//! - `RUST_LOG` filter, default `utagms=info`
//! - `UTAGMS_LOG_FORMAT=json` for structured output, pretty otherwise
//! - `UTAGMS_LOG_DIR` adds a daily rolling file

use crate::telemetry::{self, BoxedLayer};
use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "utagms=info";
const LOG_FILE_PREFIX: &str = "utagms-worker.log";

/// Keeps the file writer flushing; drop on exit
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

pub fn init() -> Result<LogGuard> {
    let json = std::env::var("UTAGMS_LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    layers.push(if json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().pretty().boxed()
    });

    let mut file_guard = None;
    if let Ok(dir) = std::env::var("UTAGMS_LOG_DIR") {
        let dir = shellexpand::tilde(&dir).into_owned();
        let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(fmt::layer().json().with_ansi(false).with_writer(writer).boxed());
        file_guard = Some(guard);
    }

    let telemetry_error = match telemetry::layer() {
        Ok(Some(otel)) => {
            layers.push(otel);
            None
        }
        Ok(None) => None,
        Err(e) => Some(e),
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()?;

    if let Some(e) = telemetry_error {
        tracing::warn!(error = %e, "OpenTelemetry unavailable (continuing without it)");
    }

    Ok(LogGuard { _file: file_guard })
}
