// SQLite Connection Pool Setup

use crate::error::map_sqlx_error;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use utagms_core::error::{AppError, Result};

/// Create SQLite connection pool with WAL mode
///
/// An in-memory database lives per connection, so `:memory:` URLs get a
/// single-connection pool.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::Config(format!("Invalid database URL {}: {}", database_url, e)))?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true)
        .create_if_missing(true);

    let max_connections = if database_url.contains(":memory:") {
        1
    } else {
        10
    };

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(map_sqlx_error)
}
