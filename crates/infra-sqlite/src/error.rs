// sqlx::Error -> AppError
//
// Lives here because of the orphan rule: core cannot depend on sqlx and
// this crate cannot implement From<sqlx::Error> for AppError.

use utagms_core::error::AppError;

/// Convert sqlx::Error to AppError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let Some(code) = db_err.code() else {
                return AppError::Database(format!("Database error: {}", db_err.message()));
            };
            let code_str = code.as_ref();

            // SQLite error codes: https://www.sqlite.org/rescode.html
            match code_str {
                // UNIQUE / PRIMARY KEY constraint failed
                "2067" | "1555" => AppError::Conflict(format!(
                    "Unique constraint violation: {} ({})",
                    db_err.message(),
                    code_str
                )),
                "787" | "3850" => AppError::Database(format!(
                    "Foreign key constraint violation: {} ({})",
                    db_err.message(),
                    code_str
                )),
                "5" => AppError::Database(format!(
                    "Database locked (SQLITE_BUSY): {}",
                    db_err.message()
                )),
                "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                _ => AppError::Database(format!(
                    "Database error [{}]: {}",
                    code_str,
                    db_err.message()
                )),
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}
