//! Error types for the PostgreSQL storage backend.

use relsync_storage::{Identifier, StorageError};
use sqlx_core::error::Error as SqlxError;

/// PostgreSQL error code for `lock_not_available` (55P03), raised when
/// `lock_timeout` expires.
pub const PG_LOCK_NOT_AVAILABLE: &str = "55P03";

/// PostgreSQL error code for `deadlock_detected` (40P01).
pub const PG_DEADLOCK_DETECTED: &str = "40P01";

/// PostgreSQL error code for `serialization_failure` (40001).
pub const PG_SERIALIZATION_FAILURE: &str = "40001";

/// PostgreSQL error code for undefined table (42P01).
pub const PG_UNDEFINED_TABLE: &str = "42P01";

/// PostgreSQL error code for undefined column (42703).
pub const PG_UNDEFINED_COLUMN: &str = "42703";

/// Checks if a sqlx error has a specific PostgreSQL error code.
pub fn has_pg_error_code(err: &SqlxError, code: &str) -> bool {
    if let SqlxError::Database(db_err) = err {
        db_err.code().as_deref() == Some(code)
    } else {
        false
    }
}

/// Checks if a sqlx error is "lock not available" (55P03).
pub fn is_lock_not_available(err: &SqlxError) -> bool {
    has_pg_error_code(err, PG_LOCK_NOT_AVAILABLE)
}

/// Errors specific to the PostgreSQL storage backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database connection error.
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx_core::error::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PostgresError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<PostgresError> for StorageError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Connection(e) => StorageError::connection_error(e.to_string()),
            PostgresError::Config { message } => {
                StorageError::internal(format!("Configuration error: {message}"))
            }
        }
    }
}

/// Classifies a query failure into a [`StorageError`].
///
/// `context` names the statement that failed and prefixes the message.
pub fn query_error(err: SqlxError, context: &str) -> StorageError {
    if has_pg_error_code(&err, PG_DEADLOCK_DETECTED)
        || has_pg_error_code(&err, PG_SERIALIZATION_FAILURE)
    {
        return StorageError::conflict(format!("{context}: {err}"));
    }
    if has_pg_error_code(&err, PG_UNDEFINED_TABLE) || has_pg_error_code(&err, PG_UNDEFINED_COLUMN)
    {
        return StorageError::invalid_schema(format!("{context}: {err}"));
    }
    match err {
        SqlxError::Io(_) | SqlxError::PoolTimedOut | SqlxError::PoolClosed | SqlxError::Tls(_) => {
            StorageError::connection_error(format!("{context}: {err}"))
        }
        err => StorageError::internal(format!("{context}: {err}")),
    }
}

/// Like [`query_error`], but reports an expired `lock_timeout` as a lock
/// timeout on the given row.
pub fn lock_error(err: SqlxError, entity: &str, id: &Identifier) -> StorageError {
    if is_lock_not_available(&err) {
        StorageError::lock_timeout(entity, id, err.to_string())
    } else {
        query_error(err, "Failed to lock row")
    }
}
