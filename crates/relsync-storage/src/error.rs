//! Storage error types for the link storage abstraction layer.
//!
//! This module defines all error types that can occur during storage operations.

use std::fmt;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested record was not found.
    #[error("Record not found: {entity}/{id}")]
    NotFound {
        /// The entity the record belongs to.
        entity: String,
        /// The identifier that did not resolve.
        id: String,
    },

    /// An exclusive row lock could not be acquired in time.
    #[error("Lock not acquired on {entity}/{id}: {message}")]
    LockTimeout {
        /// The entity whose row was being locked.
        entity: String,
        /// The identifier of the locked row.
        id: String,
        /// Backend-specific detail.
        message: String,
    },

    /// The backend aborted the transaction because of a concurrent conflict
    /// (deadlock, serialization failure).
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// An error occurred while beginning, committing or rolling back a transaction.
    #[error("Transaction error: {message}")]
    TransactionError {
        /// Description of the transaction error.
        message: String,
    },

    /// Failed to connect to the storage backend.
    #[error("Connection error: {message}")]
    ConnectionError {
        /// Description of the connection error.
        message: String,
    },

    /// The entity/association schema is inconsistent.
    #[error("Invalid schema: {message}")]
    InvalidSchema {
        /// Description of the schema problem.
        message: String,
    },

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Creates a new `LockTimeout` error.
    #[must_use]
    pub fn lock_timeout(
        entity: impl Into<String>,
        id: impl ToString,
        message: impl Into<String>,
    ) -> Self {
        Self::LockTimeout {
            entity: entity.into(),
            id: id.to_string(),
            message: message.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `TransactionError` error.
    #[must_use]
    pub fn transaction_error(message: impl Into<String>) -> Self {
        Self::TransactionError {
            message: message.into(),
        }
    }

    /// Creates a new `ConnectionError` error.
    #[must_use]
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidSchema` error.
    #[must_use]
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the row lock could not be acquired.
    #[must_use]
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Returns `true` if this is a concurrent conflict error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::LockTimeout { .. } => ErrorCategory::Contention,
            Self::Conflict { .. } => ErrorCategory::Contention,
            Self::TransactionError { .. } => ErrorCategory::Transaction,
            Self::ConnectionError { .. } => ErrorCategory::Infrastructure,
            Self::InvalidSchema { .. } => ErrorCategory::Validation,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of storage errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Record not found.
    NotFound,
    /// Lock wait or concurrent conflict.
    Contention,
    /// Validation error.
    Validation,
    /// Transaction-related error.
    Transaction,
    /// Infrastructure/connection error.
    Infrastructure,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Contention => write!(f, "contention"),
            Self::Validation => write!(f, "validation"),
            Self::Transaction => write!(f, "transaction"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::not_found("tag", 7);
        assert_eq!(err.to_string(), "Record not found: tag/7");

        let err = StorageError::lock_timeout("project", 1, "timed out after 50ms");
        assert_eq!(
            err.to_string(),
            "Lock not acquired on project/1: timed out after 50ms"
        );

        let err = StorageError::conflict("deadlock detected");
        assert_eq!(err.to_string(), "Conflict: deadlock detected");
    }

    #[test]
    fn test_error_predicates() {
        let err = StorageError::not_found("tag", "7");
        assert!(err.is_not_found());
        assert!(!err.is_lock_timeout());
        assert!(!err.is_conflict());

        let err = StorageError::lock_timeout("project", "1", "busy");
        assert!(!err.is_not_found());
        assert!(err.is_lock_timeout());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            StorageError::not_found("tag", "7").category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            StorageError::lock_timeout("project", "1", "busy").category(),
            ErrorCategory::Contention
        );
        assert_eq!(
            StorageError::conflict("serialization failure").category(),
            ErrorCategory::Contention
        );
        assert_eq!(
            StorageError::invalid_schema("unknown entity").category(),
            ErrorCategory::Validation
        );
        assert_eq!(ErrorCategory::Contention.to_string(), "contention");
    }
}
