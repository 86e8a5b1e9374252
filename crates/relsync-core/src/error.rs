//! Errors reported by the reconciler.

use relsync_storage::{IdKind, StorageError};
use serde_json::Value;
use thiserror::Error;

/// A desired identifier could not be converted to the related identifier domain.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}cannot coerce {value} to {target} identifier: {reason}", position_prefix(.position))]
pub struct CoercionError {
    /// Position of the offending entry in the desired list, when known.
    pub position: Option<usize>,
    /// The raw value that failed.
    pub value: Value,
    /// Target identifier domain.
    pub target: IdKind,
    pub reason: String,
}

fn position_prefix(position: &Option<usize>) -> String {
    position
        .map(|p| format!("entry {p}: "))
        .unwrap_or_default()
}

impl CoercionError {
    pub fn new(value: &Value, target: IdKind, reason: impl Into<String>) -> Self {
        Self {
            position: None,
            value: value.clone(),
            target,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }
}

/// Errors returned by reconcile operations.
///
/// Every variant other than `Coercion` and `UnknownAssociation` is raised
/// inside the transaction, which has been rolled back by the time the caller
/// sees it.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Coercion(#[from] CoercionError),

    #[error("Unknown association '{association}' on entity '{entity}'")]
    UnknownAssociation { entity: String, association: String },

    #[error("Record not found: {entity}/{id}")]
    NotFound { entity: String, id: String },

    #[error("Could not lock {entity}/{id}: {message}")]
    LockContention {
        entity: String,
        id: String,
        message: String,
    },

    #[error("Transaction failed: {0}")]
    TransactionFailure(StorageError),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl ReconcileError {
    pub fn unknown_association(entity: impl Into<String>, association: impl Into<String>) -> Self {
        Self::UnknownAssociation {
            entity: entity.into(),
            association: association.into(),
        }
    }

    /// Returns `true` for caller-input errors raised before any storage access.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::Coercion(_) | Self::UnknownAssociation { .. })
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<StorageError> for ReconcileError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity, id } => Self::NotFound { entity, id },
            StorageError::LockTimeout {
                entity,
                id,
                message,
            } => Self::LockContention {
                entity,
                id,
                message,
            },
            err @ (StorageError::Conflict { .. }
            | StorageError::TransactionError { .. }
            | StorageError::ConnectionError { .. }) => Self::TransactionFailure(err),
            err => Self::Storage(err),
        }
    }
}

/// Type alias for reconcile results.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coercion_error_display() {
        let err = CoercionError::new(&json!("abc"), IdKind::Integer, "invalid digit found in string");
        assert_eq!(
            err.to_string(),
            "cannot coerce \"abc\" to integer identifier: invalid digit found in string"
        );
        let err = err.at(2);
        assert!(err.to_string().starts_with("entry 2: "));
    }

    #[test]
    fn test_storage_error_mapping() {
        let err: ReconcileError = StorageError::not_found("tag", 4).into();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Record not found: tag/4");

        let err: ReconcileError = StorageError::lock_timeout("project", 1, "busy").into();
        assert!(matches!(err, ReconcileError::LockContention { .. }));

        let err: ReconcileError = StorageError::conflict("deadlock detected").into();
        assert!(matches!(err, ReconcileError::TransactionFailure(_)));

        let err: ReconcileError = StorageError::connection_error("reset").into();
        assert!(matches!(err, ReconcileError::TransactionFailure(_)));

        let err: ReconcileError = StorageError::internal("boom").into();
        assert!(matches!(err, ReconcileError::Storage(_)));
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_input_errors() {
        assert!(ReconcileError::unknown_association("project", "owners").is_input_error());
        let err: ReconcileError = CoercionError::new(&json!(null), IdKind::Uuid, "null").into();
        assert!(err.is_input_error());
    }
}
