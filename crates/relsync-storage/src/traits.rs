//! Storage traits for the link storage abstraction layer.
//!
//! This module defines the capabilities a backend must provide for
//! association reconciliation: transactions, exclusive row locks, membership
//! listing, fail-fast lookup, and linking/unlinking.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::schema::{Association, EntityDef};
use crate::types::{IdSet, Identifier, ParentRecord, RelatedRecord};

/// Entry point of a storage backend.
///
/// Implementations must be thread-safe (`Send + Sync`).
///
/// # Example
///
/// ```ignore
/// use relsync_storage::{LinkStorage, StorageError};
///
/// async fn count_members(
///     storage: &dyn LinkStorage,
///     parent: &ParentRecord,
///     association: &Association,
/// ) -> Result<usize, StorageError> {
///     let mut tx = storage.begin_transaction().await?;
///     let ids = tx.member_ids(parent, association).await?;
///     tx.rollback().await?;
///     Ok(ids.len())
/// }
/// ```
#[async_trait]
pub trait LinkStorage: Send + Sync {
    /// Begins a new transaction.
    ///
    /// The returned transaction must be either committed or rolled back.
    /// Dropping it without doing either rolls it back.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` or `StorageError::ConnectionError`
    /// if a transaction cannot be started.
    async fn begin_transaction(&self) -> Result<Box<dyn LinkTransaction>, StorageError>;

    /// Returns the name of this storage backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// A transaction scoping locks, reads and linkage changes.
///
/// All effects become visible to other transactions on `commit` and are
/// discarded on `rollback`. Row locks are released when the transaction ends.
#[async_trait]
pub trait LinkTransaction: Send {
    /// Takes an exclusive lock on an entity row, blocking until it is held
    /// for the rest of the transaction.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the row does not exist and
    /// `StorageError::LockTimeout` if the lock could not be acquired in time.
    async fn lock(&mut self, entity: &EntityDef, id: &Identifier) -> Result<(), StorageError>;

    /// Lists the identifiers currently linked to `parent` through `association`.
    ///
    /// Sees changes made earlier in this transaction.
    async fn member_ids(
        &mut self,
        parent: &ParentRecord,
        association: &Association,
    ) -> Result<IdSet, StorageError>;

    /// Fetches a record by identifier.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no row has that identifier.
    async fn resolve(
        &mut self,
        entity: &EntityDef,
        id: &Identifier,
    ) -> Result<RelatedRecord, StorageError>;

    /// Links a related record to `parent`. Linking an existing member is a no-op.
    async fn link(
        &mut self,
        parent: &ParentRecord,
        association: &Association,
        related: &RelatedRecord,
    ) -> Result<(), StorageError>;

    /// Unlinks a related record from `parent`. Unlinking a non-member is a no-op.
    async fn unlink(
        &mut self,
        parent: &ParentRecord,
        association: &Association,
        related: &RelatedRecord,
    ) -> Result<(), StorageError>;

    /// Commits all changes in this transaction and releases its locks.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` or `StorageError::Conflict`
    /// if the commit fails.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Rolls back all changes in this transaction and releases its locks.
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;

    /// Refreshes the cached membership of `associations` on `parent`.
    async fn reload(
        &mut self,
        parent: &mut ParentRecord,
        associations: &[&Association],
    ) -> Result<(), StorageError> {
        for association in associations {
            let ids = self.member_ids(parent, association).await?;
            parent.set_members(association.name.clone(), ids);
        }
        Ok(())
    }
}
