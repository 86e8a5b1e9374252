//! # relsync-storage
//!
//! Storage abstraction layer for relsync.
//!
//! This crate defines the capabilities that association reconciliation needs
//! from a transactional store, and the descriptors it works with. It does not
//! contain any implementations - those are provided by separate crates.
//!
//! ## Overview
//!
//! - [`LinkStorage`] opens transactions.
//! - [`LinkTransaction`] locks rows, lists memberships, resolves records by
//!   identifier and links/unlinks them.
//! - [`Schema`] resolves [`Association`] descriptors by owner entity and name.
//!
//! ## Storage Backends
//!
//! To implement a storage backend, implement both traits:
//!
//! ```ignore
//! use async_trait::async_trait;
//! use relsync_storage::{LinkStorage, LinkTransaction, StorageError};
//!
//! struct MyStorage {
//!     // ...
//! }
//!
//! #[async_trait]
//! impl LinkStorage for MyStorage {
//!     async fn begin_transaction(&self) -> Result<Box<dyn LinkTransaction>, StorageError> {
//!         // Implementation
//!     }
//!
//!     fn backend_name(&self) -> &'static str {
//!         "mine"
//!     }
//! }
//! ```

mod error;
mod schema;
mod traits;
mod types;

// Re-export everything from submodules
pub use error::{ErrorCategory, StorageError};
pub use schema::{
    Association, AssociationDefinition, EntityDef, EntityDefinition, Linkage, Schema,
    SchemaDefinition,
};
pub use traits::{LinkStorage, LinkTransaction};
pub use types::{IdKind, IdSet, Identifier, ParentRecord, RelatedRecord, id_set};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared storage trait object.
pub type DynLinkStorage = std::sync::Arc<dyn LinkStorage>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use relsync_storage::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{ErrorCategory, StorageError};
    pub use crate::schema::{Association, EntityDef, Linkage, Schema, SchemaDefinition};
    pub use crate::traits::{LinkStorage, LinkTransaction};
    pub use crate::types::{IdKind, IdSet, Identifier, ParentRecord, RelatedRecord, id_set};
    pub use crate::{DynLinkStorage, StorageResult};
}
