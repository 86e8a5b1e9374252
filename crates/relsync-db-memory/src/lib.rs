//! In-memory link storage backend for relsync.
//!
//! This crate provides an in-memory implementation of the `LinkStorage` trait
//! from `relsync-storage`, using papaya lock-free HashMap for row data and
//! per-row tokio mutexes for exclusive row locks.
//!
//! # Example
//!
//! ```ignore
//! use relsync_db_memory::{Fixture, InMemoryStorage, MemoryConfig};
//!
//! let fixture = Fixture::default()
//!     .with_rows("project", [1_i64])
//!     .with_rows("tag", [1_i64, 2, 3])
//!     .with_links("project", 1_i64, "tags", [1_i64]);
//! let storage = InMemoryStorage::from_fixture(MemoryConfig::default(), &fixture, &schema).await?;
//! ```

pub mod factory;
pub mod fixture;
pub mod storage;
pub mod transaction;

// Re-export the LinkStorage trait for convenience
pub use relsync_storage::{LinkStorage, LinkTransaction, StorageError};

pub use factory::{MemoryConfig, create_storage};
pub use fixture::{Fixture, FixtureLinks, FixtureRow};
pub use storage::{InMemoryStorage, LinkKey, StorageKey};
pub use transaction::{MemoryTransaction, TransactionState, TransactionStats};
