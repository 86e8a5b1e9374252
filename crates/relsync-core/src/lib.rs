//! # relsync-core
//!
//! Reconciles the membership of a to-many association against a desired list
//! of identifiers.
//!
//! Three policies are provided by [`Reconciler`]:
//!
//! - [`Reconciler::full_sync`] makes the membership exactly the desired set.
//! - [`Reconciler::add_missing`] links desired ids that are not yet members.
//! - [`Reconciler::remove_present`] unlinks desired ids that are members.
//!
//! Every call coerces the payload up front, then opens a single transaction,
//! locks the parent row, computes the change set from freshly read membership,
//! applies it and reloads the parent's cached associations before committing.
//! Any failure rolls the whole call back.
//!
//! ```ignore
//! use std::sync::Arc;
//! use relsync_core::{Reconciler, SyncOptions, identifiers};
//! use relsync_storage::ParentRecord;
//!
//! let reconciler = Reconciler::new(storage, Arc::new(schema));
//! let mut project = ParentRecord::new("project", 1_i64);
//! let outcome = reconciler
//!     .full_sync(&mut project, "tags", &identifiers([2, 3, 4]), &SyncOptions::default())
//!     .await?;
//! ```

pub mod coerce;
pub mod error;
pub mod filter;
pub mod reconciler;
pub mod venn;

pub use coerce::{Coercer, ResourceIdentifier, identifiers};
pub use error::{CoercionError, ReconcileError, ReconcileResult};
pub use filter::{Filters, Predicate};
pub use reconciler::{ReconcileOutcome, Reconciler, SyncMode, SyncOptions};
pub use venn::{SetOperation, venn};
