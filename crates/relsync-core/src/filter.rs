//! Per-item veto predicates for the add and remove sides.

use std::fmt;
use std::sync::Arc;

use relsync_storage::RelatedRecord;

/// A predicate over a resolved related record. Returning `false` skips it.
pub type Predicate = Arc<dyn Fn(&RelatedRecord) -> bool + Send + Sync>;

/// Optional add-side and remove-side predicates.
///
/// A missing predicate accepts everything. A vetoed candidate is skipped
/// silently and reported in the outcome, never as an error.
#[derive(Clone, Default)]
pub struct Filters {
    add: Option<Predicate>,
    remove: Option<Predicate>,
}

impl Filters {
    /// No filtering on either side.
    pub fn none() -> Self {
        Self::default()
    }

    /// Uses one predicate for both sides.
    pub fn both<F>(predicate: F) -> Self
    where
        F: Fn(&RelatedRecord) -> bool + Send + Sync + 'static,
    {
        let predicate: Predicate = Arc::new(predicate);
        Self {
            add: Some(predicate.clone()),
            remove: Some(predicate),
        }
    }

    #[must_use]
    pub fn on_add<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RelatedRecord) -> bool + Send + Sync + 'static,
    {
        self.add = Some(Arc::new(predicate));
        self
    }

    #[must_use]
    pub fn on_remove<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RelatedRecord) -> bool + Send + Sync + 'static,
    {
        self.remove = Some(Arc::new(predicate));
        self
    }

    pub fn accepts_add(&self, record: &RelatedRecord) -> bool {
        self.add.as_ref().is_none_or(|p| p(record))
    }

    pub fn accepts_remove(&self, record: &RelatedRecord) -> bool {
        self.remove.as_ref().is_none_or(|p| p(record))
    }
}

impl fmt::Debug for Filters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filters")
            .field("add", &self.add.is_some())
            .field("remove", &self.remove.is_some())
            .finish()
    }
}
