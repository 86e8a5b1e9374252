//! Set arithmetic between desired and current membership.

use std::fmt;

use relsync_storage::{Association, IdSet, LinkTransaction, ParentRecord, RelatedRecord};
use serde::{Deserialize, Serialize};

use crate::error::ReconcileResult;

/// Operator applied as `desired <op> current`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOperation {
    /// Desired ids not yet linked.
    Difference,
    /// Desired ids that are linked.
    Intersection,
}

impl SetOperation {
    pub fn apply(self, desired: &IdSet, current: &IdSet) -> IdSet {
        match self {
            Self::Difference => desired.difference(current).cloned().collect(),
            Self::Intersection => desired.intersection(current).cloned().collect(),
        }
    }
}

impl fmt::Display for SetOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Difference => write!(f, "difference"),
            Self::Intersection => write!(f, "intersection"),
        }
    }
}

/// Resolves each id against the related entity, failing on the first miss.
pub(crate) async fn resolve_all(
    tx: &mut dyn LinkTransaction,
    association: &Association,
    ids: &IdSet,
) -> ReconcileResult<Vec<RelatedRecord>> {
    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        records.push(tx.resolve(&association.related, id).await?);
    }
    Ok(records)
}

/// Applies `operation` between `desired` and the parent's current membership
/// and resolves the result.
///
/// Must run inside the transaction holding the parent's lock.
pub async fn venn(
    tx: &mut dyn LinkTransaction,
    operation: SetOperation,
    parent: &ParentRecord,
    association: &Association,
    desired: &IdSet,
) -> ReconcileResult<Vec<RelatedRecord>> {
    let current = tx.member_ids(parent, association).await?;
    let ids = operation.apply(desired, &current);
    resolve_all(tx, association, &ids).await
}
