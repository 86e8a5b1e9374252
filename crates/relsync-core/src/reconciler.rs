//! The reconciler: diff desired against current membership and apply the
//! difference under the parent's row lock in one transaction.

use std::fmt;
use std::sync::Arc;

use relsync_storage::{
    Association, DynLinkStorage, IdSet, Identifier, LinkTransaction, ParentRecord, Schema,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::coerce::{Coercer, ResourceIdentifier};
use crate::error::{ReconcileError, ReconcileResult};
use crate::filter::Filters;
use crate::venn::{SetOperation, resolve_all, venn};

/// Reconciliation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Membership becomes exactly the desired set.
    FullSync,
    /// Link desired ids that are not yet members.
    AddMissing,
    /// Unlink desired ids that are members.
    RemovePresent,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullSync => write!(f, "full_sync"),
            Self::AddMissing => write!(f, "add_missing"),
            Self::RemovePresent => write!(f, "remove_present"),
        }
    }
}

/// Per-call options: identifier coercion and veto predicates.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub coercer: Coercer,
    pub filters: Filters,
}

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_coercer(mut self, coercer: Coercer) -> Self {
        self.coercer = coercer;
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }
}

/// What a reconcile call changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub mode: SyncMode,
    pub linked: Vec<Identifier>,
    pub unlinked: Vec<Identifier>,
    /// Candidates for linking vetoed by the add filter.
    pub skipped_add: Vec<Identifier>,
    /// Candidates for unlinking vetoed by the remove filter.
    pub skipped_remove: Vec<Identifier>,
}

impl ReconcileOutcome {
    fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            linked: Vec::new(),
            unlinked: Vec::new(),
            skipped_add: Vec::new(),
            skipped_remove: Vec::new(),
        }
    }

    /// Number of link and unlink actions performed.
    pub fn change_count(&self) -> usize {
        self.linked.len() + self.unlinked.len()
    }

    pub fn is_noop(&self) -> bool {
        self.change_count() == 0
    }
}

/// Applies desired memberships to parents through a [`LinkStorage`].
///
/// [`LinkStorage`]: relsync_storage::LinkStorage
#[derive(Clone)]
pub struct Reconciler {
    storage: DynLinkStorage,
    schema: Arc<Schema>,
}

impl Reconciler {
    pub fn new(storage: DynLinkStorage, schema: Arc<Schema>) -> Self {
        Self { storage, schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn storage(&self) -> &DynLinkStorage {
        &self.storage
    }

    /// Makes the association's membership equal to `desired`.
    ///
    /// Ids in `desired` but not linked are linked unless the add filter vetoes
    /// them; linked ids missing from `desired` are unlinked unless the remove
    /// filter vetoes them. An empty `desired` unlinks everything. Any desired id
    /// that does not resolve fails the call and nothing is changed.
    pub async fn full_sync(
        &self,
        parent: &mut ParentRecord,
        association: &str,
        desired: &[ResourceIdentifier],
        options: &SyncOptions,
    ) -> ReconcileResult<ReconcileOutcome> {
        self.reconcile(SyncMode::FullSync, parent, association, desired, options)
            .await
    }

    /// Links every desired id that is not linked yet. Never unlinks.
    pub async fn add_missing(
        &self,
        parent: &mut ParentRecord,
        association: &str,
        desired: &[ResourceIdentifier],
        options: &SyncOptions,
    ) -> ReconcileResult<ReconcileOutcome> {
        self.reconcile(SyncMode::AddMissing, parent, association, desired, options)
            .await
    }

    /// Unlinks every desired id that is currently linked. Never links.
    pub async fn remove_present(
        &self,
        parent: &mut ParentRecord,
        association: &str,
        desired: &[ResourceIdentifier],
        options: &SyncOptions,
    ) -> ReconcileResult<ReconcileOutcome> {
        self.reconcile(SyncMode::RemovePresent, parent, association, desired, options)
            .await
    }

    /// Dispatches on `mode`; the three public operations are thin wrappers.
    #[instrument(
        name = "reconcile",
        skip_all,
        fields(
            mode = %mode,
            entity = %parent.entity(),
            id = %parent.id(),
            association = %association_name,
        )
    )]
    pub async fn reconcile(
        &self,
        mode: SyncMode,
        parent: &mut ParentRecord,
        association_name: &str,
        desired: &[ResourceIdentifier],
        options: &SyncOptions,
    ) -> ReconcileResult<ReconcileOutcome> {
        let association = self.association(parent, association_name)?;
        // Coerced before the transaction begins.
        let new_ids = options.coercer.coerce_all(desired)?;

        let mut tx = self
            .storage
            .begin_transaction()
            .await
            .map_err(ReconcileError::TransactionFailure)?;

        let result = self
            .apply(tx.as_mut(), mode, parent, association, &new_ids, &options.filters)
            .await;

        match result {
            Ok(outcome) => {
                tx.commit()
                    .await
                    .map_err(ReconcileError::TransactionFailure)?;
                info!(
                    linked = outcome.linked.len(),
                    unlinked = outcome.unlinked.len(),
                    skipped = outcome.skipped_add.len() + outcome.skipped_remove.len(),
                    "Reconciled membership"
                );
                Ok(outcome)
            }
            Err(err) => {
                debug!(error = %err, "Reconcile failed, rolling back");
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failed reconcile did not complete");
                }
                Err(err)
            }
        }
    }

    /// Reloads one association on `parent` without locking or changing anything.
    pub async fn membership(
        &self,
        parent: &mut ParentRecord,
        association_name: &str,
    ) -> ReconcileResult<IdSet> {
        let association = self.association(parent, association_name)?;
        let mut tx = self
            .storage
            .begin_transaction()
            .await
            .map_err(ReconcileError::TransactionFailure)?;
        let loaded = tx.reload(parent, &[association]).await;
        if let Err(err) = tx.rollback().await {
            warn!(error = %err, "Rollback of read-only transaction did not complete");
        }
        loaded?;
        Ok(parent
            .members(association_name)
            .cloned()
            .unwrap_or_default())
    }

    fn association(&self, parent: &ParentRecord, name: &str) -> ReconcileResult<&Association> {
        self.schema
            .association(parent.entity(), name)
            .ok_or_else(|| ReconcileError::unknown_association(parent.entity(), name))
    }

    async fn apply(
        &self,
        tx: &mut dyn LinkTransaction,
        mode: SyncMode,
        parent: &mut ParentRecord,
        association: &Association,
        new_ids: &IdSet,
        filters: &Filters,
    ) -> ReconcileResult<ReconcileOutcome> {
        tx.lock(&association.owner, parent.id()).await?;

        let (to_link, to_unlink) = match mode {
            SyncMode::FullSync => {
                let current = tx.member_ids(parent, association).await?;
                let common = SetOperation::Intersection.apply(new_ids, &current);
                let to_link = SetOperation::Difference.apply(new_ids, &common);
                let to_unlink = SetOperation::Difference.apply(&current, &common);
                (
                    resolve_all(tx, association, &to_link).await?,
                    resolve_all(tx, association, &to_unlink).await?,
                )
            }
            SyncMode::AddMissing => (
                venn(tx, SetOperation::Difference, parent, association, new_ids).await?,
                Vec::new(),
            ),
            SyncMode::RemovePresent => (
                Vec::new(),
                venn(tx, SetOperation::Intersection, parent, association, new_ids).await?,
            ),
        };

        let mut outcome = ReconcileOutcome::new(mode);
        for record in to_link {
            if !filters.accepts_add(&record) {
                debug!(related = %record.id, "Add vetoed by filter");
                outcome.skipped_add.push(record.id);
                continue;
            }
            tx.link(parent, association, &record).await?;
            debug!(related = %record.id, "Linked");
            outcome.linked.push(record.id);
        }
        for record in to_unlink {
            if !filters.accepts_remove(&record) {
                debug!(related = %record.id, "Remove vetoed by filter");
                outcome.skipped_remove.push(record.id);
                continue;
            }
            tx.unlink(parent, association, &record).await?;
            debug!(related = %record.id, "Unlinked");
            outcome.unlinked.push(record.id);
        }

        self.refresh(tx, parent, association).await?;
        Ok(outcome)
    }

    /// Re-reads the reconciled association and every other association the
    /// caller had cached; cached names unknown to the schema are dropped.
    async fn refresh(
        &self,
        tx: &mut dyn LinkTransaction,
        parent: &mut ParentRecord,
        association: &Association,
    ) -> ReconcileResult<()> {
        let mut targets = vec![association];
        let mut stale = Vec::new();
        for name in parent.loaded_associations() {
            if name == association.name {
                continue;
            }
            match self.schema.association(parent.entity(), name) {
                Some(other) => targets.push(other),
                None => stale.push(name.to_string()),
            }
        }
        for name in &stale {
            parent.invalidate(name);
        }
        tx.reload(parent, &targets).await?;
        Ok(())
    }
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("backend", &self.storage.backend_name())
            .finish()
    }
}
