use std::collections::HashMap;

use async_trait::async_trait;
use relsync_storage::{
    Association, EntityDef, IdSet, Identifier, LinkTransaction, ParentRecord, RelatedRecord,
    StorageError, StorageResult,
};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::storage::{
    InMemoryStorage, LinkChange, LinkKey, StorageKey, make_storage_key, not_locked,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionStats {
    pub total_transactions: u64,
    pub committed_transactions: u64,
    pub rolled_back_transactions: u64,
    pub total_changes: u64,
    pub average_changes_per_commit: f64,
}

impl TransactionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_started(&mut self) {
        self.total_transactions += 1;
    }

    pub fn record_finished(&mut self, state: TransactionState, changes: usize) {
        match state {
            TransactionState::Committed => {
                self.committed_transactions += 1;
                self.total_changes += changes as u64;
            }
            TransactionState::RolledBack => self.rolled_back_transactions += 1,
            TransactionState::Active => {}
        }
        self.recalculate_averages();
    }

    fn recalculate_averages(&mut self) {
        if self.committed_transactions > 0 {
            self.average_changes_per_commit =
                self.total_changes as f64 / self.committed_transactions as f64;
        }
    }
}

/// A transaction against [`InMemoryStorage`].
///
/// Row locks are owned mutex guards released when the transaction is
/// committed, rolled back or dropped. Link changes are staged and only reach
/// the shared state on commit, so rollback is simply discarding them.
pub struct MemoryTransaction {
    id: Uuid,
    storage: InMemoryStorage,
    held: HashMap<StorageKey, OwnedMutexGuard<()>>,
    staged: Vec<LinkChange>,
    state: TransactionState,
}

impl MemoryTransaction {
    pub(crate) fn new(storage: InMemoryStorage) -> Self {
        let id = Uuid::new_v4();
        tracing::trace!(tx = %id, "Memory transaction started");
        Self {
            id,
            storage,
            held: HashMap::new(),
            staged: Vec::new(),
            state: TransactionState::Active,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn ensure_locked(&self, parent: &ParentRecord) -> StorageResult<()> {
        let key = make_storage_key(parent.entity(), parent.id());
        if self.held.contains_key(&key) {
            Ok(())
        } else {
            Err(not_locked(parent.entity(), parent.id()))
        }
    }

    fn link_key(parent: &ParentRecord, association: &Association) -> LinkKey {
        LinkKey::new(
            parent.entity(),
            parent.id().clone(),
            association.name.clone(),
        )
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        let changes = if state == TransactionState::Committed {
            self.staged.len()
        } else {
            0
        };
        if let Ok(mut stats) = self.storage.transaction_stats.lock() {
            stats.record_finished(state, changes);
        }
        self.staged.clear();
        for (key, guard) in std::mem::take(&mut self.held) {
            self.storage.release_row(&key, guard);
        }
    }
}

#[async_trait]
impl LinkTransaction for MemoryTransaction {
    async fn lock(&mut self, entity: &EntityDef, id: &Identifier) -> StorageResult<()> {
        if !self.storage.exists(&entity.name, id) {
            return Err(StorageError::not_found(&entity.name, id));
        }

        let key = make_storage_key(&entity.name, id);
        if self.held.contains_key(&key) {
            return Ok(());
        }

        let mutex = self.storage.row_lock(&key);
        let guard = match self.storage.lock_timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, mutex.lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => {
                    self.storage.prune_row_lock(&key);
                    return Err(StorageError::lock_timeout(
                        &entity.name,
                        id,
                        format!("timed out after {}ms", timeout.as_millis()),
                    ));
                }
            },
            None => mutex.lock_owned().await,
        };
        tracing::trace!(tx = %self.id, entity = %entity.name, row = %id, "Row lock acquired");
        self.held.insert(key, guard);
        Ok(())
    }

    async fn member_ids(
        &mut self,
        parent: &ParentRecord,
        association: &Association,
    ) -> StorageResult<IdSet> {
        let key = Self::link_key(parent, association);
        Ok(self.storage.staged_membership(&key, &self.staged).await)
    }

    async fn resolve(&mut self, entity: &EntityDef, id: &Identifier) -> StorageResult<RelatedRecord> {
        self.storage
            .row(&entity.name, id)
            .map(|attributes| RelatedRecord::new(&entity.name, id.clone(), attributes))
            .ok_or_else(|| StorageError::not_found(&entity.name, id))
    }

    async fn link(
        &mut self,
        parent: &ParentRecord,
        association: &Association,
        related: &RelatedRecord,
    ) -> StorageResult<()> {
        self.ensure_locked(parent)?;
        let key = Self::link_key(parent, association);
        self.staged.push(LinkChange::link(
            key,
            related.id.clone(),
            &association.linkage,
        ));
        Ok(())
    }

    async fn unlink(
        &mut self,
        parent: &ParentRecord,
        association: &Association,
        related: &RelatedRecord,
    ) -> StorageResult<()> {
        self.ensure_locked(parent)?;
        let key = Self::link_key(parent, association);
        self.staged.push(LinkChange::Unlink {
            key,
            related: related.id.clone(),
        });
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StorageResult<()> {
        let staged = std::mem::take(&mut self.staged);
        self.storage.apply_changes(&staged).await;
        tracing::debug!(tx = %self.id, changes = staged.len(), "Memory transaction committed");
        self.staged = staged;
        self.finish(TransactionState::Committed);
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> StorageResult<()> {
        tracing::debug!(tx = %self.id, discarded = self.staged.len(), "Memory transaction rolled back");
        self.finish(TransactionState::RolledBack);
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            tracing::warn!(
                tx = %self.id,
                "MemoryTransaction dropped without explicit commit/rollback - rolling back"
            );
            self.finish(TransactionState::RolledBack);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relsync_storage::{LinkStorage, Linkage, id_set};
    use serde_json::json;
    use std::time::Duration;

    use crate::factory::MemoryConfig;

    fn project() -> EntityDef {
        EntityDef::new("project", "projects")
    }

    fn tags() -> Association {
        Association {
            name: "tags".into(),
            owner: project(),
            related: EntityDef::new("tag", "tags"),
            linkage: Linkage::JoinTable {
                table: "project_tags".into(),
                owner_column: "project_id".into(),
                related_column: "tag_id".into(),
            },
        }
    }

    fn seeded(config: MemoryConfig) -> InMemoryStorage {
        let storage = InMemoryStorage::with_config(config);
        storage.upsert_row("project", 1, json!({"name": "apollo"}));
        for id in 1..=4_i64 {
            storage.upsert_row("tag", id, json!({"label": format!("t{id}")}));
        }
        storage
    }

    #[tokio::test]
    async fn test_commit_applies_staged_links() {
        let storage = seeded(MemoryConfig::default());
        let parent = ParentRecord::new("project", 1);
        let assoc = tags();

        let mut tx = storage.begin_transaction().await.unwrap();
        tx.lock(&project(), parent.id()).await.unwrap();
        let tag = tx.resolve(&assoc.related, &Identifier::Int(2)).await.unwrap();
        assert_eq!(tag.attribute("label"), Some(&json!("t2")));
        tx.link(&parent, &assoc, &tag).await.unwrap();

        // Own writes are visible inside the transaction only.
        assert_eq!(tx.member_ids(&parent, &assoc).await.unwrap(), id_set([2_i64]));
        let key = LinkKey::new("project", 1, "tags");
        assert!(storage.membership(&key).await.is_empty());

        tx.commit().await.unwrap();
        assert_eq!(storage.membership(&key).await, id_set([2_i64]));

        let stats = storage.transaction_stats();
        assert_eq!(stats.total_transactions, 1);
        assert_eq!(stats.committed_transactions, 1);
        assert_eq!(stats.total_changes, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let storage = seeded(MemoryConfig::default());
        let parent = ParentRecord::new("project", 1);
        let assoc = tags();
        let key = LinkKey::new("project", 1, "tags");
        storage.seed_links(key.clone(), id_set([1_i64])).await;

        let mut tx = storage.begin_transaction().await.unwrap();
        tx.lock(&project(), parent.id()).await.unwrap();
        let tag = tx.resolve(&assoc.related, &Identifier::Int(1)).await.unwrap();
        tx.unlink(&parent, &assoc, &tag).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(storage.membership(&key).await, id_set([1_i64]));
        assert_eq!(storage.transaction_stats().rolled_back_transactions, 1);
    }

    #[tokio::test]
    async fn test_drop_rolls_back_and_releases_lock() {
        let storage = seeded(MemoryConfig::default().with_lock_timeout_ms(Some(50)));
        let parent = ParentRecord::new("project", 1);
        let assoc = tags();

        {
            let mut tx = storage.begin_transaction().await.unwrap();
            tx.lock(&project(), parent.id()).await.unwrap();
            let tag = tx.resolve(&assoc.related, &Identifier::Int(3)).await.unwrap();
            tx.link(&parent, &assoc, &tag).await.unwrap();
        }

        let key = LinkKey::new("project", 1, "tags");
        assert!(storage.membership(&key).await.is_empty());

        let mut tx = storage.begin_transaction().await.unwrap();
        tx.lock(&project(), parent.id()).await.unwrap();
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_missing_row() {
        let storage = seeded(MemoryConfig::default());
        let mut tx = storage.begin_transaction().await.unwrap();
        let err = tx
            .resolve(&EntityDef::new("tag", "tags"), &Identifier::Int(99))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Record not found: tag/99");
    }

    #[tokio::test]
    async fn test_lock_missing_parent() {
        let storage = seeded(MemoryConfig::default());
        let mut tx = storage.begin_transaction().await.unwrap();
        let err = tx.lock(&project(), &Identifier::Int(42)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_link_requires_lock() {
        let storage = seeded(MemoryConfig::default());
        let parent = ParentRecord::new("project", 1);
        let assoc = tags();

        let mut tx = storage.begin_transaction().await.unwrap();
        let tag = tx.resolve(&assoc.related, &Identifier::Int(1)).await.unwrap();
        let err = tx.link(&parent, &assoc, &tag).await.unwrap_err();
        assert!(matches!(err, StorageError::TransactionError { .. }));
    }

    #[tokio::test]
    async fn test_lock_is_reentrant_within_transaction() {
        let storage = seeded(MemoryConfig::default().with_lock_timeout_ms(Some(50)));
        let mut tx = storage.begin_transaction().await.unwrap();
        tx.lock(&project(), &Identifier::Int(1)).await.unwrap();
        tx.lock(&project(), &Identifier::Int(1)).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_timeout_when_row_held() {
        let storage = seeded(MemoryConfig::default().with_lock_timeout_ms(Some(20)));

        let mut first = storage.begin_transaction().await.unwrap();
        first.lock(&project(), &Identifier::Int(1)).await.unwrap();

        let mut second = storage.begin_transaction().await.unwrap();
        let err = second
            .lock(&project(), &Identifier::Int(1))
            .await
            .unwrap_err();
        assert!(err.is_lock_timeout());

        first.commit().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), second.lock(&project(), &Identifier::Int(1)))
            .await
            .expect("lock should be free after commit")
            .unwrap();
    }

    #[tokio::test]
    async fn test_lock_handles_are_released_after_finish() {
        let storage = seeded(MemoryConfig::default().with_lock_timeout_ms(Some(20)));
        let tag = EntityDef::new("tag", "tags");

        for id in 1..=4_i64 {
            let mut tx = storage.begin_transaction().await.unwrap();
            tx.lock(&tag, &Identifier::Int(id)).await.unwrap();
            assert_eq!(storage.tracked_locks(), 1);
            tx.commit().await.unwrap();
        }
        assert_eq!(storage.tracked_locks(), 0);

        let mut holder = storage.begin_transaction().await.unwrap();
        holder.lock(&project(), &Identifier::Int(1)).await.unwrap();
        let mut waiter = storage.begin_transaction().await.unwrap();
        assert!(waiter.lock(&project(), &Identifier::Int(1)).await.is_err());
        assert_eq!(storage.tracked_locks(), 1);

        drop(holder);
        drop(waiter);
        assert_eq!(storage.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_waiting_transaction_keeps_lock_handle() {
        let storage = seeded(MemoryConfig::default());
        let mut holder = storage.begin_transaction().await.unwrap();
        holder.lock(&project(), &Identifier::Int(1)).await.unwrap();

        let contender = storage.clone();
        let waiting = tokio::spawn(async move {
            let mut tx = contender.begin_transaction().await.unwrap();
            tx.lock(&project(), &Identifier::Int(1)).await.unwrap();
            tx.commit().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        holder.rollback().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("waiter should get the lock")
            .unwrap();
        assert_eq!(storage.tracked_locks(), 0);
    }

    #[test]
    fn test_stats_averages() {
        let mut stats = TransactionStats::new();
        stats.record_started();
        stats.record_finished(TransactionState::Committed, 4);
        stats.record_started();
        stats.record_finished(TransactionState::Committed, 2);
        stats.record_started();
        stats.record_finished(TransactionState::RolledBack, 7);
        assert_eq!(stats.total_transactions, 3);
        assert_eq!(stats.total_changes, 6);
        assert!((stats.average_changes_per_commit - 3.0).abs() < f64::EPSILON);
    }
}
