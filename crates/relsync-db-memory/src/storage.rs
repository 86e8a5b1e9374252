use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use papaya::HashMap as PapayaHashMap;
use relsync_storage::{
    EntityDef, IdSet, Identifier, LinkStorage, LinkTransaction, Linkage, Schema, StorageError,
    StorageResult,
};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::factory::MemoryConfig;
use crate::fixture::Fixture;
use crate::transaction::{MemoryTransaction, TransactionStats};

/// A row address: entity name and typed identifier.
pub type StorageKey = (String, Identifier);

pub(crate) fn make_storage_key(entity: &str, id: &Identifier) -> StorageKey {
    (entity.to_string(), id.clone())
}

type LockRegistry = HashMap<StorageKey, Arc<Mutex<()>>>;

/// Key of one owner's membership set for one association.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkKey {
    pub owner_entity: String,
    pub owner_id: Identifier,
    pub association: String,
}

impl LinkKey {
    pub fn new(
        owner_entity: impl Into<String>,
        owner_id: impl Into<Identifier>,
        association: impl Into<String>,
    ) -> Self {
        Self {
            owner_entity: owner_entity.into(),
            owner_id: owner_id.into(),
            association: association.into(),
        }
    }

    /// Whether both keys name the same association on the same owner entity.
    pub(crate) fn same_association(&self, other: &LinkKey) -> bool {
        self.owner_entity == other.owner_entity && self.association == other.association
    }
}

/// A single staged membership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LinkChange {
    Link {
        key: LinkKey,
        related: Identifier,
        exclusive: bool,
    },
    Unlink {
        key: LinkKey,
        related: Identifier,
    },
}

impl LinkChange {
    pub(crate) fn link(key: LinkKey, related: Identifier, linkage: &Linkage) -> Self {
        Self::Link {
            key,
            related,
            exclusive: linkage.is_exclusive(),
        }
    }

    /// Applies this change to the membership set stored under `target`.
    pub(crate) fn apply_to(&self, target: &LinkKey, members: &mut IdSet) {
        match self {
            Self::Link {
                key,
                related,
                exclusive,
            } => {
                if key == target {
                    members.insert(related.clone());
                } else if *exclusive && key.same_association(target) {
                    // A foreign key points at one owner only.
                    members.remove(related);
                }
            }
            Self::Unlink { key, related } => {
                if key == target {
                    members.remove(related);
                }
            }
        }
    }
}

/// In-memory link storage backend.
///
/// This storage implementation provides:
/// - Lock-free concurrent row access via papaya::HashMap
/// - Exclusive per-row locks held for the lifetime of a transaction
/// - Staged link/unlink changes applied atomically on commit
/// - Transaction statistics
#[derive(Debug, Clone)]
pub struct InMemoryStorage {
    /// Entity rows keyed by (entity, id), holding their attributes.
    pub(crate) rows: Arc<PapayaHashMap<StorageKey, Value>>,
    /// Committed memberships.
    pub(crate) links: Arc<RwLock<HashMap<LinkKey, IdSet>>>,
    /// One mutex per row that is locked or being waited on.
    locks: Arc<StdMutex<LockRegistry>>,
    /// Transaction statistics
    pub(crate) transaction_stats: Arc<StdMutex<TransactionStats>>,
    config: MemoryConfig,
}

impl InMemoryStorage {
    /// Creates a new in-memory storage with default options.
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Creates a new in-memory storage with the given options.
    pub fn with_config(config: MemoryConfig) -> Self {
        Self {
            rows: Arc::new(PapayaHashMap::new()),
            links: Arc::new(RwLock::new(HashMap::new())),
            locks: Arc::new(StdMutex::new(HashMap::new())),
            transaction_stats: Arc::new(StdMutex::new(TransactionStats::new())),
            config,
        }
    }

    /// Creates a storage pre-populated from a fixture.
    ///
    /// # Errors
    ///
    /// See [`InMemoryStorage::load_fixture`].
    pub async fn from_fixture(
        config: MemoryConfig,
        fixture: &Fixture,
        schema: &Schema,
    ) -> StorageResult<Self> {
        let storage = Self::with_config(config);
        storage.load_fixture(fixture, schema).await?;
        Ok(storage)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub(crate) fn lock_timeout(&self) -> Option<Duration> {
        self.config.lock_timeout_ms.map(Duration::from_millis)
    }

    /// Inserts or replaces an entity row.
    pub fn upsert_row(&self, entity: &str, id: impl Into<Identifier>, attributes: Value) {
        let key = make_storage_key(entity, &id.into());
        let guard = self.rows.pin();
        guard.insert(key, attributes);
    }

    /// Returns an entity row's attributes.
    pub fn row(&self, entity: &str, id: &Identifier) -> Option<Value> {
        let key = make_storage_key(entity, id);
        let guard = self.rows.pin();
        guard.get(&key).cloned()
    }

    pub fn exists(&self, entity: &str, id: &Identifier) -> bool {
        let key = make_storage_key(entity, id);
        let guard = self.rows.pin();
        guard.contains_key(&key)
    }

    /// Number of rows across all entities.
    pub fn count(&self) -> usize {
        let guard = self.rows.pin();
        guard.len()
    }

    /// Adds committed links outside any transaction, bypassing locks.
    ///
    /// Intended for seeding test and demo data.
    pub async fn seed_links<I>(&self, key: LinkKey, related: I)
    where
        I: IntoIterator<Item = Identifier>,
    {
        let mut links = self.links.write().await;
        links.entry(key).or_default().extend(related);
    }

    /// Loads rows and links from a fixture. Every id is read with the id
    /// kind its entity declares in `schema`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidSchema` if a row names an unknown entity,
    /// a link names an unknown association, or an id does not fit its
    /// entity's id kind. Rows loaded before the failure stay loaded.
    pub async fn load_fixture(&self, fixture: &Fixture, schema: &Schema) -> StorageResult<()> {
        for row in &fixture.rows {
            let entity = schema.entity(&row.entity).ok_or_else(|| {
                StorageError::invalid_schema(format!(
                    "fixture row references unknown entity '{}'",
                    row.entity
                ))
            })?;
            let id = fixture_id(entity, &row.id)?;
            self.upsert_row(&entity.name, id, row.attributes.clone());
        }
        for link in &fixture.links {
            let association = schema
                .association(&link.owner, &link.association)
                .ok_or_else(|| {
                    StorageError::invalid_schema(format!(
                        "fixture links reference unknown association '{}.{}'",
                        link.owner, link.association
                    ))
                })?;
            let owner_id = fixture_id(&association.owner, &link.owner_id)?;
            let related = link
                .related
                .iter()
                .map(|raw| fixture_id(&association.related, raw))
                .collect::<StorageResult<Vec<_>>>()?;
            let key = LinkKey::new(
                association.owner.name.clone(),
                owner_id,
                association.name.clone(),
            );
            self.seed_links(key, related).await;
        }
        Ok(())
    }

    /// Committed membership of one association.
    pub async fn membership(&self, key: &LinkKey) -> IdSet {
        let links = self.links.read().await;
        links.get(key).cloned().unwrap_or_default()
    }

    /// Returns the lock handle for a row, creating it on first use.
    pub(crate) fn row_lock(&self, key: &StorageKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Releases a row lock and forgets the row's mutex once nobody holds or
    /// waits on it.
    pub(crate) fn release_row(&self, key: &StorageKey, guard: OwnedMutexGuard<()>) {
        drop(guard);
        self.prune_row_lock(key);
    }

    /// Forgets a row's mutex if no transaction holds or waits on it.
    pub(crate) fn prune_row_lock(&self, key: &StorageKey) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the registry's own handle left.
        if locks
            .get(key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(key);
        }
    }

    /// Number of rows with a live lock handle.
    pub fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Applies committed changes in order under one write lock.
    pub(crate) async fn apply_changes(&self, changes: &[LinkChange]) {
        let mut links = self.links.write().await;
        for change in changes {
            match change {
                LinkChange::Link {
                    key,
                    exclusive: true,
                    ..
                } => {
                    for (target, members) in links.iter_mut() {
                        if target != key {
                            change.apply_to(target, members);
                        }
                    }
                    let members = links.entry(key.clone()).or_default();
                    change.apply_to(key, members);
                }
                LinkChange::Link { key, .. } | LinkChange::Unlink { key, .. } => {
                    let members = links.entry(key.clone()).or_default();
                    change.apply_to(key, members);
                }
            }
        }
    }

    /// Current committed membership with `staged` replayed on top.
    pub(crate) async fn staged_membership(&self, key: &LinkKey, staged: &[LinkChange]) -> IdSet {
        let mut members = self.membership(key).await;
        for change in staged {
            change.apply_to(key, &mut members);
        }
        members
    }

    pub fn transaction_stats(&self) -> TransactionStats {
        self.transaction_stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkStorage for InMemoryStorage {
    async fn begin_transaction(&self) -> StorageResult<Box<dyn LinkTransaction>> {
        let tx = MemoryTransaction::new(self.clone());
        if let Ok(mut stats) = self.transaction_stats.lock() {
            stats.record_started();
        }
        Ok(Box::new(tx))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

fn fixture_id(entity: &EntityDef, raw: &Value) -> StorageResult<Identifier> {
    entity.id_kind.parse_value(raw).map_err(|reason| {
        StorageError::invalid_schema(format!(
            "fixture id {raw} is not a valid {} id for '{}': {reason}",
            entity.id_kind, entity.name
        ))
    })
}

pub(crate) fn not_locked(entity: &str, id: &Identifier) -> StorageError {
    StorageError::transaction_error(format!(
        "row {entity}/{id} must be locked by this transaction before changing its links"
    ))
}
