use std::path::PathBuf;
use std::sync::Arc;

use relsync_storage::{DynLinkStorage, Schema, StorageError};
use serde::{Deserialize, Serialize};

use crate::{Fixture, InMemoryStorage};

/// Options for the in-memory backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum time to wait for a row lock. `None` waits indefinitely.
    #[serde(default)]
    pub lock_timeout_ms: Option<u64>,

    /// JSON fixture loaded into the store on creation.
    #[serde(default)]
    pub fixture: Option<PathBuf>,
}

impl MemoryConfig {
    /// Sets the lock timeout.
    #[must_use]
    pub fn with_lock_timeout_ms(mut self, timeout: Option<u64>) -> Self {
        self.lock_timeout_ms = timeout;
        self
    }

    /// Sets the fixture file.
    #[must_use]
    pub fn with_fixture(mut self, path: impl Into<PathBuf>) -> Self {
        self.fixture = Some(path.into());
        self
    }
}

/// Creates an in-memory storage, seeded from the configured fixture file if any.
/// Fixture ids are read with the id kinds declared in `schema`.
///
/// # Errors
///
/// Returns `StorageError::Internal` if the fixture cannot be read or parsed,
/// and `StorageError::InvalidSchema` if it does not match `schema`.
pub async fn create_storage(
    config: &MemoryConfig,
    schema: &Schema,
) -> Result<DynLinkStorage, StorageError> {
    let Some(path) = &config.fixture else {
        return Ok(Arc::new(InMemoryStorage::with_config(config.clone())));
    };

    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        StorageError::internal(format!("Failed to read fixture {}: {e}", path.display()))
    })?;
    let fixture = Fixture::from_json(&raw).map_err(|e| {
        StorageError::internal(format!("Invalid fixture {}: {e}", path.display()))
    })?;

    let storage = InMemoryStorage::from_fixture(config.clone(), &fixture, schema).await?;
    tracing::debug!(
        fixture = %path.display(),
        rows = storage.count(),
        "Loaded in-memory fixture"
    );
    Ok(Arc::new(storage))
}
