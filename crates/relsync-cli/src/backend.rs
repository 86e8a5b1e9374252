use std::sync::Arc;

use anyhow::{Context, Result};
use relsync_db_postgres::{PostgresConfig, PostgresStorage};
use relsync_storage::{DynLinkStorage, Schema};

use crate::config::{BackendKind, StorageSettings};

/// Opens the configured storage backend. A memory fixture is checked against
/// `schema` while loading.
pub async fn open_storage(settings: &StorageSettings, schema: &Schema) -> Result<DynLinkStorage> {
    let storage = match settings.backend {
        BackendKind::Memory => relsync_db_memory::create_storage(&settings.memory, schema)
            .await
            .context("failed to create in-memory storage")?,
        BackendKind::Postgres => Arc::new(connect_postgres(settings).await?) as DynLinkStorage,
    };
    tracing::debug!(backend = storage.backend_name(), "Storage opened");
    Ok(storage)
}

/// Opens the backend and makes sure it is usable: the fixture loads for the
/// memory backend, the database answers for postgres.
pub async fn verify_storage(settings: &StorageSettings, schema: &Schema) -> Result<()> {
    match settings.backend {
        BackendKind::Memory => {
            open_storage(settings, schema).await?;
        }
        BackendKind::Postgres => {
            connect_postgres(settings)
                .await?
                .ping()
                .await
                .context("PostgreSQL did not answer")?;
        }
    }
    Ok(())
}

async fn connect_postgres(settings: &StorageSettings) -> Result<PostgresStorage> {
    let config: PostgresConfig = settings
        .postgres
        .clone()
        .context("storage.postgres section is missing")?;
    PostgresStorage::new(config)
        .await
        .context("failed to connect to PostgreSQL")
}
