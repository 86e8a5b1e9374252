//! PostgreSQL implementation of the LinkStorage trait.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx_postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{debug, info};

use relsync_storage::{LinkStorage, LinkTransaction, StorageError};

use crate::config::PostgresConfig;
use crate::error::{PostgresError, query_error};
use crate::transaction::PostgresTransaction;

/// PostgreSQL link storage backend.
///
/// Works against existing tables described by the schema; it never creates
/// or migrates tables itself.
///
/// The row lock timeout comes from one of two places. [`PostgresStorage::new`]
/// puts `lock_timeout` into the connection's startup options, so every
/// session starts with it. [`PostgresStorage::with_lock_timeout_ms`] sets it
/// per transaction with `SET LOCAL`, which also covers pools built elsewhere.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
    lock_timeout_ms: Option<u64>,
}

impl PostgresStorage {
    /// Connects a pool sized and timed by `config`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Internal` for an invalid URL or pool size and
    /// `StorageError::ConnectionError` if the database cannot be reached.
    pub async fn new(config: PostgresConfig) -> Result<Self, StorageError> {
        let (pool_options, connect_options) = pool_settings(&config)?;
        info!(
            host = connect_options.get_host(),
            port = connect_options.get_port(),
            database = connect_options.get_database().unwrap_or_default(),
            pool_size = config.pool_size,
            lock_timeout_ms = ?config.lock_timeout_ms,
            "Connecting to PostgreSQL"
        );
        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(PostgresError::from)?;
        debug!("PostgreSQL pool ready");
        Ok(Self::from_pool(pool))
    }

    /// Wraps an existing pool. No lock timeout is set unless
    /// [`PostgresStorage::with_lock_timeout_ms`] is called.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout_ms: None,
        }
    }

    /// Sets a row lock timeout with `SET LOCAL` at the start of every
    /// transaction, overriding the session value.
    #[must_use]
    pub fn with_lock_timeout_ms(mut self, timeout: Option<u64>) -> Self {
        self.lock_timeout_ms = timeout;
        self
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Checks that the database answers.
    ///
    /// # Errors
    ///
    /// Returns the classified query error when `SELECT 1` fails.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx_core::query::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| query_error(e, "Database did not answer"))?;
        Ok(())
    }
}

/// Translates `config` into pool options and connect options.
///
/// `min_connections` defaults to a quarter of the pool, at least one.
/// Connections are recycled after 30 minutes unless `max_lifetime_secs` says
/// otherwise.
fn pool_settings(
    config: &PostgresConfig,
) -> Result<(PgPoolOptions, PgConnectOptions), PostgresError> {
    if config.pool_size == 0 {
        return Err(PostgresError::config("pool_size must be at least 1"));
    }
    let mut connect_options = PgConnectOptions::from_str(&config.url)
        .map_err(|e| PostgresError::config(format!("invalid database url: {e}")))?;
    if let Some(timeout) = config.lock_timeout_ms {
        connect_options = connect_options.options([("lock_timeout", format!("{timeout}ms"))]);
    }

    let min_connections = config
        .min_connections
        .unwrap_or(config.pool_size / 4)
        .clamp(1, config.pool_size);
    let pool_options = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .min_connections(min_connections)
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
        .idle_timeout(config.idle_timeout_ms.map(Duration::from_millis))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs.unwrap_or(1800)));

    Ok((pool_options, connect_options))
}

#[async_trait]
impl LinkStorage for PostgresStorage {
    async fn begin_transaction(&self) -> Result<Box<dyn LinkTransaction>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            StorageError::transaction_error(format!("Failed to begin transaction: {e}"))
        })?;

        if let Some(timeout) = self.lock_timeout_ms {
            // SET does not accept bind parameters; the value is a plain integer.
            let sql = format!("SET LOCAL lock_timeout = '{timeout}ms'");
            sqlx_core::query::query(&sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| query_error(e, "Failed to set lock_timeout"))?;
        }

        tracing::debug!(lock_timeout_ms = ?self.lock_timeout_ms, "Transaction started");
        Ok(Box::new(PostgresTransaction::new(tx)))
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
