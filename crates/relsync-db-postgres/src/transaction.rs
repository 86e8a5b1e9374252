//! PostgreSQL transaction implementing [`LinkTransaction`].
//!
//! Row locks are taken with `SELECT ... FOR UPDATE` and held until the
//! transaction ends. Links are written directly; PostgreSQL's own transaction
//! provides atomicity and visibility of earlier writes to later reads.

use async_trait::async_trait;
use serde_json::Value;
use sqlx_core::query::{Query, query};
use sqlx_core::row::Row;
use sqlx_postgres::{PgArguments, PgRow, PgTransaction, Postgres};
use uuid::Uuid;

use relsync_storage::{
    Association, EntityDef, IdKind, IdSet, Identifier, LinkTransaction, Linkage, ParentRecord,
    RelatedRecord, StorageError,
};

use crate::error::{lock_error, query_error};

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// PostgreSQL transaction wrapper.
///
/// The transaction automatically rolls back on drop if not explicitly
/// committed.
pub struct PostgresTransaction {
    /// Taken on commit/rollback. Boxed so the struct carries no lifetime.
    tx: Option<Box<PgTransaction<'static>>>,
}

impl PostgresTransaction {
    /// Wraps an open sqlx transaction.
    pub fn new(tx: PgTransaction<'static>) -> Self {
        Self {
            tx: Some(Box::new(tx)),
        }
    }

    fn conn(&mut self) -> Result<&mut PgTransaction<'static>, StorageError> {
        self.tx.as_deref_mut().ok_or_else(|| {
            StorageError::transaction_error("Transaction already completed (committed or rolled back)")
        })
    }

    async fn fetch_ids(
        &mut self,
        sql: &str,
        owner_id: &Identifier,
        kind: IdKind,
    ) -> Result<IdSet, StorageError> {
        let tx = self.conn()?;
        let rows: Vec<PgRow> = bind_id(query(sql), owner_id)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| query_error(e, "Failed to list members"))?;

        rows.iter()
            .map(|row| {
                let raw: String = row
                    .try_get(0)
                    .map_err(|e| query_error(e, "Failed to decode member id"))?;
                decode_id(kind, &raw)
            })
            .collect()
    }

    async fn execute(&mut self, sql: &str, ids: &[&Identifier], context: &str) -> Result<u64, StorageError> {
        let tx = self.conn()?;
        let mut q = query(sql);
        for id in ids {
            q = bind_id(q, id);
        }
        let result = q
            .execute(&mut **tx)
            .await
            .map_err(|e| query_error(e, context))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LinkTransaction for PostgresTransaction {
    async fn lock(&mut self, entity: &EntityDef, id: &Identifier) -> Result<(), StorageError> {
        let sql = format!(
            "SELECT 1 FROM {table} WHERE {pk} = $1 FOR UPDATE",
            table = quote_table(&entity.table),
            pk = quote_ident(&entity.primary_key),
        );
        let tx = self.conn()?;
        let row = bind_id(query(&sql), id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| lock_error(e, &entity.name, id))?;

        match row {
            Some(_) => {
                tracing::trace!(entity = %entity.name, %id, "Row lock acquired");
                Ok(())
            }
            None => Err(StorageError::not_found(&entity.name, id)),
        }
    }

    async fn member_ids(
        &mut self,
        parent: &ParentRecord,
        association: &Association,
    ) -> Result<IdSet, StorageError> {
        let sql = match &association.linkage {
            Linkage::JoinTable {
                table,
                owner_column,
                related_column,
            } => format!(
                "SELECT {related}::text FROM {table} WHERE {owner} = $1 AND {related} IS NOT NULL",
                related = quote_ident(related_column),
                table = quote_table(table),
                owner = quote_ident(owner_column),
            ),
            Linkage::ForeignKey { column } => format!(
                "SELECT {pk}::text FROM {table} WHERE {fk} = $1",
                pk = quote_ident(&association.related.primary_key),
                table = quote_table(&association.related.table),
                fk = quote_ident(column),
            ),
        };
        self.fetch_ids(&sql, parent.id(), association.related.id_kind)
            .await
    }

    async fn resolve(
        &mut self,
        entity: &EntityDef,
        id: &Identifier,
    ) -> Result<RelatedRecord, StorageError> {
        let sql = format!(
            "SELECT to_jsonb(t) FROM {table} t WHERE t.{pk} = $1",
            table = quote_table(&entity.table),
            pk = quote_ident(&entity.primary_key),
        );
        let tx = self.conn()?;
        let row = bind_id(query(&sql), id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| query_error(e, "Failed to resolve record"))?;

        let row = row.ok_or_else(|| StorageError::not_found(&entity.name, id))?;
        let attributes: Value = row
            .try_get(0)
            .map_err(|e| query_error(e, "Failed to decode record"))?;
        Ok(RelatedRecord::new(&entity.name, id.clone(), attributes))
    }

    async fn link(
        &mut self,
        parent: &ParentRecord,
        association: &Association,
        related: &RelatedRecord,
    ) -> Result<(), StorageError> {
        let sql = match &association.linkage {
            Linkage::JoinTable {
                table,
                owner_column,
                related_column,
            } => format!(
                "INSERT INTO {table} ({owner}, {related}) SELECT $1, $2 \
                 WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE {owner} = $1 AND {related} = $2)",
                table = quote_table(table),
                owner = quote_ident(owner_column),
                related = quote_ident(related_column),
            ),
            Linkage::ForeignKey { column } => format!(
                "UPDATE {table} SET {fk} = $1 WHERE {pk} = $2",
                table = quote_table(&association.related.table),
                fk = quote_ident(column),
                pk = quote_ident(&association.related.primary_key),
            ),
        };
        self.execute(&sql, &[parent.id(), &related.id], "Failed to link record")
            .await?;
        Ok(())
    }

    async fn unlink(
        &mut self,
        parent: &ParentRecord,
        association: &Association,
        related: &RelatedRecord,
    ) -> Result<(), StorageError> {
        let sql = match &association.linkage {
            Linkage::JoinTable {
                table,
                owner_column,
                related_column,
            } => format!(
                "DELETE FROM {table} WHERE {owner} = $1 AND {related} = $2",
                table = quote_table(table),
                owner = quote_ident(owner_column),
                related = quote_ident(related_column),
            ),
            Linkage::ForeignKey { column } => format!(
                "UPDATE {table} SET {fk} = NULL WHERE {fk} = $1 AND {pk} = $2",
                table = quote_table(&association.related.table),
                fk = quote_ident(column),
                pk = quote_ident(&association.related.primary_key),
            ),
        };
        self.execute(&sql, &[parent.id(), &related.id], "Failed to unlink record")
            .await?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await.map_err(|e| {
                StorageError::transaction_error(format!("Failed to commit transaction: {e}"))
            })?;
            tracing::debug!("Transaction committed successfully");
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.map_err(|e| {
                StorageError::transaction_error(format!("Failed to rollback transaction: {e}"))
            })?;
            tracing::debug!("Transaction rolled back successfully");
        }
        Ok(())
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::warn!(
                "PostgresTransaction dropped without explicit commit/rollback - will auto-rollback"
            );
            // sqlx's Transaction drop queues the ROLLBACK on the connection.
        }
    }
}

/// Binds an identifier with its native PostgreSQL type.
fn bind_id<'q>(q: PgQuery<'q>, id: &Identifier) -> PgQuery<'q> {
    match id {
        Identifier::Int(v) => q.bind(*v),
        Identifier::Uuid(v) => q.bind(*v),
        Identifier::Text(v) => q.bind(v.clone()),
    }
}

/// Parses an id read back as text into the entity's identifier domain.
pub(crate) fn decode_id(kind: IdKind, raw: &str) -> Result<Identifier, StorageError> {
    match kind {
        IdKind::Integer => raw.parse::<i64>().map(Identifier::Int).map_err(|e| {
            StorageError::invalid_schema(format!("Expected integer id, found '{raw}': {e}"))
        }),
        IdKind::Uuid => Uuid::parse_str(raw).map(Identifier::Uuid).map_err(|e| {
            StorageError::invalid_schema(format!("Expected uuid id, found '{raw}': {e}"))
        }),
        IdKind::Text => Ok(Identifier::Text(raw.to_string())),
    }
}

/// Quotes an SQL identifier, doubling embedded quotes.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a possibly schema-qualified table name (`schema.table`).
pub(crate) fn quote_table(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}
