//! Entity store implementation for PostgreSQL.
//!
//! Projected entities live in one `entities` table keyed by `(kind, id)`
//! with the document in a JSONB column. Lookups by field use JSONB
//! containment so the GIN index on `data` applies.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};

use prism_core::error::{StorageError, StorageResult};
use prism_core::ports::EntityStore;
use prism_core::projection::EntityWrite;

use super::database::Database;

/// Rows per `UNNEST` statement when committing a block's writes.
const WRITE_BATCH: usize = 1_000;

/// PostgreSQL implementation of EntityStore.
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn get_entity(&self, kind: &str, id: &str) -> StorageResult<Option<Value>> {
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT data FROM entities WHERE kind = $1 AND id = $2")
                .bind(kind)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(row.map(|(data,)| data))
    }

    async fn find_entities(
        &self,
        kind: &str,
        field: &str,
        value: &Value,
    ) -> StorageResult<Vec<(String, Value)>> {
        // Containment selects candidates through the index; the equality
        // check rejects partial matches on object or array values.
        sqlx::query_as(
            r#"
            SELECT id, data
            FROM entities
            WHERE kind = $1
              AND data @> jsonb_build_object($2::text, $3::jsonb)
              AND data -> $2::text = $3::jsonb
            ORDER BY id
            "#,
        )
        .bind(kind)
        .bind(field)
        .bind(value)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))
    }
}

/// Column arrays of a block's entity writes.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct WriteColumns {
    pub upsert_kinds: Vec<String>,
    pub upsert_ids: Vec<String>,
    pub upsert_data: Vec<Value>,
    pub created_blocks: Vec<i64>,
    pub updated_blocks: Vec<i64>,
    pub remove_kinds: Vec<String>,
    pub remove_ids: Vec<String>,
}

impl WriteColumns {
    pub fn from_writes(writes: &[EntityWrite]) -> Self {
        let mut columns = Self::default();
        for write in writes {
            match write {
                EntityWrite::Upsert {
                    kind,
                    id,
                    data,
                    created_block,
                    updated_block,
                } => {
                    columns.upsert_kinds.push(kind.clone());
                    columns.upsert_ids.push(id.clone());
                    columns.upsert_data.push(data.clone());
                    columns.created_blocks.push(*created_block as i64);
                    columns.updated_blocks.push(*updated_block as i64);
                }
                EntityWrite::Remove { kind, id } => {
                    columns.remove_kinds.push(kind.clone());
                    columns.remove_ids.push(id.clone());
                }
            }
        }
        columns
    }
}

/// Apply a block's entity writes inside the block transaction.
///
/// `created_block` of an existing row is never overwritten.
pub(crate) async fn write_entities(
    tx: &mut Transaction<'_, Postgres>,
    writes: &[EntityWrite],
) -> StorageResult<()> {
    for chunk in writes.chunks(WRITE_BATCH) {
        let columns = WriteColumns::from_writes(chunk);

        if !columns.upsert_ids.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO entities (kind, id, data, created_block, updated_block)
                SELECT * FROM UNNEST($1::text[], $2::text[], $3::jsonb[], $4::bigint[], $5::bigint[])
                ON CONFLICT (kind, id) DO UPDATE SET
                    data = EXCLUDED.data,
                    updated_block = EXCLUDED.updated_block
                "#,
            )
            .bind(&columns.upsert_kinds)
            .bind(&columns.upsert_ids)
            .bind(&columns.upsert_data)
            .bind(&columns.created_blocks)
            .bind(&columns.updated_blocks)
            .execute(&mut **tx)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;
        }

        if !columns.remove_ids.is_empty() {
            sqlx::query(
                r#"
                DELETE FROM entities e
                USING UNNEST($1::text[], $2::text[]) AS r(kind, id)
                WHERE e.kind = r.kind AND e.id = r.id
                "#,
            )
            .bind(&columns.remove_kinds)
            .bind(&columns.remove_ids)
            .execute(&mut **tx)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;
        }
    }

    Ok(())
}
