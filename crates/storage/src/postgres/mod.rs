//! PostgreSQL storage adapter.
//!
//! This module implements the repository traits defined in `prism-core`
//! using PostgreSQL as the backing store.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool, migrations and purge
//! - [`PgRepositories`] - Composite repository implementing `Repositories` trait
//! - Individual repos: `PgChainRepository` (blocks and cursor), `PgEntityStore`
//!
//! # Usage
//!
//! ```ignore
//! let config = DatabaseConfig::for_indexer(&database_url);
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let repositories = PgRepositories::new(Arc::new(db));
//! ```

mod chain_repo;
mod database;
mod entity_repo;

pub use chain_repo::PgChainRepository;
pub use database::{Database, DatabaseConfig, PurgeStats};
pub use entity_repo::PgEntityStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use prism_core::error::{StorageError, StorageResult};
use prism_core::models::ExtrinsicStatus;
use prism_core::ports::{BlockData, BlockRepository, CursorRepository, EntityStore, Repositories};

// =============================================================================
// Composite Repository
// =============================================================================

/// Aggregated PostgreSQL repositories implementing the `Repositories` trait.
///
/// This provides a single entry point for all storage operations and
/// implements the per-block transaction spanning chain data, projected
/// entities and the cursor.
pub struct PgRepositories {
    db: Arc<Database>,
    chain: PgChainRepository,
    entities: Arc<PgEntityStore>,
}

impl PgRepositories {
    /// Create a new repository aggregate from a database connection.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            chain: PgChainRepository::new(&db),
            entities: Arc::new(PgEntityStore::new(&db)),
            db,
        }
    }
}

#[async_trait]
impl Repositories for PgRepositories {
    fn blocks(&self) -> &dyn BlockRepository {
        &self.chain
    }

    fn cursor(&self) -> &dyn CursorRepository {
        &self.chain
    }

    fn entities(&self) -> Arc<dyn EntityStore> {
        self.entities.clone()
    }

    async fn persist_block_atomic(&self, data: BlockData<'_>) -> StorageResult<()> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        // Insert block
        sqlx::query(
            r#"
            INSERT INTO blocks (
                number, hash, parent_hash, state_root, extrinsics_root,
                spec_name, spec_version, transaction_version,
                timestamp, extrinsic_count, event_count, indexed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(data.block.number as i64)
        .bind(&data.block.hash.0[..])
        .bind(&data.block.parent_hash.0[..])
        .bind(&data.block.state_root.0[..])
        .bind(&data.block.extrinsics_root.0[..])
        .bind(&data.block.runtime.spec_name)
        .bind(data.block.runtime.spec_version as i32)
        .bind(data.block.runtime.transaction_version as i32)
        .bind(data.block.timestamp)
        .bind(data.block.extrinsic_count as i32)
        .bind(data.block.event_count as i32)
        .bind(data.block.indexed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        // Insert extrinsics
        for ext in data.extrinsics {
            sqlx::query(
                r#"
                INSERT INTO extrinsics (
                    id, block_number, index, pallet, call,
                    signer, status, error, args, raw
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (block_number, index) DO NOTHING
                "#,
            )
            .bind(&ext.id)
            .bind(ext.block_number as i64)
            .bind(ext.index as i32)
            .bind(&ext.pallet)
            .bind(&ext.call)
            .bind(ext.signer.as_ref().map(|s| &s.0[..]))
            .bind(status_to_str(ext.status))
            .bind(&ext.error)
            .bind(&ext.args)
            .bind(&ext.raw)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;
        }

        // Insert events
        for event in data.events {
            sqlx::query(
                r#"
                INSERT INTO events (
                    id, block_number, index, extrinsic_index, module, method, params
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (block_number, index) DO NOTHING
                "#,
            )
            .bind(&event.id)
            .bind(event.block_number as i64)
            .bind(event.index as i32)
            .bind(event.extrinsic_index.map(|i| i as i32))
            .bind(&event.module)
            .bind(&event.method)
            .bind(Value::Array(event.params.clone()))
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;
        }

        // Projected entities
        entity_repo::write_entities(&mut tx, data.entities).await?;
        trace!(writes = data.entities.len(), "Entity writes staged");

        // Update cursor
        sqlx::query(
            r#"
            INSERT INTO indexer_cursor (chain_id, last_indexed_block, last_indexed_hash, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (chain_id) DO UPDATE SET
                last_indexed_block = EXCLUDED.last_indexed_block,
                last_indexed_hash = EXCLUDED.last_indexed_hash,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&data.cursor.chain_id)
        .bind(data.cursor.last_indexed_block as i64)
        .bind(&data.cursor.last_indexed_hash.0[..])
        .bind(data.cursor.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn status_to_str(status: ExtrinsicStatus) -> &'static str {
    match status {
        ExtrinsicStatus::Success => "success",
        ExtrinsicStatus::Failed => "failed",
    }
}
