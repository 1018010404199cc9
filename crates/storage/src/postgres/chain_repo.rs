//! Chain data reads: stored blocks and the resume cursor.
//!
//! Writes to these tables only happen inside the per-block transaction of
//! [`super::PgRepositories`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use prism_core::error::{StorageError, StorageResult};
use prism_core::models::{Block, BlockHash, IndexerCursor, RuntimeVersion};
use prism_core::ports::{BlockRepository, CursorRepository};

use super::database::Database;

const BLOCK_COLUMNS: &str = "number, hash, parent_hash, state_root, extrinsics_root, \
     spec_name, spec_version, transaction_version, \
     timestamp, extrinsic_count, event_count, indexed_at";

/// Blocks and cursor backed by PostgreSQL.
pub struct PgChainRepository {
    pool: PgPool,
}

impl PgChainRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl BlockRepository for PgChainRepository {
    async fn get_block(&self, number: u64) -> StorageResult<Option<Block>> {
        let row: Option<BlockRow> =
            sqlx::query_as(&format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE number = $1"))
                .bind(number as i64)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(Block::try_from).transpose()
    }

    async fn latest_block_number(&self) -> StorageResult<Option<u64>> {
        let (max,): (Option<i64>,) = sqlx::query_as("SELECT MAX(number) FROM blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(max.map(|n| n as u64))
    }
}

#[async_trait]
impl CursorRepository for PgChainRepository {
    async fn get_cursor(&self, chain_id: &str) -> StorageResult<Option<IndexerCursor>> {
        let row: Option<CursorRow> = sqlx::query_as(
            "SELECT chain_id, last_indexed_block, last_indexed_hash, updated_at \
             FROM indexer_cursor WHERE chain_id = $1",
        )
        .bind(chain_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(IndexerCursor::try_from).transpose()
    }

    async fn get_any_cursor(&self) -> StorageResult<Option<IndexerCursor>> {
        // One chain per database; used to detect a mismatch at startup
        let row: Option<CursorRow> = sqlx::query_as(
            "SELECT chain_id, last_indexed_block, last_indexed_hash, updated_at \
             FROM indexer_cursor ORDER BY updated_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(IndexerCursor::try_from).transpose()
    }
}

// =============================================================================
// Row mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct BlockRow {
    number: i64,
    hash: Vec<u8>,
    parent_hash: Vec<u8>,
    state_root: Vec<u8>,
    extrinsics_root: Vec<u8>,
    spec_name: String,
    spec_version: i32,
    transaction_version: i32,
    timestamp: Option<DateTime<Utc>>,
    extrinsic_count: i32,
    event_count: i32,
    indexed_at: DateTime<Utc>,
}

impl TryFrom<BlockRow> for Block {
    type Error = StorageError;

    fn try_from(row: BlockRow) -> StorageResult<Self> {
        Ok(Block {
            number: row.number as u64,
            hash: hash32(row.hash, "block.hash", false)?,
            // Genesis has an all-zero parent
            parent_hash: hash32(row.parent_hash, "block.parent_hash", true)?,
            state_root: hash32(row.state_root, "block.state_root", false)?,
            extrinsics_root: hash32(row.extrinsics_root, "block.extrinsics_root", false)?,
            runtime: RuntimeVersion {
                spec_name: row.spec_name,
                spec_version: row.spec_version as u32,
                transaction_version: row.transaction_version as u32,
            },
            timestamp: row.timestamp,
            extrinsic_count: row.extrinsic_count as u32,
            event_count: row.event_count as u32,
            indexed_at: row.indexed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CursorRow {
    chain_id: String,
    last_indexed_block: i64,
    last_indexed_hash: Vec<u8>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CursorRow> for IndexerCursor {
    type Error = StorageError;

    fn try_from(row: CursorRow) -> StorageResult<Self> {
        Ok(IndexerCursor {
            chain_id: row.chain_id,
            last_indexed_block: row.last_indexed_block as u64,
            last_indexed_hash: hash32(row.last_indexed_hash, "cursor.last_indexed_hash", false)?,
            updated_at: row.updated_at,
        })
    }
}

/// Decode a stored 32-byte hash column.
///
/// An all-zero value is corrupt unless `allow_zero` is set.
fn hash32(bytes: Vec<u8>, column: &str, allow_zero: bool) -> StorageResult<BlockHash> {
    let arr: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
        StorageError::SerializationError(format!(
            "{column} has invalid length: expected 32, got {}",
            v.len()
        ))
    })?;

    if !allow_zero && arr == [0u8; 32] {
        return Err(StorageError::SerializationError(format!(
            "{column} is all zeros, the row is corrupt"
        )));
    }

    Ok(BlockHash(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(parent: Vec<u8>) -> BlockRow {
        BlockRow {
            number: 42,
            hash: vec![1; 32],
            parent_hash: parent,
            state_root: vec![2; 32],
            extrinsics_root: vec![3; 32],
            spec_name: "polymesh_testnet".into(),
            spec_version: 7_000_005,
            transaction_version: 7,
            timestamp: None,
            extrinsic_count: 2,
            event_count: 9,
            indexed_at: Utc::now(),
        }
    }

    // Test critique: un hash tout à zéro signale une ligne corrompue
    #[test]
    fn test_zero_hash_rejected() {
        let err = hash32(vec![0u8; 32], "block.hash", false).unwrap_err();
        assert!(err.to_string().contains("corrupt"));
        assert!(hash32(vec![0u8; 32], "block.parent_hash", true).is_ok());
    }

    #[test]
    fn test_error_names_column() {
        let err = hash32(vec![1u8; 16], "cursor.last_indexed_hash", false)
            .unwrap_err()
            .to_string();
        assert!(err.contains("cursor.last_indexed_hash"));
        assert!(err.contains("expected 32"));
    }

    #[test]
    fn test_block_row_keeps_runtime() {
        let block = Block::try_from(row(vec![0u8; 32])).unwrap();
        assert_eq!(block.number, 42);
        assert_eq!(block.parent_hash, BlockHash([0u8; 32]));
        assert_eq!(block.runtime.spec_name, "polymesh_testnet");
        assert_eq!(block.runtime.spec_version, 7_000_005);
        assert_eq!(block.runtime.transaction_version, 7);
    }

    #[test]
    fn test_block_row_rejects_short_parent() {
        assert!(Block::try_from(row(vec![0u8; 31])).is_err());
    }
}
