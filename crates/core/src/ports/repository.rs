//! Port traits for data repositories.
//!
//! These traits define the storage interface used by the domain layer.
//! Implementations live in the infrastructure layer (e.g., `prism-storage`).

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::models::{Block, Event, Extrinsic, IndexerCursor};
use crate::projection::EntityWrite;

// =============================================================================
// Repository Traits
// =============================================================================

/// Repository for block data.
#[async_trait]
pub trait BlockRepository: Send + Sync {
    /// Get block by number.
    async fn get_block(&self, number: u64) -> StorageResult<Option<Block>>;

    /// Get latest indexed block number.
    async fn latest_block_number(&self) -> StorageResult<Option<u64>>;
}

/// Repository for indexer cursor state.
#[async_trait]
pub trait CursorRepository: Send + Sync {
    /// Get current cursor for a chain.
    async fn get_cursor(&self, chain_id: &str) -> StorageResult<Option<IndexerCursor>>;

    /// Get any existing cursor (for chain mismatch detection).
    async fn get_any_cursor(&self) -> StorageResult<Option<IndexerCursor>>;
}

/// Read side of the projected entity store.
///
/// Entities are stored as JSON documents keyed by `(kind, id)`. Writes never
/// go through this trait: they are buffered per block and committed by
/// [`Repositories::persist_block_atomic`].
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Get one entity document.
    async fn get_entity(&self, kind: &str, id: &str) -> StorageResult<Option<serde_json::Value>>;

    /// All entities of `kind` whose top-level `field` equals `value`.
    ///
    /// Returns `(id, document)` pairs.
    async fn find_entities(
        &self,
        kind: &str,
        field: &str,
        value: &serde_json::Value,
    ) -> StorageResult<Vec<(String, serde_json::Value)>>;
}

// =============================================================================
// Composite Repository
// =============================================================================

/// Data bundle for atomic block persistence.
#[derive(Debug)]
pub struct BlockData<'a> {
    pub block: &'a Block,
    pub extrinsics: &'a [Extrinsic],
    pub events: &'a [Event],
    pub entities: &'a [EntityWrite],
    pub cursor: &'a IndexerCursor,
}

/// Combined repository access for the indexer.
#[async_trait]
pub trait Repositories: Send + Sync {
    /// Access the block repository.
    fn blocks(&self) -> &dyn BlockRepository;

    /// Access the cursor repository.
    fn cursor(&self) -> &dyn CursorRepository;

    /// Access the committed entity store.
    fn entities(&self) -> std::sync::Arc<dyn EntityStore>;

    /// Persist block data atomically in a single transaction.
    ///
    /// This persists the block, its extrinsics, events, every projected
    /// entity write of the block, and updates the cursor. If any operation
    /// fails, everything is rolled back.
    async fn persist_block_atomic(&self, data: BlockData<'_>) -> StorageResult<()>;
}
