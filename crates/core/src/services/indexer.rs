//! Core indexer service - orchestrates block processing.
//!
//! Blocks are indexed strictly in order: catch up from the cursor to the
//! finalized head with historical fetches, then follow finalized heads,
//! filling any gap. A block is either fully projected and committed or
//! not at all.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::{IndexerError, IndexerResult};
use crate::metrics::{
    ProcessingTimer, record_block_failure, record_block_indexed, record_entity_writes,
};
use crate::models::{
    AccountId, Block, BlockHash, Event, Extrinsic, ExtrinsicStatus, IndexerCursor,
};
use crate::ports::{
    BlockContext, BlockData, BlockSource, ChainState, HandlerRegistry, RawBlock, Repositories,
};
use crate::projection::{BlockChangeSet, DEFAULT_MAX_CHANGES};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the indexer service.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Chain identifier (usually genesis hash).
    pub chain_id: String,
    /// First block to index when no cursor exists.
    pub start_block: u64,
    /// Retries of a failing block before the service stops.
    pub max_block_retries: u32,
    /// Initial delay between block retries, doubled each attempt.
    pub retry_delay: Duration,
    /// Upper bound for the retry delay.
    pub max_retry_delay: Duration,
    /// Maximum distinct entities a single block may touch.
    pub max_changes: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chain_id: String::new(),
            start_block: 0,
            max_block_retries: 5,
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(60),
            max_changes: DEFAULT_MAX_CHANGES,
        }
    }
}

// =============================================================================
// IndexerService
// =============================================================================

/// Main indexer service.
///
/// # Flow
///
/// 1. Resume from the cursor (or the configured start block)
/// 2. Catch up to the finalized head block by block
/// 3. Follow finalized heads, fetching any skipped heights
/// 4. For each block: run block-start hooks, route events, commit the
///    block, its change set and the cursor in one transaction
pub struct IndexerService<S: BlockSource, R: Repositories> {
    config: IndexerConfig,
    block_source: Arc<S>,
    repositories: Arc<R>,
    chain_state: Arc<dyn ChainState>,
    handlers: Arc<HandlerRegistry>,
}

impl<S: BlockSource, R: Repositories> IndexerService<S, R> {
    pub fn new(
        config: IndexerConfig,
        block_source: Arc<S>,
        repositories: Arc<R>,
        chain_state: Arc<dyn ChainState>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            config,
            block_source,
            repositories,
            chain_state,
            handlers,
        }
    }

    /// Start the indexer.
    ///
    /// Returns `ShutdownRequested` on graceful stop, `BlockFailed` when a
    /// block cannot be indexed after all retries.
    #[instrument(skip_all, fields(chain = %&self.config.chain_id[..16.min(self.config.chain_id.len())]))]
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> IndexerResult<()> {
        info!("⛓️  Starting indexer");

        // Verify we're connecting to the correct chain
        self.verify_chain_id().await?;

        let mut next = self.resume_point().await?;
        info!(from = next, "⏩ Resuming");

        self.catch_up(&mut next, &mut shutdown_rx).await?;
        self.follow_finalized(&mut next, &mut shutdown_rx).await
    }

    /// Verify the connected chain matches any existing indexed data.
    /// Returns error if database contains data from a different chain.
    async fn verify_chain_id(&self) -> IndexerResult<()> {
        let existing_cursor = self.repositories.cursor().get_any_cursor().await?;

        if let Some(cursor) = existing_cursor {
            if cursor.chain_id != self.config.chain_id {
                let connected_short = &self.config.chain_id[..16.min(self.config.chain_id.len())];
                let expected_short = &cursor.chain_id[..16.min(cursor.chain_id.len())];

                error!(
                    connected = connected_short,
                    expected = expected_short,
                    "❌ Chain mismatch! Database contains data from a different chain"
                );
                error!(
                    "   Manual action required: either connect to the correct chain or clear the database"
                );

                return Err(IndexerError::ChainMismatch {
                    connected: self.config.chain_id.clone(),
                    expected: cursor.chain_id,
                });
            }
            debug!("Chain ID verified");
        }

        Ok(())
    }

    /// Next block to index: one past the cursor, or the start block.
    async fn resume_point(&self) -> IndexerResult<u64> {
        let cursor = self
            .repositories
            .cursor()
            .get_cursor(&self.config.chain_id)
            .await?;

        let Some(cursor) = cursor else {
            debug!(start = self.config.start_block, "No cursor found, starting fresh");
            return Ok(self.config.start_block);
        };

        match self
            .repositories
            .blocks()
            .get_block(cursor.last_indexed_block)
            .await?
        {
            Some(block) if block.hash != cursor.last_indexed_hash => {
                return Err(IndexerError::Internal(format!(
                    "cursor hash for block {} does not match the stored block",
                    cursor.last_indexed_block
                )));
            }
            Some(_) => debug!(block = cursor.last_indexed_block, "Cursor verified"),
            None => warn!(
                block = cursor.last_indexed_block,
                "⚠️  Cursor points to a block that is not stored"
            ),
        }

        Ok(cursor.last_indexed_block + 1)
    }

    /// Index historical blocks until `next` passes the finalized head.
    #[instrument(skip_all)]
    async fn catch_up(&self, next: &mut u64, shutdown_rx: &mut watch::Receiver<bool>) -> IndexerResult<()> {
        loop {
            let head = self.block_source.finalized_head().await?;
            if *next > head.number {
                debug!(head = head.number, "Caught up with finalized head");
                return Ok(());
            }

            info!(from = *next, to = head.number, "📚 Catching up");
            while *next <= head.number {
                self.index_height(*next, shutdown_rx).await?;
                *next += 1;
            }
        }
    }

    /// Fetch and index the block at `number`.
    async fn index_height(&self, number: u64, shutdown_rx: &mut watch::Receiver<bool>) -> IndexerResult<()> {
        if *shutdown_rx.borrow() {
            return Err(IndexerError::ShutdownRequested);
        }
        let raw = self.fetch_block(number, shutdown_rx).await?;
        self.index_block(raw, shutdown_rx).await.map(|_| ())
    }

    /// Fetch a block by height, retrying RPC failures with backoff.
    async fn fetch_block(&self, number: u64, shutdown_rx: &mut watch::Receiver<bool>) -> IndexerResult<RawBlock> {
        let mut attempt: u32 = 0;
        let mut delay = self.config.retry_delay;

        loop {
            attempt += 1;
            match self.block_source.block_at(number).await {
                Ok(raw) => return Ok(raw),
                Err(e) if attempt > self.config.max_block_retries => {
                    error!(block = number, attempts = attempt, error = %e, "❌ Block fetch failed");
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(block = number, attempt, error = %e, "⚠️  Block fetch failed, retrying");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    delay = (delay * 2).min(self.config.max_retry_delay);
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Err(IndexerError::ShutdownRequested);
                    }
                }
            }
        }
    }

    /// Follow finalized blocks via subscription.
    #[instrument(skip_all)]
    async fn follow_finalized(
        &self,
        next: &mut u64,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> IndexerResult<()> {
        debug!("Subscribing to finalized blocks");

        // Exponential backoff configuration
        const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);
        const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
        let mut retry_delay = INITIAL_RETRY_DELAY;

        loop {
            if *shutdown_rx.borrow() {
                debug!("Shutdown requested");
                return Err(IndexerError::ShutdownRequested);
            }

            match self.block_source.subscribe_finalized().await {
                Ok(mut stream) => {
                    debug!("📡 Subscription established");
                    retry_delay = INITIAL_RETRY_DELAY; // Reset backoff on success

                    while let Some(result) = stream.next().await {
                        if *shutdown_rx.borrow() {
                            debug!("Shutdown requested");
                            return Err(IndexerError::ShutdownRequested);
                        }

                        match result {
                            Ok(raw_block) => {
                                if raw_block.number < *next {
                                    trace!(block = raw_block.number, "Block already behind cursor");
                                    continue;
                                }
                                // Fill heights the subscription skipped
                                while *next < raw_block.number {
                                    self.index_height(*next, shutdown_rx).await?;
                                    *next += 1;
                                }
                                self.index_block(raw_block, shutdown_rx).await?;
                                *next += 1;
                            }
                            Err(e) => {
                                warn!(error = ?e, "⚠️  Subscription error, reconnecting...");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        error = ?e,
                        retry_in_ms = retry_delay.as_millis(),
                        "⚠️  Failed to subscribe, retrying..."
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(retry_delay) => {
                    debug!(retry_delay_ms = retry_delay.as_millis(), "🔄 Reconnecting to chain...");
                    // Exponential backoff: double the delay, up to max
                    retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Err(IndexerError::ShutdownRequested);
                    }
                }
            }
        }
    }

    /// Index one block, retrying the whole block on failure.
    ///
    /// Returns `Ok(false)` if the block was already indexed.
    #[instrument(skip(self, raw_block, shutdown_rx), fields(block = raw_block.number))]
    async fn index_block(
        &self,
        raw_block: RawBlock,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> IndexerResult<bool> {
        let mut attempt: u32 = 0;
        let mut delay = self.config.retry_delay;

        loop {
            attempt += 1;
            match self.process_block(&raw_block).await {
                Ok(true) => {
                    info!(block = raw_block.number, "⛓️  Block indexed");
                    return Ok(true);
                }
                Ok(false) => {
                    trace!(block = raw_block.number, "Block skipped (already indexed)");
                    return Ok(false);
                }
                Err(e) => {
                    record_block_failure();
                    if !is_retriable(&e) || attempt > self.config.max_block_retries {
                        error!(
                            block = raw_block.number,
                            attempts = attempt,
                            error = %e,
                            "❌ Block failed to index"
                        );
                        return Err(IndexerError::BlockFailed {
                            number: raw_block.number,
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }
                    warn!(
                        block = raw_block.number,
                        attempt,
                        retry_in_ms = delay.as_millis(),
                        error = %e,
                        "⚠️  Block processing failed, retrying"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    delay = (delay * 2).min(self.config.max_retry_delay);
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Err(IndexerError::ShutdownRequested);
                    }
                }
            }
        }
    }

    /// Process a single block through all handlers and commit it.
    /// Returns `Ok(true)` if processed, `Ok(false)` if skipped.
    async fn process_block(&self, raw_block: &RawBlock) -> IndexerResult<bool> {
        let block_number = raw_block.number;
        trace!("Processing block");

        // Skip already indexed blocks (happens on reconnect)
        if let Some(existing_block) = self.repositories.blocks().get_block(block_number).await? {
            if existing_block.hash == BlockHash(raw_block.hash) {
                trace!("Block already indexed, skipping");
                return Ok(false);
            }
            return Err(IndexerError::Discontinuity {
                number: block_number,
            });
        }

        self.check_parent(raw_block).await?;

        let _timer = ProcessingTimer::new();
        let block = self.transform_block(raw_block);
        let changes = BlockChangeSet::with_max_changes(
            block_number,
            self.repositories.entities(),
            self.config.max_changes,
        );

        let ctx = BlockContext {
            block: &block,
            events: &raw_block.events,
            extrinsics: &raw_block.extrinsics,
            changes: &changes,
            chain: self.chain_state.as_ref(),
        };
        let handled = self.handlers.process_block(&ctx).await?;

        let entities = changes.into_writes();
        let extrinsics = self.transform_extrinsics(raw_block, &block);
        let events = self.transform_events(raw_block, &block);

        let cursor = IndexerCursor {
            chain_id: self.config.chain_id.clone(),
            last_indexed_block: block.number,
            last_indexed_hash: block.hash.clone(),
            updated_at: chrono::Utc::now(),
        };

        let block_data = BlockData {
            block: &block,
            extrinsics: &extrinsics,
            events: &events,
            entities: &entities,
            cursor: &cursor,
        };

        self.repositories.persist_block_atomic(block_data).await?;

        record_block_indexed();
        record_entity_writes(entities.len() as u64);
        debug!(
            handled,
            writes = entities.len(),
            spec_version = block.spec_version(),
            "Block committed"
        );
        Ok(true)
    }

    /// Refuse a block that does not extend the stored previous block.
    async fn check_parent(&self, raw_block: &RawBlock) -> IndexerResult<()> {
        if raw_block.number == 0 {
            return Ok(());
        }

        if let Some(prev_block) = self
            .repositories
            .blocks()
            .get_block(raw_block.number - 1)
            .await?
        {
            let expected_parent = BlockHash(raw_block.parent_hash);
            if prev_block.hash != expected_parent {
                error!(
                    block = raw_block.number,
                    expected = %hex::encode(&expected_parent.0[..8]),
                    stored = %hex::encode(&prev_block.hash.0[..8]),
                    "❌ Parent hash mismatch"
                );
                return Err(IndexerError::Discontinuity {
                    number: raw_block.number,
                });
            }
        }

        Ok(())
    }

    /// Transform raw block to domain model.
    fn transform_block(&self, raw: &RawBlock) -> Block {
        Block {
            number: raw.number,
            hash: BlockHash(raw.hash),
            parent_hash: BlockHash(raw.parent_hash),
            state_root: BlockHash(raw.state_root),
            extrinsics_root: BlockHash(raw.extrinsics_root),
            runtime: raw.runtime.clone(),
            timestamp: raw
                .timestamp
                .and_then(|ts| chrono::DateTime::from_timestamp_millis(ts as i64)),
            extrinsic_count: raw.extrinsics.len() as u32,
            event_count: raw.events.len() as u32,
            indexed_at: chrono::Utc::now(),
        }
    }

    /// Transform raw extrinsics to domain models.
    fn transform_extrinsics(&self, raw: &RawBlock, block: &Block) -> Vec<Extrinsic> {
        raw.extrinsics
            .iter()
            .map(|ext| Extrinsic {
                id: format!("{}-{}", block.number, ext.index),
                block_number: block.number,
                index: ext.index,
                pallet: ext.pallet.clone(),
                call: ext.call.clone(),
                signer: ext.signer.map(AccountId),
                status: if ext.success {
                    ExtrinsicStatus::Success
                } else {
                    ExtrinsicStatus::Failed
                },
                error: ext.error.clone(),
                args: ext.args.clone(),
                raw: hex::encode(&ext.bytes),
            })
            .collect()
    }

    /// Transform raw events to domain models.
    fn transform_events(&self, raw: &RawBlock, block: &Block) -> Vec<Event> {
        raw.events
            .iter()
            .map(|evt| Event {
                id: format!("{}-{}", block.number, evt.index),
                block_number: block.number,
                index: evt.index,
                extrinsic_index: evt.extrinsic_index,
                module: evt.module.clone(),
                method: evt.method.clone(),
                params: evt.params.clone(),
            })
            .collect()
    }
}

/// Whether retrying the same block can change the outcome.
fn is_retriable(err: &IndexerError) -> bool {
    !matches!(
        err,
        IndexerError::Discontinuity { .. }
            | IndexerError::ChainMismatch { .. }
            | IndexerError::ShutdownRequested
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ChainError, ChainResult, DomainError, DomainResult, StorageResult};
    use crate::models::RuntimeVersion;
    use crate::ports::{
        BlockRepository, CursorRepository, EntityStore, EventContext, EventHandler, EventKey,
        FinalizedBlockStream, FinalizedHead, RawEvent,
    };
    use crate::projection::{MemoryEntityStore, Provenance};
    use crate::impl_entity;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    // -------------------------------------------------------------------------
    // Mocks
    // -------------------------------------------------------------------------

    struct MockSource {
        blocks: Vec<RawBlock>,
    }

    #[async_trait]
    impl BlockSource for MockSource {
        async fn genesis_hash(&self) -> ChainResult<BlockHash> {
            Ok(BlockHash([0xaa; 32]))
        }

        async fn finalized_head(&self) -> ChainResult<FinalizedHead> {
            let last = self.blocks.last().ok_or(ChainError::Timeout(0))?;
            Ok(FinalizedHead { number: last.number, hash: last.hash })
        }

        async fn block_at(&self, number: u64) -> ChainResult<RawBlock> {
            self.blocks
                .iter()
                .find(|b| b.number == number)
                .cloned()
                .ok_or(ChainError::BlockFetchError { at: number.to_string(), message: "unknown".into() })
        }

        async fn subscribe_finalized(&self) -> ChainResult<FinalizedBlockStream> {
            // Only the newest head, like a subscription opened late
            Ok(Box::pin(futures::stream::iter(
                self.blocks.last().cloned().into_iter().map(Ok),
            )))
        }

        async fn runtime_version(&self) -> ChainResult<RuntimeVersion> {
            Ok(runtime())
        }
    }

    struct NoChain;

    #[async_trait]
    impl ChainState for NoChain {
        async fn storage_value(
            &self,
            _: &str,
            _: &str,
            _: Vec<serde_json::Value>,
            _: Option<BlockHash>,
        ) -> ChainResult<Option<serde_json::Value>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct MockRepos {
        blocks: Mutex<BTreeMap<u64, Block>>,
        cursor: Mutex<Option<IndexerCursor>>,
        entities: Arc<MemoryEntityStore>,
        commits: AtomicU32,
    }

    #[async_trait]
    impl BlockRepository for MockRepos {
        async fn get_block(&self, number: u64) -> StorageResult<Option<Block>> {
            Ok(self.blocks.lock().unwrap().get(&number).cloned())
        }

        async fn latest_block_number(&self) -> StorageResult<Option<u64>> {
            Ok(self.blocks.lock().unwrap().keys().next_back().copied())
        }
    }

    #[async_trait]
    impl CursorRepository for MockRepos {
        async fn get_cursor(&self, chain_id: &str) -> StorageResult<Option<IndexerCursor>> {
            Ok(self.cursor.lock().unwrap().clone().filter(|c| c.chain_id == chain_id))
        }

        async fn get_any_cursor(&self) -> StorageResult<Option<IndexerCursor>> {
            Ok(self.cursor.lock().unwrap().clone())
        }
    }

    #[async_trait]
    impl Repositories for MockRepos {
        fn blocks(&self) -> &dyn BlockRepository {
            self
        }

        fn cursor(&self) -> &dyn CursorRepository {
            self
        }

        fn entities(&self) -> Arc<dyn EntityStore> {
            self.entities.clone()
        }

        async fn persist_block_atomic(&self, data: BlockData<'_>) -> StorageResult<()> {
            self.blocks.lock().unwrap().insert(data.block.number, data.block.clone());
            *self.cursor.lock().unwrap() = Some(data.cursor.clone());
            self.entities.apply(data.entities);
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Seen {
        id: String,
        count: u32,
        #[serde(flatten)]
        provenance: Provenance,
    }
    impl_entity!(Seen, "Seen");

    /// Counts `Test.Ping` events into one `Seen` row; fails the first
    /// `failures` calls.
    struct PingHandler {
        failures: AtomicU32,
    }

    #[async_trait]
    impl EventHandler for PingHandler {
        fn name(&self) -> &'static str {
            "ping"
        }

        fn subscriptions(&self) -> &'static [EventKey] {
            &[("Test", "Ping")]
        }

        async fn handle_event(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
            let changes = ctx.changes();
            let _guard = changes.lock_entity::<Seen>("pings").await;
            let mut seen = changes
                .get_or_create("pings", || Seen {
                    id: "pings".into(),
                    count: 0,
                    provenance: Provenance::at(ctx.block_number()),
                })
                .await?;
            seen.count += 1;
            changes.save(&mut seen)?;

            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DomainError::ValidationError("transient".into()));
            }
            Ok(())
        }
    }

    fn runtime() -> RuntimeVersion {
        RuntimeVersion {
            spec_name: "polymesh_testnet".into(),
            spec_version: 7_000_000,
            transaction_version: 7,
        }
    }

    fn raw_block(number: u64) -> RawBlock {
        RawBlock {
            number,
            hash: [number as u8 + 1; 32],
            parent_hash: [number as u8; 32],
            state_root: [0; 32],
            extrinsics_root: [0; 32],
            runtime: runtime(),
            extrinsics: vec![],
            events: vec![RawEvent {
                index: 0,
                extrinsic_index: None,
                module: "Test".into(),
                method: "Ping".into(),
                params: vec![],
            }],
            timestamp: Some(1_700_000_000_000),
        }
    }

    fn service(
        blocks: Vec<RawBlock>,
        repos: Arc<MockRepos>,
        failures: u32,
        max_block_retries: u32,
    ) -> IndexerService<MockSource, MockRepos> {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(PingHandler { failures: AtomicU32::new(failures) }));
        IndexerService::new(
            IndexerConfig {
                chain_id: "0xchain".into(),
                start_block: 1,
                max_block_retries,
                retry_delay: Duration::from_millis(1),
                max_retry_delay: Duration::from_millis(2),
                ..Default::default()
            },
            Arc::new(MockSource { blocks }),
            repos,
            Arc::new(NoChain),
            Arc::new(registry),
        )
    }

    // Test critique: rattrapage séquentiel jusqu'à la tête finalisée
    #[tokio::test]
    async fn test_catch_up_indexes_every_block_in_order() {
        let repos = Arc::new(MockRepos::default());
        let svc = service((1..=4).map(raw_block).collect(), repos.clone(), 0, 0);
        let (_tx, mut rx) = watch::channel(false);

        let mut next = svc.resume_point().await.unwrap();
        assert_eq!(next, 1);
        svc.catch_up(&mut next, &mut rx).await.unwrap();

        assert_eq!(next, 5);
        assert_eq!(repos.commits.load(Ordering::SeqCst), 4);
        let cursor = repos.cursor.lock().unwrap().clone().unwrap();
        assert_eq!(cursor.last_indexed_block, 4);
        let seen: Seen = repos.entities.get("pings").unwrap();
        assert_eq!(seen.count, 4);
        assert_eq!(seen.provenance, Provenance { created_block_id: 1, updated_block_id: 4 });
    }

    // Test critique: un bloc déjà indexé (même hash) est ignoré
    #[tokio::test]
    async fn test_already_indexed_block_is_skipped() {
        let repos = Arc::new(MockRepos::default());
        let svc = service(vec![raw_block(1)], repos.clone(), 0, 0);
        let (_tx, mut rx) = watch::channel(false);

        assert!(svc.index_block(raw_block(1), &mut rx).await.unwrap());
        assert!(!svc.index_block(raw_block(1), &mut rx).await.unwrap());
        assert_eq!(repos.commits.load(Ordering::SeqCst), 1);
        assert_eq!(repos.entities.get::<Seen>("pings").unwrap().count, 1);
    }

    // Test critique: un échec transitoire rejoue le bloc entier sans double écriture
    #[tokio::test]
    async fn test_failed_attempt_is_discarded_then_retried() {
        let repos = Arc::new(MockRepos::default());
        let svc = service(vec![raw_block(1)], repos.clone(), 2, 3);
        let (_tx, mut rx) = watch::channel(false);

        assert!(svc.index_block(raw_block(1), &mut rx).await.unwrap());
        assert_eq!(repos.commits.load(Ordering::SeqCst), 1);
        // Les tentatives échouées n'ont rien laissé derrière elles
        assert_eq!(repos.entities.get::<Seen>("pings").unwrap().count, 1);
    }

    // Test critique: un bloc qui échoue toujours arrête le service, jamais sauté
    #[tokio::test]
    async fn test_persistent_failure_stops_with_block_failed() {
        let repos = Arc::new(MockRepos::default());
        let svc = service((1..=2).map(raw_block).collect(), repos.clone(), u32::MAX, 2);
        let (_tx, mut rx) = watch::channel(false);

        let mut next = 1;
        let err = svc.catch_up(&mut next, &mut rx).await.unwrap_err();
        match err {
            IndexerError::BlockFailed { number, attempts, .. } => {
                assert_eq!(number, 1);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(next, 1);
        assert_eq!(repos.commits.load(Ordering::SeqCst), 0);
        assert!(repos.cursor.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_from_cursor() {
        let repos = Arc::new(MockRepos::default());
        let svc = service((1..=3).map(raw_block).collect(), repos.clone(), 0, 0);
        let (_tx, mut rx) = watch::channel(false);
        svc.index_block(raw_block(1), &mut rx).await.unwrap();
        svc.index_block(raw_block(2), &mut rx).await.unwrap();

        assert_eq!(svc.resume_point().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_parent_mismatch_is_discontinuity() {
        let repos = Arc::new(MockRepos::default());
        let svc = service(vec![raw_block(1)], repos.clone(), 0, 5);
        let (_tx, mut rx) = watch::channel(false);
        svc.index_block(raw_block(1), &mut rx).await.unwrap();

        let mut forked = raw_block(2);
        forked.parent_hash = [0xff; 32];
        let err = svc.index_block(forked, &mut rx).await.unwrap_err();
        // Pas de nouvelle tentative sur une discontinuité
        assert!(matches!(
            err,
            IndexerError::BlockFailed { attempts: 1, ref source, .. }
                if matches!(**source, IndexerError::Discontinuity { number: 2 })
        ));
    }

    // Test critique: détection de changement de chaîne
    #[tokio::test]
    async fn test_chain_mismatch_detected() {
        let repos = Arc::new(MockRepos::default());
        *repos.cursor.lock().unwrap() = Some(IndexerCursor {
            chain_id: "0xother".into(),
            last_indexed_block: 10,
            last_indexed_hash: BlockHash([1; 32]),
            updated_at: chrono::Utc::now(),
        });
        let svc = service(vec![raw_block(1)], repos, 0, 0);

        let err = svc.verify_chain_id().await.unwrap_err();
        assert!(matches!(err, IndexerError::ChainMismatch { .. }));
    }

    #[tokio::test]
    async fn test_follow_fills_gaps_then_stops_on_shutdown() {
        let repos = Arc::new(MockRepos::default());
        // La souscription ne livre que le bloc 3: 1 et 2 sont récupérés
        let svc = service((1..=3).map(raw_block).collect(), repos.clone(), 0, 0);
        let (tx, mut rx) = watch::channel(false);

        let mut next = 1;
        let follow = svc.follow_finalized(&mut next, &mut rx);
        let stop = async {
            while repos.commits.load(Ordering::SeqCst) < 3 {
                tokio::task::yield_now().await;
            }
            tx.send(true).unwrap();
        };
        let (result, _) = tokio::join!(follow, stop);

        assert!(matches!(result, Err(IndexerError::ShutdownRequested)));
        assert_eq!(repos.commits.load(Ordering::SeqCst), 3);
    }
}
