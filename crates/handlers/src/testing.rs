//! Test harness: runs events through the router against an in-memory store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use prism_core::error::{ChainError, ChainResult, DomainResult};
use prism_core::models::{Block, BlockHash, RuntimeVersion};
use prism_core::ports::{
    BlockContext, ChainState, EventHandler, HandlerRegistry, RawEvent, RawExtrinsic,
};
use prism_core::projection::{BlockChangeSet, Entity, MemoryEntityStore};

use crate::HandlerBundle;

// =============================================================================
// Chain state
// =============================================================================

/// Scripted chain storage.
#[derive(Default)]
pub struct MockChain {
    values: Mutex<HashMap<String, Value>>,
    failures: AtomicU32,
    reads: AtomicU32,
}

impl MockChain {
    fn key(pallet: &str, entry: &str, keys: &[Value]) -> String {
        format!("{pallet}.{entry}{}", Value::Array(keys.to_vec()))
    }

    pub fn set(&self, pallet: &str, entry: &str, keys: Vec<Value>, value: Value) {
        self.values
            .lock()
            .unwrap()
            .insert(Self::key(pallet, entry, &keys), value);
    }

    pub fn clear(&self, pallet: &str, entry: &str, keys: Vec<Value>) {
        self.values
            .lock()
            .unwrap()
            .remove(&Self::key(pallet, entry, &keys));
    }

    /// Make the next `n` reads fail.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainState for MockChain {
    async fn storage_value(
        &self,
        pallet: &str,
        entry: &str,
        keys: Vec<Value>,
        _at: Option<BlockHash>,
    ) -> ChainResult<Option<Value>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ChainError::StorageReadError {
                pallet: pallet.into(),
                entry: entry.into(),
                message: "scripted failure".into(),
            });
        }
        Ok(self
            .values
            .lock()
            .unwrap()
            .get(&Self::key(pallet, entry, &keys))
            .cloned())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Runs blocks of events through a [`HandlerRegistry`] and commits each
/// block's change set to a [`MemoryEntityStore`], like the indexer does.
pub struct Harness {
    registry: HandlerRegistry,
    pub store: Arc<MemoryEntityStore>,
    pub chain: Arc<MockChain>,
    pub runtime: RuntimeVersion,
    next_block: u64,
}

impl Harness {
    pub fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        let mut registry = HandlerRegistry::new();
        for handler in handlers {
            registry.register(handler);
        }
        Self {
            registry,
            store: Arc::new(MemoryEntityStore::new()),
            chain: Arc::new(MockChain::default()),
            runtime: RuntimeVersion {
                spec_name: "polymesh_mainnet".into(),
                spec_version: 7_000_000,
                transaction_version: 7,
            },
            next_block: 1,
        }
    }

    pub fn from_bundles(bundles: Vec<Box<dyn HandlerBundle>>) -> Self {
        Self::new(bundles.iter().flat_map(|b| b.handlers()).collect())
    }

    /// Run subsequent blocks with this spec version.
    pub fn at_version(mut self, spec_version: u32) -> Self {
        self.runtime.spec_version = spec_version;
        self
    }

    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Index one block of events. Event indexes follow list order.
    pub async fn run(&mut self, events: Vec<RawEvent>) -> DomainResult<u64> {
        self.run_with(events, vec![]).await
    }

    /// Index one block of events and extrinsics.
    ///
    /// On error nothing is committed and the block number is not consumed.
    pub async fn run_with(
        &mut self,
        mut events: Vec<RawEvent>,
        extrinsics: Vec<RawExtrinsic>,
    ) -> DomainResult<u64> {
        for (i, event) in events.iter_mut().enumerate() {
            event.index = i as u32;
        }

        let number = self.next_block;
        let block = Block {
            number,
            hash: BlockHash([(number % 256) as u8; 32]),
            parent_hash: BlockHash([((number - 1) % 256) as u8; 32]),
            state_root: BlockHash([0; 32]),
            extrinsics_root: BlockHash([0; 32]),
            runtime: self.runtime.clone(),
            timestamp: None,
            extrinsic_count: extrinsics.len() as u32,
            event_count: events.len() as u32,
            indexed_at: chrono::Utc::now(),
        };

        let changes = BlockChangeSet::new(number, self.store.clone());
        let ctx = BlockContext {
            block: &block,
            events: &events,
            extrinsics: &extrinsics,
            changes: &changes,
            chain: self.chain.as_ref(),
        };
        self.registry.process_block(&ctx).await?;

        self.store.apply(&changes.into_writes());
        self.next_block += 1;
        Ok(number)
    }

    pub fn get<T: Entity>(&self, id: &str) -> Option<T> {
        self.store.get(id)
    }

    pub fn all<T: Entity>(&self) -> Vec<T> {
        self.store.all()
    }

    pub fn count<T: Entity>(&self) -> usize {
        self.store.count(T::KIND)
    }
}

// =============================================================================
// Builders
// =============================================================================

pub fn ev(module: &str, method: &str, params: Vec<Value>) -> RawEvent {
    RawEvent {
        index: 0,
        extrinsic_index: None,
        module: module.into(),
        method: method.into(),
        params,
    }
}

/// Event emitted by the extrinsic at `extrinsic_index`.
pub fn ev_in(extrinsic_index: u32, module: &str, method: &str, params: Vec<Value>) -> RawEvent {
    RawEvent {
        extrinsic_index: Some(extrinsic_index),
        ..ev(module, method, params)
    }
}

pub fn extrinsic(index: u32, pallet: &str, call: &str, args: Value, signer: u8) -> RawExtrinsic {
    RawExtrinsic {
        index,
        bytes: vec![],
        pallet: pallet.into(),
        call: call.into(),
        signer: Some([signer; 32]),
        args,
        success: true,
        error: None,
    }
}

/// 32-byte identity filled with `n`.
pub fn did(n: u8) -> String {
    format!("0x{}", hex::encode([n; 32]))
}

/// 32-byte account filled with `n`.
pub fn account(n: u8) -> String {
    did(n)
}

pub fn portfolio(owner: &str, number: u64) -> Value {
    if number == 0 {
        json!({ "did": owner, "kind": "Default" })
    } else {
        json!({ "did": owner, "kind": { "User": number } })
    }
}

/// Ticker as the chain encodes it: 12 NUL-padded bytes in hex.
pub fn ticker(symbol: &str) -> Value {
    let mut padded = [0u8; 12];
    padded[..symbol.len()].copy_from_slice(symbol.as_bytes());
    json!(format!("0x{}", hex::encode(padded)))
}

/// 16-byte native asset id filled with `n`.
pub fn asset_id(n: u8) -> String {
    format!("0x{}", hex::encode([n; 16]))
}
