//! Port traits for the blockchain data source.
//!
//! [`BlockSource`] supplies decoded blocks in order; [`ChainState`] is the
//! live storage read-back used by the few handlers that cannot get what they
//! need from event parameters. Implementations live in the infrastructure
//! layer (e.g., `prism-substrate`).

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::ChainResult;
use crate::models::{BlockHash, RuntimeVersion};

/// Raw block data from the chain before domain transformation.
#[derive(Debug, Clone)]
pub struct RawBlock {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: [u8; 32],
    /// Parent hash.
    pub parent_hash: [u8; 32],
    /// State root.
    pub state_root: [u8; 32],
    /// Extrinsics root.
    pub extrinsics_root: [u8; 32],
    /// Runtime that produced the block.
    pub runtime: RuntimeVersion,
    /// Decoded extrinsics in block order.
    pub extrinsics: Vec<RawExtrinsic>,
    /// Decoded events in emission order.
    pub events: Vec<RawEvent>,
    /// Block timestamp in milliseconds (from Timestamp pallet).
    pub timestamp: Option<u64>,
}

/// Raw extrinsic data.
#[derive(Debug, Clone)]
pub struct RawExtrinsic {
    /// Index in block.
    pub index: u32,
    /// SCALE-encoded bytes.
    pub bytes: Vec<u8>,
    /// Decoded pallet name.
    pub pallet: String,
    /// Decoded call name.
    pub call: String,
    /// Signer (if signed).
    pub signer: Option<[u8; 32]>,
    /// Arguments as JSON (named fields when the metadata has names).
    pub args: serde_json::Value,
    /// Success flag.
    pub success: bool,
    /// Error info if failed.
    pub error: Option<String>,
}

/// Raw event data.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Index in block.
    pub index: u32,
    /// Extrinsic index (if applicable).
    pub extrinsic_index: Option<u32>,
    /// Module (pallet) name.
    pub module: String,
    /// Event variant name.
    pub method: String,
    /// Ordered parameter values as JSON.
    pub params: Vec<serde_json::Value>,
}

impl RawEvent {
    /// `Module.method` label used in logs and errors.
    pub fn label(&self) -> String {
        format!("{}.{}", self.module, self.method)
    }

    /// Whether this event is `module.method`.
    pub fn is(&self, module: &str, method: &str) -> bool {
        self.module == module && self.method == method
    }
}

/// Notification when a new block is finalized.
#[derive(Debug, Clone)]
pub struct FinalizedHead {
    pub number: u64,
    pub hash: [u8; 32],
}

/// Stream of finalized block.
pub type FinalizedBlockStream = Pin<Box<dyn Stream<Item = ChainResult<RawBlock>> + Send>>;

/// Port trait for blockchain data source.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Get the genesis hash of the connected chain.
    async fn genesis_hash(&self) -> ChainResult<BlockHash>;

    /// Get the current finalized block head.
    async fn finalized_head(&self) -> ChainResult<FinalizedHead>;

    /// Fetch and decode the block at a given height.
    ///
    /// Used to catch up from the cursor and to fill gaps in the
    /// finalized subscription.
    async fn block_at(&self, number: u64) -> ChainResult<RawBlock>;

    /// Subscribe to finalized blocks.
    async fn subscribe_finalized(&self) -> ChainResult<FinalizedBlockStream>;

    /// Get current runtime version.
    async fn runtime_version(&self) -> ChainResult<RuntimeVersion>;
}

/// Live storage read-back against the source chain.
///
/// Keys are JSON values: `0x` hex strings are passed as raw bytes,
/// numbers as integers. `at = None` reads at the finalized head.
#[async_trait]
pub trait ChainState: Send + Sync {
    /// Fetch a storage entry decoded to JSON, `None` if absent.
    async fn storage_value(
        &self,
        pallet: &str,
        entry: &str,
        keys: Vec<serde_json::Value>,
        at: Option<BlockHash>,
    ) -> ChainResult<Option<serde_json::Value>>;
}
