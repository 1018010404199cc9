//! Substrate RPC client with per-runtime metadata decoding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use subxt::backend::BackendExt;
use subxt::backend::legacy::rpc_methods::BlockNumber;
use subxt::backend::legacy::{LegacyBackend, LegacyRpcMethods};
use subxt::backend::rpc::RpcClient;
use subxt::config::Header;
use subxt::utils::H256;
use subxt::{OnlineClient, PolkadotConfig};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use prism_core::error::{ChainError, ChainResult};
use prism_core::metrics::record_decode_error;
use prism_core::models::{BlockHash, RuntimeVersion};
use prism_core::ports::{
    BlockSource, ChainState, FinalizedBlockStream, FinalizedHead, RawBlock, RawEvent, RawExtrinsic,
};

use crate::value::{
    composite_to_json, json_to_key, params_to_json, signer_from_address, value_to_json,
};

/// Configuration for the Substrate client.
#[derive(Debug, Clone)]
pub struct SubstrateClientConfig {
    /// WebSocket URL (e.g., "ws://localhost:9944").
    pub ws_url: String,
}

impl Default for SubstrateClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:9944".to_string(),
        }
    }
}

struct Inner {
    rpc: LegacyRpcMethods<PolkadotConfig>,
    backend: Arc<LegacyBackend<PolkadotConfig>>,
    genesis: H256,
    /// Decoding clients by spec version, each with that runtime's metadata.
    clients: Mutex<HashMap<u32, OnlineClient<PolkadotConfig>>>,
}

/// Substrate client adapter implementing the BlockSource and ChainState
/// ports.
///
/// Historical blocks are decoded with the metadata of the runtime that
/// produced them, so catch-up across runtime upgrades works.
#[derive(Clone)]
pub struct SubstrateClient {
    inner: Arc<Inner>,
}

impl SubstrateClient {
    /// Connect to a Substrate node.
    #[instrument(skip_all, fields(url = %config.ws_url))]
    pub async fn connect(config: SubstrateClientConfig) -> ChainResult<Self> {
        debug!("Connecting to node");

        let rpc_client = RpcClient::from_url(&config.ws_url)
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;
        let rpc = LegacyRpcMethods::<PolkadotConfig>::new(rpc_client.clone());
        let backend = Arc::new(LegacyBackend::builder().build(rpc_client));
        let genesis = rpc
            .genesis_hash()
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;

        debug!("Connected successfully");

        Ok(Self {
            inner: Arc::new(Inner {
                rpc,
                backend,
                genesis,
                clients: Mutex::new(HashMap::new()),
            }),
        })
    }

    async fn runtime_at(&self, hash: H256) -> ChainResult<RuntimeVersion> {
        let version = self
            .inner
            .rpc
            .state_get_runtime_version(Some(hash))
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        let spec_name = version
            .other
            .get("specName")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(RuntimeVersion {
            spec_name,
            spec_version: version.spec_version,
            transaction_version: version.transaction_version,
        })
    }

    /// Decoding client for the runtime active at `hash`.
    async fn client_for(
        &self,
        hash: H256,
        runtime: &RuntimeVersion,
    ) -> ChainResult<OnlineClient<PolkadotConfig>> {
        let mut clients = self.inner.clients.lock().await;
        if let Some(client) = clients.get(&runtime.spec_version) {
            return Ok(client.clone());
        }

        let metadata = self
            .inner
            .backend
            .legacy_metadata(hash)
            .await
            .map_err(|e| ChainError::MetadataError(e.to_string()))?;
        let client = OnlineClient::<PolkadotConfig>::from_backend_with(
            self.inner.genesis,
            subxt::client::RuntimeVersion {
                spec_version: runtime.spec_version,
                transaction_version: runtime.transaction_version,
            },
            metadata,
            self.inner.backend.clone(),
        )
        .map_err(|e| ChainError::MetadataError(e.to_string()))?;

        info!(
            spec_name = %runtime.spec_name,
            spec_version = runtime.spec_version,
            "🧬 Loaded runtime metadata"
        );
        clients.insert(runtime.spec_version, client.clone());
        Ok(client)
    }

    /// Fetch and decode the block with the given hash.
    async fn fetch(&self, hash: H256) -> ChainResult<RawBlock> {
        let runtime = self.runtime_at(hash).await?;
        let client = self.client_for(hash, &runtime).await?;
        let block = client
            .blocks()
            .at(hash)
            .await
            .map_err(|e| ChainError::BlockFetchError {
                at: format!("{hash:?}"),
                message: e.to_string(),
            })?;

        let extrinsics = block
            .extrinsics()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;
        let events = block
            .events()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        let header = block.header();
        Ok(RawBlock {
            number: block.number() as u64,
            hash: block.hash().into(),
            parent_hash: header.parent_hash.into(),
            state_root: header.state_root.into(),
            extrinsics_root: header.extrinsics_root.into(),
            runtime,
            timestamp: block_timestamp(&extrinsics),
            extrinsics: decode_extrinsics(&extrinsics, &events),
            events: decode_events(&events),
        })
    }
}

#[async_trait]
impl BlockSource for SubstrateClient {
    async fn genesis_hash(&self) -> ChainResult<BlockHash> {
        Ok(BlockHash(self.inner.genesis.0))
    }

    async fn finalized_head(&self) -> ChainResult<FinalizedHead> {
        let hash = self
            .inner
            .rpc
            .chain_get_finalized_head()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;
        let header = self
            .inner
            .rpc
            .chain_get_header(Some(hash))
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?
            .ok_or_else(|| ChainError::RpcError(format!("no header for finalized head {hash:?}")))?;

        Ok(FinalizedHead {
            number: header.number as u64,
            hash: hash.into(),
        })
    }

    async fn block_at(&self, number: u64) -> ChainResult<RawBlock> {
        let hash = self
            .inner
            .rpc
            .chain_get_block_hash(Some(BlockNumber::from(number)))
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?
            .ok_or_else(|| ChainError::BlockFetchError {
                at: number.to_string(),
                message: "no block at this height".into(),
            })?;

        trace!(block = number, "Fetching block");
        self.fetch(hash).await
    }

    async fn subscribe_finalized(&self) -> ChainResult<FinalizedBlockStream> {
        let subscription = self
            .inner
            .rpc
            .chain_subscribe_finalized_heads()
            .await
            .map_err(|e| ChainError::SubscriptionError(e.to_string()))?;

        let client = self.clone();
        let stream = subscription.then(move |result| {
            let client = client.clone();
            async move {
                match result {
                    Ok(header) => client.fetch(header.hash()).await,
                    Err(e) => Err(ChainError::SubscriptionError(e.to_string())),
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn runtime_version(&self) -> ChainResult<RuntimeVersion> {
        let head = self.finalized_head().await?;
        self.runtime_at(H256(head.hash)).await
    }
}

#[async_trait]
impl ChainState for SubstrateClient {
    async fn storage_value(
        &self,
        pallet: &str,
        entry: &str,
        keys: Vec<serde_json::Value>,
        at: Option<BlockHash>,
    ) -> ChainResult<Option<serde_json::Value>> {
        let read_error = |message: String| ChainError::StorageReadError {
            pallet: pallet.to_string(),
            entry: entry.to_string(),
            message,
        };

        let hash = match at {
            Some(hash) => H256(hash.0),
            None => self
                .inner
                .rpc
                .chain_get_finalized_head()
                .await
                .map_err(|e| read_error(e.to_string()))?,
        };
        let runtime = self.runtime_at(hash).await?;
        let client = self.client_for(hash, &runtime).await?;

        let address = subxt::dynamic::storage(
            pallet,
            entry,
            keys.iter().map(json_to_key).collect::<Vec<_>>(),
        );
        let stored = client
            .storage()
            .at(hash)
            .fetch(&address)
            .await
            .map_err(|e| read_error(e.to_string()))?;

        match stored {
            Some(thunk) => {
                let value = thunk.to_value().map_err(|e| read_error(e.to_string()))?;
                Ok(Some(value_to_json(&value)))
            }
            None => Ok(None),
        }
    }
}

// =============================================================================
// Block decoding helpers
// =============================================================================

/// Decode events into ordered parameter lists.
fn decode_events(events: &subxt::events::Events<PolkadotConfig>) -> Vec<RawEvent> {
    let mut raw_events = Vec::new();

    for (index, event) in events.iter().enumerate() {
        match event {
            Ok(ev) => {
                let params = match ev.field_values() {
                    Ok(fields) => params_to_json(&fields),
                    Err(e) => {
                        warn!(
                            index,
                            event = %format!("{}.{}", ev.pallet_name(), ev.variant_name()),
                            error = %e,
                            "⚠️  Could not decode event fields"
                        );
                        record_decode_error(&format!("{}.{}", ev.pallet_name(), ev.variant_name()));
                        Vec::new()
                    }
                };

                let extrinsic_index = match ev.phase() {
                    subxt::events::Phase::ApplyExtrinsic(idx) => Some(idx),
                    _ => None,
                };

                raw_events.push(RawEvent {
                    index: index as u32,
                    extrinsic_index,
                    module: ev.pallet_name().to_string(),
                    method: ev.variant_name().to_string(),
                    params,
                });
            }
            Err(e) => {
                trace!(index, error = ?e, "Failed to decode event");
                record_decode_error("unknown");
            }
        }
    }

    raw_events
}

/// Decode extrinsics with their dispatch result.
fn decode_extrinsics(
    extrinsics: &subxt::blocks::Extrinsics<PolkadotConfig, OnlineClient<PolkadotConfig>>,
    events: &subxt::events::Events<PolkadotConfig>,
) -> Vec<RawExtrinsic> {
    extrinsics
        .iter()
        .enumerate()
        .map(|(index, ext)| {
            let pallet = ext
                .pallet_name()
                .map(|s| s.to_string())
                .unwrap_or_else(|_| "Unknown".to_string());
            let call = ext
                .variant_name()
                .map(|s| s.to_string())
                .unwrap_or_else(|_| "unknown".to_string());

            let (success, error) = extrinsic_result(events, index as u32);

            let signer = ext.address_bytes().and_then(|bytes| {
                let signer = signer_from_address(bytes);
                if signer.is_none() {
                    trace!(index, len = bytes.len(), "Unsupported signer address");
                }
                signer
            });

            let args = ext
                .field_values()
                .map(|composite| composite_to_json(&composite))
                .unwrap_or(serde_json::Value::Null);

            RawExtrinsic {
                index: index as u32,
                bytes: ext.bytes().to_vec(),
                pallet,
                call,
                signer,
                args,
                success,
                error,
            }
        })
        .collect()
}

/// Dispatch result of an extrinsic from its `System` events.
fn extrinsic_result(
    events: &subxt::events::Events<PolkadotConfig>,
    ext_index: u32,
) -> (bool, Option<String>) {
    for ev in events.iter().flatten() {
        if let subxt::events::Phase::ApplyExtrinsic(idx) = ev.phase()
            && idx == ext_index
            && ev.pallet_name() == "System"
        {
            match ev.variant_name() {
                "ExtrinsicSuccess" => return (true, None),
                "ExtrinsicFailed" => {
                    let error_info = ev
                        .field_values()
                        .map(|fields| composite_to_json(&fields).to_string())
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    return (false, Some(error_info));
                }
                _ => {}
            }
        }
    }
    (true, None)
}

/// Milliseconds from the `Timestamp.set` inherent.
fn block_timestamp(
    extrinsics: &subxt::blocks::Extrinsics<PolkadotConfig, OnlineClient<PolkadotConfig>>,
) -> Option<u64> {
    extrinsics
        .iter()
        .find(|ext| {
            ext.pallet_name().is_ok_and(|p| p == "Timestamp")
                && ext.variant_name().is_ok_and(|c| c == "set")
        })
        .and_then(|ext| ext.field_values().ok()?.into_values().next()?.as_u128())
        .and_then(|ms| u64::try_from(ms).ok())
}
