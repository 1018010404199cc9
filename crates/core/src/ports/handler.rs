//! Port trait for domain event handlers and the event router.
//!
//! This is the main extensibility point for the indexer. Each domain
//! (asset, settlement, multisig, ...) implements [`EventHandler`] and
//! declares the `(module, method)` pairs it consumes. The
//! [`HandlerRegistry`] routes every event of a block to the handlers
//! subscribed to its pair.

use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DomainError, DomainResult};
use crate::metrics;
use crate::models::Block;
use crate::ports::block_source::{ChainState, RawEvent, RawExtrinsic};
use crate::projection::BlockChangeSet;

/// A `(module, method)` subscription.
pub type EventKey = (&'static str, &'static str);

/// Block-wide context shared by every handler invocation of a block.
pub struct BlockContext<'a> {
    /// Block being processed.
    pub block: &'a Block,
    /// Every event of the block in emission order.
    pub events: &'a [RawEvent],
    /// Every extrinsic of the block in block order.
    pub extrinsics: &'a [RawExtrinsic],
    /// Pending projection writes of the block.
    pub changes: &'a BlockChangeSet,
    /// Live chain storage reader.
    pub chain: &'a dyn ChainState,
}

impl<'a> BlockContext<'a> {
    /// Extrinsic at `index`, if the block has one.
    pub fn extrinsic(&self, index: u32) -> Option<&'a RawExtrinsic> {
        self.extrinsics.iter().find(|x| x.index == index)
    }

    /// Build the context for one event of this block.
    pub fn event<'b>(&'b self, event: &'b RawEvent) -> EventContext<'b>
    where
        'a: 'b,
    {
        EventContext {
            block: self,
            event,
            extrinsic: event.extrinsic_index.and_then(|idx| self.extrinsic(idx)),
        }
    }
}

/// Context passed to handlers for a single event.
pub struct EventContext<'a> {
    /// Enclosing block context.
    pub block: &'a BlockContext<'a>,
    /// The routed event.
    pub event: &'a RawEvent,
    /// Extrinsic that emitted the event, if any.
    pub extrinsic: Option<&'a RawExtrinsic>,
}

impl EventContext<'_> {
    /// Shorthand for the block's change set.
    pub fn changes(&self) -> &BlockChangeSet {
        self.block.changes
    }

    /// Current block number.
    pub fn block_number(&self) -> u64 {
        self.block.block.number
    }

    /// `block/eventIdx`, the id of append-only rows derived from this event.
    pub fn event_id(&self) -> String {
        format!("{}/{}", self.block.block.number, self.event.index)
    }
}

/// Trait for domain event handlers.
///
/// A handler is called for each event whose `(module, method)` pair it
/// subscribes to. Any error aborts the event and the enclosing block.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// `(module, method)` pairs this handler consumes.
    fn subscriptions(&self) -> &'static [EventKey];

    /// Project one event.
    async fn handle_event(&self, ctx: &EventContext<'_>) -> DomainResult<()>;

    /// Called at the start of processing a block (optional).
    async fn on_block_start(&self, _ctx: &BlockContext<'_>) -> DomainResult<()> {
        Ok(())
    }

    /// Priority for handler execution (higher = earlier).
    /// Default is 0.
    fn priority(&self) -> i32 {
        0
    }
}

/// Event router: `(module, method)` to the handlers subscribed to it.
pub struct HandlerRegistry {
    routes: HashMap<String, HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    ordered_handlers: Vec<Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            ordered_handlers: Vec::new(),
        }
    }

    /// Register a handler under every pair it subscribes to.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        for (module, method) in handler.subscriptions() {
            let handlers = self
                .routes
                .entry(module.to_string())
                .or_default()
                .entry(method.to_string())
                .or_default();
            handlers.push(handler.clone());
            handlers.sort_by_key(|h| std::cmp::Reverse(h.priority()));
        }
        self.ordered_handlers.push(handler);
        // Sort by priority (descending)
        self.ordered_handlers
            .sort_by_key(|b| std::cmp::Reverse(b.priority()));
    }

    /// Handlers subscribed to `module.method`, in priority order.
    pub fn handlers_for(&self, module: &str, method: &str) -> &[Arc<dyn EventHandler>] {
        self.routes
            .get(module)
            .and_then(|methods| methods.get(method))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Get all handlers in priority order.
    pub fn all(&self) -> &[Arc<dyn EventHandler>] {
        &self.ordered_handlers
    }

    /// Check if any handler consumes `module.method`.
    pub fn has_route(&self, module: &str, method: &str) -> bool {
        !self.handlers_for(module, method).is_empty()
    }

    /// Number of routed `(module, method)` pairs.
    pub fn route_count(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    /// Run every handler's block-start hook, in priority order.
    pub async fn start_block(&self, ctx: &BlockContext<'_>) -> DomainResult<()> {
        for handler in &self.ordered_handlers {
            handler.on_block_start(ctx).await.inspect_err(|e| {
                tracing::error!(handler = handler.name(), block = ctx.block.number, error = %e, "Block start hook failed");
            })?;
        }
        Ok(())
    }

    /// Fan an event out to its handlers.
    ///
    /// Handlers of one pair run concurrently; the first error wins.
    /// Unrouted events are ignored. Returns the number of handlers run.
    pub async fn dispatch(&self, ctx: &EventContext<'_>) -> DomainResult<usize> {
        let event = ctx.event;
        let handlers = self.handlers_for(&event.module, &event.method);
        if handlers.is_empty() {
            return Ok(0);
        }

        try_join_all(handlers.iter().map(|h| h.handle_event(ctx)))
            .await
            .inspect_err(|e| {
                metrics::record_handler_error(&event.module, &event.method);
                if let DomainError::Decoding { event: label, .. } = e {
                    metrics::record_decode_error(label);
                }
                tracing::error!(
                    block = ctx.block_number(),
                    event_index = event.index,
                    event = %event.label(),
                    error = %e,
                    "Handler failed"
                );
            })?;

        Ok(handlers.len())
    }

    /// Start the block, then route all of its events in emission order.
    pub async fn process_block(&self, ctx: &BlockContext<'_>) -> DomainResult<usize> {
        self.start_block(ctx).await?;

        let mut handled = 0;
        for event in ctx.events {
            handled += self.dispatch(&ctx.event(event)).await?;
        }
        Ok(handled)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChainResult;
    use crate::models::{BlockHash, RuntimeVersion};
    use crate::projection::MemoryEntityStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    struct Counting {
        name: &'static str,
        subs: &'static [EventKey],
        priority: i32,
        calls: AtomicUsize,
        fail: bool,
    }

    impl Counting {
        fn new(name: &'static str, subs: &'static [EventKey], priority: i32) -> Arc<Self> {
            Arc::new(Self {
                name,
                subs,
                priority,
                calls: AtomicUsize::new(0),
                fail: false,
            })
        }
    }

    #[async_trait]
    impl EventHandler for Counting {
        fn name(&self) -> &'static str {
            self.name
        }

        fn subscriptions(&self) -> &'static [EventKey] {
            self.subs
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn handle_event(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DomainError::decoding(ctx.event.label(), "boom"));
            }
            Ok(())
        }
    }

    fn block() -> Block {
        Block {
            number: 1,
            hash: BlockHash([1; 32]),
            parent_hash: BlockHash([0; 32]),
            state_root: BlockHash([0; 32]),
            extrinsics_root: BlockHash([0; 32]),
            runtime: RuntimeVersion {
                spec_name: "polymesh_testnet".into(),
                spec_version: 7_000_000,
                transaction_version: 7,
            },
            timestamp: None,
            extrinsic_count: 0,
            event_count: 0,
            indexed_at: chrono::Utc::now(),
        }
    }

    fn event(index: u32, module: &str, method: &str) -> RawEvent {
        RawEvent {
            index,
            extrinsic_index: None,
            module: module.into(),
            method: method.into(),
            params: vec![],
        }
    }

    // Test critique: les handlers sont triés par priorité (décroissante)
    #[test]
    fn test_handler_registry_priority_order() {
        let mut registry = HandlerRegistry::new();
        registry.register(Counting::new("Low", &[("A", "x")], -10));
        registry.register(Counting::new("High", &[("A", "x")], 100));
        registry.register(Counting::new("Medium", &[("B", "y")], 50));

        let all = registry.all();
        assert_eq!(all[0].name(), "High");
        assert_eq!(all[1].name(), "Medium");
        assert_eq!(all[2].name(), "Low");

        let routed = registry.handlers_for("A", "x");
        assert_eq!(routed.len(), 2);
        assert_eq!(routed[0].name(), "High");
        assert_eq!(registry.route_count(), 2);
    }

    // Test critique: routage par (module, method), paires inconnues ignorées
    #[tokio::test]
    async fn test_dispatch_routes_by_module_and_method() {
        let asset = Counting::new("asset", &[("Asset", "AssetCreated")], 0);
        let confidential = Counting::new("confidential", &[("ConfidentialAsset", "AssetCreated")], 0);
        let mut registry = HandlerRegistry::new();
        registry.register(asset.clone());
        registry.register(confidential.clone());

        let store = Arc::new(MemoryEntityStore::new());
        let changes = BlockChangeSet::new(1, store);
        let block = block();
        let events = vec![
            event(0, "Asset", "AssetCreated"),
            event(1, "ConfidentialAsset", "AssetCreated"),
            event(2, "Asset", "AssetCreated"),
            event(3, "Unknown", "Thing"),
        ];
        let ctx = BlockContext {
            block: &block,
            events: &events,
            extrinsics: &[],
            changes: &changes,
            chain: &NoChain,
        };

        let handled = registry.process_block(&ctx).await.unwrap();
        assert_eq!(handled, 3);
        assert_eq!(asset.calls.load(Ordering::SeqCst), 2);
        assert_eq!(confidential.calls.load(Ordering::SeqCst), 1);
    }

    // Test critique: une erreur de handler remonte et interrompt le bloc
    #[tokio::test]
    async fn test_dispatch_propagates_first_error() {
        let failing = Arc::new(Counting {
            name: "failing",
            subs: &[("Settlement", "InstructionCreated")],
            priority: 0,
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let after = Counting::new("after", &[("Settlement", "InstructionExecuted")], 0);
        let mut registry = HandlerRegistry::new();
        registry.register(failing);
        registry.register(after.clone());

        let store = Arc::new(MemoryEntityStore::new());
        let changes = BlockChangeSet::new(1, store);
        let block = block();
        let events = vec![
            event(0, "Settlement", "InstructionCreated"),
            event(1, "Settlement", "InstructionExecuted"),
        ];
        let ctx = BlockContext {
            block: &block,
            events: &events,
            extrinsics: &[],
            changes: &changes,
            chain: &NoChain,
        };

        let err = registry.process_block(&ctx).await.unwrap_err();
        assert!(matches!(err, DomainError::Decoding { .. }));
        // Les événements suivants ne sont pas traités
        assert_eq!(after.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_event_context_links_extrinsic() {
        let store = Arc::new(MemoryEntityStore::new());
        let changes = BlockChangeSet::new(1, store);
        let block = block();
        let extrinsics = vec![RawExtrinsic {
            index: 2,
            bytes: vec![],
            pallet: "MultiSig".into(),
            call: "create_proposal".into(),
            signer: None,
            args: serde_json::json!({}),
            success: true,
            error: None,
        }];
        let mut ev = event(5, "MultiSig", "ProposalAdded");
        ev.extrinsic_index = Some(2);
        let events = vec![ev];
        let ctx = BlockContext {
            block: &block,
            events: &events,
            extrinsics: &extrinsics,
            changes: &changes,
            chain: &NoChain,
        };

        let ectx = ctx.event(&events[0]);
        assert_eq!(ectx.extrinsic.map(|x| x.call.as_str()), Some("create_proposal"));
        assert_eq!(ectx.event_id(), "1/5");
    }
}
