//! Core domain layer for the Prism indexer.
//!
//! This crate contains the domain models, port traits (interfaces), the
//! projection store and the indexing service for the security-token ledger
//! projection engine. It follows hexagonal architecture principles - this
//! is the innermost layer with no dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      prism (binary)                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │      prism-handlers         │        prism-substrate        │
//! │  (bundles, version resolver)│     (RPC, storage reads)      │
//! ├─────────────────────────────┴───────────────────────────────┤
//! │                      prism-storage                          │
//! │                      (PostgreSQL)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      prism-core  ← YOU ARE HERE             │
//! │         (models, ports, projection, services)               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Chain data models (Block, Event, Extrinsic, etc.)
//! - [`ports`] - Interface traits for adapters to implement, and the event router
//! - [`projection`] - Entity conventions and the per-block change set
//! - [`services`] - Core business logic (IndexerService)
//! - [`error`] - Domain error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Key Concepts
//!
//! ## Ports
//!
//! - [`ports::BlockSource`] - Fetch decoded blocks from a Substrate chain
//! - [`ports::ChainState`] - Read live chain storage
//! - [`ports::Repositories`] - Persist blocks and projected entities
//! - [`ports::EventHandler`] - Project events of one domain
//!
//! ## Event routing
//!
//! Handlers declare the `(module, method)` pairs they consume and are
//! registered in a [`ports::HandlerRegistry`]. For every event the registry
//! fans out to the subscribed handlers concurrently; any error fails the
//! whole block.
//!
//! ## Indexer Lifecycle
//!
//! 1. Resume from the cursor and catch up to the finalized head
//! 2. Follow finalized blocks from the chain
//! 3. Run block-start hooks, then route each event in emission order
//! 4. Commit block data and the block's entity change set atomically
//! 5. Update cursor for progress tracking

pub mod error;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod projection;
pub mod services;
