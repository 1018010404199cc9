//! Substrate RPC adapter for the prism indexer.
//!
//! This crate implements the [`BlockSource`] and [`ChainState`] ports from
//! `prism-core`, providing connectivity to Polymesh nodes via WebSocket RPC.
//!
//! # Features
//!
//! - Historical block fetch by height and finalized head subscription
//! - Per-runtime metadata, so blocks decode with the runtime that produced them
//! - SCALE to JSON conversion into ordered event parameters
//! - Runtime version (spec name, spec and transaction version) per block
//! - Live storage read-back at a given block
//!
//! # Usage
//!
//! ```ignore
//! use prism_substrate::{SubstrateClient, SubstrateClientConfig};
//!
//! let config = SubstrateClientConfig {
//!     ws_url: "ws://localhost:9944".to_string(),
//! };
//!
//! let client = SubstrateClient::connect(config).await?;
//! let genesis = client.genesis_hash().await?;
//! let block = client.block_at(1).await?;
//! ```
//!
//! [`BlockSource`]: prism_core::ports::BlockSource
//! [`ChainState`]: prism_core::ports::ChainState

mod client;
mod value;

pub use client::{SubstrateClient, SubstrateClientConfig};
