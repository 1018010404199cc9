//! Handler bundles for the prism indexer.
//!
//! Each bundle projects one business domain of the ledger into entities
//! and is self-contained with its own:
//!
//! - Event handlers (subscriptions by `(module, method)`)
//! - Models (projected entities)
//! - SQL migrations (relational views over its entity kinds)
//!
//! Runtime-dependent event layouts are resolved in [`compat`]; shared
//! parameter parsing lives in [`utils`].
//!
//! # Registering Bundles
//!
//! ```ignore
//! let mut registry = BundleRegistry::new();
//! for bundle in default_bundles(SweepConfig::default()) {
//!     registry.register(bundle);
//! }
//!
//! // Run all bundle migrations
//! registry.run_migrations(&pool).await?;
//!
//! // Get unified handler registry
//! let handlers = registry.into_handler_registry();
//! ```

pub mod asset;
pub mod bridge;
pub mod compat;
pub mod confidential;
pub mod identity;
pub mod multisig;
pub mod portfolio;
pub mod settlement;
pub mod staking;
pub mod statistics;
pub mod system;
pub mod utils;

mod bundle;
mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use bundle::HandlerBundle;
pub use registry::BundleRegistry;

pub use asset::AssetBundle;
pub use bridge::BridgeBundle;
pub use confidential::ConfidentialBundle;
pub use identity::IdentityBundle;
pub use multisig::{MultiSigBundle, SweepConfig};
pub use portfolio::PortfolioBundle;
pub use settlement::SettlementBundle;
pub use staking::StakingBundle;
pub use statistics::StatisticsBundle;
pub use system::SystemBundle;

/// Every bundle of the ledger, in registration order.
pub fn default_bundles(sweep: SweepConfig) -> Vec<Box<dyn HandlerBundle>> {
    vec![
        Box::new(SystemBundle),
        Box::new(IdentityBundle),
        Box::new(AssetBundle),
        Box::new(PortfolioBundle),
        Box::new(StatisticsBundle),
        Box::new(SettlementBundle),
        Box::new(MultiSigBundle::new(sweep)),
        Box::new(StakingBundle),
        Box::new(BridgeBundle),
        Box::new(ConfidentialBundle),
    ]
}
