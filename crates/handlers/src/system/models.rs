//! Models for runtime tracking.

use serde::{Deserialize, Serialize};

use prism_core::projection::Provenance;

/// A runtime spec version seen by the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeVersion {
    /// Spec version as a decimal string.
    pub id: String,
    pub spec_name: String,
    pub spec_version: u32,
    pub transaction_version: u32,
    /// First block indexed with this runtime.
    pub first_block: u64,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(RuntimeVersion, "RuntimeVersion");
