use serde::{Deserialize, Serialize};

use prism_core::projection::{Provenance, amount};

/// Confidential asset. Supply is public even though balances are not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidentialAsset {
    /// Asset id as `0x` hex.
    pub id: String,
    pub creator_id: String,
    #[serde(default)]
    pub auditors: Vec<String>,
    #[serde(default)]
    pub mediators: Vec<String>,
    #[serde(with = "amount")]
    pub total_supply: u128,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(ConfidentialAsset, "ConfidentialAsset");

/// Elgamal public key registered as a confidential account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidentialAccount {
    /// Account key as `0x` hex.
    pub id: String,
    pub creator_id: String,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(ConfidentialAccount, "ConfidentialAccount");

/// Supply change of a confidential asset (`block/eventIdx`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidentialAssetHistory {
    pub id: String,
    pub asset_id: String,
    pub event_id: String,
    pub identity_id: String,
    #[serde(with = "amount")]
    pub amount: u128,
    #[serde(with = "amount")]
    pub total_supply: u128,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(ConfidentialAssetHistory, "ConfidentialAssetHistory");
