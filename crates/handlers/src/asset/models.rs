//! Models for security tokens.

use serde::{Deserialize, Serialize};

use prism_core::projection::{Provenance, amount, compose_id};

/// A security token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    /// Native id, or the id derived from the legacy ticker.
    pub id: String,
    pub ticker: Option<String>,
    pub name: Option<String>,
    pub owner_id: String,
    pub asset_type: String,
    pub is_divisible: bool,
    pub is_frozen: bool,
    pub is_uniqueness_required: bool,
    pub funding_round: Option<String>,
    #[serde(with = "amount")]
    pub total_supply: u128,
    pub total_transfers: u64,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(Asset, "Asset");

/// Balance of one identity in one asset (`asset/did`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetHolder {
    pub id: String,
    pub asset_id: String,
    pub identity_id: String,
    #[serde(with = "amount")]
    pub amount: u128,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(AssetHolder, "AssetHolder");

impl AssetHolder {
    pub fn id_for(asset_id: &str, did: &str) -> String {
        compose_id(&[asset_id, did])
    }

    pub fn new(asset_id: &str, did: &str, block: u64) -> Self {
        Self {
            id: Self::id_for(asset_id, did),
            asset_id: asset_id.to_string(),
            identity_id: did.to_string(),
            amount: 0,
            provenance: Provenance::at(block),
        }
    }
}

/// One balance movement (`block/eventIdx`), append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetTransaction {
    pub id: String,
    pub asset_id: String,
    /// `Issued`, `Redeemed`, `Transfer` or `ControllerTransfer`.
    pub event_id: String,
    #[serde(with = "amount")]
    pub amount: u128,
    pub from_portfolio_id: Option<String>,
    pub to_portfolio_id: Option<String>,
    pub funding_round: Option<String>,
    pub extrinsic_index: Option<u32>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(AssetTransaction, "AssetTransaction");
