//! Confidential asset bundle.
//!
//! # Database Views
//!
//! - `confidential_assets` - Creator, auditors and public supply
//! - `confidential_accounts`
//! - `confidential_asset_history` - One row per issuance

mod handler;
pub mod models;

use std::sync::Arc;

use prism_core::ports::EventHandler;

use crate::HandlerBundle;

pub use handler::ConfidentialHandler;
pub use models::{ConfidentialAccount, ConfidentialAsset, ConfidentialAssetHistory};

pub const MIGRATIONS: &[&str] = &[r#"
CREATE OR REPLACE VIEW confidential_assets AS
SELECT
    id,
    data->>'creatorId'                     AS creator_id,
    data->'auditors'                       AS auditors,
    data->'mediators'                      AS mediators,
    (data->>'totalSupply')::NUMERIC(39, 0) AS total_supply,
    created_block,
    updated_block
FROM entities
WHERE kind = 'ConfidentialAsset';

CREATE OR REPLACE VIEW confidential_accounts AS
SELECT
    id,
    data->>'creatorId' AS creator_id,
    created_block
FROM entities
WHERE kind = 'ConfidentialAccount';

CREATE OR REPLACE VIEW confidential_asset_history AS
SELECT
    id,
    data->>'assetId'                       AS asset_id,
    data->>'eventId'                       AS event_id,
    data->>'identityId'                    AS identity_id,
    (data->>'amount')::NUMERIC(39, 0)      AS amount,
    (data->>'totalSupply')::NUMERIC(39, 0) AS total_supply,
    created_block
FROM entities
WHERE kind = 'ConfidentialAssetHistory';
"#];

pub struct ConfidentialBundle;

impl HandlerBundle for ConfidentialBundle {
    fn name(&self) -> &'static str {
        "confidential"
    }

    fn handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![Arc::new(ConfidentialHandler)]
    }

    fn migrations(&self) -> &'static [&'static str] {
        MIGRATIONS
    }

    fn entity_kinds(&self) -> &'static [&'static str] {
        &["ConfidentialAsset", "ConfidentialAccount", "ConfidentialAssetHistory"]
    }
}
