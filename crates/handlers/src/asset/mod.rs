//! Asset bundle: security tokens, holder balances and the movement log.
//!
//! # Database Views
//!
//! - `assets` - One row per token
//! - `asset_holders` - Balance per (asset, identity)
//! - `asset_transactions` - Issuances, redemptions and transfers

mod handler;
pub mod models;

use std::sync::Arc;

use prism_core::ports::EventHandler;

use crate::HandlerBundle;

pub use handler::AssetHandler;
pub use models::{Asset, AssetHolder, AssetTransaction};

pub const MIGRATIONS: &[&str] = &[r#"
CREATE OR REPLACE VIEW assets AS
SELECT
    id,
    data->>'ticker'                        AS ticker,
    data->>'name'                          AS name,
    data->>'ownerId'                       AS owner_id,
    data->>'assetType'                     AS asset_type,
    (data->>'isDivisible')::BOOLEAN        AS is_divisible,
    (data->>'isFrozen')::BOOLEAN           AS is_frozen,
    data->>'fundingRound'                  AS funding_round,
    (data->>'totalSupply')::NUMERIC(39, 0) AS total_supply,
    (data->>'totalTransfers')::BIGINT      AS total_transfers,
    created_block,
    updated_block
FROM entities
WHERE kind = 'Asset';

CREATE OR REPLACE VIEW asset_holders AS
SELECT
    data->>'assetId'                  AS asset_id,
    data->>'identityId'               AS identity_id,
    (data->>'amount')::NUMERIC(39, 0) AS amount,
    updated_block
FROM entities
WHERE kind = 'AssetHolder';

CREATE OR REPLACE VIEW asset_transactions AS
SELECT
    id,
    data->>'assetId'                  AS asset_id,
    data->>'eventId'                  AS event_id,
    (data->>'amount')::NUMERIC(39, 0) AS amount,
    data->>'fromPortfolioId'          AS from_portfolio_id,
    data->>'toPortfolioId'            AS to_portfolio_id,
    created_block                     AS block_number
FROM entities
WHERE kind = 'AssetTransaction';
"#];

pub struct AssetBundle;

impl HandlerBundle for AssetBundle {
    fn name(&self) -> &'static str {
        "asset"
    }

    fn handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![Arc::new(AssetHandler)]
    }

    fn migrations(&self) -> &'static [&'static str] {
        MIGRATIONS
    }

    fn entity_kinds(&self) -> &'static [&'static str] {
        &["Asset", "AssetHolder", "AssetTransaction"]
    }
}
