//! Settlement bundle: venues, instructions, legs and affirmations.
//!
//! # Database Views
//!
//! - `venues`
//! - `instructions` - Status, settlement type and pending affirmation count
//! - `legs` - One row per `(instruction, leg index)`
//! - `instruction_parties`, `instruction_affirmations`
//! - `instruction_events` - Audit trail, one row per lifecycle event

mod handler;
pub mod legs;
pub mod models;

use std::sync::Arc;

use prism_core::ports::EventHandler;

use crate::HandlerBundle;

pub use handler::SettlementHandler;
pub use models::{
    AffirmationStatus, Instruction, InstructionAffirmation, InstructionEvent, InstructionParty,
    InstructionStatus, Leg, LegType, OffChainReceipt, Venue,
};

pub const MIGRATIONS: &[&str] = &[r#"
CREATE OR REPLACE VIEW venues AS
SELECT
    id,
    data->>'ownerId'   AS owner_id,
    data->>'details'   AS details,
    data->>'venueType' AS venue_type,
    created_block,
    updated_block
FROM entities
WHERE kind = 'Venue';

CREATE OR REPLACE VIEW instructions AS
SELECT
    id,
    data->>'venueId'                         AS venue_id,
    data->>'status'                          AS status,
    data->>'settlementType'                  AS settlement_type,
    (data->>'endBlock')::BIGINT              AS end_block,
    (data->>'tradeDate')::BIGINT             AS trade_date,
    (data->>'valueDate')::BIGINT             AS value_date,
    data->>'memo'                            AS memo,
    data->'mediators'                        AS mediators,
    (data->>'legCount')::INTEGER             AS leg_count,
    (data->>'pendingAffirmations')::INTEGER  AS pending_affirmations,
    data->>'createdBy'                       AS created_by,
    data->'failureReason'                    AS failure_reason,
    created_block,
    updated_block
FROM entities
WHERE kind = 'Instruction';

CREATE OR REPLACE VIEW legs AS
SELECT
    id,
    data->>'instructionId'            AS instruction_id,
    (data->>'legIndex')::INTEGER      AS leg_index,
    data->>'legType'                  AS leg_type,
    data->>'fromId'                   AS from_id,
    data->>'fromPortfolioId'          AS from_portfolio_id,
    data->>'toId'                     AS to_id,
    data->>'toPortfolioId'            AS to_portfolio_id,
    data->>'assetId'                  AS asset_id,
    data->>'ticker'                   AS ticker,
    (data->>'amount')::NUMERIC(39, 0) AS amount,
    data->'nftIds'                    AS nft_ids,
    data->'addresses'                 AS addresses,
    created_block,
    updated_block
FROM entities
WHERE kind = 'Leg';

CREATE OR REPLACE VIEW instruction_parties AS
SELECT
    id,
    data->>'instructionId'           AS instruction_id,
    data->>'identityId'              AS identity_id,
    (data->>'isMediator')::BOOLEAN   AS is_mediator,
    data->'portfolios'               AS portfolios
FROM entities
WHERE kind = 'InstructionParty';

CREATE OR REPLACE VIEW instruction_affirmations AS
SELECT
    id,
    data->>'instructionId'            AS instruction_id,
    data->>'identityId'               AS identity_id,
    (data->>'isMediator')::BOOLEAN    AS is_mediator,
    data->'portfolios'                AS portfolios,
    (data->>'isAutomatic')::BOOLEAN   AS is_automatic,
    data->>'status'                   AS status,
    (data->>'expiry')::BIGINT         AS expiry,
    data->>'offchainReceiptId'        AS offchain_receipt_id,
    created_block,
    updated_block
FROM entities
WHERE kind = 'InstructionAffirmation';

CREATE OR REPLACE VIEW instruction_events AS
SELECT
    id,
    data->>'instructionId' AS instruction_id,
    data->>'event'         AS event,
    data->>'identityId'    AS identity_id,
    data->>'portfolioId'   AS portfolio_id,
    created_block
FROM entities
WHERE kind = 'InstructionEvent';
"#];

pub struct SettlementBundle;

impl HandlerBundle for SettlementBundle {
    fn name(&self) -> &'static str {
        "settlement"
    }

    fn handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![Arc::new(SettlementHandler)]
    }

    fn migrations(&self) -> &'static [&'static str] {
        MIGRATIONS
    }

    fn entity_kinds(&self) -> &'static [&'static str] {
        &[
            "Venue",
            "Instruction",
            "Leg",
            "InstructionParty",
            "InstructionAffirmation",
            "InstructionEvent",
            "OffChainReceipt",
        ]
    }
}
