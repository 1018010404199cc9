//! Bridge bundle: POLYX bridged in from the Ethereum side.

mod handler;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use prism_core::ports::EventHandler;
use prism_core::projection::{Provenance, amount};

use crate::HandlerBundle;

pub use handler::BridgeHandler;

/// One bridge transfer (`block/eventIdx`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeEvent {
    pub id: String,
    pub identity_id: String,
    pub recipient: String,
    #[serde(with = "amount")]
    pub amount: u128,
    pub nonce: u64,
    pub tx_hash: String,
    pub datetime: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(BridgeEvent, "BridgeEvent");

pub const MIGRATIONS: &[&str] = &[r#"
CREATE OR REPLACE VIEW bridge_events AS
SELECT
    id,
    data->>'identityId'               AS identity_id,
    data->>'recipient'                AS recipient,
    (data->>'amount')::NUMERIC(39, 0) AS amount,
    (data->>'nonce')::BIGINT          AS nonce,
    data->>'txHash'                   AS tx_hash,
    (data->>'datetime')::TIMESTAMPTZ  AS datetime,
    created_block
FROM entities
WHERE kind = 'BridgeEvent';
"#];

pub struct BridgeBundle;

impl HandlerBundle for BridgeBundle {
    fn name(&self) -> &'static str {
        "bridge"
    }

    fn handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![Arc::new(BridgeHandler)]
    }

    fn migrations(&self) -> &'static [&'static str] {
        MIGRATIONS
    }

    fn entity_kinds(&self) -> &'static [&'static str] {
        &["BridgeEvent"]
    }
}
