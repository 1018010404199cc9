//! Staking bundle: bonding, rewards and slashes as an append-only log.

mod handler;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use prism_core::ports::EventHandler;
use prism_core::projection::{Provenance, amount};

use crate::HandlerBundle;

pub use handler::StakingHandler;

/// One staking event (`block/eventIdx`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingEvent {
    pub id: String,
    /// Event name (`Bonded`, `Unbonded`, `Withdrawn`, `Reward`, `Slash`, ...).
    pub event_id: String,
    pub identity_id: Option<String>,
    pub stash_account: String,
    #[serde(with = "amount")]
    pub amount: u128,
    pub datetime: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(StakingEvent, "StakingEvent");

pub const MIGRATIONS: &[&str] = &[r#"
CREATE OR REPLACE VIEW staking_events AS
SELECT
    id,
    data->>'eventId'                  AS event_id,
    data->>'identityId'               AS identity_id,
    data->>'stashAccount'             AS stash_account,
    (data->>'amount')::NUMERIC(39, 0) AS amount,
    (data->>'datetime')::TIMESTAMPTZ  AS datetime,
    created_block
FROM entities
WHERE kind = 'StakingEvent';
"#];

pub struct StakingBundle;

impl HandlerBundle for StakingBundle {
    fn name(&self) -> &'static str {
        "staking"
    }

    fn handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![Arc::new(StakingHandler)]
    }

    fn migrations(&self) -> &'static [&'static str] {
        MIGRATIONS
    }

    fn entity_kinds(&self) -> &'static [&'static str] {
        &["StakingEvent"]
    }
}
