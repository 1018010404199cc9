//! Statistics bundle: stat types, transfer conditions and exemptions.

mod handler;
pub mod keys;
pub mod models;

use std::sync::Arc;

use prism_core::ports::EventHandler;

use crate::HandlerBundle;

pub use handler::StatisticsHandler;
pub use models::{StatType, TransferCompliance, TransferComplianceExemption};

pub const MIGRATIONS: &[&str] = &[r#"
CREATE OR REPLACE VIEW stat_types AS
SELECT
    id,
    data->>'assetId'       AS asset_id,
    data->>'opType'        AS op_type,
    data->>'claimType'     AS claim_type,
    data->>'claimIssuerId' AS claim_issuer_id
FROM entities
WHERE kind = 'StatType';

CREATE OR REPLACE VIEW transfer_compliances AS
SELECT
    id,
    data->>'assetId'        AS asset_id,
    data->>'conditionType'  AS condition_type,
    data->>'claimType'      AS claim_type,
    data->>'claimValue'     AS claim_value,
    data->>'claimIssuerId'  AS claim_issuer_id,
    (data->>'value')::BIGINT AS value,
    (data->>'min')::BIGINT  AS min,
    (data->>'max')::BIGINT  AS max
FROM entities
WHERE kind = 'TransferCompliance';
"#];

pub struct StatisticsBundle;

impl HandlerBundle for StatisticsBundle {
    fn name(&self) -> &'static str {
        "statistics"
    }

    fn handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![Arc::new(StatisticsHandler)]
    }

    fn migrations(&self) -> &'static [&'static str] {
        MIGRATIONS
    }

    fn entity_kinds(&self) -> &'static [&'static str] {
        &["StatType", "TransferCompliance", "TransferComplianceExemption"]
    }
}
