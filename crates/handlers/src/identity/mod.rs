//! Identity bundle: DIDs, claims and custom claim types.

mod handler;
pub mod models;

use std::sync::Arc;

use prism_core::ports::EventHandler;

use crate::HandlerBundle;

pub use handler::IdentityHandler;
pub use models::{Claim, CustomClaimType, Identity, Scope};

pub const MIGRATIONS: &[&str] = &[r#"
CREATE OR REPLACE VIEW identities AS
SELECT id AS did, data->>'primaryAccount' AS primary_account, created_block, updated_block
FROM entities
WHERE kind = 'Identity';

CREATE OR REPLACE VIEW claims AS
SELECT
    id,
    data->>'targetId'              AS target_id,
    data->>'issuerId'              AS issuer_id,
    data->>'claimType'             AS claim_type,
    data->'scope'->>'type'         AS scope_type,
    data->'scope'->>'value'        AS scope_value,
    data->>'jurisdiction'          AS jurisdiction,
    (data->>'expiry')::BIGINT      AS expiry,
    (data->>'revokedAt')::BIGINT   AS revoked_at,
    created_block,
    updated_block
FROM entities
WHERE kind = 'Claim';
"#];

pub struct IdentityBundle;

impl HandlerBundle for IdentityBundle {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![Arc::new(IdentityHandler)]
    }

    fn migrations(&self) -> &'static [&'static str] {
        MIGRATIONS
    }

    fn entity_kinds(&self) -> &'static [&'static str] {
        &["Identity", "Claim", "CustomClaimType"]
    }
}
