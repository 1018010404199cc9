//! Portfolio bundle.

mod handler;
pub mod models;

use std::sync::Arc;

use prism_core::ports::EventHandler;

use crate::HandlerBundle;

pub use handler::{PortfolioHandler, ensure_portfolio};
pub use models::Portfolio;

pub const MIGRATIONS: &[&str] = &[r#"
CREATE OR REPLACE VIEW portfolios AS
SELECT
    id,
    data->>'identityId'           AS identity_id,
    (data->>'number')::BIGINT     AS number,
    data->>'name'                 AS name,
    data->>'custodianId'          AS custodian_id,
    (data->>'deletedAt')::BIGINT  AS deleted_at,
    created_block,
    updated_block
FROM entities
WHERE kind = 'Portfolio';
"#];

pub struct PortfolioBundle;

impl HandlerBundle for PortfolioBundle {
    fn name(&self) -> &'static str {
        "portfolio"
    }

    fn handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![Arc::new(PortfolioHandler)]
    }

    fn migrations(&self) -> &'static [&'static str] {
        MIGRATIONS
    }

    fn entity_kinds(&self) -> &'static [&'static str] {
        &["Portfolio"]
    }
}
