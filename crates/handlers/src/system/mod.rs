//! System bundle: runtime version rows.

mod handler;
pub mod models;

use std::sync::Arc;

use prism_core::ports::EventHandler;

use crate::HandlerBundle;

pub use handler::SystemHandler;
pub use models::RuntimeVersion;

pub const MIGRATIONS: &[&str] = &[r#"
CREATE OR REPLACE VIEW runtime_versions AS
SELECT
    (data->>'specVersion')::INTEGER        AS spec_version,
    data->>'specName'                      AS spec_name,
    (data->>'transactionVersion')::INTEGER AS transaction_version,
    (data->>'firstBlock')::BIGINT          AS first_block
FROM entities
WHERE kind = 'RuntimeVersion';
"#];

pub struct SystemBundle;

impl HandlerBundle for SystemBundle {
    fn name(&self) -> &'static str {
        "system"
    }

    fn handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![Arc::new(SystemHandler)]
    }

    fn migrations(&self) -> &'static [&'static str] {
        MIGRATIONS
    }

    fn priority(&self) -> i32 {
        100
    }

    fn entity_kinds(&self) -> &'static [&'static str] {
        &["RuntimeVersion"]
    }
}
