//! Block-start handler recording runtime versions.

use async_trait::async_trait;
use tracing::info;

use prism_core::error::DomainResult;
use prism_core::ports::{BlockContext, EventContext, EventHandler, EventKey};
use prism_core::projection::Provenance;

use super::models::RuntimeVersion;
use crate::compat;

/// Refuses unsupported runtimes and keeps one row per spec version.
pub struct SystemHandler;

#[async_trait]
impl EventHandler for SystemHandler {
    fn name(&self) -> &'static str {
        "system"
    }

    fn subscriptions(&self) -> &'static [EventKey] {
        &[]
    }

    async fn handle_event(&self, _ctx: &EventContext<'_>) -> DomainResult<()> {
        Ok(())
    }

    async fn on_block_start(&self, ctx: &BlockContext<'_>) -> DomainResult<()> {
        let runtime = &ctx.block.runtime;
        let features = compat::resolve_runtime(runtime)?;

        let id = runtime.spec_version.to_string();
        if ctx.changes.exists::<RuntimeVersion>(&id).await? {
            return Ok(());
        }

        info!(
            spec_name = %runtime.spec_name,
            spec_version = runtime.spec_version,
            band = ?features.band,
            block = ctx.block.number,
            "🆕 New runtime version"
        );
        ctx.changes.save(&mut RuntimeVersion {
            id,
            spec_name: runtime.spec_name.clone(),
            spec_version: runtime.spec_version,
            transaction_version: runtime.transaction_version,
            first_block: ctx.block.number,
            provenance: Provenance::at(ctx.block.number),
        })
    }

    fn priority(&self) -> i32 {
        100
    }
}
