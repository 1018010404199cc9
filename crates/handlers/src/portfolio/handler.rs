//! Handler for the Portfolio pallet.
//!
//! # Supported Events
//!
//! - `Portfolio.PortfolioCreated` / `PortfolioRenamed` / `PortfolioDeleted`
//! - `Portfolio.PortfolioCustodianChanged`
//! - `Identity.DidCreated`: every identity owns a default portfolio

use async_trait::async_trait;
use tracing::debug;

use prism_core::error::DomainResult;
use prism_core::ports::{EventContext, EventHandler, EventKey};
use prism_core::projection::BlockChangeSet;

use super::models::Portfolio;
use crate::utils::{PortfolioRef, param, parse_did, parse_portfolio, parse_text, parse_u64};

/// Existing portfolio, or a freshly saved one.
///
/// The chain never announces default portfolios, and older runtimes let
/// settlement legs name user portfolios no event created.
pub async fn ensure_portfolio(
    changes: &BlockChangeSet,
    portfolio: &PortfolioRef,
) -> DomainResult<Portfolio> {
    let id = portfolio.id();
    let _guard = changes.lock_entity::<Portfolio>(&id).await;
    if let Some(existing) = changes.get::<Portfolio>(&id).await? {
        return Ok(existing);
    }

    debug!(portfolio = %id, "Creating portfolio on demand");
    let mut created = Portfolio::new(portfolio, changes.block_number());
    changes.save(&mut created)?;
    Ok(created)
}

pub struct PortfolioHandler;

impl PortfolioHandler {
    async fn created(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        let portfolio = PortfolioRef {
            did: param(event, 0, "did", parse_did)?,
            number: param(event, 1, "number", parse_u64)?,
        };
        let name = param(event, 2, "name", parse_text)?;

        let changes = ctx.changes();
        let id = portfolio.id();
        let _guard = changes.lock_entity::<Portfolio>(&id).await;
        let mut row = changes
            .get_or_create(&id, || Portfolio::new(&portfolio, ctx.block_number()))
            .await?;
        row.name = Some(name);
        row.deleted_at = None;
        changes.save(&mut row)
    }

    async fn update(
        &self,
        ctx: &EventContext<'_>,
        portfolio: PortfolioRef,
        apply: impl FnOnce(&mut Portfolio) + Send,
    ) -> DomainResult<()> {
        let changes = ctx.changes();
        ensure_portfolio(changes, &portfolio).await?;

        let id = portfolio.id();
        let _guard = changes.lock_entity::<Portfolio>(&id).await;
        let mut row = changes.require::<Portfolio>(&id).await?;
        apply(&mut row);
        changes.save(&mut row)
    }
}

#[async_trait]
impl EventHandler for PortfolioHandler {
    fn name(&self) -> &'static str {
        "portfolio"
    }

    fn subscriptions(&self) -> &'static [EventKey] {
        &[
            ("Portfolio", "PortfolioCreated"),
            ("Portfolio", "PortfolioDeleted"),
            ("Portfolio", "PortfolioRenamed"),
            ("Portfolio", "PortfolioCustodianChanged"),
            ("Identity", "DidCreated"),
        ]
    }

    async fn handle_event(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        match (event.module.as_str(), event.method.as_str()) {
            ("Portfolio", "PortfolioCreated") => self.created(ctx).await,
            ("Portfolio", "PortfolioDeleted") => {
                let portfolio = PortfolioRef {
                    did: param(event, 0, "did", parse_did)?,
                    number: param(event, 1, "number", parse_u64)?,
                };
                let block = ctx.block_number();
                self.update(ctx, portfolio, |p| p.deleted_at = Some(block)).await
            }
            ("Portfolio", "PortfolioRenamed") => {
                let portfolio = PortfolioRef {
                    did: param(event, 0, "did", parse_did)?,
                    number: param(event, 1, "number", parse_u64)?,
                };
                let name = param(event, 2, "name", parse_text)?;
                self.update(ctx, portfolio, |p| p.name = Some(name)).await
            }
            ("Portfolio", "PortfolioCustodianChanged") => {
                let portfolio = param(event, 1, "portfolio", parse_portfolio)?;
                let custodian = param(event, 2, "custodian", parse_did)?;
                self.update(ctx, portfolio, |p| {
                    p.custodian_id = (custodian != p.identity_id).then_some(custodian);
                })
                .await
            }
            ("Identity", "DidCreated") => {
                let did = param(event, 0, "did", parse_did)?;
                ensure_portfolio(ctx.changes(), &PortfolioRef { did, number: 0 }).await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    use crate::testing::{Harness, account, did, ev, portfolio};

    fn harness() -> Harness {
        Harness::new(vec![Arc::new(PortfolioHandler)])
    }

    #[tokio::test]
    async fn test_did_created_opens_default_portfolio() {
        let mut h = harness();
        h.run(vec![ev("Identity", "DidCreated", vec![json!(did(1)), json!(account(9)), json!([])])])
            .await
            .unwrap();

        let default: Portfolio = h.get(&format!("{}/0", did(1))).unwrap();
        assert_eq!(default.name.as_deref(), Some("default"));
        assert_eq!(default.identity_id, did(1));
    }

    #[tokio::test]
    async fn test_portfolio_lifecycle() {
        let mut h = harness();
        let id = format!("{}/3", did(1));
        h.run(vec![ev(
            "Portfolio",
            "PortfolioCreated",
            vec![json!(did(1)), json!(3), json!("Trading")],
        )])
        .await
        .unwrap();
        h.run(vec![
            ev("Portfolio", "PortfolioRenamed", vec![json!(did(1)), json!(3), json!("Treasury")]),
            ev(
                "Portfolio",
                "PortfolioCustodianChanged",
                vec![json!(did(1)), portfolio(&did(1), 3), json!(did(2))],
            ),
        ])
        .await
        .unwrap();

        let p: Portfolio = h.get(&id).unwrap();
        assert_eq!(p.name.as_deref(), Some("Treasury"));
        assert_eq!(p.custodian_id, Some(did(2)));
        assert_eq!(p.provenance.created_block_id, 1);
        assert_eq!(p.provenance.updated_block_id, 2);

        h.run(vec![ev("Portfolio", "PortfolioDeleted", vec![json!(did(1)), json!(3)])])
            .await
            .unwrap();
        assert_eq!(h.get::<Portfolio>(&id).unwrap().deleted_at, Some(3));
    }

    // Test critique: un custodian rendu au propriétaire efface le champ
    #[tokio::test]
    async fn test_custodian_back_to_owner_clears_field() {
        let mut h = harness();
        let default = portfolio(&did(1), 0);
        h.run(vec![
            ev("Portfolio", "PortfolioCustodianChanged", vec![json!(did(1)), default.clone(), json!(did(2))]),
            ev("Portfolio", "PortfolioCustodianChanged", vec![json!(did(1)), default, json!(did(1))]),
        ])
        .await
        .unwrap();

        let p: Portfolio = h.get(&format!("{}/0", did(1))).unwrap();
        assert_eq!(p.custodian_id, None);
    }
}
