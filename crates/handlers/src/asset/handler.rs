//! Handler for the Asset pallet.
//!
//! # Supported Events
//!
//! - `AssetCreated`: layout depends on the runtime band
//! - `Issued`, `Redeemed`, `Transfer`, `ControllerTransfer` (up to V6_1)
//! - `AssetBalanceUpdated` (V7), which replaces the four above
//! - `AssetFrozen` / `AssetUnfrozen`, `AssetRenamed`, `FundingRoundSet`,
//!   `DivisibilityChanged`, `AssetOwnershipTransferred`, `TickerLinkedToAsset`

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use prism_core::error::{DomainError, DomainResult};
use prism_core::ports::{EventContext, EventHandler, EventKey};
use prism_core::projection::{BlockChangeSet, Provenance};

use super::models::{Asset, AssetHolder, AssetTransaction};
use crate::compat::{self, AssetCreatedLayout, AssetRef, Features};
use crate::utils::{
    PortfolioRef, decode_error, opt_param, param, param_value, parse_amount, parse_bool,
    parse_did, parse_portfolio, parse_text, parse_ticker, parse_variant, parse_variant_name,
};

// =============================================================================
// Decoding
// =============================================================================

/// `AssetCreated`, whatever its layout.
#[derive(Debug, Clone)]
struct AssetCreated {
    owner: String,
    asset: AssetRef,
    divisible: bool,
    asset_type: String,
    name: Option<String>,
    funding_round: Option<String>,
    uniqueness_required: bool,
}

/// A balance movement.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Movement {
    Issue { to: PortfolioRef },
    Redeem { from: PortfolioRef },
    Transfer { from: PortfolioRef, to: PortfolioRef },
}

impl Movement {
    fn from_portfolio(&self) -> Option<&PortfolioRef> {
        match self {
            Self::Redeem { from } | Self::Transfer { from, .. } => Some(from),
            Self::Issue { .. } => None,
        }
    }

    fn to_portfolio(&self) -> Option<&PortfolioRef> {
        match self {
            Self::Issue { to } | Self::Transfer { to, .. } => Some(to),
            Self::Redeem { .. } => None,
        }
    }
}

fn asset_param(ctx: &EventContext<'_>, features: &Features, index: usize) -> DomainResult<AssetRef> {
    let value = param_value(ctx.event, index, "asset")?;
    features
        .parse_asset(value)
        .ok_or_else(|| decode_error(ctx.event, format!("parameter {index} (asset) is not an asset: {value}")))
}

/// `{"Custom": id}` and other struct variants collapse to their name.
fn parse_asset_type(value: &Value) -> Option<String> {
    parse_variant_name(value)
}

// =============================================================================
// Handler
// =============================================================================

pub struct AssetHandler;

impl AssetHandler {
    async fn decode_created(&self, ctx: &EventContext<'_>, features: &Features) -> DomainResult<AssetCreated> {
        let event = ctx.event;
        let mut created = AssetCreated {
            owner: param(event, 0, "did", parse_did)?,
            asset: asset_param(ctx, features, 1)?,
            divisible: param(event, 2, "divisible", parse_bool)?,
            asset_type: param(event, 3, "asset_type", parse_asset_type)?,
            name: None,
            funding_round: None,
            uniqueness_required: false,
        };

        match features.asset_created {
            AssetCreatedLayout::NamesFromChainState => {
                created.uniqueness_required = !param(event, 5, "disable_iu", parse_bool)?;
                let key = param_value(event, 1, "ticker")?.clone();
                created.name = self.read_text(ctx, "AssetNames", key.clone()).await?;
                created.funding_round = self.read_text(ctx, "FundingRound", key).await?;
            }
            AssetCreatedLayout::NamedWithUniqueness => {
                created.name = opt_param(event, 5, "name", parse_text)?;
                created.funding_round = opt_param(event, 7, "funding_round", parse_text)?;
                created.uniqueness_required = !param(event, 8, "disable_iu", parse_bool)?;
            }
            AssetCreatedLayout::Named => {
                created.name = opt_param(event, 5, "name", parse_text)?;
                created.funding_round = opt_param(event, 7, "funding_round", parse_text)?;
            }
            AssetCreatedLayout::NativeId => {
                created.name = opt_param(event, 5, "name", parse_text)?;
                created.funding_round = opt_param(event, 7, "funding_round", parse_text)?;
                let key = json!(created.asset.id);
                let ticker = ctx
                    .block
                    .chain
                    .storage_value("Asset", "AssetIdTicker", vec![key], Some(ctx.block.block.hash.clone()))
                    .await?;
                created.asset.ticker = ticker.as_ref().and_then(parse_ticker);
            }
        }

        Ok(created)
    }

    async fn read_text(&self, ctx: &EventContext<'_>, entry: &str, key: Value) -> DomainResult<Option<String>> {
        let value = ctx
            .block
            .chain
            .storage_value("Asset", entry, vec![key], Some(ctx.block.block.hash.clone()))
            .await?;
        Ok(value.as_ref().and_then(parse_text).filter(|t| !t.is_empty()))
    }

    async fn asset_created(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let features = compat::for_event(ctx)?;
        let created = self.decode_created(ctx, &features).await?;
        let id = created.asset.id.clone();

        let changes = ctx.changes();
        let _guard = changes.lock_entity::<Asset>(&id).await;
        let mut asset = changes
            .get_or_create(&id, || Asset {
                id: id.clone(),
                ticker: None,
                name: None,
                owner_id: created.owner.clone(),
                asset_type: created.asset_type.clone(),
                is_divisible: false,
                is_frozen: false,
                is_uniqueness_required: false,
                funding_round: None,
                total_supply: 0,
                total_transfers: 0,
                provenance: Provenance::at(ctx.block_number()),
            })
            .await?;

        asset.ticker = created.asset.ticker.or(asset.ticker);
        asset.name = created.name;
        asset.owner_id = created.owner;
        asset.asset_type = created.asset_type;
        asset.is_divisible = created.divisible;
        asset.is_uniqueness_required = created.uniqueness_required;
        asset.funding_round = created.funding_round;

        debug!(asset = %id, ticker = ?asset.ticker, "Asset created");
        changes.save(&mut asset)
    }

    /// Apply a balance movement to supply, holders and the transaction log.
    ///
    /// Holder rows of an asset are only touched under the asset's lock.
    async fn movement(
        &self,
        ctx: &EventContext<'_>,
        asset_id: &str,
        movement: Movement,
        amount: u128,
        event_id: &str,
        funding_round: Option<String>,
    ) -> DomainResult<()> {
        let changes = ctx.changes();
        let _guard = changes.lock_entity::<Asset>(asset_id).await;
        let mut asset = changes.require::<Asset>(asset_id).await?;

        match &movement {
            Movement::Issue { to } => {
                asset.total_supply = asset.total_supply.checked_add(amount).ok_or_else(|| {
                    DomainError::Reconciliation(format!("supply of {asset_id} overflows"))
                })?;
                credit(changes, asset_id, &to.did, amount).await?;
            }
            Movement::Redeem { from } => {
                asset.total_supply = asset.total_supply.checked_sub(amount).ok_or_else(|| {
                    DomainError::Reconciliation(format!(
                        "redeeming {amount} exceeds supply {} of {asset_id}",
                        asset.total_supply
                    ))
                })?;
                debit(changes, asset_id, &from.did, amount).await?;
            }
            Movement::Transfer { from, to } => {
                debit(changes, asset_id, &from.did, amount).await?;
                credit(changes, asset_id, &to.did, amount).await?;
                asset.total_transfers += 1;
            }
        }
        changes.save(&mut asset)?;

        changes.save(&mut AssetTransaction {
            id: ctx.event_id(),
            asset_id: asset_id.to_string(),
            event_id: event_id.to_string(),
            amount,
            from_portfolio_id: movement.from_portfolio().map(PortfolioRef::id),
            to_portfolio_id: movement.to_portfolio().map(PortfolioRef::id),
            funding_round,
            extrinsic_index: ctx.event.extrinsic_index,
            provenance: Provenance::at(ctx.block_number()),
        })
    }

    async fn balance_updated(&self, ctx: &EventContext<'_>, features: &Features) -> DomainResult<()> {
        let event = ctx.event;
        let asset = asset_param(ctx, features, 1)?;
        let amount = param(event, 2, "amount", parse_amount)?;
        let from = opt_param(event, 3, "from_portfolio", parse_portfolio)?;
        let to = opt_param(event, 4, "to_portfolio", parse_portfolio)?;
        let reason = param_value(event, 5, "reason")?;

        let (name, _) = parse_variant(reason)
            .ok_or_else(|| decode_error(event, format!("unknown balance update reason: {reason}")))?;
        let (movement, event_id) = match (name, from, to) {
            ("Issue", None, Some(to)) => (Movement::Issue { to }, "Issued"),
            ("Redeem", Some(from), None) => (Movement::Redeem { from }, "Redeemed"),
            ("Transfer", Some(from), Some(to)) => (Movement::Transfer { from, to }, "Transfer"),
            ("ControllerTransfer", Some(from), Some(to)) => {
                (Movement::Transfer { from, to }, "ControllerTransfer")
            }
            (name, from, to) => {
                return Err(decode_error(
                    event,
                    format!("reason {name} with from={from:?} to={to:?}"),
                ));
            }
        };

        self.movement(ctx, &asset.id, movement, amount, event_id, None).await
    }

    async fn update(
        &self,
        ctx: &EventContext<'_>,
        asset_id: &str,
        apply: impl FnOnce(&mut Asset) + Send,
    ) -> DomainResult<()> {
        let changes = ctx.changes();
        let _guard = changes.lock_entity::<Asset>(asset_id).await;
        let mut asset = changes.require::<Asset>(asset_id).await?;
        apply(&mut asset);
        changes.save(&mut asset)
    }
}

async fn credit(changes: &BlockChangeSet, asset_id: &str, did: &str, amount: u128) -> DomainResult<()> {
    let id = AssetHolder::id_for(asset_id, did);
    let mut holder = changes
        .get_or_create(&id, || AssetHolder::new(asset_id, did, changes.block_number()))
        .await?;
    holder.amount = holder
        .amount
        .checked_add(amount)
        .ok_or_else(|| DomainError::Reconciliation(format!("balance of {id} overflows")))?;
    changes.save(&mut holder)
}

async fn debit(changes: &BlockChangeSet, asset_id: &str, did: &str, amount: u128) -> DomainResult<()> {
    let id = AssetHolder::id_for(asset_id, did);
    let mut holder = changes.require::<AssetHolder>(&id).await?;
    holder.amount = holder.amount.checked_sub(amount).ok_or_else(|| {
        DomainError::Reconciliation(format!("debit of {amount} exceeds balance {} of {id}", holder.amount))
    })?;
    changes.save(&mut holder)
}

#[async_trait]
impl EventHandler for AssetHandler {
    fn name(&self) -> &'static str {
        "asset"
    }

    fn subscriptions(&self) -> &'static [EventKey] {
        &[
            ("Asset", "AssetCreated"),
            ("Asset", "Issued"),
            ("Asset", "Redeemed"),
            ("Asset", "Transfer"),
            ("Asset", "ControllerTransfer"),
            ("Asset", "AssetBalanceUpdated"),
            ("Asset", "AssetFrozen"),
            ("Asset", "AssetUnfrozen"),
            ("Asset", "AssetRenamed"),
            ("Asset", "FundingRoundSet"),
            ("Asset", "DivisibilityChanged"),
            ("Asset", "AssetOwnershipTransferred"),
            ("Asset", "TickerLinkedToAsset"),
        ]
    }

    async fn handle_event(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        if event.method == "AssetCreated" {
            return self.asset_created(ctx).await;
        }

        let features = compat::for_event(ctx)?;
        match event.method.as_str() {
            "Issued" => {
                let asset = asset_param(ctx, &features, 1)?;
                let to = param(event, 2, "beneficiary", parse_portfolio)?;
                let amount = param(event, 3, "amount", parse_amount)?;
                let funding_round = opt_param(event, 4, "funding_round", parse_text)?;
                self.movement(ctx, &asset.id, Movement::Issue { to }, amount, "Issued", funding_round)
                    .await
            }
            "Redeemed" => {
                let asset = asset_param(ctx, &features, 1)?;
                let from = param(event, 2, "holder", parse_portfolio)?;
                let amount = param(event, 3, "amount", parse_amount)?;
                self.movement(ctx, &asset.id, Movement::Redeem { from }, amount, "Redeemed", None)
                    .await
            }
            "Transfer" => {
                let asset = asset_param(ctx, &features, 1)?;
                let from = param(event, 2, "from_portfolio", parse_portfolio)?;
                let to = param(event, 3, "to_portfolio", parse_portfolio)?;
                let amount = param(event, 4, "amount", parse_amount)?;
                self.movement(ctx, &asset.id, Movement::Transfer { from, to }, amount, "Transfer", None)
                    .await
            }
            "ControllerTransfer" => {
                let controller = param(event, 0, "did", parse_did)?;
                let asset = asset_param(ctx, &features, 1)?;
                let from = param(event, 2, "from_portfolio", parse_portfolio)?;
                let amount = param(event, 3, "amount", parse_amount)?;
                let to = PortfolioRef { did: controller, number: 0 };
                self.movement(ctx, &asset.id, Movement::Transfer { from, to }, amount, "ControllerTransfer", None)
                    .await
            }
            "AssetBalanceUpdated" => self.balance_updated(ctx, &features).await,
            "AssetFrozen" | "AssetUnfrozen" => {
                let asset = asset_param(ctx, &features, 1)?;
                let frozen = event.method == "AssetFrozen";
                self.update(ctx, &asset.id, |a| a.is_frozen = frozen).await
            }
            "AssetRenamed" => {
                let asset = asset_param(ctx, &features, 1)?;
                let name = param(event, 2, "name", parse_text)?;
                self.update(ctx, &asset.id, |a| a.name = Some(name)).await
            }
            "FundingRoundSet" => {
                let asset = asset_param(ctx, &features, 1)?;
                let round = param(event, 2, "name", parse_text)?;
                self.update(ctx, &asset.id, |a| a.funding_round = Some(round)).await
            }
            "DivisibilityChanged" => {
                let asset = asset_param(ctx, &features, 1)?;
                let divisible = param(event, 2, "divisible", parse_bool)?;
                self.update(ctx, &asset.id, |a| a.is_divisible = divisible).await
            }
            "AssetOwnershipTransferred" => {
                let owner = param(event, 0, "did", parse_did)?;
                let asset = asset_param(ctx, &features, 1)?;
                self.update(ctx, &asset.id, |a| a.owner_id = owner).await
            }
            "TickerLinkedToAsset" => {
                let ticker = param(event, 1, "ticker", parse_ticker)?;
                let asset = asset_param(ctx, &features, 2)?;
                self.update(ctx, &asset.id, |a| a.ticker = Some(ticker)).await
            }
            _ => Ok(()),
        }
    }
}
