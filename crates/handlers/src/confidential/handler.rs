//! Handler for the ConfidentialAsset pallet.
//!
//! Only the public side is projected: asset creation with its auditors,
//! account registration and issuance with the resulting supply.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use prism_core::error::DomainResult;
use prism_core::ports::{EventContext, EventHandler, EventKey};
use prism_core::projection::Provenance;

use super::models::{ConfidentialAccount, ConfidentialAsset, ConfidentialAssetHistory};
use crate::compat::{self, ConfidentialAuditorsLayout};
use crate::utils::{decode_error, opt_param, param, parse_amount, parse_did, parse_hex};

const MODULE: &str = "ConfidentialAsset";

fn parse_keys(value: &Value) -> Option<Vec<String>> {
    value.as_array()?.iter().map(parse_hex).collect()
}

/// `[key, ...]`: auditors only.
fn parse_key_list(value: &Value) -> Option<(Vec<String>, Vec<String>)> {
    Some((parse_keys(value)?, Vec::new()))
}

/// `{auditors: [key, ...], mediators: [did, ...]}`; either list may be absent.
fn parse_auditors_and_mediators(value: &Value) -> Option<(Vec<String>, Vec<String>)> {
    let obj = value.as_object()?;
    let auditors = match obj.get("auditors") {
        Some(v) => parse_keys(v)?,
        None => Vec::new(),
    };
    let mediators = match obj.get("mediators") {
        Some(v) => v.as_array()?.iter().map(parse_did).collect::<Option<_>>()?,
        None => Vec::new(),
    };
    Some((auditors, mediators))
}

pub struct ConfidentialHandler;

impl ConfidentialHandler {
    async fn asset_created(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        let creator_id = param(event, 0, "did", parse_did)?;
        let id = param(event, 1, "asset_id", parse_hex)?;
        let parser: fn(&Value) -> Option<(Vec<String>, Vec<String>)> =
            match compat::for_event(ctx)?.confidential_auditors {
                ConfidentialAuditorsLayout::KeyList => parse_key_list,
                ConfidentialAuditorsLayout::AuditorsAndMediators => parse_auditors_and_mediators,
            };
        let (auditors, mediators) = opt_param(event, 2, "auditors", parser)?.unwrap_or_default();

        debug!(asset = %id, auditors = auditors.len(), "Confidential asset created");
        ctx.changes().save(&mut ConfidentialAsset {
            id,
            creator_id,
            auditors,
            mediators,
            total_supply: 0,
            provenance: Provenance::at(ctx.block_number()),
        })
    }

    async fn account_created(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        ctx.changes().save(&mut ConfidentialAccount {
            id: param(event, 1, "account", parse_hex)?,
            creator_id: param(event, 0, "did", parse_did)?,
            provenance: Provenance::at(ctx.block_number()),
        })
    }

    async fn issued(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        let identity_id = param(event, 0, "did", parse_did)?;
        let asset_id = param(event, 1, "asset_id", parse_hex)?;
        let amount = param(event, 2, "amount", parse_amount)?;
        let total_supply = param(event, 3, "total_supply", parse_amount)?;

        let changes = ctx.changes();
        let _guard = changes.lock_entity::<ConfidentialAsset>(&asset_id).await;
        let mut asset = changes.require::<ConfidentialAsset>(&asset_id).await?;
        asset.total_supply = total_supply;
        changes.save(&mut asset)?;

        changes.save(&mut ConfidentialAssetHistory {
            id: ctx.event_id(),
            asset_id,
            event_id: event.method.clone(),
            identity_id,
            amount,
            total_supply,
            provenance: Provenance::at(ctx.block_number()),
        })
    }
}

#[async_trait]
impl EventHandler for ConfidentialHandler {
    fn name(&self) -> &'static str {
        "confidential_asset"
    }

    fn subscriptions(&self) -> &'static [EventKey] {
        &[
            (MODULE, "AssetCreated"),
            (MODULE, "AccountCreated"),
            (MODULE, "Issued"),
        ]
    }

    async fn handle_event(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        match ctx.event.method.as_str() {
            "AssetCreated" => self.asset_created(ctx).await,
            "AccountCreated" => self.account_created(ctx).await,
            "Issued" => self.issued(ctx).await,
            other => Err(decode_error(ctx.event, format!("unexpected method {other}"))),
        }
    }
}
