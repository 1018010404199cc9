//! Handler for the Statistics pallet.
//!
//! # Supported Events
//!
//! - `StatTypesAdded` / `StatTypesRemoved`: additive / subtractive
//! - `SetAssetTransferCompliance`: authoritative replacement of the whole set
//! - `TransferConditionExemptionsAdded` / `TransferConditionExemptionsRemoved`

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use prism_core::error::DomainResult;
use prism_core::ports::{EventContext, EventHandler, EventKey};
use prism_core::projection::{Entity, Provenance};

use super::keys::{Condition, ExemptKey, StatKey, StatTypeValue};
use super::models::{StatType, TransferCompliance, TransferComplianceExemption};
use crate::compat::{self, AssetRef, Features};
use crate::utils::{decode_error, list_param, param, param_value, parse_did};

fn asset_scope(ctx: &EventContext<'_>, features: &Features, value: &serde_json::Value) -> DomainResult<AssetRef> {
    features
        .parse_asset_scope(value)
        .ok_or_else(|| decode_error(ctx.event, format!("not an asset scope: {value}")))
}

fn stat_type_row(key: &StatKey, block: u64) -> StatType {
    StatType {
        id: key.id(),
        asset_id: key.asset_id.clone(),
        op_type: key.op.as_str().to_string(),
        claim_type: key.claim.as_ref().map(|c| c.claim_type.name.clone()),
        custom_claim_type_id: key.claim.as_ref().and_then(|c| c.claim_type.custom_id),
        claim_issuer_id: key.claim.as_ref().map(|c| c.issuer.clone()),
        provenance: Provenance::at(block),
    }
}

fn compliance_row(asset_id: &str, condition: &Condition, block: u64) -> TransferCompliance {
    let (value, min, max) = match condition {
        Condition::MaxInvestorCount(n) | Condition::MaxInvestorOwnership(n) => (Some(*n), None, None),
        Condition::ClaimCount { min, max, .. } => (None, Some(*min), *max),
        Condition::ClaimOwnership { min, max, .. } => (None, Some(*min), Some(*max)),
    };
    TransferCompliance {
        id: condition.id(asset_id),
        asset_id: asset_id.to_string(),
        condition_type: condition.condition_type().to_string(),
        op_type: condition.op().as_str().to_string(),
        claim_type: condition.claim().map(|(c, _)| c.claim_type().to_string()),
        claim_value: condition.claim().and_then(|(c, _)| c.value()),
        claim_issuer_id: condition.claim().map(|(_, issuer)| issuer.to_string()),
        value,
        min,
        max,
        provenance: Provenance::at(block),
    }
}

pub struct StatisticsHandler;

impl StatisticsHandler {
    async fn stat_types(&self, ctx: &EventContext<'_>, added: bool) -> DomainResult<()> {
        let event = ctx.event;
        let features = compat::for_event(ctx)?;
        let asset = asset_scope(ctx, &features, param_value(event, 1, "asset")?)?;
        let keys: Vec<StatKey> = list_param(event, 2, "stat_types", StatTypeValue::parse)?
            .into_iter()
            .map(|v| v.for_asset(&asset.id))
            .collect();

        let changes = ctx.changes();
        for key in &keys {
            if added {
                changes.save(&mut stat_type_row(key, ctx.block_number()))?;
            } else {
                changes.remove::<StatType>(&key.id())?;
            }
        }

        debug!(asset = %asset.id, count = keys.len(), added, "Stat types updated");
        Ok(())
    }

    /// Replace the asset's condition set: stale rows go, new rows come,
    /// surviving rows keep their creation block.
    async fn set_compliance(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        let features = compat::for_event(ctx)?;
        let asset = asset_scope(ctx, &features, param_value(event, 1, "asset")?)?;
        let conditions = list_param(event, 2, "conditions", Condition::parse)?;

        let block = ctx.block_number();
        let mut wanted: Vec<TransferCompliance> = conditions
            .iter()
            .map(|c| compliance_row(&asset.id, c, block))
            .collect();
        let wanted_ids: BTreeSet<String> = wanted.iter().map(|r| r.id.clone()).collect();

        let changes = ctx.changes();
        let _guard = changes.lock(TransferCompliance::KIND, &asset.id).await;
        let existing = changes
            .find_by::<TransferCompliance>("assetId", &json!(asset.id))
            .await?;

        let mut removed = 0;
        for row in &existing {
            if !wanted_ids.contains(&row.id) {
                changes.remove::<TransferCompliance>(&row.id)?;
                removed += 1;
            }
        }
        for row in &mut wanted {
            if let Some(previous) = existing.iter().find(|e| e.id == row.id) {
                row.provenance = previous.provenance;
            }
        }
        changes.save_all(&mut wanted)?;

        debug!(
            asset = %asset.id,
            kept = existing.len() - removed,
            removed,
            total = wanted.len(),
            "Transfer compliance replaced"
        );
        Ok(())
    }

    async fn exemptions(&self, ctx: &EventContext<'_>, added: bool) -> DomainResult<()> {
        let event = ctx.event;
        let features = compat::for_event(ctx)?;
        let key = param(event, 1, "exempt_key", ExemptKey::parse)?;
        let asset = asset_scope(ctx, &features, &key.asset_scope)?;
        let identities = list_param(event, 2, "identities", parse_did)?;

        let changes = ctx.changes();
        for identity in &identities {
            let id = key.id(&asset.id, identity);
            if added {
                changes.save(&mut TransferComplianceExemption {
                    id,
                    asset_id: asset.id.clone(),
                    op_type: key.op.as_str().to_string(),
                    claim_type: key.claim_type.as_ref().map(|c| c.name.clone()),
                    custom_claim_type_id: key.claim_type.as_ref().and_then(|c| c.custom_id),
                    identity_id: identity.clone(),
                    provenance: Provenance::at(ctx.block_number()),
                })?;
            } else {
                changes.remove::<TransferComplianceExemption>(&id)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for StatisticsHandler {
    fn name(&self) -> &'static str {
        "statistics"
    }

    fn subscriptions(&self) -> &'static [EventKey] {
        &[
            ("Statistics", "StatTypesAdded"),
            ("Statistics", "StatTypesRemoved"),
            ("Statistics", "SetAssetTransferCompliance"),
            ("Statistics", "TransferConditionExemptionsAdded"),
            ("Statistics", "TransferConditionExemptionsRemoved"),
        ]
    }

    async fn handle_event(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        match ctx.event.method.as_str() {
            "StatTypesAdded" => self.stat_types(ctx, true).await,
            "StatTypesRemoved" => self.stat_types(ctx, false).await,
            "SetAssetTransferCompliance" => self.set_compliance(ctx).await,
            "TransferConditionExemptionsAdded" => self.exemptions(ctx, true).await,
            "TransferConditionExemptionsRemoved" => self.exemptions(ctx, false).await,
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::Arc;

    use crate::compat::legacy_asset_id;
    use crate::testing::{Harness, did, ev, ticker};

    fn scope() -> Value {
        json!({ "Ticker": ticker("ACME") })
    }

    fn count(n: u64) -> Value {
        json!({ "MaxInvestorCount": n })
    }

    fn accredited(flag: bool) -> Value {
        json!({ "ClaimCount": [{ "Accredited": flag }, did(7), 0, null] })
    }

    fn jurisdiction(country: &str) -> Value {
        json!({ "ClaimOwnership": [{ "Jurisdiction": country }, did(7), 0, 500000] })
    }

    fn set(conditions: Vec<Value>) -> prism_core::ports::RawEvent {
        ev("Statistics", "SetAssetTransferCompliance", vec![json!(did(1)), scope(), json!(conditions)])
    }

    fn ids(h: &Harness) -> BTreeSet<String> {
        h.all::<TransferCompliance>().into_iter().map(|r| r.id).collect()
    }

    // Test critique: remplacement complet {A,B,C} -> {B,C,D}
    #[tokio::test]
    async fn test_set_difference_completeness() {
        let mut h = Harness::new(vec![Arc::new(StatisticsHandler)]).at_version(6_000_000);
        let asset = legacy_asset_id("ACME");
        let (a, b, c, d) = (count(10), accredited(true), jurisdiction("US"), jurisdiction("FR"));

        h.run(vec![set(vec![a.clone(), b.clone(), c.clone()])]).await.unwrap();
        let before = ids(&h);
        assert_eq!(before.len(), 3);

        h.run(vec![set(vec![b.clone(), c.clone(), d.clone()])]).await.unwrap();
        let expected: BTreeSet<String> = [&b, &c, &d]
            .into_iter()
            .map(|v| Condition::parse(v).unwrap().id(&asset))
            .collect();
        assert_eq!(ids(&h), expected);
        assert!(!ids(&h).contains(&Condition::parse(&a).unwrap().id(&asset)));

        // B et C gardent leur création, mais leur mise à jour avance
        let kept: TransferCompliance = h.get(&Condition::parse(&b).unwrap().id(&asset)).unwrap();
        assert_eq!(kept.provenance.created_block_id, 1);
        assert_eq!(kept.provenance.updated_block_id, 2);
        let inserted: TransferCompliance = h.get(&Condition::parse(&d).unwrap().id(&asset)).unwrap();
        assert_eq!(inserted.provenance.created_block_id, 2);
        assert_eq!(inserted.claim_value.as_deref(), Some("FR"));
    }

    // Test critique: deux remplacements dans le même bloc, le dernier gagne
    #[tokio::test]
    async fn test_replacements_within_one_block() {
        let mut h = Harness::new(vec![Arc::new(StatisticsHandler)]).at_version(6_000_000);
        h.run(vec![set(vec![count(10), accredited(true)]), set(vec![accredited(false)])])
            .await
            .unwrap();

        let rows = h.all::<TransferCompliance>();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].claim_value.as_deref(), Some("false"));

        h.run(vec![set(vec![])]).await.unwrap();
        assert_eq!(h.count::<TransferCompliance>(), 0);
    }

    // Test critique: deux conditions ClaimCount aux bornes différentes restent distinctes
    #[tokio::test]
    async fn test_conditions_differing_only_by_bounds() {
        let mut h = Harness::new(vec![Arc::new(StatisticsHandler)]).at_version(6_000_000);
        let narrow = json!({ "ClaimCount": [{ "Accredited": true }, did(7), 0, 10] });
        let wide = json!({ "ClaimCount": [{ "Accredited": true }, did(7), 5, 20] });

        h.run(vec![set(vec![narrow.clone(), wide.clone(), count(50), count(100)])])
            .await
            .unwrap();
        assert_eq!(h.count::<TransferCompliance>(), 4);

        h.run(vec![set(vec![narrow.clone(), wide.clone()])]).await.unwrap();
        let asset = legacy_asset_id("ACME");
        let expected: BTreeSet<String> = [&narrow, &wide]
            .into_iter()
            .map(|v| Condition::parse(v).unwrap().id(&asset))
            .collect();
        assert_eq!(ids(&h), expected);

        let row: TransferCompliance = h.get(&Condition::parse(&wide).unwrap().id(&asset)).unwrap();
        assert_eq!(row.min, Some(5));
        assert_eq!(row.max, Some(20));
    }

    // Test critique: ajout et retrait dérivent le même identifiant
    #[tokio::test]
    async fn test_stat_types_added_then_removed() {
        let mut h = Harness::new(vec![Arc::new(StatisticsHandler)]).at_version(6_000_000);
        let types = json!([
            { "op": "Count", "claim_issuer": null },
            { "op": "Balance", "claim_issuer": [{ "Custom": 2 }, did(7)] },
        ]);

        h.run(vec![ev("Statistics", "StatTypesAdded", vec![json!(did(1)), scope(), types.clone()])])
            .await
            .unwrap();
        assert_eq!(h.count::<StatType>(), 2);
        let custom: StatType = h
            .get(&format!("{}/Balance/Custom/2/{}", legacy_asset_id("ACME"), did(7)))
            .unwrap();
        assert_eq!(custom.custom_claim_type_id, Some(2));

        h.run(vec![ev("Statistics", "StatTypesRemoved", vec![json!(did(1)), scope(), types])])
            .await
            .unwrap();
        assert_eq!(h.count::<StatType>(), 0);
    }

    #[tokio::test]
    async fn test_exemptions_added_then_removed() {
        let mut h = Harness::new(vec![Arc::new(StatisticsHandler)]);
        let key = json!({ "asset_id": format!("0x{}", "ab".repeat(16)), "op": "Count", "claim_type": "Accredited" });

        h.run(vec![ev(
            "Statistics",
            "TransferConditionExemptionsAdded",
            vec![json!(did(1)), key.clone(), json!([did(3), did(4)])],
        )])
        .await
        .unwrap();
        assert_eq!(h.count::<TransferComplianceExemption>(), 2);

        h.run(vec![ev(
            "Statistics",
            "TransferConditionExemptionsRemoved",
            vec![json!(did(1)), key, json!([did(3)])],
        )])
        .await
        .unwrap();
        let left = h.all::<TransferComplianceExemption>();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].identity_id, did(4));
    }
}
