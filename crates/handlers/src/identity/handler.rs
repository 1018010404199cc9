//! Handler for the Identity pallet.
//!
//! # Supported Events
//!
//! - `DidCreated`, `PrimaryKeyUpdated`
//! - `ClaimAdded` / `ClaimRevoked`
//! - `CustomClaimTypeAdded`

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use prism_core::error::DomainResult;
use prism_core::ports::{EventContext, EventHandler, EventKey};
use prism_core::projection::{Provenance, compose_id};

use super::models::{Claim, CustomClaimType, Identity, Scope};
use crate::utils::{
    list_param, param, parse_account_hex, parse_did, parse_hex, parse_text, parse_ticker,
    parse_u32, parse_u64, parse_variant, parse_variant_name,
};

// =============================================================================
// Claim decoding
// =============================================================================

/// A decoded `IdentityClaim`.
#[derive(Debug, Clone, PartialEq)]
struct DecodedClaim {
    issuer: String,
    claim_type: String,
    scope: Option<Scope>,
    jurisdiction: Option<String>,
    cdd_id: Option<String>,
    custom_id: Option<u32>,
    issuance_date: Option<u64>,
    last_update_date: Option<u64>,
    expiry: Option<u64>,
}

impl DecodedClaim {
    fn id(&self, target: &str) -> String {
        let custom = self.custom_id.map(|c| c.to_string()).unwrap_or_default();
        let scope = self.scope.as_ref().map(|s| s.value.as_str()).unwrap_or_default();
        compose_id(&[target, self.claim_type.as_str(), custom.as_str(), scope, self.issuer.as_str()])
    }
}

fn parse_scope(value: &Value) -> Option<Scope> {
    let (kind, inner) = parse_variant(value)?;
    let value = match kind {
        "Identity" => parse_did(inner)?,
        "Ticker" => parse_ticker(inner)?,
        "Asset" | "Custom" => parse_hex(inner)?,
        _ => return None,
    };
    Some(Scope {
        kind: kind.to_string(),
        value,
    })
}

fn parse_identity_claim(value: &Value) -> Option<DecodedClaim> {
    let (claim_type, inner) = parse_variant(value.get("claim")?)?;
    let mut claim = DecodedClaim {
        issuer: parse_did(value.get("claim_issuer")?)?,
        claim_type: claim_type.to_string(),
        scope: None,
        jurisdiction: None,
        cdd_id: None,
        custom_id: None,
        issuance_date: value.get("issuance_date").and_then(parse_u64),
        last_update_date: value.get("last_update_date").and_then(parse_u64),
        expiry: value.get("expiry").and_then(parse_u64),
    };

    match claim_type {
        "Accredited" | "Affiliate" | "BuyLockup" | "SellLockup" | "KnowYourCustomer"
        | "Exempted" | "Blocked" => claim.scope = Some(parse_scope(inner)?),
        "Jurisdiction" => {
            claim.jurisdiction = Some(parse_variant_name(inner.get(0)?)?);
            claim.scope = Some(parse_scope(inner.get(1)?)?);
        }
        "CustomerDueDiligence" | "InvestorUniquenessV2" => claim.cdd_id = Some(parse_hex(inner)?),
        "InvestorUniqueness" => {
            claim.scope = Some(parse_scope(inner.get(0)?)?);
            claim.cdd_id = inner.get(2).and_then(parse_hex);
        }
        "Custom" => {
            claim.custom_id = Some(parse_u32(inner.get(0)?)?);
            claim.scope = match inner.get(1) {
                None | Some(Value::Null) => None,
                Some(scope) => Some(parse_scope(scope)?),
            };
        }
        "NoData" | "NoType" => {}
        _ => return None,
    }
    Some(claim)
}

/// Secondary key: `{key: account | {"Account": ..}, permissions}` or a bare account.
fn parse_secondary_key(value: &Value) -> Option<String> {
    let key = value.get("key").unwrap_or(value);
    match parse_variant(key) {
        Some(("Account", inner)) => parse_account_hex(inner),
        _ => parse_account_hex(key),
    }
}

// =============================================================================
// Handler
// =============================================================================

pub struct IdentityHandler;

impl IdentityHandler {
    async fn did_created(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        let did = param(event, 0, "did", parse_did)?;
        let primary = param(event, 1, "primary_account", parse_account_hex)?;
        let secondary = list_param(event, 2, "secondary_keys", parse_secondary_key)?;

        let changes = ctx.changes();
        let _guard = changes.lock_entity::<Identity>(&did).await;
        let mut identity = changes
            .get_or_create(&did, || Identity {
                id: did.clone(),
                primary_account: primary.clone(),
                secondary_accounts: vec![],
                provenance: Provenance::at(ctx.block_number()),
            })
            .await?;
        identity.primary_account = primary;
        identity.secondary_accounts = secondary;
        changes.save(&mut identity)
    }

    async fn primary_key_updated(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        let did = param(event, 0, "did", parse_did)?;
        let new_key = param(event, 2, "new_key", parse_account_hex)?;

        let changes = ctx.changes();
        let _guard = changes.lock_entity::<Identity>(&did).await;
        let mut identity = changes.require::<Identity>(&did).await?;
        identity.primary_account = new_key;
        changes.save(&mut identity)
    }

    async fn claim(&self, ctx: &EventContext<'_>, revoked: bool) -> DomainResult<()> {
        let event = ctx.event;
        let target = param(event, 0, "target", parse_did)?;
        let decoded = param(event, 1, "identity_claim", parse_identity_claim)?;
        let id = decoded.id(&target);

        let changes = ctx.changes();
        let _guard = changes.lock_entity::<Claim>(&id).await;
        let mut claim = changes
            .get_or_create(&id, || Claim {
                id: id.clone(),
                target_id: target.clone(),
                issuer_id: decoded.issuer.clone(),
                claim_type: decoded.claim_type.clone(),
                scope: None,
                jurisdiction: None,
                cdd_id: None,
                custom_claim_type_id: None,
                issuance_date: None,
                last_update_date: None,
                expiry: None,
                revoked_at: None,
                provenance: Provenance::at(ctx.block_number()),
            })
            .await?;

        claim.scope = decoded.scope;
        claim.jurisdiction = decoded.jurisdiction;
        claim.cdd_id = decoded.cdd_id;
        claim.custom_claim_type_id = decoded.custom_id;
        claim.issuance_date = decoded.issuance_date;
        claim.last_update_date = decoded.last_update_date;
        claim.expiry = decoded.expiry;
        claim.revoked_at = revoked.then(|| ctx.block_number());

        debug!(claim = %id, revoked, "Claim updated");
        changes.save(&mut claim)
    }

    async fn custom_claim_type(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        let did = param(event, 0, "did", parse_did)?;
        let id = param(event, 1, "id", parse_u32)?.to_string();
        let name = param(event, 2, "name", parse_text)?;

        ctx.changes().save(&mut CustomClaimType {
            id,
            name,
            identity_id: did,
            provenance: Provenance::at(ctx.block_number()),
        })
    }
}

#[async_trait]
impl EventHandler for IdentityHandler {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn subscriptions(&self) -> &'static [EventKey] {
        &[
            ("Identity", "DidCreated"),
            ("Identity", "PrimaryKeyUpdated"),
            ("Identity", "ClaimAdded"),
            ("Identity", "ClaimRevoked"),
            ("Identity", "CustomClaimTypeAdded"),
        ]
    }

    async fn handle_event(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        match ctx.event.method.as_str() {
            "DidCreated" => self.did_created(ctx).await,
            "PrimaryKeyUpdated" => self.primary_key_updated(ctx).await,
            "ClaimAdded" => self.claim(ctx, false).await,
            "ClaimRevoked" => self.claim(ctx, true).await,
            "CustomClaimTypeAdded" => self.custom_claim_type(ctx).await,
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    use crate::testing::{Harness, account, did, ev, ticker};

    fn identity_claim(claim: Value) -> Value {
        json!({
            "claim_issuer": did(7),
            "issuance_date": 1_700_000_000_000u64,
            "last_update_date": 1_700_000_000_000u64,
            "expiry": null,
            "claim": claim,
        })
    }

    #[test]
    fn test_parse_claim_variants() {
        let accredited = parse_identity_claim(&identity_claim(
            json!({ "Accredited": { "Identity": did(3) } }),
        ))
        .unwrap();
        assert_eq!(accredited.claim_type, "Accredited");
        assert_eq!(accredited.scope.as_ref().unwrap().value, did(3));
        assert_eq!(accredited.id(&did(1)), format!("{}/Accredited/{}/{}", did(1), did(3), did(7)));

        let jurisdiction = parse_identity_claim(&identity_claim(
            json!({ "Jurisdiction": ["FR", { "Ticker": ticker("ACME") }] }),
        ))
        .unwrap();
        assert_eq!(jurisdiction.jurisdiction.as_deref(), Some("FR"));
        assert_eq!(jurisdiction.scope.unwrap().value, "ACME");

        let cdd = parse_identity_claim(&identity_claim(
            json!({ "CustomerDueDiligence": format!("0x{}", "11".repeat(32)) }),
        ))
        .unwrap();
        assert!(cdd.scope.is_none());
        assert_eq!(cdd.id(&did(1)), format!("{}/CustomerDueDiligence/{}", did(1), did(7)));

        let custom = parse_identity_claim(&identity_claim(json!({ "Custom": [5, null] }))).unwrap();
        assert_eq!(custom.id(&did(1)), format!("{}/Custom/5/{}", did(1), did(7)));

        assert!(parse_identity_claim(&identity_claim(json!({ "Unknown": 1 }))).is_none());
    }

    // Test critique: révocation puis ré-ajout sur la même ligne
    #[tokio::test]
    async fn test_claim_added_then_revoked() {
        let mut h = Harness::new(vec![Arc::new(IdentityHandler)]);
        let claim = identity_claim(json!({ "Affiliate": { "Identity": did(3) } }));
        let id = format!("{}/Affiliate/{}/{}", did(1), did(3), did(7));

        h.run(vec![ev("Identity", "ClaimAdded", vec![json!(did(1)), claim.clone()])])
            .await
            .unwrap();
        assert_eq!(h.get::<Claim>(&id).unwrap().revoked_at, None);

        h.run(vec![ev("Identity", "ClaimRevoked", vec![json!(did(1)), claim.clone()])])
            .await
            .unwrap();
        assert_eq!(h.get::<Claim>(&id).unwrap().revoked_at, Some(2));

        h.run(vec![ev("Identity", "ClaimAdded", vec![json!(did(1)), claim])])
            .await
            .unwrap();
        let row: Claim = h.get(&id).unwrap();
        assert_eq!(row.revoked_at, None);
        assert_eq!(row.provenance.created_block_id, 1);
        assert_eq!(h.count::<Claim>(), 1);
    }

    #[tokio::test]
    async fn test_did_created_with_secondary_keys() {
        let mut h = Harness::new(vec![Arc::new(IdentityHandler)]);
        h.run(vec![
            ev(
                "Identity",
                "DidCreated",
                vec![
                    json!(did(1)),
                    json!(account(10)),
                    json!([{ "key": { "Account": account(11) }, "permissions": {} }, account(12)]),
                ],
            ),
            ev("Identity", "CustomClaimTypeAdded", vec![json!(did(1)), json!(4), json!("KYB")]),
        ])
        .await
        .unwrap();

        let identity: Identity = h.get(&did(1)).unwrap();
        assert_eq!(identity.primary_account, account(10));
        assert_eq!(identity.secondary_accounts, vec![account(11), account(12)]);
        assert_eq!(h.get::<CustomClaimType>("4").unwrap().name, "KYB");
    }

    // Test critique: mise à jour d'une identité inconnue = erreur référentielle
    #[tokio::test]
    async fn test_primary_key_update_requires_identity() {
        let mut h = Harness::new(vec![Arc::new(IdentityHandler)]);
        let err = h
            .run(vec![ev(
                "Identity",
                "PrimaryKeyUpdated",
                vec![json!(did(1)), json!(account(10)), json!(account(11))],
            )])
            .await
            .unwrap_err();
        assert!(matches!(err, prism_core::error::DomainError::MissingEntity { kind: "Identity", .. }));
    }
}
