//! Handler for the Settlement pallet.
//!
//! # Supported Events
//!
//! - `VenueCreated`, `VenueDetailsUpdated`, `VenueTypeUpdated`
//! - `InstructionCreated`: legs, parties and the pending affirmation count
//! - `InstructionAffirmed`, `InstructionAutomaticallyAffirmed`, `AffirmationWithdrawn`
//! - `MediatorAffirmationReceived`, `MediatorAffirmationWithdrawn`
//! - `InstructionRejected`, `InstructionExecuted`, `InstructionFailed`,
//!   `SettlementManuallyExecuted`, `FailedToExecuteInstruction`
//! - `ReceiptClaimed`
//!
//! Every mutation of an instruction's affirmations runs under the
//! instruction's lock, so events of one instruction apply in arrival order.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use prism_core::error::DomainResult;
use prism_core::models::AccountId;
use prism_core::ports::{BlockContext, EventContext, EventHandler, EventKey, RawEvent};
use prism_core::projection::{Provenance, compose_id};

use super::legs::{DecodedLeg, decode_legs};
use super::models::{
    AffirmationStatus, FailureReason, Instruction, InstructionAffirmation, InstructionEvent,
    InstructionParty, InstructionStatus, Leg, LegType, OffChainReceipt, Venue,
};
use crate::compat::{self, AutoAffirmOrdering, Features, InstructionLayout};
use crate::portfolio::ensure_portfolio;
use crate::utils::{
    PortfolioRef, decode_error, list_param, opt_param, param, param_value, parse_account_hex,
    parse_did, parse_portfolio, parse_text, parse_u64, parse_variant, parse_variant_name,
};

// =============================================================================
// Decoding
// =============================================================================

#[derive(Debug, Clone)]
struct InstructionCreated {
    creator: String,
    venue: Option<u64>,
    id: String,
    settlement_type: String,
    end_block: Option<u64>,
    trade_date: Option<u64>,
    value_date: Option<u64>,
    legs: Vec<DecodedLeg>,
    memo: Option<String>,
    mediators: Vec<String>,
}

/// One party's affirmation of an instruction.
#[derive(Debug, Clone)]
struct Affirmation {
    instruction_id: String,
    identity: String,
    is_mediator: bool,
    portfolio: Option<PortfolioRef>,
    automatic: bool,
    expiry: Option<u64>,
}

fn instruction_id(event: &RawEvent, index: usize) -> DomainResult<String> {
    param(event, index, "instruction_id", parse_u64).map(|id| id.to_string())
}

/// `"SettleOnAffirmation"`, `{"SettleOnBlock": n}`, `{"SettleManual": n}`.
fn parse_settlement_type(value: &Value) -> Option<(String, Option<u64>)> {
    match parse_variant(value)? {
        (name, Value::Null) => Some((name.to_string(), None)),
        (name, block) => Some((name.to_string(), Some(parse_u64(block)?))),
    }
}

/// `DispatchError`: `"BadOrigin"`, `{"Module": {..}}`, `{"Token": ".."}`.
fn parse_failure_reason(value: &Value) -> Option<FailureReason> {
    let (kind, details) = parse_variant(value)?;
    Some(FailureReason {
        kind: kind.to_string(),
        details: details.clone(),
    })
}

fn decode_created(event: &RawEvent, features: &Features) -> DomainResult<InstructionCreated> {
    let venue = match features.instructions {
        InstructionLayout::VenueRequired => Some(param(event, 1, "venue_id", parse_u64)?),
        InstructionLayout::WithMediators => opt_param(event, 1, "venue_id", parse_u64)?,
    };
    let (settlement_type, end_block) = param(event, 3, "settlement_type", parse_settlement_type)?;

    let legs_value = param_value(event, 6, "legs")?;
    let legs = decode_legs(features.legs, legs_value).ok_or_else(|| {
        decode_error(event, format!("legs do not match {:?}: {legs_value}", features.legs))
    })?;

    let mediators = match (features.instructions, event.params.get(8)) {
        (InstructionLayout::VenueRequired, _) | (_, None | Some(Value::Null)) => vec![],
        (InstructionLayout::WithMediators, Some(_)) => list_param(event, 8, "mediators", parse_did)?,
    };

    Ok(InstructionCreated {
        creator: param(event, 0, "did", parse_did)?,
        venue,
        id: instruction_id(event, 2)?,
        settlement_type,
        end_block,
        trade_date: opt_param(event, 4, "trade_date", parse_u64)?,
        value_date: opt_param(event, 5, "value_date", parse_u64)?,
        legs,
        memo: opt_param(event, 7, "memo", parse_text)?.filter(|m| !m.is_empty()),
        mediators,
    })
}

/// `[did, portfolio, instruction_id]`
fn decode_portfolio_affirmation(event: &RawEvent, automatic: bool) -> DomainResult<Affirmation> {
    Ok(Affirmation {
        instruction_id: instruction_id(event, 2)?,
        identity: param(event, 0, "did", parse_did)?,
        is_mediator: false,
        portfolio: Some(param(event, 1, "portfolio", parse_portfolio)?),
        automatic,
        expiry: None,
    })
}

fn is_auto_affirmation_of(event: &RawEvent, id: &str) -> bool {
    event.is("Settlement", "InstructionAutomaticallyAffirmed")
        && event.params.get(2).and_then(parse_u64).map(|n| n.to_string()).as_deref() == Some(id)
}

fn is_creation_of(event: &RawEvent, id: &str) -> bool {
    event.is("Settlement", "InstructionCreated")
        && event.params.get(2).and_then(parse_u64).map(|n| n.to_string()).as_deref() == Some(id)
}

/// Status set by a finalization event.
fn final_status(method: &str) -> Option<InstructionStatus> {
    match method {
        "InstructionExecuted" | "SettlementManuallyExecuted" => Some(InstructionStatus::Executed),
        "InstructionFailed" | "FailedToExecuteInstruction" => Some(InstructionStatus::Failed),
        _ => None,
    }
}

// =============================================================================
// Shared writes
// =============================================================================

/// Append the audit row of the current event.
fn audit(
    ctx: &EventContext<'_>,
    instruction_id: &str,
    identity: Option<&str>,
    portfolio: Option<&PortfolioRef>,
) -> DomainResult<()> {
    ctx.changes().save(&mut InstructionEvent {
        id: ctx.event_id(),
        instruction_id: instruction_id.to_string(),
        event: ctx.event.method.clone(),
        identity_id: identity.map(str::to_string),
        portfolio_id: portfolio.map(PortfolioRef::id),
        provenance: Provenance::at(ctx.block_number()),
    })
}

/// Add the signer of the current extrinsic to every leg of the instruction.
async fn record_signer(ctx: &EventContext<'_>, instruction_id: &str) -> DomainResult<()> {
    let Some(signer) = ctx.extrinsic.and_then(|x| x.signer) else {
        return Ok(());
    };
    let address = AccountId(signer).to_hex();

    let changes = ctx.changes();
    let mut legs: Vec<Leg> = changes
        .find_by::<Leg>("instructionId", &json!(instruction_id))
        .await?
        .into_iter()
        .filter(|leg| !leg.addresses.contains(&address))
        .collect();
    for leg in &mut legs {
        leg.addresses.push(address.clone());
        leg.addresses.sort();
    }
    changes.save_all(&mut legs)
}

/// Record an affirmation. The caller holds the instruction's lock.
async fn apply_affirmation(ctx: &EventContext<'_>, affirmation: Affirmation) -> DomainResult<()> {
    let changes = ctx.changes();
    let block = ctx.block_number();
    let instruction_id = affirmation.instruction_id.as_str();
    let mut instruction = changes.require::<Instruction>(instruction_id).await?;

    let id = InstructionAffirmation::id_for(instruction_id, &affirmation.identity, affirmation.is_mediator);
    let existing = changes.get::<InstructionAffirmation>(&id).await?;
    let first = !matches!(&existing, Some(a) if a.status == AffirmationStatus::Affirmed);
    let mut row = existing.unwrap_or_else(|| {
        InstructionAffirmation::new(
            id.clone(),
            instruction_id,
            &affirmation.identity,
            affirmation.is_mediator,
            block,
        )
    });
    row.status = AffirmationStatus::Affirmed;
    row.is_automatic = affirmation.automatic;
    if affirmation.is_mediator {
        row.expiry = affirmation.expiry;
    }
    if let Some(portfolio) = &affirmation.portfolio
        && !row.portfolios.contains(&portfolio.number)
    {
        row.portfolios.push(portfolio.number);
        row.portfolios.sort_unstable();
    }

    if first {
        instruction.pending_affirmations = instruction.pending_affirmations.saturating_sub(1);
    }
    let status = if affirmation.is_mediator {
        InstructionStatus::MediatorAffirmed
    } else {
        InstructionStatus::Affirmed
    };
    if instruction.advance(status) {
        debug!(instruction = %instruction_id, status = ?status, "Instruction status changed");
    }
    debug!(
        instruction = %instruction_id,
        identity = %affirmation.identity,
        automatic = affirmation.automatic,
        pending = instruction.pending_affirmations,
        "Affirmation recorded"
    );

    changes.save(&mut row)?;
    changes.save(&mut instruction)?;
    audit(ctx, instruction_id, Some(&affirmation.identity), affirmation.portfolio.as_ref())?;
    record_signer(ctx, instruction_id).await
}

// =============================================================================
// Handler
// =============================================================================

pub struct SettlementHandler;

impl SettlementHandler {
    async fn venue_created(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        let mut venue = Venue {
            id: param(event, 1, "venue_id", parse_u64)?.to_string(),
            owner_id: param(event, 0, "did", parse_did)?,
            details: opt_param(event, 2, "details", parse_text)?,
            venue_type: param(event, 3, "venue_type", parse_variant_name)?,
            provenance: Provenance::at(ctx.block_number()),
        };
        ctx.changes().save(&mut venue)
    }

    async fn venue_updated(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        let id = param(event, 1, "venue_id", parse_u64)?.to_string();
        let changes = ctx.changes();
        let _guard = changes.lock_entity::<Venue>(&id).await;
        let mut venue = changes.require::<Venue>(&id).await?;
        if event.method == "VenueTypeUpdated" {
            venue.venue_type = param(event, 2, "venue_type", parse_variant_name)?;
        } else {
            venue.details = opt_param(event, 2, "details", parse_text)?;
        }
        changes.save(&mut venue)
    }

    async fn instruction_created(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let features = compat::for_event(ctx)?;
        let created = decode_created(ctx.event, &features)?;
        let id = created.id.as_str();
        let block = ctx.block_number();
        let changes = ctx.changes();
        let _guard = changes.lock_entity::<Instruction>(id).await;

        let per_leg = created.mediators.len() + 2;
        let pending = u32::try_from(created.legs.len() * per_leg)
            .map_err(|_| decode_error(ctx.event, "affirmation count overflows"))?;

        let mut parties: BTreeMap<(String, bool), BTreeSet<u64>> = BTreeMap::new();
        let mut legs = Vec::with_capacity(created.legs.len());
        for (index, decoded) in created.legs.iter().enumerate() {
            let (from_portfolio_id, to_portfolio_id) = match decoded.portfolios() {
                Some((from, to)) => {
                    ensure_portfolio(changes, from).await?;
                    ensure_portfolio(changes, to).await?;
                    parties.entry((from.did.clone(), false)).or_default().insert(from.number);
                    parties.entry((to.did.clone(), false)).or_default().insert(to.number);
                    (Some(from.id()), Some(to.id()))
                }
                None => {
                    parties.entry((decoded.sender().to_string(), false)).or_default();
                    parties.entry((decoded.receiver().to_string(), false)).or_default();
                    (None, None)
                }
            };

            let (leg_type, asset, amount, nft_ids) = match decoded {
                DecodedLeg::Fungible { asset, amount, .. } => {
                    (LegType::Fungible, Some(asset), Some(*amount), vec![])
                }
                DecodedLeg::NonFungible { asset, ids, .. } => {
                    (LegType::NonFungible, Some(asset), None, ids.clone())
                }
                DecodedLeg::OffChain { amount, .. } => (LegType::OffChain, None, Some(*amount), vec![]),
            };
            let ticker = match decoded {
                DecodedLeg::OffChain { ticker, .. } => Some(ticker.clone()),
                _ => asset.and_then(|a| a.ticker.clone()),
            };

            legs.push(Leg {
                id: compose_id(&[id, index.to_string().as_str()]),
                instruction_id: id.to_string(),
                leg_index: index as u32,
                leg_type,
                from_id: decoded.sender().to_string(),
                from_portfolio_id,
                to_id: decoded.receiver().to_string(),
                to_portfolio_id,
                asset_id: asset.map(|a| a.id.clone()),
                ticker,
                amount,
                nft_ids,
                addresses: vec![],
                provenance: Provenance::at(block),
            });
        }
        for mediator in &created.mediators {
            parties.entry((mediator.clone(), true)).or_default();
        }

        let mut instruction = Instruction {
            id: id.to_string(),
            venue_id: created.venue.map(|v| v.to_string()),
            status: InstructionStatus::Created,
            settlement_type: created.settlement_type.clone(),
            end_block: created.end_block,
            trade_date: created.trade_date,
            value_date: created.value_date,
            memo: created.memo.clone(),
            mediators: created.mediators.clone(),
            leg_count: legs.len() as u32,
            pending_affirmations: pending,
            created_by: created.creator.clone(),
            failure_reason: None,
            provenance: Provenance::at(block),
        };
        changes.save(&mut instruction)?;
        changes.save_all(&mut legs)?;

        let mut party_rows: Vec<InstructionParty> = parties
            .into_iter()
            .map(|((did, is_mediator), portfolios)| InstructionParty {
                id: InstructionParty::id_for(id, &did, is_mediator),
                instruction_id: id.to_string(),
                identity_id: did,
                is_mediator,
                portfolios: portfolios.into_iter().collect(),
                provenance: Provenance::at(block),
            })
            .collect();
        changes.save_all(&mut party_rows)?;
        audit(ctx, id, Some(&created.creator), None)?;

        debug!(
            instruction = %id,
            legs = legs.len(),
            mediators = created.mediators.len(),
            pending,
            "Instruction created"
        );

        // Auto-affirmations this runtime emitted ahead of the creation.
        if features.auto_affirm == AutoAffirmOrdering::PrecedesCreation {
            for event in ctx.block.events.iter().filter(|e| is_auto_affirmation_of(e, id)) {
                debug!(instruction = %id, event_index = event.index, "Applying deferred automatic affirmation");
                let affirmation = decode_portfolio_affirmation(event, true)?;
                apply_affirmation(&ctx.block.event(event), affirmation).await?;
            }
        }
        Ok(())
    }

    async fn affirm(&self, ctx: &EventContext<'_>, affirmation: Affirmation) -> DomainResult<()> {
        let changes = ctx.changes();
        let _guard = changes.lock_entity::<Instruction>(&affirmation.instruction_id).await;
        apply_affirmation(ctx, affirmation).await
    }

    async fn auto_affirmed(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let features = compat::for_event(ctx)?;
        let affirmation = decode_portfolio_affirmation(ctx.event, true)?;
        if features.auto_affirm == AutoAffirmOrdering::PrecedesCreation
            && created_in_block(ctx.block, &affirmation.instruction_id)
        {
            // Applied by the creation handler once the instruction exists.
            return Ok(());
        }
        self.affirm(ctx, affirmation).await
    }

    /// Remove one portfolio (or a mediator's whole affirmation). The row is
    /// deleted with its last portfolio and the party counts as pending again.
    async fn withdraw(
        &self,
        ctx: &EventContext<'_>,
        instruction_id: &str,
        identity: &str,
        is_mediator: bool,
        portfolio: Option<PortfolioRef>,
    ) -> DomainResult<()> {
        let changes = ctx.changes();
        let _guard = changes.lock_entity::<Instruction>(instruction_id).await;
        let mut instruction = changes.require::<Instruction>(instruction_id).await?;

        let id = InstructionAffirmation::id_for(instruction_id, identity, is_mediator);
        let mut row = changes.require::<InstructionAffirmation>(&id).await?;
        if let Some(p) = &portfolio {
            row.portfolios.retain(|n| *n != p.number);
        }

        if portfolio.is_none() || row.portfolios.is_empty() {
            changes.remove::<InstructionAffirmation>(&id)?;
            if row.status == AffirmationStatus::Affirmed {
                instruction.pending_affirmations = instruction.pending_affirmations.saturating_add(1);
            }
            debug!(instruction = %instruction_id, identity = %identity, "Affirmation deleted");
        } else {
            changes.save(&mut row)?;
        }

        instruction.advance(InstructionStatus::AffirmationWithdrawn);
        changes.save(&mut instruction)?;
        audit(ctx, instruction_id, Some(identity), portfolio.as_ref())?;
        record_signer(ctx, instruction_id).await
    }

    async fn rejected(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        let identity = param(event, 0, "did", parse_did)?;
        let instruction_id = instruction_id(event, 1)?;

        let changes = ctx.changes();
        let _guard = changes.lock_entity::<Instruction>(&instruction_id).await;
        let mut instruction = changes.require::<Instruction>(&instruction_id).await?;
        let is_mediator = instruction.mediators.contains(&identity);

        let id = InstructionAffirmation::id_for(&instruction_id, &identity, is_mediator);
        let mut row = changes
            .get_or_create(&id, || {
                InstructionAffirmation::new(id.clone(), &instruction_id, &identity, is_mediator, ctx.block_number())
            })
            .await?;
        row.status = AffirmationStatus::Rejected;
        changes.save(&mut row)?;

        instruction.status = InstructionStatus::Rejected;
        debug!(instruction = %instruction_id, identity = %identity, is_mediator, "Instruction rejected");
        changes.save(&mut instruction)?;
        audit(ctx, &instruction_id, Some(&identity), None)?;
        record_signer(ctx, &instruction_id).await
    }

    async fn finalized(&self, ctx: &EventContext<'_>, status: InstructionStatus) -> DomainResult<()> {
        let event = ctx.event;
        let (instruction_id, identity, failure_reason) = if event.method == "FailedToExecuteInstruction" {
            (
                instruction_id(event, 0)?,
                None,
                Some(param(event, 1, "dispatch_error", parse_failure_reason)?),
            )
        } else {
            (instruction_id(event, 1)?, Some(param(event, 0, "did", parse_did)?), None)
        };

        let changes = ctx.changes();
        let _guard = changes.lock_entity::<Instruction>(&instruction_id).await;
        let mut instruction = changes.require::<Instruction>(&instruction_id).await?;
        instruction.status = status;
        if failure_reason.is_some() {
            instruction.failure_reason = failure_reason;
        }
        debug!(instruction = %instruction_id, status = ?status, "Instruction finalized");
        changes.save(&mut instruction)?;
        audit(ctx, &instruction_id, identity.as_deref(), None)?;
        record_signer(ctx, &instruction_id).await
    }

    async fn receipt_claimed(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        let identity = param(event, 0, "did", parse_did)?;
        let instruction_id = instruction_id(event, 1)?;
        let leg_id = param(event, 2, "leg_id", parse_u64)?;
        let uid = param(event, 3, "receipt_uid", parse_u64)?;
        let signer = param(event, 4, "signer", parse_account_hex)?;
        let metadata = opt_param(event, 5, "metadata", parse_text)?;
        let block = ctx.block_number();
        let uid_part = uid.to_string();

        let changes = ctx.changes();
        let _guard = changes.lock_entity::<Instruction>(&instruction_id).await;
        changes.require::<Instruction>(&instruction_id).await?;

        let receipt_id = compose_id(&[signer.as_str(), uid_part.as_str()]);
        changes.save(&mut OffChainReceipt {
            id: receipt_id.clone(),
            uid,
            signer: signer.clone(),
            instruction_id: instruction_id.clone(),
            leg_id,
            metadata,
            provenance: Provenance::at(block),
        })?;

        let id = compose_id(&[instruction_id.as_str(), identity.as_str(), signer.as_str(), uid_part.as_str()]);
        let mut row = changes
            .get_or_create(&id, || InstructionAffirmation::new(id.clone(), &instruction_id, &identity, false, block))
            .await?;
        row.status = AffirmationStatus::Affirmed;
        row.offchain_receipt_id = Some(receipt_id);
        changes.save(&mut row)?;

        let party_id = InstructionParty::id_for(&instruction_id, &identity, false);
        if !changes.exists::<InstructionParty>(&party_id).await? {
            debug!(instruction = %instruction_id, identity = %identity, "Adding receipt claimant as party");
            changes.save(&mut InstructionParty {
                id: party_id,
                instruction_id: instruction_id.clone(),
                identity_id: identity.clone(),
                is_mediator: false,
                portfolios: vec![],
                provenance: Provenance::at(block),
            })?;
        }

        audit(ctx, &instruction_id, Some(&identity), None)?;
        record_signer(ctx, &instruction_id).await
    }
}

fn created_in_block(block: &BlockContext<'_>, id: &str) -> bool {
    block.events.iter().any(|e| is_creation_of(e, id))
}

#[async_trait]
impl EventHandler for SettlementHandler {
    fn name(&self) -> &'static str {
        "settlement"
    }

    fn subscriptions(&self) -> &'static [EventKey] {
        &[
            ("Settlement", "VenueCreated"),
            ("Settlement", "VenueDetailsUpdated"),
            ("Settlement", "VenueTypeUpdated"),
            ("Settlement", "InstructionCreated"),
            ("Settlement", "InstructionAffirmed"),
            ("Settlement", "InstructionAutomaticallyAffirmed"),
            ("Settlement", "AffirmationWithdrawn"),
            ("Settlement", "MediatorAffirmationReceived"),
            ("Settlement", "MediatorAffirmationWithdrawn"),
            ("Settlement", "InstructionRejected"),
            ("Settlement", "InstructionExecuted"),
            ("Settlement", "InstructionFailed"),
            ("Settlement", "SettlementManuallyExecuted"),
            ("Settlement", "FailedToExecuteInstruction"),
            ("Settlement", "ReceiptClaimed"),
        ]
    }

    async fn handle_event(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        match event.method.as_str() {
            "VenueCreated" => self.venue_created(ctx).await,
            "VenueDetailsUpdated" | "VenueTypeUpdated" => self.venue_updated(ctx).await,
            "InstructionCreated" => self.instruction_created(ctx).await,
            "InstructionAffirmed" => {
                let affirmation = decode_portfolio_affirmation(event, false)?;
                self.affirm(ctx, affirmation).await
            }
            "InstructionAutomaticallyAffirmed" => self.auto_affirmed(ctx).await,
            "AffirmationWithdrawn" => {
                let identity = param(event, 0, "did", parse_did)?;
                let portfolio = param(event, 1, "portfolio", parse_portfolio)?;
                let id = instruction_id(event, 2)?;
                self.withdraw(ctx, &id, &identity, false, Some(portfolio)).await
            }
            "MediatorAffirmationReceived" => {
                let affirmation = Affirmation {
                    instruction_id: instruction_id(event, 1)?,
                    identity: param(event, 0, "did", parse_did)?,
                    is_mediator: true,
                    portfolio: None,
                    automatic: false,
                    expiry: opt_param(event, 2, "expiry", parse_u64)?,
                };
                self.affirm(ctx, affirmation).await
            }
            "MediatorAffirmationWithdrawn" => {
                let identity = param(event, 0, "did", parse_did)?;
                let id = instruction_id(event, 1)?;
                self.withdraw(ctx, &id, &identity, true, None).await
            }
            "InstructionRejected" => self.rejected(ctx).await,
            "ReceiptClaimed" => self.receipt_claimed(ctx).await,
            method => match final_status(method) {
                Some(status) => self.finalized(ctx, status).await,
                None => Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use prism_core::error::DomainError;

    use crate::portfolio::{Portfolio, PortfolioHandler};
    use crate::testing::{Harness, account, asset_id, did, ev, ev_in, extrinsic, portfolio, ticker};

    fn harness() -> Harness {
        Harness::new(vec![Arc::new(SettlementHandler)])
    }

    fn fungible(from: &str, from_n: u64, to: &str, to_n: u64, amount: u64) -> Value {
        json!({ "Fungible": {
            "sender": portfolio(from, from_n),
            "receiver": portfolio(to, to_n),
            "asset_id": asset_id(5),
            "amount": amount.to_string(),
        }})
    }

    /// V6_1+ layout: `[did, venue?, id, type, trade, value, legs, memo, mediators]`.
    fn created(id: u64, legs: Vec<Value>, mediators: Vec<String>) -> RawEvent {
        ev(
            "Settlement",
            "InstructionCreated",
            vec![
                json!(did(1)),
                json!(null),
                json!(id),
                json!("SettleOnAffirmation"),
                json!(null),
                json!(null),
                json!(legs),
                json!(null),
                json!(mediators),
            ],
        )
    }

    fn affirmed(method: &str, who: &str, number: u64, id: u64) -> RawEvent {
        ev("Settlement", method, vec![json!(who), portfolio(who, number), json!(id)])
    }

    fn instruction(h: &Harness, id: &str) -> Instruction {
        h.get(id).unwrap()
    }

    // Test critique: scénario 2, l'affirmation seule n'exécute jamais
    #[tokio::test]
    async fn test_affirmations_never_execute() {
        let mut h = harness();
        let (alice, bob) = (did(1), did(2));
        h.run(vec![created(1, vec![fungible(&alice, 0, &bob, 0, 500)], vec![])])
            .await
            .unwrap();

        let created = instruction(&h, "1");
        assert_eq!(created.pending_affirmations, 2);
        assert_eq!(created.status, InstructionStatus::Created);
        assert_eq!(created.venue_id, None);
        let leg: Leg = h.get("1/0").unwrap();
        assert_eq!(leg.amount, Some(500));
        assert_eq!(leg.asset_id, Some(asset_id(5)));
        assert_eq!(h.count::<InstructionParty>(), 2);
        // Portefeuilles par défaut créés à la volée
        assert_eq!(h.count::<Portfolio>(), 2);

        h.run_with(
            vec![ev_in(0, "Settlement", "InstructionAffirmed", vec![json!(alice), portfolio(&alice, 0), json!(1)])],
            vec![extrinsic(0, "Settlement", "affirm_instruction", json!({}), 1)],
        )
        .await
        .unwrap();
        let affirmation: InstructionAffirmation =
            h.get(&InstructionAffirmation::id_for("1", &alice, false)).unwrap();
        assert_eq!(affirmation.portfolios, vec![0]);
        assert!(!affirmation.is_automatic);
        assert_eq!(instruction(&h, "1").pending_affirmations, 1);
        assert_eq!(h.get::<Leg>("1/0").unwrap().addresses, vec![account(1)]);

        h.run(vec![affirmed("InstructionAffirmed", &bob, 0, 1)]).await.unwrap();
        let affirmed = instruction(&h, "1");
        assert_eq!(affirmed.pending_affirmations, 0);
        assert_eq!(affirmed.status, InstructionStatus::Affirmed);

        h.run(vec![ev("Settlement", "InstructionExecuted", vec![json!(bob), json!(1)])])
            .await
            .unwrap();
        assert_eq!(instruction(&h, "1").status, InstructionStatus::Executed);
        assert_eq!(h.count::<InstructionEvent>(), 4);
    }

    // Test critique: conservation du compteur d'affirmations
    #[tokio::test]
    async fn test_pending_affirmation_conservation() {
        let mut h = harness();
        let (alice, bob, mediator) = (did(1), did(2), did(3));
        h.run(vec![created(
            7,
            vec![fungible(&alice, 0, &bob, 0, 10), fungible(&alice, 1, &bob, 0, 20)],
            vec![mediator.clone()],
        )])
        .await
        .unwrap();
        assert_eq!(instruction(&h, "7").pending_affirmations, 6);
        let mediator_party: InstructionParty = h.get(&InstructionParty::id_for("7", &mediator, true)).unwrap();
        assert!(mediator_party.portfolios.is_empty());
        let sender: InstructionParty = h.get(&InstructionParty::id_for("7", &alice, false)).unwrap();
        assert_eq!(sender.portfolios, vec![0, 1]);

        h.run(vec![affirmed("InstructionAffirmed", &alice, 0, 7)]).await.unwrap();
        assert_eq!(instruction(&h, "7").pending_affirmations, 5);

        // Un second portefeuille du même participant ne compte pas
        h.run(vec![affirmed("InstructionAffirmed", &alice, 1, 7)]).await.unwrap();
        assert_eq!(instruction(&h, "7").pending_affirmations, 5);
        let id = InstructionAffirmation::id_for("7", &alice, false);
        assert_eq!(h.get::<InstructionAffirmation>(&id).unwrap().portfolios, vec![0, 1]);

        h.run(vec![ev(
            "Settlement",
            "MediatorAffirmationReceived",
            vec![json!(mediator), json!(7), json!(1_700_000_000u64)],
        )])
        .await
        .unwrap();
        let current = instruction(&h, "7");
        assert_eq!(current.pending_affirmations, 4);
        assert_eq!(current.status, InstructionStatus::MediatorAffirmed);
        let mediator_row: InstructionAffirmation =
            h.get(&InstructionAffirmation::id_for("7", &mediator, true)).unwrap();
        assert_eq!(mediator_row.expiry, Some(1_700_000_000));

        // Retrait partiel: la ligne reste
        h.run(vec![affirmed("AffirmationWithdrawn", &alice, 0, 7)]).await.unwrap();
        assert_eq!(h.get::<InstructionAffirmation>(&id).unwrap().portfolios, vec![1]);
        assert_eq!(instruction(&h, "7").pending_affirmations, 4);
        assert_eq!(instruction(&h, "7").status, InstructionStatus::AffirmationWithdrawn);

        // Dernier portefeuille: la ligne disparaît
        h.run(vec![affirmed("AffirmationWithdrawn", &alice, 1, 7)]).await.unwrap();
        assert!(h.get::<InstructionAffirmation>(&id).is_none());
        assert_eq!(instruction(&h, "7").pending_affirmations, 5);

        h.run(vec![ev("Settlement", "MediatorAffirmationWithdrawn", vec![json!(mediator), json!(7)])])
            .await
            .unwrap();
        assert_eq!(instruction(&h, "7").pending_affirmations, 6);
        assert_eq!(h.count::<InstructionAffirmation>(), 0);
    }

    // Test critique: l'auto-affirmation émise avant la création (V6)
    #[tokio::test]
    async fn test_auto_affirmation_before_creation_is_deferred() {
        let mut h = harness().at_version(6_000_000);
        let (alice, bob) = (did(1), did(2));
        let leg = json!({ "Fungible": {
            "sender": portfolio(&alice, 0),
            "receiver": portfolio(&bob, 0),
            "ticker": ticker("ACME"),
            "amount": 5,
        }});

        h.run(vec![
            affirmed("InstructionAutomaticallyAffirmed", &bob, 0, 3),
            ev(
                "Settlement",
                "InstructionCreated",
                vec![
                    json!(alice),
                    json!(4),
                    json!(3),
                    json!({ "SettleOnBlock": 1200 }),
                    json!(null),
                    json!(null),
                    json!([leg]),
                    json!("0x6d656d6f"),
                ],
            ),
        ])
        .await
        .unwrap();

        let created = instruction(&h, "3");
        assert_eq!(created.pending_affirmations, 1);
        assert_eq!(created.venue_id.as_deref(), Some("4"));
        assert_eq!(created.settlement_type, "SettleOnBlock");
        assert_eq!(created.end_block, Some(1200));
        assert_eq!(created.memo.as_deref(), Some("memo"));
        let leg: Leg = h.get("3/0").unwrap();
        assert_eq!(leg.ticker.as_deref(), Some("ACME"));

        let row: InstructionAffirmation = h.get(&InstructionAffirmation::id_for("3", &bob, false)).unwrap();
        assert!(row.is_automatic);
        // Audit: création puis affirmation
        assert!(h.get::<InstructionEvent>("1/0").is_some());
        assert!(h.get::<InstructionEvent>("1/1").is_some());

        // Instruction d'un bloc antérieur: traitement immédiat
        h.run(vec![affirmed("InstructionAutomaticallyAffirmed", &alice, 0, 3)]).await.unwrap();
        assert_eq!(instruction(&h, "3").pending_affirmations, 0);
    }

    #[tokio::test]
    async fn test_auto_affirmation_inline_after_creation() {
        let mut h = harness();
        let (alice, bob) = (did(1), did(2));
        h.run(vec![
            created(2, vec![fungible(&alice, 0, &bob, 0, 1)], vec![]),
            affirmed("InstructionAutomaticallyAffirmed", &bob, 0, 2),
        ])
        .await
        .unwrap();
        assert_eq!(instruction(&h, "2").pending_affirmations, 1);

        // Hors de la bande concernée, l'ordre inverse est une erreur référentielle
        let err = h
            .run(vec![
                affirmed("InstructionAutomaticallyAffirmed", &bob, 0, 9),
                created(9, vec![fungible(&alice, 0, &bob, 0, 1)], vec![]),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::MissingEntity { kind: "Instruction", .. }));
    }

    #[tokio::test]
    async fn test_rejection_by_mediator() {
        let mut h = harness();
        let (alice, bob, mediator) = (did(1), did(2), did(3));
        h.run(vec![created(5, vec![fungible(&alice, 0, &bob, 0, 1)], vec![mediator.clone()])])
            .await
            .unwrap();
        h.run(vec![ev("Settlement", "InstructionRejected", vec![json!(mediator), json!(5)])])
            .await
            .unwrap();

        assert_eq!(instruction(&h, "5").status, InstructionStatus::Rejected);
        let row: InstructionAffirmation = h.get(&InstructionAffirmation::id_for("5", &mediator, true)).unwrap();
        assert_eq!(row.status, AffirmationStatus::Rejected);

        // Un état terminal ne bouge plus sur affirmation
        h.run(vec![affirmed("InstructionAffirmed", &alice, 0, 5)]).await.unwrap();
        assert_eq!(instruction(&h, "5").status, InstructionStatus::Rejected);
    }

    #[tokio::test]
    async fn test_failed_execution_stores_reason() {
        let mut h = harness();
        h.run(vec![created(6, vec![fungible(&did(1), 0, &did(2), 0, 1)], vec![])])
            .await
            .unwrap();
        h.run(vec![ev(
            "Settlement",
            "FailedToExecuteInstruction",
            vec![json!(6), json!({ "Module": { "index": 37, "error": "0x0a000000" } })],
        )])
        .await
        .unwrap();

        let failed = instruction(&h, "6");
        assert_eq!(failed.status, InstructionStatus::Failed);
        let reason = failed.failure_reason.unwrap();
        assert_eq!(reason.kind, "Module");
        assert_eq!(reason.details["index"], 37);
    }

    #[tokio::test]
    async fn test_receipt_claim_adds_missing_party() {
        let mut h = harness();
        let (alice, bob, claimant) = (did(1), did(2), did(9));
        let off_chain = json!({ "OffChain": {
            "sender_identity": alice,
            "receiver_identity": bob,
            "ticker": ticker("USD"),
            "amount": "42",
        }});
        h.run(vec![created(8, vec![off_chain], vec![])]).await.unwrap();
        let leg: Leg = h.get("8/0").unwrap();
        assert_eq!(leg.leg_type, LegType::OffChain);
        assert_eq!(leg.from_portfolio_id, None);
        assert_eq!(h.count::<Portfolio>(), 0);

        h.run(vec![ev(
            "Settlement",
            "ReceiptClaimed",
            vec![json!(claimant), json!(8), json!(0), json!(77), json!(account(4)), json!(null)],
        )])
        .await
        .unwrap();

        let receipt_id = format!("{}/77", account(4));
        let receipt: OffChainReceipt = h.get(&receipt_id).unwrap();
        assert_eq!(receipt.leg_id, 0);
        let row: InstructionAffirmation = h.get(&format!("8/{claimant}/{}/77", account(4))).unwrap();
        assert_eq!(row.offchain_receipt_id, Some(receipt_id));
        assert!(h.get::<InstructionParty>(&InstructionParty::id_for("8", &claimant, false)).is_some());
        // Le reçu ne touche pas au compteur
        assert_eq!(instruction(&h, "8").pending_affirmations, 2);
    }

    #[tokio::test]
    async fn test_venue_lifecycle() {
        let mut h = harness();
        h.run(vec![ev(
            "Settlement",
            "VenueCreated",
            vec![json!(did(1)), json!(3), json!("0x4f5443206465736b"), json!("Exchange")],
        )])
        .await
        .unwrap();
        h.run(vec![ev("Settlement", "VenueTypeUpdated", vec![json!(did(1)), json!(3), json!("Distribution")])])
            .await
            .unwrap();

        let venue: Venue = h.get("3").unwrap();
        assert_eq!(venue.details.as_deref(), Some("OTC desk"));
        assert_eq!(venue.venue_type, "Distribution");
        assert_eq!(venue.provenance.created_block_id, 1);
        assert_eq!(venue.provenance.updated_block_id, 2);
    }

    // Test critique: rejouer un bloc sur une projection vierge donne le même état
    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let (alice, bob) = (did(1), did(2));
        let events = vec![
            created(1, vec![fungible(&alice, 0, &bob, 3, 500)], vec![did(3)]),
            affirmed("InstructionAffirmed", &alice, 0, 1),
            affirmed("InstructionAffirmed", &bob, 3, 1),
        ];

        let mut first = harness();
        let mut second = harness();
        first.run(events.clone()).await.unwrap();
        second.run(events).await.unwrap();
        assert_eq!(first.store.snapshot(), second.store.snapshot());
        assert_eq!(instruction(&first, "1").pending_affirmations, 1);
    }

    // Test critique: avant V6, le lieu est obligatoire et les jambes sont des enregistrements simples
    #[tokio::test]
    async fn test_venue_required_with_plain_legs() {
        let mut h = harness().at_version(5_000_000);
        let (alice, bob) = (did(1), did(2));
        h.run(vec![ev(
            "Settlement",
            "InstructionCreated",
            vec![
                json!(alice),
                json!(4),
                json!(11),
                json!({ "SettleOnBlock": 900 }),
                json!(1_700_000_000_000u64),
                json!(null),
                json!([
                    { "from": portfolio(&alice, 0), "to": portfolio(&bob, 0), "asset": ticker("ACME"), "amount": "250" },
                    { "from": portfolio(&bob, 0), "to": portfolio(&alice, 0), "asset": ticker("USDX"), "amount": 40 },
                ]),
                json!(null),
            ],
        )])
        .await
        .unwrap();

        let created = instruction(&h, "11");
        assert_eq!(created.venue_id.as_deref(), Some("4"));
        assert_eq!(created.settlement_type, "SettleOnBlock");
        assert_eq!(created.end_block, Some(900));
        assert_eq!(created.trade_date, Some(1_700_000_000_000));
        assert!(created.mediators.is_empty());
        assert_eq!(created.leg_count, 2);
        assert_eq!(created.pending_affirmations, 4);

        let first: Leg = h.get("11/0").unwrap();
        assert_eq!(first.leg_type, LegType::Fungible);
        assert_eq!(first.asset_id, Some(compat::legacy_asset_id("ACME")));
        assert_eq!(first.ticker.as_deref(), Some("ACME"));
        assert_eq!(first.amount, Some(250));
        assert_eq!(first.from_id, alice);

        let second: Leg = h.get("11/1").unwrap();
        assert_eq!(second.ticker.as_deref(), Some("USDX"));
        assert_eq!(second.amount, Some(40));
        assert_eq!(second.from_id, bob);
        assert_eq!(h.count::<InstructionParty>(), 2);
    }

    #[tokio::test]
    async fn test_venue_required_rejects_missing_venue() {
        let mut h = harness().at_version(5_000_000);
        let err = h
            .run(vec![ev(
                "Settlement",
                "InstructionCreated",
                vec![
                    json!(did(1)),
                    json!(null),
                    json!(11),
                    json!("SettleOnAffirmation"),
                    json!(null),
                    json!(null),
                    json!([]),
                    json!(null),
                ],
            )])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Decoding { .. }));
        assert_eq!(h.count::<Instruction>(), 0);
    }

    // Test critique: un portefeuille utilisateur jamais créé est reconstitué, l'existant est conservé
    #[tokio::test]
    async fn test_leg_recovers_unknown_user_portfolio() {
        let mut h = Harness::new(vec![Arc::new(SettlementHandler), Arc::new(PortfolioHandler)]);
        let (alice, bob) = (did(1), did(2));
        h.run(vec![ev("Portfolio", "PortfolioCreated", vec![json!(alice), json!(2), json!("Treasury")])])
            .await
            .unwrap();
        h.run(vec![created(5, vec![fungible(&alice, 2, &bob, 3, 75)], vec![])])
            .await
            .unwrap();

        let existing: Portfolio = h.get(&format!("{alice}/2")).unwrap();
        assert_eq!(existing.name.as_deref(), Some("Treasury"));
        assert_eq!(existing.provenance.created_block_id, 1);

        let recovered: Portfolio = h.get(&format!("{bob}/3")).unwrap();
        assert_eq!(recovered.identity_id, bob);
        assert_eq!(recovered.number, 3);
        assert_eq!(recovered.name, None);
        assert_eq!(recovered.deleted_at, None);
        assert_eq!(recovered.provenance.created_block_id, 2);
        assert_eq!(h.count::<Portfolio>(), 2);

        let leg: Leg = h.get("5/0").unwrap();
        assert_eq!(leg.to_portfolio_id.as_deref(), Some(format!("{bob}/3").as_str()));
        let party: InstructionParty = h.get(&InstructionParty::id_for("5", &bob, false)).unwrap();
        assert_eq!(party.portfolios, vec![3]);
    }

    #[tokio::test]
    async fn test_malformed_legs_fail_block() {
        let mut h = harness();
        let err = h
            .run(vec![created(1, vec![json!({ "Fungible": { "amount": 1 } })], vec![])])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Decoding { .. }));
        assert_eq!(h.count::<Instruction>(), 0);
    }
}
