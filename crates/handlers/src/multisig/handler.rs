//! Handler for the MultiSig pallet.
//!
//! # Supported Events
//!
//! - `MultiSigCreated`, signer authorization/addition/removal,
//!   `MultiSigSignaturesRequiredChanged`
//! - `ProposalAdded`: description decoded from the originating extrinsic
//! - `ProposalApproved`: a vote on older runtimes, a status change on V7
//! - `ProposalApprovalVote`, `ProposalRejectionVote`
//! - `ProposalRejected`, `ProposalExecuted`
//!
//! The block-start hook runs the deletion sweep when the transaction
//! version changes.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use prism_core::error::{DomainError, DomainResult};
use prism_core::models::AccountId;
use prism_core::ports::{BlockContext, EventContext, EventHandler, EventKey, RawEvent};
use prism_core::projection::{Provenance, compose_id};

use super::models::{
    MultiSig, MultiSigProposal, MultiSigProposalVote, MultiSigSigner, ProposalStatus, SignerStatus,
    SignerType, VoteAction,
};
use super::proposal::{describe, find_proposals};
use super::sweep::{SweepConfig, TransactionVersionTracker, sweep_deleted_proposals};
use crate::compat;
use crate::utils::{list_param, param, parse_account_hex, parse_did, parse_u64, parse_variant};

/// A multisig signer: an identity or an account key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerRef {
    pub kind: SignerType,
    pub value: String,
}

/// `{"Identity": did}`, `{"Account": account}` or a bare account.
pub fn parse_signer(value: &Value) -> Option<SignerRef> {
    match parse_variant(value) {
        Some(("Identity", inner)) => Some(SignerRef {
            kind: SignerType::Identity,
            value: parse_did(inner)?,
        }),
        Some(("Account", inner)) => Some(SignerRef {
            kind: SignerType::Account,
            value: parse_account_hex(inner)?,
        }),
        _ => parse_account_hex(value).map(|value| SignerRef {
            kind: SignerType::Account,
            value,
        }),
    }
}

/// `Ok`/`Err` of an executed proposal.
fn parse_execution_result(value: &Value) -> Option<bool> {
    match parse_variant(value) {
        Some(("Ok", _)) => Some(true),
        Some(("Err", _)) => Some(false),
        _ => value.as_bool(),
    }
}

fn proposal_key(event: &RawEvent, multisig_index: usize, id_index: usize) -> DomainResult<String> {
    let multisig = param(event, multisig_index, "multisig", parse_account_hex)?;
    let proposal_id = param(event, id_index, "proposal_id", parse_u64)?;
    Ok(MultiSigProposal::id_for(&multisig, proposal_id))
}

pub struct MultiSigHandler {
    sweep: SweepConfig,
    tracker: TransactionVersionTracker,
}

impl MultiSigHandler {
    pub fn new(sweep: SweepConfig) -> Self {
        Self {
            sweep,
            tracker: TransactionVersionTracker::new(),
        }
    }

    async fn created(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        let multisig = param(event, 1, "multisig", parse_account_hex)?;
        let mut row = MultiSig {
            id: multisig.clone(),
            creator_id: param(event, 0, "did", parse_did)?,
            creator_account: param(event, 2, "caller", parse_account_hex)?,
            signatures_required: param(event, 4, "sigs_required", parse_u64)?,
            provenance: Provenance::at(ctx.block_number()),
        };
        let signers = list_param(event, 3, "signers", parse_signer)?;

        let changes = ctx.changes();
        changes.save(&mut row)?;
        self.set_signers(ctx, &multisig, signers, SignerStatus::Authorized).await
    }

    async fn set_signers(
        &self,
        ctx: &EventContext<'_>,
        multisig: &str,
        signers: Vec<SignerRef>,
        status: SignerStatus,
    ) -> DomainResult<()> {
        let changes = ctx.changes();
        let mut rows = Vec::with_capacity(signers.len());
        for signer in signers {
            let id = MultiSigSigner::id_for(multisig, signer.kind, &signer.value);
            let mut row = changes
                .get_or_create(&id, || MultiSigSigner {
                    id: id.clone(),
                    multisig_id: multisig.to_string(),
                    signer_type: signer.kind,
                    signer_value: signer.value.clone(),
                    status,
                    provenance: Provenance::at(ctx.block_number()),
                })
                .await?;
            row.status = status;
            rows.push(row);
        }
        debug!(multisig = %multisig, signers = rows.len(), status = ?status, "Signers updated");
        changes.save_all(&mut rows)
    }

    async fn signers_event(&self, ctx: &EventContext<'_>, status: SignerStatus) -> DomainResult<()> {
        let event = ctx.event;
        let multisig = param(event, 1, "multisig", parse_account_hex)?;
        let signers = if event.method.contains("Signers") {
            list_param(event, 2, "signers", parse_signer)?
        } else {
            vec![param(event, 2, "signer", parse_signer)?]
        };
        self.set_signers(ctx, &multisig, signers, status).await
    }

    async fn proposal_added(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        let multisig = param(event, 1, "multisig", parse_account_hex)?;
        let proposal_id = param(event, 2, "proposal_id", parse_u64)?;
        let id = MultiSigProposal::id_for(&multisig, proposal_id);

        // A batch creating several proposals emits one ProposalAdded per
        // nested call, in call order.
        let position = ctx
            .block
            .events
            .iter()
            .filter(|e| {
                e.index < event.index
                    && e.extrinsic_index == event.extrinsic_index
                    && e.is("MultiSig", "ProposalAdded")
            })
            .count();
        let description = ctx.extrinsic.and_then(|x| {
            let described = find_proposals(&x.pallet, &x.args)
                .get(position)
                .and_then(|call| describe(call));
            if described.is_none() {
                debug!(proposal = %id, call = %format!("{}.{}", x.pallet, x.call), "No proposal call in extrinsic");
            }
            described
        });

        let changes = ctx.changes();
        let _guard = changes.lock_entity::<MultiSigProposal>(&id).await;
        let mut proposal = changes
            .get_or_create(&id, || MultiSigProposal {
                id: id.clone(),
                multisig_id: multisig.clone(),
                proposal_id,
                creator_id: String::new(),
                creator_account: None,
                status: ProposalStatus::Active,
                approval_count: 0,
                rejection_count: 0,
                description: None,
                extrinsic_index: None,
                provenance: Provenance::at(ctx.block_number()),
            })
            .await?;
        proposal.creator_id = param(event, 0, "did", parse_did)?;
        proposal.creator_account = ctx.extrinsic.and_then(|x| x.signer).map(|s| AccountId(s).to_hex());
        proposal.description = description;
        proposal.extrinsic_index = event.extrinsic_index;
        changes.save(&mut proposal)
    }

    /// Record a signer's vote. A changed vote moves one unit from the old
    /// action's counter to the new one.
    async fn vote(
        &self,
        ctx: &EventContext<'_>,
        proposal_id: &str,
        signer: SignerRef,
        action: VoteAction,
    ) -> DomainResult<()> {
        let changes = ctx.changes();
        let _guard = changes.lock_entity::<MultiSigProposal>(proposal_id).await;
        let mut proposal = changes.require::<MultiSigProposal>(proposal_id).await?;

        let vote_id = compose_id(&[proposal_id, signer.value.as_str()]);
        let existing = changes.get::<MultiSigProposalVote>(&vote_id).await?;
        let previous = existing.as_ref().map(|v| v.action);

        if previous != Some(action) {
            if let Some(previous) = previous {
                let counter = proposal.counter(previous);
                *counter = counter.checked_sub(1).ok_or_else(|| {
                    DomainError::Reconciliation(format!(
                        "{previous:?} count of proposal {proposal_id} would go negative"
                    ))
                })?;
            }
            let counter = proposal.counter(action);
            *counter = counter.checked_add(1).ok_or_else(|| {
                DomainError::Reconciliation(format!("{action:?} count of proposal {proposal_id} overflows"))
            })?;
            debug!(
                proposal = %proposal_id,
                signer = %signer.value,
                from = ?previous,
                to = ?action,
                approvals = proposal.approval_count,
                rejections = proposal.rejection_count,
                "Vote recorded"
            );
        }

        let mut vote = existing.unwrap_or_else(|| MultiSigProposalVote {
            id: vote_id.clone(),
            proposal_id: proposal_id.to_string(),
            signer_type: signer.kind,
            signer_value: signer.value.clone(),
            action,
            extrinsic_index: None,
            provenance: Provenance::at(ctx.block_number()),
        });
        vote.action = action;
        vote.extrinsic_index = ctx.event.extrinsic_index;

        changes.save(&mut vote)?;
        changes.save(&mut proposal)
    }

    async fn set_status(&self, ctx: &EventContext<'_>, proposal_id: &str, status: ProposalStatus) -> DomainResult<()> {
        let changes = ctx.changes();
        let _guard = changes.lock_entity::<MultiSigProposal>(proposal_id).await;
        let mut proposal = changes.require::<MultiSigProposal>(proposal_id).await?;
        debug!(proposal = %proposal_id, from = ?proposal.status, to = ?status, "Proposal status changed");
        proposal.status = status;
        changes.save(&mut proposal)
    }

    async fn update_multisig(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        let multisig = param(event, 1, "multisig", parse_account_hex)?;
        let required = param(event, 2, "sigs_required", parse_u64)?;
        let changes = ctx.changes();
        let _guard = changes.lock_entity::<MultiSig>(&multisig).await;
        let mut row = changes.require::<MultiSig>(&multisig).await?;
        row.signatures_required = required;
        changes.save(&mut row)
    }
}

#[async_trait]
impl EventHandler for MultiSigHandler {
    fn name(&self) -> &'static str {
        "multisig"
    }

    fn subscriptions(&self) -> &'static [EventKey] {
        &[
            ("MultiSig", "MultiSigCreated"),
            ("MultiSig", "MultiSigSignersAuthorized"),
            ("MultiSig", "MultiSigSignerAuthorized"),
            ("MultiSig", "MultiSigSignerAdded"),
            ("MultiSig", "MultiSigSignersRemoved"),
            ("MultiSig", "MultiSigSignerRemoved"),
            ("MultiSig", "MultiSigSignaturesRequiredChanged"),
            ("MultiSig", "ProposalAdded"),
            ("MultiSig", "ProposalApproved"),
            ("MultiSig", "ProposalApprovalVote"),
            ("MultiSig", "ProposalRejectionVote"),
            ("MultiSig", "ProposalRejected"),
            ("MultiSig", "ProposalExecuted"),
        ]
    }

    async fn handle_event(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        match event.method.as_str() {
            "MultiSigCreated" => self.created(ctx).await,
            "MultiSigSignersAuthorized" | "MultiSigSignerAuthorized" => {
                self.signers_event(ctx, SignerStatus::Authorized).await
            }
            "MultiSigSignerAdded" => self.signers_event(ctx, SignerStatus::Approved).await,
            "MultiSigSignersRemoved" | "MultiSigSignerRemoved" => {
                self.signers_event(ctx, SignerStatus::Removed).await
            }
            "MultiSigSignaturesRequiredChanged" => self.update_multisig(ctx).await,
            "ProposalAdded" => self.proposal_added(ctx).await,
            "ProposalApproved" => {
                if compat::for_event(ctx)?.approval_is_vote() {
                    let signer = param(event, 2, "signer", parse_signer)?;
                    let id = proposal_key(event, 1, 3)?;
                    self.vote(ctx, &id, signer, VoteAction::Approved).await
                } else {
                    let id = proposal_key(event, 1, 2)?;
                    self.set_status(ctx, &id, ProposalStatus::Approved).await
                }
            }
            "ProposalApprovalVote" | "ProposalRejectionVote" => {
                let signer = param(event, 2, "signer", parse_signer)?;
                let id = proposal_key(event, 1, 3)?;
                let action = if event.method == "ProposalApprovalVote" {
                    VoteAction::Approved
                } else {
                    VoteAction::Rejected
                };
                self.vote(ctx, &id, signer, action).await
            }
            "ProposalRejected" => {
                let id = proposal_key(event, 1, 2)?;
                self.set_status(ctx, &id, ProposalStatus::Rejected).await
            }
            "ProposalExecuted" => {
                let id = proposal_key(event, 1, 2)?;
                let success = param(event, 3, "result", parse_execution_result)?;
                let status = if success { ProposalStatus::Success } else { ProposalStatus::Failed };
                self.set_status(ctx, &id, status).await
            }
            _ => Ok(()),
        }
    }

    async fn on_block_start(&self, ctx: &BlockContext<'_>) -> DomainResult<()> {
        let block = ctx.block;
        if !self.tracker.observe(block.number, block.runtime.transaction_version) {
            return Ok(());
        }
        sweep_deleted_proposals(ctx, &self.sweep).await.map(|_| ())
    }
}
