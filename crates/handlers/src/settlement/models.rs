//! Models for settlement venues and instructions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use prism_core::projection::{Provenance, amount, compose_id};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Venue {
    pub id: String,
    pub owner_id: String,
    pub details: Option<String>,
    pub venue_type: String,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(Venue, "Venue");

/// Instruction lifecycle.
///
/// `Executed`, `Rejected` and `Failed` are terminal: affirmation events no
/// longer move the status, only finalization events do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionStatus {
    Created,
    Affirmed,
    MediatorAffirmed,
    AffirmationWithdrawn,
    Executed,
    Rejected,
    Failed,
}

impl InstructionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Executed | Self::Rejected | Self::Failed)
    }
}

/// Decoded `DispatchError` of a failed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: String,
    pub details: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    pub id: String,
    pub venue_id: Option<String>,
    pub status: InstructionStatus,
    /// `SettleOnAffirmation`, `SettleOnBlock`, `SettleManual` or `SettleAfterLock`.
    pub settlement_type: String,
    pub end_block: Option<u64>,
    pub trade_date: Option<u64>,
    pub value_date: Option<u64>,
    pub memo: Option<String>,
    pub mediators: Vec<String>,
    pub leg_count: u32,
    /// Affirmations still missing: `Σ over legs (mediators + 2)` at creation.
    pub pending_affirmations: u32,
    pub created_by: String,
    pub failure_reason: Option<FailureReason>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(Instruction, "Instruction");

impl Instruction {
    /// Move a live instruction to an intermediate state. Returns whether
    /// the status changed.
    pub fn advance(&mut self, to: InstructionStatus) -> bool {
        if self.status.is_terminal() || self.status == to {
            return false;
        }
        self.status = to;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegType {
    Fungible,
    NonFungible,
    OffChain,
}

/// One asset movement of an instruction (`instruction/legIndex`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leg {
    pub id: String,
    pub instruction_id: String,
    pub leg_index: u32,
    pub leg_type: LegType,
    pub from_id: String,
    pub from_portfolio_id: Option<String>,
    pub to_id: String,
    pub to_portfolio_id: Option<String>,
    pub asset_id: Option<String>,
    pub ticker: Option<String>,
    #[serde(with = "amount::option", default)]
    pub amount: Option<u128>,
    pub nft_ids: Vec<u64>,
    /// Signer accounts seen on events touching the instruction.
    pub addresses: Vec<String>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(Leg, "Leg");

/// Counterparty or mediator of an instruction (`instruction/did/isMediator`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionParty {
    pub id: String,
    pub instruction_id: String,
    pub identity_id: String,
    pub is_mediator: bool,
    pub portfolios: Vec<u64>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(InstructionParty, "InstructionParty");

impl InstructionParty {
    pub fn id_for(instruction: &str, did: &str, is_mediator: bool) -> String {
        compose_id(&[instruction, did, if is_mediator { "true" } else { "false" }])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AffirmationStatus {
    Affirmed,
    Rejected,
}

/// A party's affirmation (`instruction/did/isMediator`, or
/// `instruction/did/signer/uid` for receipts).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionAffirmation {
    pub id: String,
    pub instruction_id: String,
    pub identity_id: String,
    pub is_mediator: bool,
    pub portfolios: Vec<u64>,
    pub is_automatic: bool,
    pub status: AffirmationStatus,
    pub expiry: Option<u64>,
    pub offchain_receipt_id: Option<String>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(InstructionAffirmation, "InstructionAffirmation");

impl InstructionAffirmation {
    pub fn id_for(instruction: &str, did: &str, is_mediator: bool) -> String {
        InstructionParty::id_for(instruction, did, is_mediator)
    }

    pub fn new(id: String, instruction: &str, did: &str, is_mediator: bool, block: u64) -> Self {
        Self {
            id,
            instruction_id: instruction.to_string(),
            identity_id: did.to_string(),
            is_mediator,
            portfolios: vec![],
            is_automatic: false,
            status: AffirmationStatus::Affirmed,
            expiry: None,
            offchain_receipt_id: None,
            provenance: Provenance::at(block),
        }
    }
}

/// Audit row, one per lifecycle event (`block/eventIdx`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionEvent {
    pub id: String,
    pub instruction_id: String,
    pub event: String,
    pub identity_id: Option<String>,
    pub portfolio_id: Option<String>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(InstructionEvent, "InstructionEvent");

/// Off-chain settlement proof (`signer/uid`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffChainReceipt {
    pub id: String,
    pub uid: u64,
    pub signer: String,
    pub instruction_id: String,
    pub leg_id: u64,
    pub metadata: Option<String>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(OffChainReceipt, "OffChainReceipt");
