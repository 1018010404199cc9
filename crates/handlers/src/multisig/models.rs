//! Models for multi-signature accounts and their proposals.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use prism_core::projection::{Provenance, compose_id};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiSig {
    /// MultiSig account address.
    pub id: String,
    pub creator_id: String,
    pub creator_account: String,
    pub signatures_required: u64,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(MultiSig, "MultiSig");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignerType {
    Identity,
    Account,
}

impl SignerType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "Identity",
            Self::Account => "Account",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignerStatus {
    Authorized,
    Approved,
    Removed,
}

/// `multisig/signerType/signerValue`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiSigSigner {
    pub id: String,
    pub multisig_id: String,
    pub signer_type: SignerType,
    pub signer_value: String,
    pub status: SignerStatus,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(MultiSigSigner, "MultiSigSigner");

impl MultiSigSigner {
    pub fn id_for(multisig: &str, signer_type: SignerType, value: &str) -> String {
        compose_id(&[multisig, signer_type.as_str(), value])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    Active,
    /// Threshold reached, not yet executed. Newer runtimes only.
    Approved,
    Rejected,
    Success,
    Failed,
    /// Gone from chain storage without a terminal event.
    Deleted,
}

/// One call of a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallDescription {
    pub module: String,
    pub call: String,
    pub args: Value,
}

/// What a proposal would execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProposalDescription {
    Single(CallDescription),
    Batch { calls: Vec<CallDescription> },
    BridgeBatch { txs: Vec<Value> },
}

/// `multisig/proposalId`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiSigProposal {
    pub id: String,
    pub multisig_id: String,
    pub proposal_id: u64,
    pub creator_id: String,
    pub creator_account: Option<String>,
    pub status: ProposalStatus,
    pub approval_count: u32,
    pub rejection_count: u32,
    pub description: Option<ProposalDescription>,
    pub extrinsic_index: Option<u32>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(MultiSigProposal, "MultiSigProposal");

impl MultiSigProposal {
    pub fn id_for(multisig: &str, proposal_id: u64) -> String {
        compose_id(&[multisig, proposal_id.to_string().as_str()])
    }

    /// Counter holding the votes of `action`.
    pub fn counter(&mut self, action: VoteAction) -> &mut u32 {
        match action {
            VoteAction::Approved => &mut self.approval_count,
            VoteAction::Rejected => &mut self.rejection_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteAction {
    Approved,
    Rejected,
}

/// A signer's current vote (`proposal/signerValue`). Overwritten on change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiSigProposalVote {
    pub id: String,
    pub proposal_id: String,
    pub signer_type: SignerType,
    pub signer_value: String,
    pub action: VoteAction,
    pub extrinsic_index: Option<u32>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(MultiSigProposalVote, "MultiSigProposalVote");
