//! MultiSig bundle: multi-signature accounts, signers, proposals and votes.
//!
//! # Database Views
//!
//! - `multisigs`, `multisig_signers`
//! - `multisig_proposals` - Status and vote counters
//! - `multisig_proposal_votes` - Current vote per signer

mod handler;
pub mod models;
pub mod proposal;
pub mod sweep;

use std::sync::Arc;

use prism_core::ports::EventHandler;

use crate::HandlerBundle;

pub use handler::{MultiSigHandler, SignerRef, parse_signer};
pub use models::{
    MultiSig, MultiSigProposal, MultiSigProposalVote, MultiSigSigner, ProposalDescription,
    ProposalStatus, SignerStatus, SignerType, VoteAction,
};
pub use sweep::{SweepConfig, TransactionVersionTracker};

pub const MIGRATIONS: &[&str] = &[r#"
CREATE OR REPLACE VIEW multisigs AS
SELECT
    id,
    data->>'creatorId'                     AS creator_id,
    data->>'creatorAccount'                AS creator_account,
    (data->>'signaturesRequired')::BIGINT  AS signatures_required,
    created_block,
    updated_block
FROM entities
WHERE kind = 'MultiSig';

CREATE OR REPLACE VIEW multisig_signers AS
SELECT
    id,
    data->>'multisigId'  AS multisig_id,
    data->>'signerType'  AS signer_type,
    data->>'signerValue' AS signer_value,
    data->>'status'      AS status,
    created_block,
    updated_block
FROM entities
WHERE kind = 'MultiSigSigner';

CREATE OR REPLACE VIEW multisig_proposals AS
SELECT
    id,
    data->>'multisigId'                 AS multisig_id,
    (data->>'proposalId')::BIGINT       AS proposal_id,
    data->>'creatorId'                  AS creator_id,
    data->>'creatorAccount'             AS creator_account,
    data->>'status'                     AS status,
    (data->>'approvalCount')::INTEGER   AS approval_count,
    (data->>'rejectionCount')::INTEGER  AS rejection_count,
    data->'description'                 AS description,
    (data->>'extrinsicIndex')::INTEGER  AS extrinsic_index,
    created_block,
    updated_block
FROM entities
WHERE kind = 'MultiSigProposal';

CREATE OR REPLACE VIEW multisig_proposal_votes AS
SELECT
    id,
    data->>'proposalId'  AS proposal_id,
    data->>'signerType'  AS signer_type,
    data->>'signerValue' AS signer_value,
    data->>'action'      AS action,
    created_block,
    updated_block
FROM entities
WHERE kind = 'MultiSigProposalVote';
"#];

/// Holds the one handler instance of the process, and with it the
/// transaction version tracker.
pub struct MultiSigBundle {
    handler: Arc<MultiSigHandler>,
}

impl MultiSigBundle {
    pub fn new(sweep: SweepConfig) -> Self {
        Self {
            handler: Arc::new(MultiSigHandler::new(sweep)),
        }
    }
}

impl HandlerBundle for MultiSigBundle {
    fn name(&self) -> &'static str {
        "multisig"
    }

    fn handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![self.handler.clone()]
    }

    fn migrations(&self) -> &'static [&'static str] {
        MIGRATIONS
    }

    fn entity_kinds(&self) -> &'static [&'static str] {
        &["MultiSig", "MultiSigSigner", "MultiSigProposal", "MultiSigProposalVote"]
    }
}
