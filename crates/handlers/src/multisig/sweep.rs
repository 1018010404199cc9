//! Deletion sweep for multisig proposals.
//!
//! Proposals can disappear from chain storage without any event (runtime
//! upgrades clearing them, expiry). When the transaction version changes,
//! every `Active` proposal is read back from `MultiSig.Proposals` and the
//! absent ones are marked `Deleted`. Read failures are retried with
//! bounded backoff, then logged and skipped: they never fail the block.

use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use prism_core::error::{ChainResult, DomainResult};
use prism_core::metrics;
use prism_core::ports::BlockContext;

use super::models::{MultiSigProposal, ProposalStatus};

const PROPOSALS_ENTRY: &str = "MultiSig.Proposals";

/// Retry policy of the read-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    /// Reads per proposal, first one included.
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    block: u64,
    transaction_version: u32,
    changed: bool,
}

/// Transaction version seen on the previous block.
///
/// Created once per process. The first block observed only seeds it.
/// Observing the same block again (a retry) returns the same answer.
#[derive(Debug, Default)]
pub struct TransactionVersionTracker {
    last: Mutex<Option<Observation>>,
}

impl TransactionVersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `block` runs a different transaction version than the
    /// block observed before it.
    pub fn observe(&self, block: u64, transaction_version: u32) -> bool {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let changed = match *last {
            Some(seen) if seen.block == block => return seen.changed,
            Some(seen) => seen.transaction_version != transaction_version,
            None => false,
        };
        *last = Some(Observation {
            block,
            transaction_version,
            changed,
        });
        changed
    }
}

/// Mark every `Active` proposal missing from chain storage as `Deleted`.
/// Returns the number of deleted proposals.
pub async fn sweep_deleted_proposals(ctx: &BlockContext<'_>, config: &SweepConfig) -> DomainResult<u64> {
    let changes = ctx.changes;
    let active = changes
        .find_by::<MultiSigProposal>("status", &json!("Active"))
        .await?;
    info!(block = ctx.block.number, active = active.len(), "🧹 Sweeping multisig proposals");

    let mut deleted = 0;
    for proposal in active {
        let _guard = changes.lock_entity::<MultiSigProposal>(&proposal.id).await;
        let stored = read_proposal(ctx, config, &proposal).await;
        match stored {
            Ok(Some(_)) => {}
            Ok(None) => {
                let mut proposal = proposal;
                proposal.status = ProposalStatus::Deleted;
                changes.save(&mut proposal)?;
                debug!(proposal = %proposal.id, "Proposal no longer in storage, marked deleted");
                deleted += 1;
            }
            Err(e) => {
                metrics::record_chain_readback_error(PROPOSALS_ENTRY);
                warn!(
                    proposal = %proposal.id,
                    attempts = config.attempts,
                    error = %e,
                    "Could not read proposal back, leaving it active"
                );
            }
        }
    }

    metrics::record_multisig_sweep(deleted);
    info!(block = ctx.block.number, deleted, "🧹 Multisig sweep done");
    Ok(deleted)
}

async fn read_proposal(
    ctx: &BlockContext<'_>,
    config: &SweepConfig,
    proposal: &MultiSigProposal,
) -> ChainResult<Option<serde_json::Value>> {
    let keys = vec![json!(proposal.multisig_id), json!(proposal.proposal_id)];
    let mut backoff = config.initial_backoff;
    let mut attempt = 1;
    loop {
        match ctx
            .chain
            .storage_value("MultiSig", "Proposals", keys.clone(), Some(ctx.block.hash.clone()))
            .await
        {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.attempts => {
                debug!(proposal = %proposal.id, attempt, error = %e, "Proposal read failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.max_backoff);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
