//! Handler for the Staking pallet.
//!
//! The parameter layout is selected by the runtime band, see
//! [`StakingLayout`].

use async_trait::async_trait;

use prism_core::error::DomainResult;
use prism_core::ports::{EventContext, EventHandler, EventKey};
use prism_core::projection::Provenance;

use super::StakingEvent;
use crate::compat::{self, StakingLayout};
use crate::utils::{decode_error, param, parse_account_hex, parse_amount, parse_did};

pub struct StakingHandler;

#[async_trait]
impl EventHandler for StakingHandler {
    fn name(&self) -> &'static str {
        "staking"
    }

    fn subscriptions(&self) -> &'static [EventKey] {
        &[
            ("Staking", "Bonded"),
            ("Staking", "Unbonded"),
            ("Staking", "Withdrawn"),
            ("Staking", "Reward"),
            ("Staking", "Rewarded"),
            ("Staking", "Slash"),
            ("Staking", "Slashed"),
        ]
    }

    async fn handle_event(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        let layout = compat::for_event(ctx)?.staking;
        let (identity_id, stash, amount_index) = match (layout, event.method.as_str()) {
            (StakingLayout::IdentityPrefixed, "Bonded" | "Unbonded" | "Reward") => {
                (Some(param(event, 0, "did", parse_did)?), 1, 2)
            }
            (StakingLayout::IdentityPrefixed, "Slash" | "Withdrawn") => (None, 0, 1),
            (StakingLayout::Upstream, "Rewarded") => (None, 0, 2),
            (StakingLayout::Upstream, "Bonded" | "Unbonded" | "Withdrawn" | "Slashed") => {
                (None, 0, 1)
            }
            (_, method) => {
                return Err(decode_error(
                    event,
                    format!("{method} is not emitted by a {layout:?} staking runtime"),
                ));
            }
        };

        ctx.changes().save(&mut StakingEvent {
            id: ctx.event_id(),
            event_id: event.method.clone(),
            identity_id,
            stash_account: param(event, stash, "stash", parse_account_hex)?,
            amount: param(event, amount_index, "amount", parse_amount)?,
            datetime: ctx.block.block.timestamp,
            provenance: Provenance::at(ctx.block_number()),
        })
    }
}
