use async_trait::async_trait;
use serde_json::Value;

use prism_core::error::DomainResult;
use prism_core::ports::{EventContext, EventHandler, EventKey};
use prism_core::projection::Provenance;

use super::BridgeEvent;
use crate::utils::{
    decode_error, field, param, param_value, parse_account_hex, parse_amount, parse_did, parse_hex,
    parse_u64,
};

/// Projects `Bridge.Bridged`. `TxsHandled` only echoes the same transfers
/// and is not subscribed.
pub struct BridgeHandler;

struct BridgeTx {
    nonce: u64,
    recipient: String,
    amount: u128,
    tx_hash: String,
}

fn parse_bridge_tx(value: &Value) -> Option<BridgeTx> {
    Some(BridgeTx {
        nonce: parse_u64(field(value, "nonce", 0)?)?,
        recipient: parse_account_hex(field(value, "recipient", 1)?)?,
        amount: parse_amount(field(value, "amount", 2)?)?,
        tx_hash: parse_hex(field(value, "tx_hash", 3)?)?,
    })
}

#[async_trait]
impl EventHandler for BridgeHandler {
    fn name(&self) -> &'static str {
        "bridge"
    }

    fn subscriptions(&self) -> &'static [EventKey] {
        &[("Bridge", "Bridged")]
    }

    async fn handle_event(&self, ctx: &EventContext<'_>) -> DomainResult<()> {
        let event = ctx.event;
        let identity_id = param(event, 0, "did", parse_did)?;
        let raw = param_value(event, 1, "bridge_tx")?;
        let tx = parse_bridge_tx(raw)
            .ok_or_else(|| decode_error(event, format!("malformed bridge_tx: {raw}")))?;

        ctx.changes().save(&mut BridgeEvent {
            id: ctx.event_id(),
            identity_id,
            recipient: tx.recipient,
            amount: tx.amount,
            nonce: tx.nonce,
            tx_hash: tx.tx_hash,
            datetime: ctx.block.block.timestamp,
            provenance: Provenance::at(ctx.block_number()),
        })
    }
}
