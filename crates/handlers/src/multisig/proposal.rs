//! Proposal description decoding.
//!
//! The events only carry proposal ids; the call itself is recovered from
//! the originating extrinsic's `proposal` argument. Calls are encoded as
//! `{"Pallet": {"call_name": {args}}}`.

use serde_json::Value;

use super::models::{CallDescription, ProposalDescription};
use crate::utils::parse_variant;

const BATCH_CALLS: &[&str] = &["batch", "batch_all", "force_batch", "batch_atomic", "batch_optimistic"];

/// `{"Pallet": {"call": args}}`
pub fn parse_call(value: &Value) -> Option<CallDescription> {
    let (module, inner) = parse_variant(value)?;
    let (call, args) = parse_variant(inner)?;
    Some(CallDescription {
        module: module.to_string(),
        call: call.to_string(),
        args: args.clone(),
    })
}

/// Describe a proposed call: a batch, a bridge batch or a single call.
pub fn describe(call: &Value) -> Option<ProposalDescription> {
    let single = parse_call(call)?;
    match (single.module.as_str(), single.call.as_str()) {
        ("Utility", name) if BATCH_CALLS.contains(&name) => {
            let calls = single
                .args
                .get("calls")?
                .as_array()?
                .iter()
                .map(parse_call)
                .collect::<Option<Vec<_>>>()?;
            Some(ProposalDescription::Batch { calls })
        }
        ("Bridge", "batch_propose_bridge_tx") => {
            let txs = single.args.get("bridge_txs")?.as_array()?.clone();
            Some(ProposalDescription::BridgeBatch { txs })
        }
        _ => Some(ProposalDescription::Single(single)),
    }
}

/// Every `proposal` argument of MultiSig calls in an extrinsic, in call
/// order, looking through wrapper calls (`Utility` batches, relayed or
/// dispatched calls).
pub fn find_proposals<'a>(pallet: &str, args: &'a Value) -> Vec<&'a Value> {
    let mut found = Vec::new();
    collect_proposals(pallet, args, &mut found);
    found
}

fn collect_proposals<'a>(pallet: &str, args: &'a Value, found: &mut Vec<&'a Value>) {
    if pallet == "MultiSig"
        && let Some(proposal) = args.get("proposal")
    {
        found.push(proposal);
        return;
    }

    let nested: Vec<&Value> = match (args.get("call"), args.get("calls")) {
        (Some(call), _) => vec![call],
        (None, Some(Value::Array(calls))) => calls.iter().collect(),
        _ => return,
    };
    for call in nested {
        if let Some((module, inner)) = parse_variant(call)
            && let Some((_, call_args)) = parse_variant(inner)
        {
            collect_proposals(module, call_args, found);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_call() {
        let call = json!({ "Asset": { "issue": { "amount": "10" } } });
        let Some(ProposalDescription::Single(single)) = describe(&call) else {
            panic!("expected single call");
        };
        assert_eq!(single.module, "Asset");
        assert_eq!(single.call, "issue");
        assert_eq!(single.args["amount"], "10");
    }

    #[test]
    fn test_batch_and_bridge_batch() {
        let batch = json!({ "Utility": { "batch_all": { "calls": [
            { "Asset": { "freeze": { "asset_id": "0x01" } } },
            { "Portfolio": { "create_portfolio": { "name": "0x61" } } },
        ]}}});
        let Some(ProposalDescription::Batch { calls }) = describe(&batch) else {
            panic!("expected batch");
        };
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].call, "create_portfolio");

        let bridge = json!({ "Bridge": { "batch_propose_bridge_tx": { "bridge_txs": [
            { "nonce": 1, "recipient": "0xaa", "amount": "5", "tx_hash": "0xbb" },
        ]}}});
        assert!(matches!(describe(&bridge), Some(ProposalDescription::BridgeBatch { txs }) if txs.len() == 1));
    }

    // Test critique: proposition enveloppée dans un appel Utility
    #[test]
    fn test_find_nested_proposal() {
        let proposal = json!({ "Asset": { "unfreeze": {} } });
        let args = json!({ "calls": [
            { "System": { "remark": { "remark": "0x" } } },
            { "MultiSig": { "create_proposal": { "multisig": "0xaa", "proposal": proposal, "expiry": null } } },
        ]});
        assert_eq!(find_proposals("Utility", &args), vec![&proposal]);

        let direct = json!({ "multisig": "0xaa", "proposal": proposal });
        assert_eq!(find_proposals("MultiSig", &direct), vec![&proposal]);
        assert!(find_proposals("Asset", &direct).is_empty());
    }

    #[test]
    fn test_batched_proposals_keep_call_order() {
        let first = json!({ "Asset": { "freeze": {} } });
        let second = json!({ "Asset": { "unfreeze": {} } });
        let args = json!({ "calls": [
            { "MultiSig": { "create_proposal": { "multisig": "0xaa", "proposal": first } } },
            { "Utility": { "batch": { "calls": [
                { "MultiSig": { "create_proposal": { "multisig": "0xbb", "proposal": second } } },
            ]}}},
        ]});
        assert_eq!(find_proposals("Utility", &args), vec![&first, &second]);
    }
}
