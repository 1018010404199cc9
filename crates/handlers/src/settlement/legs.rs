//! Settlement leg decoding.
//!
//! Legs changed shape twice: a plain `{from, to, asset, amount}` record
//! until V6, then a tagged union keyed by ticker, then keyed by native
//! asset id from V7.

use serde_json::Value;

use crate::compat::{AssetRef, LegEncoding, parse_native_asset_id};
use crate::utils::{
    PortfolioRef, field, parse_amount, parse_did, parse_portfolio, parse_ticker, parse_u64,
    parse_variant,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedLeg {
    Fungible {
        from: PortfolioRef,
        to: PortfolioRef,
        asset: AssetRef,
        amount: u128,
    },
    NonFungible {
        from: PortfolioRef,
        to: PortfolioRef,
        asset: AssetRef,
        ids: Vec<u64>,
    },
    /// Settled outside the chain; parties are identities, not portfolios.
    OffChain {
        sender: String,
        receiver: String,
        ticker: String,
        amount: u128,
    },
}

impl DecodedLeg {
    pub fn sender(&self) -> &str {
        match self {
            Self::Fungible { from, .. } | Self::NonFungible { from, .. } => &from.did,
            Self::OffChain { sender, .. } => sender,
        }
    }

    pub fn receiver(&self) -> &str {
        match self {
            Self::Fungible { to, .. } | Self::NonFungible { to, .. } => &to.did,
            Self::OffChain { receiver, .. } => receiver,
        }
    }

    /// Sender and receiver portfolios of on-chain legs.
    pub fn portfolios(&self) -> Option<(&PortfolioRef, &PortfolioRef)> {
        match self {
            Self::Fungible { from, to, .. } | Self::NonFungible { from, to, .. } => Some((from, to)),
            Self::OffChain { .. } => None,
        }
    }
}

/// Decode a list of legs. Any malformed leg fails the whole list.
pub fn decode_legs(encoding: LegEncoding, value: &Value) -> Option<Vec<DecodedLeg>> {
    value
        .as_array()?
        .iter()
        .map(|leg| decode_leg(encoding, leg))
        .collect()
}

fn decode_leg(encoding: LegEncoding, value: &Value) -> Option<DecodedLeg> {
    let (asset_key, parse_asset): (&str, fn(&Value) -> Option<AssetRef>) = match encoding {
        LegEncoding::PlainList => return decode_plain(value),
        LegEncoding::TaggedTicker => ("ticker", ticker_asset),
        LegEncoding::TaggedAssetId => ("asset_id", native_asset),
    };

    match parse_variant(value)? {
        ("Fungible", inner) => Some(DecodedLeg::Fungible {
            from: parse_portfolio(inner.get("sender")?)?,
            to: parse_portfolio(inner.get("receiver")?)?,
            asset: parse_asset(inner.get(asset_key)?)?,
            amount: parse_amount(inner.get("amount")?)?,
        }),
        ("NonFungible", inner) => {
            let nfts = inner.get("nfts")?;
            Some(DecodedLeg::NonFungible {
                from: parse_portfolio(inner.get("sender")?)?,
                to: parse_portfolio(inner.get("receiver")?)?,
                asset: parse_asset(nfts.get(asset_key)?)?,
                ids: nfts
                    .get("ids")?
                    .as_array()?
                    .iter()
                    .map(parse_u64)
                    .collect::<Option<Vec<_>>>()?,
            })
        }
        ("OffChain", inner) => Some(DecodedLeg::OffChain {
            sender: parse_did(inner.get("sender_identity")?)?,
            receiver: parse_did(inner.get("receiver_identity")?)?,
            ticker: parse_ticker(inner.get("ticker")?)?,
            amount: parse_amount(inner.get("amount")?)?,
        }),
        _ => None,
    }
}

fn decode_plain(value: &Value) -> Option<DecodedLeg> {
    Some(DecodedLeg::Fungible {
        from: parse_portfolio(field(value, "from", 0)?)?,
        to: parse_portfolio(field(value, "to", 1)?)?,
        asset: ticker_asset(field(value, "asset", 2)?)?,
        amount: parse_amount(field(value, "amount", 3)?)?,
    })
}

fn ticker_asset(value: &Value) -> Option<AssetRef> {
    parse_ticker(value).map(|t| AssetRef::from_ticker(&t))
}

fn native_asset(value: &Value) -> Option<AssetRef> {
    parse_native_asset_id(value).map(|id| AssetRef { id, ticker: None })
}
