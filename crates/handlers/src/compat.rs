//! Runtime version compatibility.
//!
//! Maps a block's `(spec_name, spec_version)` to the decoding variant of
//! every event whose shape changed across runtime upgrades. Thresholds are
//! literal spec versions; every `u32` falls in exactly one band.

use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use serde_json::Value;

use prism_core::error::{DomainError, DomainResult};
use prism_core::models::RuntimeVersion;
use prism_core::ports::EventContext;

use crate::utils::{parse_bytes, parse_ticker, parse_variant};

/// First spec version of each band.
pub const V5_START: u32 = 5_000_000;
pub const V6_START: u32 = 6_000_000;
pub const V6_1_START: u32 = 6_001_000;
pub const V7_START: u32 = 7_000_000;

const PRODUCTION_SPEC_NAMES: &[&str] = &["polymesh_mainnet", "polymesh_testnet"];
const DEVELOPMENT_SPEC_NAMES: &[&str] = &["polymesh_dev", "polymesh_ci", "polymesh_private_dev"];

/// Runtime version band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Band {
    Genesis,
    V5,
    V6,
    V6_1,
    V7,
}

impl Band {
    /// Band of a production spec version.
    pub fn of(spec_version: u32) -> Self {
        match spec_version {
            0..V5_START => Self::Genesis,
            V5_START..V6_START => Self::V5,
            V6_START..V6_1_START => Self::V6,
            V6_1_START..V7_START => Self::V6_1,
            V7_START..=u32::MAX => Self::V7,
        }
    }

    /// Decoding variants of this band.
    pub fn features(self) -> Features {
        use AssetCreatedLayout as A;
        use AutoAffirmOrdering as O;
        use InstructionLayout as I;
        use LegEncoding as L;
        use MultiSigVoting as M;

        let (asset_ids, asset_created, legs, instructions, auto_affirm, multisig) = match self {
            Self::Genesis => (
                AssetIdScheme::LegacyTicker,
                A::NamesFromChainState,
                L::PlainList,
                I::VenueRequired,
                O::Inline,
                M::VoteOnly,
            ),
            Self::V5 => (
                AssetIdScheme::LegacyTicker,
                A::NamedWithUniqueness,
                L::PlainList,
                I::VenueRequired,
                O::Inline,
                M::VoteOnly,
            ),
            Self::V6 => (
                AssetIdScheme::LegacyTicker,
                A::Named,
                L::TaggedTicker,
                I::VenueRequired,
                O::PrecedesCreation,
                M::VoteOnly,
            ),
            Self::V6_1 => (
                AssetIdScheme::LegacyTicker,
                A::Named,
                L::TaggedTicker,
                I::WithMediators,
                O::PrecedesCreation,
                M::VoteOnly,
            ),
            Self::V7 => (
                AssetIdScheme::Native,
                A::NativeId,
                L::TaggedAssetId,
                I::WithMediators,
                O::Inline,
                M::SeparateApprovalVote,
            ),
        };

        let (staking, confidential_auditors) = match self {
            Self::V7 => (StakingLayout::Upstream, ConfidentialAuditorsLayout::AuditorsAndMediators),
            Self::Genesis | Self::V5 | Self::V6 | Self::V6_1 => {
                (StakingLayout::IdentityPrefixed, ConfidentialAuditorsLayout::KeyList)
            }
        };

        Features {
            band: self,
            asset_ids,
            asset_created,
            legs,
            instructions,
            auto_affirm,
            multisig,
            staking,
            confidential_auditors,
        }
    }
}

/// How assets are identified in event parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetIdScheme {
    /// 12-byte ticker, mapped to an id with [`legacy_asset_id`].
    LegacyTicker,
    /// 16-byte native asset id.
    Native,
}

/// Parameter layout of `Asset.AssetCreated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetCreatedLayout {
    /// `[did, ticker, divisible, asset_type, beneficiary, disable_iu]`;
    /// name and funding round must be read from chain state.
    NamesFromChainState,
    /// `[did, ticker, divisible, asset_type, beneficiary, name, identifiers, funding_round, disable_iu]`
    NamedWithUniqueness,
    /// `[did, ticker, divisible, asset_type, beneficiary, name, identifiers, funding_round]`
    Named,
    /// `[did, asset_id, divisible, asset_type, beneficiary, name, identifiers, funding_round]`
    NativeId,
}

/// Encoding of settlement legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegEncoding {
    /// `{from, to, asset: ticker, amount}`
    PlainList,
    /// `{"Fungible": {sender, receiver, ticker, amount}} | {"NonFungible": ..} | {"OffChain": ..}`
    TaggedTicker,
    /// Same tags, assets carried as native ids.
    TaggedAssetId,
}

/// Layout of `Settlement.InstructionCreated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionLayout {
    /// `[did, venue, id, settlement_type, trade_date, value_date, legs, memo]`
    VenueRequired,
    /// Optional venue plus trailing `mediators`.
    WithMediators,
}

/// Relative order of `InstructionAutomaticallyAffirmed` and
/// `InstructionCreated` within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoAffirmOrdering {
    /// Creation is emitted first; process auto-affirmations as they come.
    Inline,
    /// Auto-affirmations are emitted before the creation they refer to.
    PrecedesCreation,
}

/// MultiSig vote semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiSigVoting {
    /// `ProposalApproved` is a signer's approval vote.
    VoteOnly,
    /// `ProposalApprovalVote` is the vote; `ProposalApproved` marks the
    /// threshold reached.
    SeparateApprovalVote,
}

/// Parameter layout of Staking events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakingLayout {
    /// `Bonded`, `Unbonded` and `Reward` lead with the stash's identity:
    /// `[did, stash, amount]`. `Slash` and `Withdrawn` are `[stash, amount]`.
    IdentityPrefixed,
    /// `[stash, amount]`, except `Rewarded` which is `[stash, dest, amount]`.
    Upstream,
}

/// Shape of the auditors parameter of `ConfidentialAsset.AssetCreated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidentialAuditorsLayout {
    /// Plain list of auditor keys.
    KeyList,
    /// `{auditors, mediators}` record.
    AuditorsAndMediators,
}

/// Every decoding variant of one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub band: Band,
    pub asset_ids: AssetIdScheme,
    pub asset_created: AssetCreatedLayout,
    pub legs: LegEncoding,
    pub instructions: InstructionLayout,
    pub auto_affirm: AutoAffirmOrdering,
    pub multisig: MultiSigVoting,
    pub staking: StakingLayout,
    pub confidential_auditors: ConfidentialAuditorsLayout,
}

/// Resolve the features of a runtime.
///
/// Development chains always run the newest code and resolve to the newest
/// band whatever their version counter says. Unknown spec names are refused.
pub fn resolve(spec_name: &str, spec_version: u32) -> DomainResult<Features> {
    if PRODUCTION_SPEC_NAMES.contains(&spec_name) {
        return Ok(Band::of(spec_version).features());
    }
    if DEVELOPMENT_SPEC_NAMES.contains(&spec_name) {
        return Ok(Band::V7.features());
    }
    Err(DomainError::UnsupportedRuntime {
        spec_name: spec_name.to_string(),
        spec_version,
    })
}

/// [`resolve`] for a block's runtime.
pub fn resolve_runtime(runtime: &RuntimeVersion) -> DomainResult<Features> {
    resolve(&runtime.spec_name, runtime.spec_version)
}

/// Features of the runtime that emitted `ctx`'s event.
pub fn for_event(ctx: &EventContext<'_>) -> DomainResult<Features> {
    resolve_runtime(&ctx.block.block.runtime)
}

// =============================================================================
// Asset identifiers
// =============================================================================

type Blake2b128 = Blake2b<U16>;

/// Asset id derived from a legacy ticker.
///
/// `blake2b-128("legacy_ticker" ‖ ticker padded to 12 bytes)` with UUID v8
/// version and variant bits set, as `0x` hex.
pub fn legacy_asset_id(ticker: &str) -> String {
    let mut padded = [0u8; 12];
    let bytes = ticker.as_bytes();
    let len = bytes.len().min(12);
    padded[..len].copy_from_slice(&bytes[..len]);

    let mut id: [u8; 16] = Blake2b128::new()
        .chain_update(b"legacy_ticker")
        .chain_update(padded)
        .finalize()
        .into();
    id[6] = (id[6] & 0x0f) | 0x80;
    id[8] = (id[8] & 0x3f) | 0x80;
    format!("0x{}", hex::encode(id))
}

/// An asset as named by an event: resolved id, plus the ticker when the
/// parameter carried one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub id: String,
    pub ticker: Option<String>,
}

impl AssetRef {
    pub fn from_ticker(ticker: &str) -> Self {
        Self {
            id: legacy_asset_id(ticker),
            ticker: Some(ticker.to_string()),
        }
    }
}

/// Parse a 16-byte native asset id.
pub fn parse_native_asset_id(value: &Value) -> Option<String> {
    let bytes = parse_bytes(value)?;
    (bytes.len() == 16).then(|| format!("0x{}", hex::encode(bytes)))
}

impl Features {
    /// Parse an asset parameter according to the identifier scheme.
    pub fn parse_asset(&self, value: &Value) -> Option<AssetRef> {
        match self.asset_ids {
            AssetIdScheme::LegacyTicker => parse_ticker(value).map(|t| AssetRef::from_ticker(&t)),
            AssetIdScheme::Native => parse_native_asset_id(value).map(|id| AssetRef { id, ticker: None }),
        }
    }

    /// Parse an asset scope: `{"Ticker": t}`, `{"Asset": id}` or a bare
    /// asset value.
    pub fn parse_asset_scope(&self, value: &Value) -> Option<AssetRef> {
        match parse_variant(value) {
            Some(("Ticker", inner)) => parse_ticker(inner).map(|t| AssetRef::from_ticker(&t)),
            Some(("Asset", inner)) => {
                parse_native_asset_id(inner).map(|id| AssetRef { id, ticker: None })
            }
            _ => self.parse_asset(value),
        }
    }

    /// Whether `ProposalApproved` is a vote on this runtime.
    pub fn approval_is_vote(&self) -> bool {
        self.multisig == MultiSigVoting::VoteOnly
    }
}
