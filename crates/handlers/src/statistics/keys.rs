//! Composite keys shared by the write and removal paths.
//!
//! Adding and removing a statistic must derive the exact same id, so both
//! go through [`StatKey::id`] and [`Condition::id`].

use serde_json::Value;

use prism_core::projection::compose_id;

use crate::utils::{field, parse_did, parse_u32, parse_u64, parse_variant};

/// Statistic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatOp {
    Count,
    Balance,
}

impl StatOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "Count",
            Self::Balance => "Balance",
        }
    }

    pub fn parse(value: &Value) -> Option<Self> {
        match parse_variant(value)?.0 {
            "Count" => Some(Self::Count),
            "Balance" => Some(Self::Balance),
            _ => None,
        }
    }
}

/// `Accredited | Affiliate | Jurisdiction | {"Custom": id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClaimType {
    pub name: String,
    pub custom_id: Option<u32>,
}

impl ClaimType {
    pub fn parse(value: &Value) -> Option<Self> {
        match parse_variant(value)? {
            (name @ ("Accredited" | "Affiliate" | "Jurisdiction"), _) => Some(Self {
                name: name.to_string(),
                custom_id: None,
            }),
            ("Custom", inner) => Some(Self {
                name: "Custom".to_string(),
                custom_id: Some(parse_u32(inner)?),
            }),
            _ => None,
        }
    }

    fn custom_part(&self) -> String {
        self.custom_id.map(|id| id.to_string()).unwrap_or_default()
    }
}

/// Claim scoping of a statistic: claim type plus trusted issuer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClaimIssuer {
    pub claim_type: ClaimType,
    pub issuer: String,
}

impl ClaimIssuer {
    /// `null` or `[claim_type, issuer]`.
    pub fn parse_optional(value: Option<&Value>) -> Option<Option<Self>> {
        match value {
            None | Some(Value::Null) => Some(None),
            Some(v) => Some(Some(Self {
                claim_type: ClaimType::parse(field(v, "claim_type", 0)?)?,
                issuer: parse_did(field(v, "issuer", 1)?)?,
            })),
        }
    }
}

/// A statistic type of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatKey {
    pub asset_id: String,
    pub op: StatOp,
    pub claim: Option<ClaimIssuer>,
}

/// `{op, claim_issuer}` without its asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatTypeValue {
    pub op: StatOp,
    pub claim: Option<ClaimIssuer>,
}

impl StatTypeValue {
    pub fn parse(value: &Value) -> Option<Self> {
        let op = StatOp::parse(value.get("op").or_else(|| value.get("operation_type"))?)?;
        let claim = ClaimIssuer::parse_optional(value.get("claim_issuer"))?;
        Some(Self { op, claim })
    }

    pub fn for_asset(self, asset_id: &str) -> StatKey {
        StatKey {
            asset_id: asset_id.to_string(),
            op: self.op,
            claim: self.claim,
        }
    }
}

impl StatKey {
    /// `asset/op[/claimType[/customId]/issuer]`
    pub fn id(&self) -> String {
        let (claim_type, custom, issuer) = match &self.claim {
            Some(c) => (c.claim_type.name.as_str(), c.claim_type.custom_part(), c.issuer.as_str()),
            None => ("", String::new(), ""),
        };
        compose_id(&[
            self.asset_id.as_str(),
            self.op.as_str(),
            claim_type,
            custom.as_str(),
            issuer,
        ])
    }
}

/// Claim a count/ownership condition applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatClaim {
    Accredited(bool),
    Affiliate(bool),
    Jurisdiction(Option<String>),
}

impl StatClaim {
    pub fn parse(value: &Value) -> Option<Self> {
        match parse_variant(value)? {
            ("Accredited", v) => v.as_bool().map(Self::Accredited),
            ("Affiliate", v) => v.as_bool().map(Self::Affiliate),
            ("Jurisdiction", Value::Null) => Some(Self::Jurisdiction(None)),
            ("Jurisdiction", v) => parse_variant(v).map(|(c, _)| Self::Jurisdiction(Some(c.to_string()))),
            _ => None,
        }
    }

    pub fn claim_type(&self) -> &'static str {
        match self {
            Self::Accredited(_) => "Accredited",
            Self::Affiliate(_) => "Affiliate",
            Self::Jurisdiction(_) => "Jurisdiction",
        }
    }

    pub fn value(&self) -> Option<String> {
        match self {
            Self::Accredited(b) | Self::Affiliate(b) => Some(b.to_string()),
            Self::Jurisdiction(country) => country.clone(),
        }
    }
}

/// A transfer condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    MaxInvestorCount(u64),
    /// Permill of the total supply.
    MaxInvestorOwnership(u64),
    ClaimCount {
        claim: StatClaim,
        issuer: String,
        min: u64,
        max: Option<u64>,
    },
    ClaimOwnership {
        claim: StatClaim,
        issuer: String,
        min: u64,
        max: u64,
    },
}

impl Condition {
    pub fn parse(value: &Value) -> Option<Self> {
        match parse_variant(value)? {
            ("MaxInvestorCount", n) => parse_u64(n).map(Self::MaxInvestorCount),
            ("MaxInvestorOwnership", p) => parse_u64(p).map(Self::MaxInvestorOwnership),
            ("ClaimCount", args) => Some(Self::ClaimCount {
                claim: StatClaim::parse(args.get(0)?)?,
                issuer: parse_did(args.get(1)?)?,
                min: parse_u64(args.get(2)?)?,
                max: match args.get(3) {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(parse_u64(v)?),
                },
            }),
            ("ClaimOwnership", args) => Some(Self::ClaimOwnership {
                claim: StatClaim::parse(args.get(0)?)?,
                issuer: parse_did(args.get(1)?)?,
                min: parse_u64(args.get(2)?)?,
                max: parse_u64(args.get(3)?)?,
            }),
            _ => None,
        }
    }

    pub fn condition_type(&self) -> &'static str {
        match self {
            Self::MaxInvestorCount(_) => "MaxInvestorCount",
            Self::MaxInvestorOwnership(_) => "MaxInvestorOwnership",
            Self::ClaimCount { .. } => "ClaimCount",
            Self::ClaimOwnership { .. } => "ClaimOwnership",
        }
    }

    pub fn op(&self) -> StatOp {
        match self {
            Self::MaxInvestorCount(_) | Self::ClaimCount { .. } => StatOp::Count,
            Self::MaxInvestorOwnership(_) | Self::ClaimOwnership { .. } => StatOp::Balance,
        }
    }

    pub fn claim(&self) -> Option<(&StatClaim, &str)> {
        match self {
            Self::ClaimCount { claim, issuer, .. } | Self::ClaimOwnership { claim, issuer, .. } => {
                Some((claim, issuer))
            }
            _ => None,
        }
    }

    /// Limit carried by the condition: `n`, or `min..max` (`min..` when
    /// unbounded).
    pub fn bounds(&self) -> String {
        match self {
            Self::MaxInvestorCount(n) | Self::MaxInvestorOwnership(n) => n.to_string(),
            Self::ClaimCount { min, max, .. } => match max {
                Some(max) => format!("{min}..{max}"),
                None => format!("{min}.."),
            },
            Self::ClaimOwnership { min, max, .. } => format!("{min}..{max}"),
        }
    }

    /// `asset/conditionType[/claimType/issuer[/claimValue]]/bounds`
    pub fn id(&self, asset_id: &str) -> String {
        let (claim_type, issuer, value) = match self.claim() {
            Some((claim, issuer)) => (claim.claim_type(), issuer, claim.value().unwrap_or_default()),
            None => ("", "", String::new()),
        };
        let bounds = self.bounds();
        compose_id(&[
            asset_id,
            self.condition_type(),
            claim_type,
            issuer,
            value.as_str(),
            bounds.as_str(),
        ])
    }
}

/// `{asset | asset_id, op, claim_type}` of an exemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExemptKey {
    pub asset_scope: Value,
    pub op: StatOp,
    pub claim_type: Option<ClaimType>,
}

impl ExemptKey {
    pub fn parse(value: &Value) -> Option<Self> {
        let asset_scope = value.get("asset").or_else(|| value.get("asset_id"))?.clone();
        let op = StatOp::parse(value.get("op")?)?;
        let claim_type = match value.get("claim_type") {
            None | Some(Value::Null) => None,
            Some(v) => Some(ClaimType::parse(v)?),
        };
        Some(Self { asset_scope, op, claim_type })
    }

    /// `asset/op[/claimType[/customId]]/identity`
    pub fn id(&self, asset_id: &str, identity: &str) -> String {
        let (claim_type, custom) = match &self.claim_type {
            Some(c) => (c.name.as_str(), c.custom_part()),
            None => ("", String::new()),
        };
        compose_id(&[asset_id, self.op.as_str(), claim_type, custom.as_str(), identity])
    }
}
