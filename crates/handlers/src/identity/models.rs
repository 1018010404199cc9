//! Models for identities and claims.

use serde::{Deserialize, Serialize};

use prism_core::projection::Provenance;

/// An on-chain identity (DID).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub primary_account: String,
    pub secondary_accounts: Vec<String>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(Identity, "Identity");

/// Claim scope: what a claim applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// A claim issued about an identity (`target/claimType[/customId][/scope]/issuer`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub id: String,
    pub target_id: String,
    pub issuer_id: String,
    pub claim_type: String,
    pub scope: Option<Scope>,
    pub jurisdiction: Option<String>,
    pub cdd_id: Option<String>,
    pub custom_claim_type_id: Option<u32>,
    pub issuance_date: Option<u64>,
    pub last_update_date: Option<u64>,
    pub expiry: Option<u64>,
    /// Block of the revocation, if revoked.
    pub revoked_at: Option<u64>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(Claim, "Claim");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomClaimType {
    pub id: String,
    pub name: String,
    pub identity_id: String,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(CustomClaimType, "CustomClaimType");
