//! Models for asset statistics and transfer restrictions.

use serde::{Deserialize, Serialize};

use prism_core::projection::Provenance;

/// An enabled statistic (`asset/op[/claimType[/customId]/issuer]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatType {
    pub id: String,
    pub asset_id: String,
    pub op_type: String,
    pub claim_type: Option<String>,
    pub custom_claim_type_id: Option<u32>,
    pub claim_issuer_id: Option<String>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(StatType, "StatType");

/// One transfer condition of an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCompliance {
    pub id: String,
    pub asset_id: String,
    /// `MaxInvestorCount`, `MaxInvestorOwnership`, `ClaimCount` or `ClaimOwnership`.
    pub condition_type: String,
    pub op_type: String,
    pub claim_type: Option<String>,
    /// Boolean or jurisdiction the claim condition applies to.
    pub claim_value: Option<String>,
    pub claim_issuer_id: Option<String>,
    /// Investor count or ownership limit (permill).
    pub value: Option<u64>,
    pub min: Option<u64>,
    pub max: Option<u64>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(TransferCompliance, "TransferCompliance");

/// An identity exempted from a transfer condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferComplianceExemption {
    pub id: String,
    pub asset_id: String,
    pub op_type: String,
    pub claim_type: Option<String>,
    pub custom_claim_type_id: Option<u32>,
    pub identity_id: String,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(TransferComplianceExemption, "TransferComplianceExemption");
