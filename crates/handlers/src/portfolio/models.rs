//! Models for portfolios.

use serde::{Deserialize, Serialize};

use prism_core::projection::Provenance;

use crate::utils::PortfolioRef;

/// A named sub-account of an identity (`did/number`, `0` is the default one).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub id: String,
    pub identity_id: String,
    pub number: u64,
    pub name: Option<String>,
    /// Custodian identity when it differs from the owner.
    pub custodian_id: Option<String>,
    /// Block of the deletion, if deleted.
    pub deleted_at: Option<u64>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

prism_core::impl_entity!(Portfolio, "Portfolio");

impl Portfolio {
    pub fn new(portfolio: &PortfolioRef, block: u64) -> Self {
        Self {
            id: portfolio.id(),
            identity_id: portfolio.did.clone(),
            number: portfolio.number,
            name: portfolio.is_default().then(|| "default".to_string()),
            custodian_id: None,
            deleted_at: None,
            provenance: Provenance::at(block),
        }
    }
}
