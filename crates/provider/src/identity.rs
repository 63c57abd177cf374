//! Service tiers and resource identities
//!
//! A resource identity is one (credential, tier) pair. Rate limits and quota
//! exhaustion are tracked per identity, so two tiers reached through the same
//! API key are independent budgets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Model class offered by the service.
///
/// `Pro` is the privileged tier: higher quality, tighter quota. `Flash` is
/// the standard tier the pool falls back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceTier {
    Pro,
    Flash,
}

impl ServiceTier {
    pub const ALL: [ServiceTier; 2] = [ServiceTier::Pro, ServiceTier::Flash];

    pub fn label(&self) -> &'static str {
        match self {
            ServiceTier::Pro => "pro",
            ServiceTier::Flash => "flash",
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self, ServiceTier::Pro)
    }
}

impl fmt::Display for ServiceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ServiceTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pro" => Ok(ServiceTier::Pro),
            "flash" => Ok(ServiceTier::Flash),
            other => Err(format!("unknown service tier: {other}")),
        }
    }
}

/// One (credential, tier) pairing. Fixed for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceIdentity {
    /// Zero-based index into the ordered credential list.
    pub credential_index: usize,
    pub tier: ServiceTier,
}

impl ResourceIdentity {
    pub fn new(credential_index: usize, tier: ServiceTier) -> Self {
        Self {
            credential_index,
            tier,
        }
    }

    /// Every identity for `credentials` keys across `tiers`, tier-major.
    pub fn all(credentials: usize, tiers: &[ServiceTier]) -> Vec<ResourceIdentity> {
        tiers
            .iter()
            .flat_map(|tier| (0..credentials).map(move |idx| ResourceIdentity::new(idx, *tier)))
            .collect()
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Humans count keys from one.
        write!(f, "key#{}/{}", self.credential_index + 1, self.tier)
    }
}
