//! Accounting Policies

use serde::{Deserialize, Serialize};

/// What to do when two guests claim the same pinned core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinningPolicy {
    /// Account both guests; the shared core is removed from the free set once
    #[default]
    Lenient,
    /// Reject the snapshot
    Strict,
}

impl std::fmt::Display for PinningPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinningPolicy::Lenient => write!(f, "lenient"),
            PinningPolicy::Strict => write!(f, "strict"),
        }
    }
}

/// Configuration for the NUMA accountant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingConfig {
    #[serde(default)]
    pub pinning: PinningPolicy,
}

impl AccountingConfig {
    pub fn strict() -> Self {
        Self {
            pinning: PinningPolicy::Strict,
        }
    }
}
