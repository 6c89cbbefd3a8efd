//! Tier ordering

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification level. "No tier" is represented as `Option<Tier>::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Social consensus
    T1,
    /// Market confirmation
    T2,
    /// Momentum
    T3,
}

impl Tier {
    pub fn rank(self) -> u8 {
        match self {
            Tier::T1 => 1,
            Tier::T2 => 2,
            Tier::T3 => 3,
        }
    }

    /// Rank of an optional tier, where `None` ranks below T1
    pub fn rank_of(tier: Option<Tier>) -> u8 {
        tier.map(Tier::rank).unwrap_or(0)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::T1 => "T1",
            Tier::T2 => "T2",
            Tier::T3 => "T3",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
