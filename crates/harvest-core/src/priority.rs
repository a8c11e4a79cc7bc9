use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Base priority for interactive requests (single scrapes).
pub const BASE_PRIORITY: i32 = 10;
/// Base priority for bulk work (batch scrapes, crawls).
pub const BULK_BASE_PRIORITY: i32 = 20;

/// Pricing plan of a team, which bounds how much load it may queue at base priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamTier {
    #[default]
    Free,
    Hobby,
    Standard,
    Growth,
    Scale,
}

impl TeamTier {
    /// Admitted jobs a team may have in flight before priority degrades.
    pub fn bucket_limit(&self) -> u64 {
        match self {
            TeamTier::Free => 25,
            TeamTier::Hobby => 50,
            TeamTier::Standard => 100,
            TeamTier::Growth => 200,
            TeamTier::Scale => 400,
        }
    }

    /// Priority penalty per job above the bucket limit.
    pub fn adjustment(&self) -> f64 {
        match self {
            TeamTier::Free => 1.0,
            TeamTier::Hobby => 0.5,
            TeamTier::Standard => 0.3,
            TeamTier::Growth => 0.2,
            TeamTier::Scale => 0.1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TeamTier::Free => "free",
            TeamTier::Hobby => "hobby",
            TeamTier::Standard => "standard",
            TeamTier::Growth => "growth",
            TeamTier::Scale => "scale",
        }
    }
}

impl fmt::Display for TeamTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TeamTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(TeamTier::Free),
            "hobby" => Ok(TeamTier::Hobby),
            "standard" => Ok(TeamTier::Standard),
            "growth" => Ok(TeamTier::Growth),
            "scale" => Ok(TeamTier::Scale),
            _ => Err(format!("Unknown team tier: {}", s)),
        }
    }
}

/// Priority for a new job given the team's current admitted load.
///
/// Within the tier's bucket the base priority is kept; beyond it every
/// extra job pushes the team further back (higher value = served later).
pub fn job_priority(base: i32, tier: TeamTier, admitted_load: u64) -> i32 {
    let limit = tier.bucket_limit();
    if admitted_load <= limit {
        return base;
    }
    let penalty = ((admitted_load - limit) as f64 * tier.adjustment()).ceil();
    base.saturating_add(penalty.min(i32::MAX as f64) as i32)
}
