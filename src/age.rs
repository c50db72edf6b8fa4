//! Age-bracket defaults
//!
//! Static per-bracket starting points for the threshold model: the default
//! threshold ratio and the minimum duration a quiet period must last to
//! qualify as sleep. Pure lookups, no failure modes.

use serde::{Deserialize, Serialize};

/// Age bracket used to seed per-wearer defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBracket {
    Teen,
    Adult,
    Senior,
}

impl Default for AgeBracket {
    /// Absent age information defaults to Adult
    fn default() -> Self {
        AgeBracket::Adult
    }
}

impl AgeBracket {
    /// Default threshold ratio before any personalization
    pub fn default_ratio(&self) -> f64 {
        match self {
            AgeBracket::Teen => 0.80,
            AgeBracket::Adult => 0.85,
            AgeBracket::Senior => 0.88,
        }
    }

    /// Minimum qualifying sleep duration in seconds
    pub fn min_qualifying_seconds(&self) -> u32 {
        match self {
            AgeBracket::Teen => 1200,
            AgeBracket::Adult => 900,
            AgeBracket::Senior => 600,
        }
    }

    /// Select the bracket for a wearer's age in years
    pub fn for_age(age: u32) -> AgeBracket {
        match age {
            0..=17 => AgeBracket::Teen,
            18..=59 => AgeBracket::Adult,
            _ => AgeBracket::Senior,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeBracket::Teen => "teen",
            AgeBracket::Adult => "adult",
            AgeBracket::Senior => "senior",
        }
    }
}
