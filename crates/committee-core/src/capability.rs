//! Capability tags and focus-area filtering

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// The fixed set of roles a committee member can play
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Macroeconomic conditions
    Macro,
    /// Quantitative / financial statement analysis
    Quant,
    /// Management, moat, governance
    Qualitative,
    /// Industry structure and competition
    Industry,
    /// Intrinsic value and price targets
    Valuation,
    /// Risk assessment
    Risk,
    /// Challenger that cross-examines the other opinions
    DevilsAdvocate,
    /// Moderator that reviews each debate round
    Chairman,
}

impl Capability {
    /// All capabilities in declaration order
    pub const ALL: [Capability; 8] = [
        Self::Macro,
        Self::Quant,
        Self::Qualitative,
        Self::Industry,
        Self::Valuation,
        Self::Risk,
        Self::DevilsAdvocate,
        Self::Chairman,
    ];

    /// Stable snake_case name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Macro => "macro",
            Self::Quant => "quant",
            Self::Qualitative => "qualitative",
            Self::Industry => "industry",
            Self::Valuation => "valuation",
            Self::Risk => "risk",
            Self::DevilsAdvocate => "devils_advocate",
            Self::Chairman => "chairman",
        }
    }

    /// Challenger and moderator roles steer the debate rather than analyse
    pub fn is_moderator(self) -> bool {
        matches!(self, Self::DevilsAdvocate | Self::Chairman)
    }

    /// Whether this role is allowed to produce price targets
    pub fn supplies_targets(self) -> bool {
        matches!(self, Self::Valuation)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown capability '{s}'"))
    }
}

/// Restricts which analyst capabilities take part in a run
///
/// Moderator roles are never removed by a focus filter; the challenger is
/// switched on and off by the workflow configuration instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "capabilities")]
pub enum FocusFilter {
    /// Only these capabilities take part
    Include(BTreeSet<Capability>),
    /// Every capability except these takes part
    Exclude(BTreeSet<Capability>),
}

impl FocusFilter {
    /// Build an include filter
    pub fn include(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self::Include(capabilities.into_iter().collect())
    }

    /// Build an exclude filter
    pub fn exclude(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self::Exclude(capabilities.into_iter().collect())
    }

    /// Whether a worker with this capability stays in the run
    pub fn admits(&self, capability: Capability) -> bool {
        if capability.is_moderator() {
            return true;
        }
        match self {
            Self::Include(set) => set.contains(&capability),
            Self::Exclude(set) => !set.contains(&capability),
        }
    }
}
