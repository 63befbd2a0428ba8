//! The committee's final output and the vocabulary used to build it

use crate::error::{ConfigError, Result, WorkerError};
use crate::exchange::DebateExchange;
use crate::opinion::{MAX_SCORE, MIN_SCORE, OpinionMap, Sentiment, TargetRange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Consensus level at or above which the committee is considered aligned
pub const CONSENSUS_THRESHOLD: f64 = 70.0;

/// Recommendation category derived from the weighted score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StrongSell,
    Sell,
    Hold,
    Buy,
    StrongBuy,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrongSell => write!(f, "Strong Sell"),
            Self::Sell => write!(f, "Sell"),
            Self::Hold => write!(f, "Hold"),
            Self::Buy => write!(f, "Buy"),
            Self::StrongBuy => write!(f, "Strong Buy"),
        }
    }
}

/// Lower score bounds of each recommendation band
///
/// Scores at or above `strong_buy` are Strong Buy, at or above `buy` are Buy,
/// and so on; anything below `sell` is Strong Sell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecommendationBands {
    pub strong_buy: f64,
    pub buy: f64,
    pub hold: f64,
    pub sell: f64,
}

impl Default for RecommendationBands {
    fn default() -> Self {
        Self {
            strong_buy: 8.0,
            buy: 6.5,
            hold: 4.5,
            sell: 3.0,
        }
    }
}

impl RecommendationBands {
    /// Thresholds must be strictly descending and inside the score range
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let ordered = [self.strong_buy, self.buy, self.hold, self.sell];
        if ordered
            .iter()
            .any(|t| !t.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(t))
        {
            return Err(ConfigError::InvalidThresholds(format!(
                "thresholds must lie within {MIN_SCORE}..={MAX_SCORE}"
            )));
        }
        if ordered.windows(2).any(|w| w[0] <= w[1]) {
            return Err(ConfigError::InvalidThresholds(
                "thresholds must be strictly descending (strong_buy > buy > hold > sell)"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Band for a score
    pub fn classify(&self, score: f64) -> Recommendation {
        if score >= self.strong_buy {
            Recommendation::StrongBuy
        } else if score >= self.buy {
            Recommendation::Buy
        } else if score >= self.hold {
            Recommendation::Hold
        } else if score >= self.sell {
            Recommendation::Sell
        } else {
            Recommendation::StrongSell
        }
    }

    /// Threshold closest to `score`, with the bands on either side of it
    pub fn nearest_boundary(&self, score: f64) -> (f64, Recommendation, Recommendation) {
        [
            (self.strong_buy, Recommendation::Buy, Recommendation::StrongBuy),
            (self.buy, Recommendation::Hold, Recommendation::Buy),
            (self.hold, Recommendation::Sell, Recommendation::Hold),
            (self.sell, Recommendation::StrongSell, Recommendation::Sell),
        ]
        .into_iter()
        .min_by(|a, b| (a.0 - score).abs().total_cmp(&(b.0 - score).abs()))
        .unwrap_or((self.hold, Recommendation::Sell, Recommendation::Hold))
    }
}

/// Why a worker did not contribute to the decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum ExclusionReason {
    /// Removed by the focus-area filter
    FilteredOut,
    /// Role switched off by configuration (devil's advocate disabled)
    Disabled,
    /// A dependency failed, so the worker never ran
    DependencyFailed(String),
    /// The worker returned an error or an invalid opinion
    Failed(String),
    /// Per-worker timeout elapsed
    TimedOut,
    /// Run deadline passed
    DeadlineExceeded,
    /// Run was cancelled
    Cancelled,
}

impl From<&WorkerError> for ExclusionReason {
    fn from(err: &WorkerError) -> Self {
        match err {
            WorkerError::TimedOut(_) => Self::TimedOut,
            WorkerError::DeadlineExceeded => Self::DeadlineExceeded,
            WorkerError::Cancelled => Self::Cancelled,
            other => Self::Failed(other.to_string()),
        }
    }
}

/// A worker left out of the decision, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub worker: String,
    pub reason: ExclusionReason,
}

impl Exclusion {
    pub fn new(worker: impl Into<String>, reason: ExclusionReason) -> Self {
        Self {
            worker: worker.into(),
            reason,
        }
    }

    /// Whether the worker was left out by configuration rather than failure
    pub fn is_intentional(&self) -> bool {
        matches!(
            self.reason,
            ExclusionReason::FilteredOut | ExclusionReason::Disabled
        )
    }
}

/// Why the debate stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Devil's advocate disabled, zero rounds, or no challenger registered
    Disabled,
    /// Configured round limit reached
    MaxRounds,
    /// No targeted opinion moved beyond tolerance
    Converged,
    /// The challenger raised nothing to answer
    NoChallenges,
    /// The challenger itself failed
    ChallengerFailed,
    /// Run deadline passed or the run was cancelled
    Interrupted,
}

/// Condensed view of the debate for the decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateSummary {
    pub rounds_completed: u32,
    pub stop_reason: StopReason,
    /// Round limit reached without convergence
    pub stalemate: bool,
    /// Concerns the moderator considered open after the last round
    #[serde(default)]
    pub remaining_concerns: Vec<String>,
}

impl DebateSummary {
    /// Summary of a debate that never ran
    pub fn skipped() -> Self {
        Self {
            rounds_completed: 0,
            stop_reason: StopReason::Disabled,
            stalemate: false,
            remaining_concerns: Vec::new(),
        }
    }
}

/// How a worker's score moved through the debate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreChange {
    pub worker: String,
    pub initial: f64,
    #[serde(rename = "final")]
    pub final_score: f64,
}

impl ScoreChange {
    pub fn delta(&self) -> f64 {
        self.final_score - self.initial
    }
}

/// Two active workers whose final scores are far apart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disagreement {
    pub first: String,
    pub first_score: f64,
    pub second: String,
    pub second_score: f64,
}

impl std::fmt::Display for Disagreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({:.1}/10) vs {} ({:.1}/10)",
            self.first, self.first_score, self.second, self.second_score
        )
    }
}

/// Final investment committee decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitteeDecision {
    pub run_id: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,

    /// Weighted average score over active workers
    pub weighted_score: f64,

    /// Agreement among active workers, 0-100
    pub consensus_level: f64,

    pub recommendation: Recommendation,
    pub final_sentiment: Sentiment,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_range: Option<TargetRange>,

    pub key_strengths: Vec<String>,
    pub key_risks: Vec<String>,

    /// Final opinion of every worker that produced one
    pub opinions: OpinionMap,

    pub debate: Vec<DebateExchange>,
    pub debate_summary: DebateSummary,
    pub score_changes: Vec<ScoreChange>,
    pub disagreements: Vec<Disagreement>,

    /// Workers that did not contribute, with reasons
    pub excluded: Vec<Exclusion>,

    pub decided_at: DateTime<Utc>,
}

impl CommitteeDecision {
    /// Whether the committee reached consensus (>= 70% agreement)
    pub fn has_consensus(&self) -> bool {
        self.consensus_level >= CONSENSUS_THRESHOLD
    }

    pub fn is_buy(&self) -> bool {
        matches!(
            self.recommendation,
            Recommendation::Buy | Recommendation::StrongBuy
        )
    }

    pub fn is_sell(&self) -> bool {
        matches!(
            self.recommendation,
            Recommendation::Sell | Recommendation::StrongSell
        )
    }

    /// Upside from `current_price` to the mid target, in percent
    pub fn upside_potential(&self, current_price: f64) -> Option<f64> {
        let target = self.target_range?;
        if current_price > 0.0 {
            Some((target.mid - current_price) / current_price * 100.0)
        } else {
            None
        }
    }

    /// Workers excluded because something went wrong
    pub fn failed_workers(&self) -> Vec<&str> {
        self.excluded
            .iter()
            .filter(|e| !e.is_intentional())
            .map(|e| e.worker.as_str())
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
