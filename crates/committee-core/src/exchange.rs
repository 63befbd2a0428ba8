//! Debate records: challenges, responses and moderator notes

use crate::opinion::Sentiment;
use serde::{Deserialize, Serialize};

/// How serious a challenge is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// A counter-argument aimed at one worker's opinion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    /// Worker whose opinion is challenged
    pub target: String,

    /// The counter-argument itself
    pub argument: String,

    /// Supporting evidence
    #[serde(default)]
    pub evidence: Vec<String>,

    #[serde(default)]
    pub severity: Severity,
}

impl Challenge {
    pub fn new(target: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            argument: argument.into(),
            evidence: Vec::new(),
            severity: Severity::default(),
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence.push(evidence.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Outcome of one targeted worker's response within a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeResponse {
    pub worker: String,

    /// Score before the response
    pub previous_score: f64,

    /// Score after the response (unchanged when stale)
    pub score: f64,

    /// Whether the opinion moved beyond the convergence tolerance
    pub changed: bool,

    /// The worker failed to respond and kept its previous opinion
    pub stale: bool,

    /// Failure message for stale responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Advisory output of the moderator for one round
///
/// A note never changes anyone's opinion. Its `lean` is read by the
/// aggregator only to break ties at a recommendation threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModeratorNote {
    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub resolved_issues: Vec<String>,

    #[serde(default)]
    pub remaining_concerns: Vec<String>,

    /// The moderator considers the disagreement unresolved
    #[serde(default)]
    pub unresolved_disagreement: bool,

    /// Direction the moderator would break a tie in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lean: Option<Sentiment>,
}

/// One challenge/response/reconcile cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateExchange {
    /// 1-based debate round
    pub round: u32,

    /// Worker that raised the challenges
    pub challenger: String,

    pub challenges: Vec<Challenge>,

    /// One entry per targeted worker
    pub responses: Vec<ExchangeResponse>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderator_note: Option<ModeratorNote>,

    /// No targeted opinion moved beyond tolerance this round
    pub converged: bool,
}

impl DebateExchange {
    /// Challenges aimed at one worker, in the order they were raised
    pub fn challenges_for<'a>(&'a self, worker: &'a str) -> impl Iterator<Item = &'a Challenge> + 'a {
        self.challenges.iter().filter(move |c| c.target == worker)
    }

    /// Workers that failed to respond this round
    pub fn stale_workers(&self) -> Vec<&str> {
        self.responses
            .iter()
            .filter(|r| r.stale)
            .map(|r| r.worker.as_str())
            .collect()
    }
}
