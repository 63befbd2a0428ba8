//! Opinions: the unit of output produced by one worker for one subject

use crate::capability::Capability;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lowest score an opinion may carry
pub const MIN_SCORE: f64 = 0.0;
/// Highest score an opinion may carry
pub const MAX_SCORE: f64 = 10.0;
/// Highest confidence an opinion may carry
pub const MAX_CONFIDENCE: f64 = 100.0;

/// Opinions keyed by worker name
pub type OpinionMap = BTreeMap<String, Opinion>;

/// Discrete stance on the subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    VeryBearish,
    Bearish,
    Neutral,
    Bullish,
    VeryBullish,
}

impl Sentiment {
    /// Map a 0-10 score onto a sentiment band
    pub fn from_score(score: f64) -> Self {
        if score >= 8.0 {
            Self::VeryBullish
        } else if score >= 6.5 {
            Self::Bullish
        } else if score >= 4.5 {
            Self::Neutral
        } else if score >= 3.0 {
            Self::Bearish
        } else {
            Self::VeryBearish
        }
    }

    pub fn is_positive(self) -> bool {
        matches!(self, Self::Bullish | Self::VeryBullish)
    }

    pub fn is_negative(self) -> bool {
        matches!(self, Self::Bearish | Self::VeryBearish)
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VeryBearish => write!(f, "very bearish"),
            Self::Bearish => write!(f, "bearish"),
            Self::Neutral => write!(f, "neutral"),
            Self::Bullish => write!(f, "bullish"),
            Self::VeryBullish => write!(f, "very bullish"),
        }
    }
}

/// Low / mid / high price target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRange {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
}

impl TargetRange {
    pub fn new(low: f64, mid: f64, high: f64) -> Self {
        Self { low, mid, high }
    }

    /// Finite, non-negative and ordered low <= mid <= high
    pub fn is_valid(&self) -> bool {
        [self.low, self.mid, self.high]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
            && self.low <= self.mid
            && self.mid <= self.high
    }
}

/// One worker's structured judgment for one debate round
///
/// Opinions are never edited once produced: a later round yields a new
/// `Opinion` that replaces the previous one for the same worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opinion {
    /// Producing worker
    pub worker: String,

    /// Producing worker's role
    pub capability: Capability,

    /// Subject identifier (ticker)
    pub subject: String,

    /// Score from 0 to 10
    pub score: f64,

    /// Confidence from 0 to 100
    pub confidence: f64,

    pub sentiment: Sentiment,

    pub summary: String,

    /// Worker-specific payload, passed through untouched
    #[serde(default)]
    pub findings: serde_json::Value,

    /// Supporting points, in the worker's order
    #[serde(default)]
    pub key_points: Vec<String>,

    /// Concerns and risks, in the worker's order
    #[serde(default)]
    pub concerns: Vec<String>,

    /// Optional price target (valuation workers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetRange>,

    /// Debate round that produced this version (0 = initial analysis)
    #[serde(default)]
    pub round: u32,

    pub produced_at: DateTime<Utc>,
}

impl Opinion {
    /// Create an opinion with the sentiment derived from the score
    ///
    /// Identity fields are filled in by the orchestrator when the opinion is
    /// accepted, so workers may leave them empty.
    pub fn new(score: f64, confidence: f64, summary: impl Into<String>) -> Self {
        Self {
            worker: String::new(),
            capability: Capability::Quant,
            subject: String::new(),
            score,
            confidence,
            sentiment: Sentiment::from_score(score),
            summary: summary.into(),
            findings: serde_json::Value::Null,
            key_points: Vec::new(),
            concerns: Vec::new(),
            target: None,
            round: 0,
            produced_at: Utc::now(),
        }
    }

    pub fn with_sentiment(mut self, sentiment: Sentiment) -> Self {
        self.sentiment = sentiment;
        self
    }

    pub fn with_key_point(mut self, point: impl Into<String>) -> Self {
        self.key_points.push(point.into());
        self
    }

    pub fn with_concern(mut self, concern: impl Into<String>) -> Self {
        self.concerns.push(concern.into());
        self
    }

    pub fn with_findings(mut self, findings: serde_json::Value) -> Self {
        self.findings = findings;
        self
    }

    pub fn with_target(mut self, target: TargetRange) -> Self {
        self.target = Some(target);
        self
    }

    /// Stamp identity and round onto an opinion returned by a worker
    pub fn stamped(
        mut self,
        worker: &str,
        capability: Capability,
        subject: &str,
        round: u32,
    ) -> Self {
        worker.clone_into(&mut self.worker);
        self.capability = capability;
        subject.clone_into(&mut self.subject);
        self.round = round;
        self
    }

    /// Check score, confidence and target against the data model
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.score.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(&self.score) {
            return Err(format!(
                "score {} outside {MIN_SCORE}..={MAX_SCORE}",
                self.score
            ));
        }
        if !self.confidence.is_finite() || !(0.0..=MAX_CONFIDENCE).contains(&self.confidence) {
            return Err(format!(
                "confidence {} outside 0..={MAX_CONFIDENCE}",
                self.confidence
            ));
        }
        if let Some(target) = &self.target {
            if !target.is_valid() {
                return Err(format!(
                    "target range {}/{}/{} is not ordered",
                    target.low, target.mid, target.high
                ));
            }
        }
        Ok(())
    }

    /// Whether `other` moved beyond `tolerance` in score or confidence
    ///
    /// Confidence lives on a 0-100 scale, so the tolerance is scaled by ten.
    pub fn differs_from(&self, other: &Opinion, tolerance: f64) -> bool {
        (self.score - other.score).abs() > tolerance
            || (self.confidence - other.confidence).abs() > tolerance * 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentiment_bands() {
        assert_eq!(Sentiment::from_score(9.0), Sentiment::VeryBullish);
        assert_eq!(Sentiment::from_score(6.5), Sentiment::Bullish);
        assert_eq!(Sentiment::from_score(5.0), Sentiment::Neutral);
        assert_eq!(Sentiment::from_score(3.0), Sentiment::Bearish);
        assert_eq!(Sentiment::from_score(1.0), Sentiment::VeryBearish);
        assert!(Sentiment::Bullish.is_positive());
        assert!(Sentiment::VeryBearish.is_negative());
    }

    #[test]
    fn test_validate_ranges() {
        assert!(Opinion::new(7.0, 80.0, "ok").validate().is_ok());
        assert!(Opinion::new(10.5, 80.0, "too high").validate().is_err());
        assert!(Opinion::new(f64::NAN, 80.0, "nan").validate().is_err());
        assert!(Opinion::new(5.0, 120.0, "overconfident").validate().is_err());

        let bad_target = Opinion::new(5.0, 50.0, "x").with_target(TargetRange::new(120.0, 100.0, 150.0));
        assert!(bad_target.validate().is_err());
    }

    #[test]
    fn test_stamped() {
        let opinion = Opinion::new(6.0, 70.0, "steady").stamped("val", Capability::Valuation, "AAPL", 2);
        assert_eq!(opinion.worker, "val");
        assert_eq!(opinion.capability, Capability::Valuation);
        assert_eq!(opinion.subject, "AAPL");
        assert_eq!(opinion.round, 2);
    }

    #[test]
    fn test_differs_from() {
        let a = Opinion::new(6.0, 70.0, "a");
        let b = Opinion::new(6.05, 70.5, "b");
        let c = Opinion::new(7.0, 70.0, "c");
        assert!(!a.differs_from(&b, 0.1));
        assert!(a.differs_from(&c, 0.1));
    }
}
