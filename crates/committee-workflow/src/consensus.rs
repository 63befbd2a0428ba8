//! Consensus aggregation: weighted score, agreement level and merged views

use crate::registry::WorkerRegistry;
use committee_core::opinion::{MAX_SCORE, MIN_SCORE};
use committee_core::{
    ConfigError, DebateExchange, Disagreement, Exclusion, Opinion, OpinionMap, Recommendation,
    RecommendationBands, RunFailure, Sentiment, TargetRange,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Tuning for the aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Score thresholds of the recommendation bands
    pub bands: RecommendationBands,

    /// Maximum number of key strengths and of key risks
    pub max_key_items: usize,

    /// Distance from a threshold within which the moderator's lean decides
    pub tie_break_margin: f64,

    /// Score gap at which two workers are reported as disagreeing
    pub disagreement_threshold: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            bands: RecommendationBands::default(),
            max_key_items: 5,
            tie_break_margin: 0.25,
            disagreement_threshold: 3.0,
        }
    }
}

impl AggregationConfig {
    pub fn builder() -> AggregationConfigBuilder {
        AggregationConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bands.validate()?;

        if self.max_key_items == 0 {
            return Err(ConfigError::InvalidWorkflow(
                "max_key_items must be greater than 0".to_string(),
            ));
        }
        if !self.tie_break_margin.is_finite() || self.tie_break_margin < 0.0 {
            return Err(ConfigError::InvalidWorkflow(format!(
                "tie_break_margin must be a non-negative number, got {}",
                self.tie_break_margin
            )));
        }
        if !self.disagreement_threshold.is_finite() || self.disagreement_threshold <= 0.0 {
            return Err(ConfigError::InvalidWorkflow(format!(
                "disagreement_threshold must be positive, got {}",
                self.disagreement_threshold
            )));
        }
        Ok(())
    }
}

/// Builder for AggregationConfig
#[derive(Debug, Default)]
pub struct AggregationConfigBuilder {
    bands: Option<RecommendationBands>,
    max_key_items: Option<usize>,
    tie_break_margin: Option<f64>,
    disagreement_threshold: Option<f64>,
}

impl AggregationConfigBuilder {
    pub fn bands(mut self, bands: RecommendationBands) -> Self {
        self.bands = Some(bands);
        self
    }

    pub fn max_key_items(mut self, max: usize) -> Self {
        self.max_key_items = Some(max);
        self
    }

    pub fn tie_break_margin(mut self, margin: f64) -> Self {
        self.tie_break_margin = Some(margin);
        self
    }

    pub fn disagreement_threshold(mut self, threshold: f64) -> Self {
        self.disagreement_threshold = Some(threshold);
        self
    }

    pub fn build(self) -> Result<AggregationConfig, ConfigError> {
        let defaults = AggregationConfig::default();
        let config = AggregationConfig {
            bands: self.bands.unwrap_or(defaults.bands),
            max_key_items: self.max_key_items.unwrap_or(defaults.max_key_items),
            tie_break_margin: self.tie_break_margin.unwrap_or(defaults.tie_break_margin),
            disagreement_threshold: self
                .disagreement_threshold
                .unwrap_or(defaults.disagreement_threshold),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Numbers and merged views computed from the final opinions
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub weighted_score: f64,
    pub consensus_level: f64,
    pub recommendation: Recommendation,
    pub final_sentiment: Sentiment,
    pub target_range: Option<TargetRange>,
    pub key_strengths: Vec<String>,
    pub key_risks: Vec<String>,
    pub disagreements: Vec<Disagreement>,
    /// Active workers, heaviest first
    pub active: Vec<String>,
}

/// Merges final opinions into one verdict
#[derive(Debug, Clone, Default)]
pub struct ConsensusAggregator {
    config: AggregationConfig,
}

impl ConsensusAggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Aggregate the final opinions of active workers
    ///
    /// A worker is active when it has a final opinion, a positive weight and
    /// an analyst role. The moderator's latest lean is consulted only when the weighted score
    /// sits within the tie-break margin of a band threshold.
    pub fn aggregate(
        &self,
        registry: &WorkerRegistry,
        opinions: &OpinionMap,
        exchanges: &[DebateExchange],
        excluded: &[Exclusion],
    ) -> Result<Aggregate, RunFailure> {
        let mut active: Vec<(&Opinion, f64)> = opinions
            .iter()
            .filter_map(|(name, opinion)| {
                registry
                    .spec(name)
                    .filter(|spec| spec.is_voting() && !spec.capability.is_moderator())
                    .map(|spec| (opinion, spec.weight))
            })
            .collect();

        if active.is_empty() {
            return Err(RunFailure::NoActiveWorkers {
                excluded: excluded.to_vec(),
            });
        }

        // heaviest first, then by name
        active.sort_by(|(a, wa), (b, wb)| wb.total_cmp(wa).then_with(|| a.worker.cmp(&b.worker)));

        let weighted_score = weighted_score(&active);
        let scores: Vec<f64> = active.iter().map(|(o, _)| o.score).collect();
        let consensus_level = consensus_level(&scores);
        let recommendation = self.recommend(weighted_score, exchanges);

        let aggregate = Aggregate {
            weighted_score,
            consensus_level,
            recommendation,
            final_sentiment: Sentiment::from_score(weighted_score),
            target_range: merge_targets(&active),
            key_strengths: merge_items(
                active.iter().map(|(o, _)| o.key_points.as_slice()),
                self.config.max_key_items,
            ),
            key_risks: merge_items(
                active.iter().map(|(o, _)| o.concerns.as_slice()),
                self.config.max_key_items,
            ),
            disagreements: self.disagreements(&active),
            active: active.iter().map(|(o, _)| o.worker.clone()).collect(),
        };

        debug!(
            weighted_score = aggregate.weighted_score,
            consensus = aggregate.consensus_level,
            recommendation = %aggregate.recommendation,
            active = aggregate.active.len(),
            "Opinions aggregated"
        );
        Ok(aggregate)
    }

    fn recommend(&self, score: f64, exchanges: &[DebateExchange]) -> Recommendation {
        let bands = &self.config.bands;
        let base = bands.classify(score);

        let lean = exchanges
            .iter()
            .rev()
            .find_map(|e| e.moderator_note.as_ref())
            .and_then(|note| note.lean);
        let Some(lean) = lean else {
            return base;
        };

        let (threshold, below, above) = bands.nearest_boundary(score);
        if (score - threshold).abs() > self.config.tie_break_margin {
            return base;
        }

        let chosen = if lean.is_positive() {
            above
        } else if lean.is_negative() {
            below
        } else {
            base
        };
        if chosen != base {
            debug!(score, threshold, lean = %lean, from = %base, to = %chosen, "Tie broken by moderator lean");
        }
        chosen
    }

    fn disagreements(&self, active: &[(&Opinion, f64)]) -> Vec<Disagreement> {
        let mut by_name: Vec<&Opinion> = active.iter().map(|(o, _)| *o).collect();
        by_name.sort_by(|a, b| a.worker.cmp(&b.worker));

        let mut found = Vec::new();
        for (i, first) in by_name.iter().enumerate() {
            for second in &by_name[i + 1..] {
                if (first.score - second.score).abs() >= self.config.disagreement_threshold {
                    found.push(Disagreement {
                        first: first.worker.clone(),
                        first_score: first.score,
                        second: second.worker.clone(),
                        second_score: second.score,
                    });
                }
            }
        }
        found
    }
}

fn weighted_score(active: &[(&Opinion, f64)]) -> f64 {
    let total: f64 = active.iter().map(|(_, w)| w).sum();
    let sum: f64 = active.iter().map(|(o, w)| o.score * w).sum();
    (sum / total).clamp(MIN_SCORE, MAX_SCORE)
}

/// Agreement on a 0-100 scale from the population variance of `scores`
///
/// The variance is normalised by the largest variance the score range
/// allows (half the scores at each bound), so identical scores give 100 and
/// a symmetric split across the full range gives 0.
pub fn consensus_level(scores: &[f64]) -> f64 {
    if scores.len() < 2 {
        return 100.0;
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    let max_variance = ((MAX_SCORE - MIN_SCORE) / 2.0).powi(2);

    let level = (100.0 * (1.0 - variance / max_variance)).clamp(0.0, 100.0);
    (level * 10.0).round() / 10.0
}

fn merge_targets(active: &[(&Opinion, f64)]) -> Option<TargetRange> {
    let suppliers: Vec<(&TargetRange, f64)> = active
        .iter()
        .filter_map(|(o, w)| o.target.as_ref().map(|t| (t, *w)))
        .collect();
    if suppliers.is_empty() {
        return None;
    }

    let low = suppliers.iter().map(|(t, _)| t.low).fold(f64::INFINITY, f64::min);
    let high = suppliers
        .iter()
        .map(|(t, _)| t.high)
        .fold(f64::NEG_INFINITY, f64::max);
    let total: f64 = suppliers.iter().map(|(_, w)| w).sum();
    let mid = suppliers.iter().map(|(t, w)| t.mid * w).sum::<f64>() / total;

    Some(TargetRange::new(low, mid, high))
}

/// Trimmed, lower-cased, whitespace-collapsed form used for dedup
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn merge_items<'o>(lists: impl Iterator<Item = &'o [String]>, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for item in lists.flatten() {
        if merged.len() == max {
            break;
        }
        let key = normalize(item);
        if !key.is_empty() && seen.insert(key) {
            merged.push(item.trim().to_string());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedWorker;
    use committee_core::{Capability, ModeratorNote, Worker, WorkerSpec};
    use std::sync::Arc;

    fn registry(weights: &[(&str, f64)]) -> WorkerRegistry {
        weights
            .iter()
            .fold(WorkerRegistry::builder(), |builder, (name, weight)| {
                builder.register(
                    WorkerSpec::new(*name, Capability::Quant).weight(*weight),
                    Arc::new(ScriptedWorker::scoring(5.0)) as Arc<dyn Worker>,
                )
            })
            .build()
            .unwrap()
    }

    fn opinion(worker: &str, score: f64) -> Opinion {
        Opinion::new(score, 70.0, "").stamped(worker, Capability::Quant, "AAPL", 0)
    }

    fn opinions(list: Vec<Opinion>) -> OpinionMap {
        list.into_iter().map(|o| (o.worker.clone(), o)).collect()
    }

    fn note_leaning(lean: Sentiment) -> DebateExchange {
        DebateExchange {
            round: 1,
            challenger: "da".to_string(),
            challenges: Vec::new(),
            responses: Vec::new(),
            moderator_note: Some(ModeratorNote {
                lean: Some(lean),
                ..ModeratorNote::default()
            }),
            converged: true,
        }
    }

    #[test]
    fn test_weighted_score_renormalises_over_active() {
        let registry = registry(&[("a", 1.0), ("b", 1.0), ("c", 1.0), ("d", 1.0)]);
        let aggregator = ConsensusAggregator::default();

        // d failed, so it has no opinion
        let final_opinions = opinions(vec![opinion("a", 8.0), opinion("b", 6.0), opinion("c", 7.0)]);
        let aggregate = aggregator
            .aggregate(&registry, &final_opinions, &[], &[])
            .unwrap();

        assert_eq!(aggregate.weighted_score, 7.0);
        assert_eq!(aggregate.recommendation, Recommendation::Buy);
        assert_eq!(aggregate.final_sentiment, Sentiment::Bullish);
        assert_eq!(aggregate.active.len(), 3);
    }

    #[test]
    fn test_zero_weight_workers_do_not_vote() {
        let registry = registry(&[("a", 2.0), ("b", 1.0), ("da", 0.0)]);
        let final_opinions = opinions(vec![opinion("a", 9.0), opinion("b", 3.0), opinion("da", 0.0)]);
        let aggregate = ConsensusAggregator::default()
            .aggregate(&registry, &final_opinions, &[], &[])
            .unwrap();

        assert_eq!(aggregate.weighted_score, 7.0);
        assert_eq!(aggregate.active, vec!["a", "b"]);
    }

    #[test]
    fn test_weighted_score_within_bounds() {
        let registry = registry(&[("a", 0.3), ("b", 1.7), ("c", 4.0)]);
        for scores in [[0.0, 0.0, 0.0], [10.0, 10.0, 10.0], [0.0, 10.0, 3.3], [9.9, 0.1, 5.5]] {
            let final_opinions = opinions(vec![
                opinion("a", scores[0]),
                opinion("b", scores[1]),
                opinion("c", scores[2]),
            ]);
            let aggregate = ConsensusAggregator::default()
                .aggregate(&registry, &final_opinions, &[], &[])
                .unwrap();
            assert!((MIN_SCORE..=MAX_SCORE).contains(&aggregate.weighted_score));
        }
    }

    #[test]
    fn test_no_active_workers() {
        let registry = registry(&[("a", 1.0), ("da", 0.0)]);
        let excluded = vec![Exclusion::new("a", committee_core::ExclusionReason::TimedOut)];
        let result = ConsensusAggregator::default().aggregate(
            &registry,
            &opinions(vec![opinion("da", 5.0)]),
            &[],
            &excluded,
        );
        assert_eq!(result, Err(RunFailure::NoActiveWorkers { excluded }));
    }

    #[test]
    fn test_consensus_extremes() {
        assert_eq!(consensus_level(&[7.0, 7.0, 7.0]), 100.0);
        assert_eq!(consensus_level(&[6.0]), 100.0);
        assert_eq!(consensus_level(&[0.0, 10.0]), 0.0);
        assert_eq!(consensus_level(&[0.0, 0.0, 10.0, 10.0]), 0.0);
    }

    #[test]
    fn test_consensus_monotone_in_dispersion() {
        let tight = consensus_level(&[6.0, 6.5, 7.0]);
        let wider = consensus_level(&[5.0, 6.5, 8.0]);
        let widest = consensus_level(&[2.0, 6.5, 10.0]);
        assert!(tight >= wider);
        assert!(wider >= widest);
        assert!(tight < 100.0);
    }

    #[test]
    fn test_tie_break_uses_latest_lean() {
        let registry = registry(&[("a", 1.0)]);
        let aggregator = ConsensusAggregator::default();
        let near_buy = opinions(vec![opinion("a", 6.4)]);

        let plain = aggregator.aggregate(&registry, &near_buy, &[], &[]).unwrap();
        assert_eq!(plain.recommendation, Recommendation::Hold);

        let bullish = aggregator
            .aggregate(&registry, &near_buy, &[note_leaning(Sentiment::Bullish)], &[])
            .unwrap();
        assert_eq!(bullish.recommendation, Recommendation::Buy);

        // the latest note wins
        let exchanges = [note_leaning(Sentiment::Bullish), note_leaning(Sentiment::Bearish)];
        let bearish = aggregator
            .aggregate(&registry, &near_buy, &exchanges, &[])
            .unwrap();
        assert_eq!(bearish.recommendation, Recommendation::Hold);

        // outside the margin the lean is ignored
        let far = opinions(vec![opinion("a", 5.5)]);
        let ignored = aggregator
            .aggregate(&registry, &far, &[note_leaning(Sentiment::Bullish)], &[])
            .unwrap();
        assert_eq!(ignored.recommendation, Recommendation::Hold);
    }

    #[test]
    fn test_target_range_merge() {
        let registry = registry(&[("v1", 1.0), ("v2", 3.0), ("q", 1.0)]);
        let final_opinions = opinions(vec![
            opinion("v1", 7.0).with_target(TargetRange::new(100.0, 120.0, 150.0)),
            opinion("v2", 7.0).with_target(TargetRange::new(110.0, 140.0, 160.0)),
            opinion("q", 7.0),
        ]);
        let aggregate = ConsensusAggregator::default()
            .aggregate(&registry, &final_opinions, &[], &[])
            .unwrap();

        let target = aggregate.target_range.unwrap();
        assert_eq!(target.low, 100.0);
        assert_eq!(target.high, 160.0);
        assert_eq!(target.mid, 135.0);
    }

    #[test]
    fn test_key_items_dedup_order_and_truncate() {
        let registry = registry(&[("heavy", 3.0), ("light", 1.0), ("mid", 2.0)]);
        let final_opinions = opinions(vec![
            opinion("light", 6.0)
                .with_key_point("Strong balance sheet")
                .with_key_point("light only"),
            opinion("heavy", 6.0)
                .with_key_point("  strong   BALANCE sheet ")
                .with_key_point("pricing power"),
            opinion("mid", 6.0)
                .with_key_point("Pricing Power")
                .with_key_point("services growth")
                .with_concern("regulation"),
        ]);

        let aggregator = ConsensusAggregator::new(
            AggregationConfig::builder().max_key_items(3).build().unwrap(),
        );
        let aggregate = aggregator
            .aggregate(&registry, &final_opinions, &[], &[])
            .unwrap();

        assert_eq!(
            aggregate.key_strengths,
            vec!["strong   BALANCE sheet", "pricing power", "services growth"]
        );
        assert_eq!(aggregate.key_risks, vec!["regulation"]);
    }

    #[test]
    fn test_disagreements() {
        let registry = registry(&[("bull", 1.0), ("bear", 1.0), ("mid", 1.0)]);
        let final_opinions = opinions(vec![opinion("bull", 8.5), opinion("bear", 4.0), opinion("mid", 6.0)]);
        let aggregate = ConsensusAggregator::default()
            .aggregate(&registry, &final_opinions, &[], &[])
            .unwrap();

        assert_eq!(
            aggregate.disagreements,
            vec![Disagreement {
                first: "bear".to_string(),
                first_score: 4.0,
                second: "bull".to_string(),
                second_score: 8.5,
            }]
        );
    }

    #[test]
    fn test_config_validation() {
        tokio_test::assert_ok!(AggregationConfig::default().validate());
        assert!(AggregationConfig::builder().max_key_items(0).build().is_err());
        assert!(AggregationConfig::builder().tie_break_margin(-1.0).build().is_err());
    }
}
