//! Static description of a committee member

use crate::capability::Capability;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Static metadata for one worker, fixed for the lifetime of a registry
///
/// # Example
///
/// ```
/// use committee_core::{Capability, WorkerSpec};
///
/// let spec = WorkerSpec::new("valuation", Capability::Valuation)
///     .depends_on(["quant"])
///     .weight(0.25);
///
/// assert!(spec.debate_eligible);
/// assert!(spec.depends_on.contains("quant"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawWorkerSpec")]
pub struct WorkerSpec {
    /// Unique worker name
    pub name: String,

    /// Role tag
    pub capability: Capability,

    /// Workers that must finish before this one runs
    pub depends_on: BTreeSet<String>,

    /// Whether the challenger may target this worker
    pub debate_eligible: bool,

    /// Aggregation weight; zero means the worker does not vote
    pub weight: f64,
}

/// Serialized form; omitted fields fall back to the capability's defaults
#[derive(Deserialize)]
struct RawWorkerSpec {
    name: String,
    capability: Capability,
    #[serde(default)]
    depends_on: BTreeSet<String>,
    debate_eligible: Option<bool>,
    weight: Option<f64>,
}

impl From<RawWorkerSpec> for WorkerSpec {
    fn from(raw: RawWorkerSpec) -> Self {
        let mut spec = WorkerSpec::new(raw.name, raw.capability);
        spec.depends_on = raw.depends_on;
        if let Some(eligible) = raw.debate_eligible {
            spec.debate_eligible = eligible;
        }
        if let Some(weight) = raw.weight {
            spec.weight = weight;
        }
        spec
    }
}

impl WorkerSpec {
    /// Create a spec with sensible defaults for the capability
    ///
    /// Analysts default to weight 1.0 and debate eligibility; moderators
    /// default to weight 0.0 and are never debate targets.
    pub fn new(name: impl Into<String>, capability: Capability) -> Self {
        let moderator = capability.is_moderator();
        Self {
            name: name.into(),
            capability,
            depends_on: BTreeSet::new(),
            debate_eligible: !moderator,
            weight: if moderator { 0.0 } else { 1.0 },
        }
    }

    /// Add dependencies
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Set the aggregation weight
    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Set debate eligibility
    pub fn debate_eligible(mut self, eligible: bool) -> Self {
        self.debate_eligible = eligible;
        self
    }

    /// Whether this worker contributes to the weighted score
    pub fn is_voting(&self) -> bool {
        self.weight > 0.0
    }
}
