//! Scripted workers
//!
//! A [`ScriptedWorker`] replays a fixed [`Script`]: an initial opinion,
//! per-round revisions, per-round challenges and a moderator note. Scripts
//! deserialize from JSON, which makes them suitable for dry runs of a
//! committee layout and for tests.

use crate::registry::WorkerRegistry;
use async_trait::async_trait;
use committee_core::{
    Challenge, ConfigError, DebateExchange, ModeratorNote, Opinion, TargetRange, Worker,
    WorkerError, WorkerRequest, WorkerResult, WorkerSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Opinion content as written in a script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedOpinion {
    pub score: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetRange>,
}

fn default_confidence() -> f64 {
    70.0
}

impl ScriptedOpinion {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            confidence: default_confidence(),
            summary: String::new(),
            key_points: Vec::new(),
            concerns: Vec::new(),
            target: None,
        }
    }

    fn to_opinion(&self) -> Opinion {
        let mut opinion = Opinion::new(self.score, self.confidence, self.summary.clone());
        opinion.key_points.clone_from(&self.key_points);
        opinion.concerns.clone_from(&self.concerns);
        opinion.target = self.target;
        opinion
    }
}

/// What a scripted worker does in each role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    /// Initial opinion; `None` makes analysis fail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opinion: Option<ScriptedOpinion>,

    /// Error message returned from analysis instead of an opinion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,

    /// Revised opinions keyed by debate round; other rounds hold position
    #[serde(default)]
    pub responses: BTreeMap<u32, ScriptedOpinion>,

    /// Every response fails
    #[serde(default)]
    pub fail_responses: bool,

    /// Challenges raised in each round (challenger only)
    #[serde(default)]
    pub challenges: BTreeMap<u32, Vec<Challenge>>,

    /// Note returned for every reviewed round (moderator only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<ModeratorNote>,

    /// Simulated latency of every call, in milliseconds
    #[serde(default)]
    pub delay_ms: u64,

    /// Panic instead of answering
    #[serde(default)]
    pub panic: bool,
}

/// One member of a scripted committee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedMember {
    #[serde(flatten)]
    pub spec: WorkerSpec,

    #[serde(default)]
    pub script: Script,
}

/// A whole committee described as data
///
/// # Example
///
/// ```
/// use committee_workflow::ScriptedCommittee;
///
/// let committee = ScriptedCommittee::from_json(r#"{
///     "members": [
///         {"name": "quant", "capability": "quant", "script": {"opinion": {"score": 7.0}}},
///         {"name": "da", "capability": "devils_advocate"}
///     ]
/// }"#).unwrap();
///
/// let registry = committee.into_registry().unwrap();
/// assert_eq!(registry.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedCommittee {
    /// Total the member weights must add up to, if declared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_total_weight: Option<f64>,

    pub members: Vec<ScriptedMember>,
}

impl ScriptedCommittee {
    pub fn from_json(json: &str) -> committee_core::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build a validated registry of scripted workers
    pub fn into_registry(self) -> Result<WorkerRegistry, ConfigError> {
        let mut builder = WorkerRegistry::builder();
        if let Some(total) = self.expected_total_weight {
            builder = builder.expected_total_weight(total);
        }
        for member in self.members {
            let worker: std::sync::Arc<dyn Worker> =
                std::sync::Arc::new(ScriptedWorker::new(member.script));
            builder = builder.register(member.spec, worker);
        }
        builder.build()
    }
}

/// A worker that replays a [`Script`]
#[derive(Debug, Default)]
pub struct ScriptedWorker {
    script: Script,
    analyze_calls: AtomicUsize,
    respond_calls: AtomicUsize,
    challenge_calls: AtomicUsize,
    moderate_calls: AtomicUsize,
}

impl ScriptedWorker {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// Worker whose initial opinion carries `score`
    pub fn scoring(score: f64) -> Self {
        Self::new(Script {
            opinion: Some(ScriptedOpinion::new(score)),
            ..Script::default()
        })
    }

    /// Worker whose analysis fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(Script {
            fail: Some(message.into()),
            ..Script::default()
        })
    }

    /// Challenger with no initial view of its own
    pub fn challenger() -> Self {
        Self::scoring(5.0)
    }

    /// Moderator returning `note` for every round
    pub fn moderator(note: ModeratorNote) -> Self {
        Self::new(Script {
            note: Some(note),
            ..Script::default()
        })
    }

    fn initial_mut(&mut self) -> &mut ScriptedOpinion {
        self.script
            .opinion
            .get_or_insert_with(|| ScriptedOpinion::new(5.0))
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.initial_mut().confidence = confidence;
        self
    }

    pub fn key_point(mut self, point: impl Into<String>) -> Self {
        self.initial_mut().key_points.push(point.into());
        self
    }

    pub fn concern(mut self, concern: impl Into<String>) -> Self {
        self.initial_mut().concerns.push(concern.into());
        self
    }

    pub fn target(mut self, target: TargetRange) -> Self {
        self.initial_mut().target = Some(target);
        self
    }

    /// Revise the score to `score` when answering in `round`, keeping the
    /// rest of the initial opinion
    pub fn respond_with(mut self, round: u32, score: f64) -> Self {
        let mut revised = self
            .script
            .opinion
            .clone()
            .unwrap_or_else(|| ScriptedOpinion::new(score));
        revised.score = score;
        self.script.responses.insert(round, revised);
        self
    }

    pub fn fail_responses(mut self) -> Self {
        self.script.fail_responses = true;
        self
    }

    /// Raise `challenge` in `round`
    pub fn raise(mut self, round: u32, challenge: Challenge) -> Self {
        self.script
            .challenges
            .entry(round)
            .or_default()
            .push(challenge);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.script.delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn panicking(mut self) -> Self {
        self.script.panic = true;
        self
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    pub fn respond_calls(&self) -> usize {
        self.respond_calls.load(Ordering::SeqCst)
    }

    pub fn challenge_calls(&self) -> usize {
        self.challenge_calls.load(Ordering::SeqCst)
    }

    pub fn moderate_calls(&self) -> usize {
        self.moderate_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if self.script.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.script.delay_ms)).await;
        }
        if self.script.panic {
            panic!("scripted worker panic");
        }
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn analyze(&self, _request: &WorkerRequest) -> WorkerResult<Opinion> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if let Some(message) = &self.script.fail {
            return Err(WorkerError::failed(message.clone()));
        }
        self.script
            .opinion
            .as_ref()
            .map(ScriptedOpinion::to_opinion)
            .ok_or_else(|| WorkerError::failed("script has no opinion"))
    }

    async fn respond(
        &self,
        request: &WorkerRequest,
        _challenges: &[Challenge],
    ) -> WorkerResult<Opinion> {
        self.respond_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if self.script.fail_responses {
            return Err(WorkerError::failed("scripted response failure"));
        }
        match self.script.responses.get(&request.round) {
            Some(revised) => Ok(revised.to_opinion()),
            None => request
                .own_opinion()
                .cloned()
                .ok_or(WorkerError::Unsupported("respond")),
        }
    }

    async fn challenge(&self, request: &WorkerRequest) -> WorkerResult<Vec<Challenge>> {
        self.challenge_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if let Some(message) = &self.script.fail {
            return Err(WorkerError::failed(message.clone()));
        }
        Ok(self
            .script
            .challenges
            .get(&request.round)
            .cloned()
            .unwrap_or_default())
    }

    async fn moderate(
        &self,
        _request: &WorkerRequest,
        _exchange: &DebateExchange,
    ) -> WorkerResult<ModeratorNote> {
        self.moderate_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        self.script
            .note
            .clone()
            .ok_or(WorkerError::Unsupported("moderate"))
    }
}
