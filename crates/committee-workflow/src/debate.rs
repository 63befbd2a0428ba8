//! Debate controller: bounded challenge / response / reconcile rounds
//!
//! ```text
//! Idle ──► Challenging ──► Responding ──► Reconciling ──┐
//!   │           │              │              │         │
//!   └───────────┴──────────────┴──────────────┴─► Done  │
//!               ▲                                       │
//!               └───────────────────────────────────────┘
//! ```
//!
//! Only targeted workers are re-invoked in a round; everyone else carries
//! their opinion forward unchanged. The moderator's note is advisory and
//! never touches an opinion.

use crate::config::WorkflowConfig;
use crate::invoke::{RunControl, accept};
use crate::registry::{RegisteredWorker, WorkerRegistry};
use committee_core::{
    AnalysisRequest, Challenge, Context, DebateExchange, DebateSummary, ExchangeResponse,
    Opinion, OpinionMap, ScoreChange, StopReason, WorkerRequest,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Phase of the debate state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebatePhase {
    Idle,
    Challenging,
    Responding,
    Reconciling,
    Done,
}

impl DebatePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }

    /// Phases reachable from this one
    pub fn valid_transitions(self) -> &'static [DebatePhase] {
        match self {
            Self::Idle => &[Self::Challenging, Self::Done],
            Self::Challenging => &[Self::Responding, Self::Done],
            Self::Responding => &[Self::Reconciling, Self::Done],
            Self::Reconciling => &[Self::Challenging, Self::Done],
            Self::Done => &[],
        }
    }

    pub fn can_transition_to(self, next: DebatePhase) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for DebatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Challenging => write!(f, "challenging"),
            Self::Responding => write!(f, "responding"),
            Self::Reconciling => write!(f, "reconciling"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Attempted move outside the transition table
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid debate transition {from} -> {to}")]
pub struct TransitionError {
    pub from: DebatePhase,
    pub to: DebatePhase,
}

/// Recorded phase change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateTransition {
    pub from: DebatePhase,
    pub to: DebatePhase,
    pub round: u32,
}

/// Current phase, round counter and transition trail
#[derive(Debug, Clone)]
pub struct DebateState {
    phase: DebatePhase,
    round: u32,
    transitions: Vec<DebateTransition>,
}

impl Default for DebateState {
    fn default() -> Self {
        Self::new()
    }
}

impl DebateState {
    pub fn new() -> Self {
        Self {
            phase: DebatePhase::Idle,
            round: 0,
            transitions: Vec::new(),
        }
    }

    pub fn phase(&self) -> DebatePhase {
        self.phase
    }

    /// Current round, 1-based once the first round started
    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn transitions(&self) -> &[DebateTransition] {
        &self.transitions
    }

    /// Move to `to`; entering `Challenging` starts a new round
    pub fn transition(&mut self, to: DebatePhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.can_transition_to(to) {
            return Err(TransitionError {
                from: self.phase,
                to,
            });
        }
        if to == DebatePhase::Challenging {
            self.round += 1;
        }
        debug!(from = %self.phase, to = %to, round = self.round, reason, "Debate transition");
        self.transitions.push(DebateTransition {
            from: self.phase,
            to,
            round: self.round,
        });
        self.phase = to;
        Ok(())
    }
}

/// Everything the debate produced
#[derive(Debug, Clone)]
pub struct DebateOutcome {
    /// Final opinion per worker
    pub opinions: OpinionMap,

    /// Every accepted version per worker, oldest first
    pub history: BTreeMap<String, Vec<Opinion>>,

    pub exchanges: Vec<DebateExchange>,
    pub summary: DebateSummary,
    pub score_changes: Vec<ScoreChange>,
    pub transitions: Vec<DebateTransition>,
}

/// Runs debate rounds for one committee run
pub struct DebateController<'a> {
    registry: &'a WorkerRegistry,
    config: &'a WorkflowConfig,
}

impl<'a> DebateController<'a> {
    pub fn new(registry: &'a WorkerRegistry, config: &'a WorkflowConfig) -> Self {
        Self { registry, config }
    }

    /// Debate `initial` opinions until a stop condition is met
    ///
    /// With the devil's advocate disabled, zero rounds, or no registered
    /// challenger the initial opinions come back unchanged.
    pub async fn run(
        &self,
        initial: OpinionMap,
        request: &Arc<AnalysisRequest>,
        context: &Arc<Context>,
        control: &RunControl,
    ) -> DebateOutcome {
        let mut session = Session {
            registry: self.registry,
            config: self.config,
            request,
            context,
            control,
            state: DebateState::new(),
            history: initial
                .iter()
                .map(|(name, opinion)| (name.clone(), vec![opinion.clone()]))
                .collect(),
            opinions: initial,
            exchanges: Vec::new(),
        };

        let stop = match self.registry.challenger() {
            Some(challenger) if self.config.debate_enabled() => {
                if session.opinions.contains_key(&challenger.spec.name) {
                    match session.run_rounds(challenger).await {
                        Ok(stop) => stop,
                        Err(err) => {
                            error!(error = %err, "Debate aborted");
                            StopReason::Interrupted
                        }
                    }
                } else {
                    warn!(challenger = %challenger.spec.name, "Challenger has no opinion, skipping debate");
                    StopReason::ChallengerFailed
                }
            }
            _ => StopReason::Disabled,
        };

        session.finish(stop)
    }
}

struct Session<'r> {
    registry: &'r WorkerRegistry,
    config: &'r WorkflowConfig,
    request: &'r Arc<AnalysisRequest>,
    context: &'r Arc<Context>,
    control: &'r RunControl,
    state: DebateState,
    opinions: OpinionMap,
    history: BTreeMap<String, Vec<Opinion>>,
    exchanges: Vec<DebateExchange>,
}

impl Session<'_> {
    fn worker_request(&self, worker: &RegisteredWorker, opinions: Arc<OpinionMap>) -> WorkerRequest {
        WorkerRequest {
            worker: worker.spec.name.clone(),
            capability: worker.spec.capability,
            subject: self.request.subject.clone(),
            round: self.state.round(),
            opinions,
            request: Arc::clone(self.request),
            context: Arc::clone(self.context),
        }
    }

    /// Opinions the challenger may target
    fn eligible(&self) -> OpinionMap {
        self.opinions
            .iter()
            .filter(|(name, _)| {
                self.registry
                    .spec(name)
                    .is_some_and(|s| s.debate_eligible && !s.capability.is_moderator())
            })
            .map(|(name, opinion)| (name.clone(), opinion.clone()))
            .collect()
    }

    async fn run_rounds(&mut self, challenger: &RegisteredWorker) -> Result<StopReason, TransitionError> {
        loop {
            if self.control.is_interrupted() {
                return Ok(StopReason::Interrupted);
            }
            if self.state.round() >= self.config.max_debate_rounds {
                return Ok(StopReason::MaxRounds);
            }

            self.state.transition(DebatePhase::Challenging, "round started")?;
            let round = self.state.round();
            info!(round, challenger = %challenger.spec.name, "Debate round started");

            let Some(challenges) = self.challenge(challenger).await else {
                return Ok(if self.control.is_interrupted() {
                    StopReason::Interrupted
                } else {
                    StopReason::ChallengerFailed
                });
            };
            if challenges.is_empty() {
                info!(round, "No challenges raised, ending debate");
                return Ok(StopReason::NoChallenges);
            }

            self.state.transition(DebatePhase::Responding, "challenges raised")?;
            let (responses, converged) = self.respond(&challenges).await;

            self.state.transition(DebatePhase::Reconciling, "responses collected")?;
            let mut exchange = DebateExchange {
                round,
                challenger: challenger.spec.name.clone(),
                challenges,
                responses,
                moderator_note: None,
                converged,
            };
            if !self.control.is_interrupted() {
                exchange.moderator_note = self.moderate(&exchange).await;
            }
            info!(
                round,
                converged,
                stale = exchange.stale_workers().len(),
                "Debate round finished"
            );
            self.exchanges.push(exchange);

            if self.control.is_interrupted() {
                return Ok(StopReason::Interrupted);
            }
            if converged {
                return Ok(StopReason::Converged);
            }
        }
    }

    /// Valid challenges for this round, or `None` when the challenger failed
    async fn challenge(&self, challenger: &RegisteredWorker) -> Option<Vec<Challenge>> {
        let eligible = self.eligible();
        let request = self.worker_request(challenger, Arc::new(eligible.clone()));
        let worker = Arc::clone(&challenger.worker);

        let raised = self
            .control
            .invoke_one(challenger.spec.name.clone(), async move {
                worker.challenge(&request).await
            })
            .await;

        match raised {
            Ok(challenges) => Some(
                challenges
                    .into_iter()
                    .filter(|c| {
                        let valid = eligible.contains_key(&c.target);
                        if !valid {
                            warn!(worker = %c.target, "Dropping challenge at ineligible or unknown worker");
                        }
                        valid
                    })
                    .collect(),
            ),
            Err(err) => {
                warn!(challenger = %challenger.spec.name, error = %err, "Challenger failed");
                None
            }
        }
    }

    /// Invoke every targeted worker concurrently; returns responses and
    /// whether the round converged
    async fn respond(&mut self, challenges: &[Challenge]) -> (Vec<ExchangeResponse>, bool) {
        let round = self.state.round();
        let targets: BTreeSet<&str> = challenges.iter().map(|c| c.target.as_str()).collect();
        let snapshot = Arc::new(self.opinions.clone());

        let mut calls = Vec::with_capacity(targets.len());
        for target in targets {
            let Some(entry) = self.registry.get(target) else {
                continue;
            };
            let aimed: Vec<Challenge> = challenges
                .iter()
                .filter(|c| c.target == target)
                .cloned()
                .collect();
            let request = self.worker_request(entry, Arc::clone(&snapshot));
            let worker = Arc::clone(&entry.worker);
            calls.push((target.to_string(), async move {
                worker.respond(&request, &aimed).await
            }));
        }

        let mut responses = Vec::with_capacity(calls.len());
        let mut converged = true;
        for (name, result) in self.control.invoke_all(calls).await {
            let (Some(spec), Some(previous)) = (self.registry.spec(&name), snapshot.get(&name)) else {
                continue;
            };

            match result.and_then(|op| accept(op, spec, &self.request.subject, round)) {
                Ok(revised) => {
                    let changed = previous.differs_from(&revised, self.config.convergence_tolerance);
                    converged &= !changed;
                    debug!(
                        worker = %name,
                        round,
                        from = previous.score,
                        to = revised.score,
                        changed,
                        "Response accepted"
                    );
                    responses.push(ExchangeResponse {
                        worker: name.clone(),
                        previous_score: previous.score,
                        score: revised.score,
                        changed,
                        stale: false,
                        error: None,
                    });
                    self.history
                        .entry(name.clone())
                        .or_default()
                        .push(revised.clone());
                    self.opinions.insert(name, revised);
                }
                Err(err) => {
                    warn!(worker = %name, round, error = %err, "Response failed, keeping previous opinion");
                    responses.push(ExchangeResponse {
                        worker: name,
                        previous_score: previous.score,
                        score: previous.score,
                        changed: false,
                        stale: true,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        (responses, converged)
    }

    async fn moderate(&self, exchange: &DebateExchange) -> Option<committee_core::ModeratorNote> {
        let moderator = self.registry.moderator()?;
        let request = self.worker_request(moderator, Arc::new(self.opinions.clone()));
        let worker = Arc::clone(&moderator.worker);
        let reviewed = exchange.clone();

        match self
            .control
            .invoke_one(moderator.spec.name.clone(), async move {
                worker.moderate(&request, &reviewed).await
            })
            .await
        {
            Ok(note) => Some(note),
            Err(err) => {
                warn!(moderator = %moderator.spec.name, error = %err, "Moderator failed, leaving note empty");
                None
            }
        }
    }

    fn finish(mut self, stop: StopReason) -> DebateOutcome {
        if !self.state.phase().is_terminal() {
            if let Err(err) = self.state.transition(DebatePhase::Done, "debate finished") {
                error!(error = %err, "Could not close debate");
            }
        }

        let score_changes = self
            .history
            .iter()
            .filter_map(|(name, versions)| {
                let first = versions.first()?;
                let last = versions.last()?;
                ((last.score - first.score).abs() > f64::EPSILON).then(|| ScoreChange {
                    worker: name.clone(),
                    initial: first.score,
                    final_score: last.score,
                })
            })
            .collect();

        let summary = DebateSummary {
            rounds_completed: u32::try_from(self.exchanges.len()).unwrap_or(u32::MAX),
            stop_reason: stop,
            stalemate: stop == StopReason::MaxRounds,
            remaining_concerns: self
                .exchanges
                .last()
                .and_then(|e| e.moderator_note.as_ref())
                .map(|note| note.remaining_concerns.clone())
                .unwrap_or_default(),
        };
        info!(
            rounds = summary.rounds_completed,
            stop_reason = ?summary.stop_reason,
            stalemate = summary.stalemate,
            "Debate finished"
        );

        DebateOutcome {
            opinions: self.opinions,
            history: self.history,
            exchanges: self.exchanges,
            summary,
            score_changes,
            transitions: self.state.transitions,
        }
    }
}
