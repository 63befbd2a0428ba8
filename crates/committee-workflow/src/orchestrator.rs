//! Committee orchestration: plan, analyse, debate, aggregate

use crate::config::WorkflowConfig;
use crate::consensus::{AggregationConfig, ConsensusAggregator};
use crate::debate::DebateController;
use crate::invoke::RunControl;
use crate::registry::WorkerRegistry;
use crate::scheduler::{ExecutionPlan, PhaseScheduler};
use chrono::Utc;
use committee_core::{AnalysisRequest, CommitteeDecision, ConfigError, Context, RunFailure};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

/// Runs the full committee workflow for a request
///
/// The orchestrator owns nothing mutable: the registry and context are
/// shared read-only, and every run gets its own cancellation token,
/// deadline and opinion maps. Independent runs may execute concurrently on
/// the same orchestrator.
///
/// # Example
///
/// ```no_run
/// use committee_core::{AnalysisRequest, Capability, Worker, WorkerSpec};
/// use committee_workflow::{CommitteeOrchestrator, ScriptedWorker, WorkerRegistry, WorkflowConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), committee_core::RunFailure> {
/// let registry = WorkerRegistry::builder()
///     .register(
///         WorkerSpec::new("quant", Capability::Quant),
///         Arc::new(ScriptedWorker::scoring(7.0)) as Arc<dyn Worker>,
///     )
///     .build()?;
///
/// let orchestrator = CommitteeOrchestrator::new(Arc::new(registry));
/// let decision = orchestrator
///     .run(AnalysisRequest::new("AAPL"), &WorkflowConfig::default())
///     .await?;
/// println!("{}: {}", decision.subject, decision.recommendation);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CommitteeOrchestrator {
    registry: Arc<WorkerRegistry>,
    aggregator: ConsensusAggregator,
    context: Arc<Context>,
}

impl CommitteeOrchestrator {
    /// Orchestrator with default aggregation settings and an empty context
    pub fn new(registry: Arc<WorkerRegistry>) -> Self {
        Self {
            registry,
            aggregator: ConsensusAggregator::default(),
            context: Arc::new(Context::new()),
        }
    }

    pub fn builder(registry: Arc<WorkerRegistry>) -> CommitteeOrchestratorBuilder {
        CommitteeOrchestratorBuilder::new(registry)
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn aggregation(&self) -> &AggregationConfig {
        self.aggregator.config()
    }

    /// Validate `config` and compute the waves a run of `request` would use
    pub fn plan(
        &self,
        request: &AnalysisRequest,
        config: &WorkflowConfig,
    ) -> Result<ExecutionPlan, RunFailure> {
        config.validate()?;
        let plan = PhaseScheduler::plan(
            &self.registry,
            config.effective_focus(request),
            config.include_devils_advocate,
        )?;
        Ok(plan)
    }

    /// Run the committee to a decision
    pub async fn run(
        &self,
        request: AnalysisRequest,
        config: &WorkflowConfig,
    ) -> Result<CommitteeDecision, RunFailure> {
        self.run_with_cancellation(request, config, CancellationToken::new())
            .await
    }

    /// Run the committee, stopping new work once `cancel` fires
    ///
    /// Cancellation and the overall deadline both keep whatever opinions
    /// were already accepted; the run still ends in a decision unless no
    /// voting worker produced an opinion.
    pub async fn run_with_cancellation(
        &self,
        request: AnalysisRequest,
        config: &WorkflowConfig,
        cancel: CancellationToken,
    ) -> Result<CommitteeDecision, RunFailure> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("committee_run", run_id = %run_id, subject = %request.subject);
        self.execute(run_id, request, config, cancel)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        run_id: String,
        request: AnalysisRequest,
        config: &WorkflowConfig,
        cancel: CancellationToken,
    ) -> Result<CommitteeDecision, RunFailure> {
        let plan = self.plan(&request, config).inspect_err(|err| {
            warn!(error = %err, "Run rejected");
        })?;
        info!(
            waves = plan.waves.len(),
            workers = plan.worker_count(),
            skipped = plan.skipped.len(),
            "Committee run started"
        );

        let deadline = config.overall_deadline.map(|budget| Instant::now() + budget);
        let control = RunControl::new(cancel, deadline, config.per_worker_timeout);
        let request = Arc::new(request);

        let phase =
            PhaseScheduler::execute(&self.registry, &plan, &request, &self.context, &control).await;
        let debate = DebateController::new(&self.registry, config)
            .run(phase.opinions, &request, &self.context, &control)
            .await;

        let mut excluded = plan.skipped;
        excluded.extend(phase.failures);

        let aggregate = self
            .aggregator
            .aggregate(&self.registry, &debate.opinions, &debate.exchanges, &excluded)
            .inspect_err(|err| warn!(error = %err, "Run produced no decision"))?;

        info!(
            score = aggregate.weighted_score,
            consensus = aggregate.consensus_level,
            recommendation = %aggregate.recommendation,
            rounds = debate.summary.rounds_completed,
            excluded = excluded.len(),
            "Committee decision reached"
        );

        Ok(CommitteeDecision {
            run_id,
            subject: request.subject.clone(),
            company_name: request.company_name.clone(),
            weighted_score: aggregate.weighted_score,
            consensus_level: aggregate.consensus_level,
            recommendation: aggregate.recommendation,
            final_sentiment: aggregate.final_sentiment,
            target_range: aggregate.target_range,
            key_strengths: aggregate.key_strengths,
            key_risks: aggregate.key_risks,
            opinions: debate.opinions,
            debate: debate.exchanges,
            debate_summary: debate.summary,
            score_changes: debate.score_changes,
            disagreements: aggregate.disagreements,
            excluded,
            decided_at: Utc::now(),
        })
    }
}

/// Builder for CommitteeOrchestrator
#[derive(Debug)]
pub struct CommitteeOrchestratorBuilder {
    registry: Arc<WorkerRegistry>,
    aggregation: Option<AggregationConfig>,
    context: Option<Context>,
}

impl CommitteeOrchestratorBuilder {
    pub fn new(registry: Arc<WorkerRegistry>) -> Self {
        Self {
            registry,
            aggregation: None,
            context: None,
        }
    }

    pub fn aggregation(mut self, aggregation: AggregationConfig) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Context handed to every worker invocation
    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn build(self) -> Result<CommitteeOrchestrator, ConfigError> {
        let aggregation = self.aggregation.unwrap_or_default();
        aggregation.validate()?;

        Ok(CommitteeOrchestrator {
            registry: self.registry,
            aggregator: ConsensusAggregator::new(aggregation),
            context: Arc::new(self.context.unwrap_or_default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedWorker;
    use committee_core::{
        Capability, Challenge, ExclusionReason, ModeratorNote, Recommendation, Sentiment,
        StopReason, TargetRange, Worker, WorkerSpec,
    };
    use std::time::Duration;

    fn member(worker: ScriptedWorker) -> Arc<dyn Worker> {
        Arc::new(worker)
    }

    fn committee(da: ScriptedWorker) -> Arc<WorkerRegistry> {
        let registry = WorkerRegistry::builder()
            .register(
                WorkerSpec::new("quant", Capability::Quant),
                member(ScriptedWorker::scoring(8.0).key_point("margin expansion")),
            )
            .register(
                WorkerSpec::new("valuation", Capability::Valuation).depends_on(["quant"]),
                member(
                    ScriptedWorker::scoring(6.0)
                        .target(TargetRange::new(150.0, 180.0, 210.0))
                        .respond_with(1, 6.5),
                ),
            )
            .register(
                WorkerSpec::new("risk", Capability::Risk),
                member(ScriptedWorker::scoring(7.0).concern("customer concentration")),
            )
            .register(WorkerSpec::new("da", Capability::DevilsAdvocate), member(da))
            .register(
                WorkerSpec::new("chair", Capability::Chairman),
                member(ScriptedWorker::moderator(ModeratorNote {
                    summary: "valuation revised".to_string(),
                    remaining_concerns: vec!["china exposure".to_string()],
                    ..ModeratorNote::default()
                })),
            )
            .build()
            .unwrap();
        Arc::new(registry)
    }

    fn challenging_da() -> ScriptedWorker {
        ScriptedWorker::challenger().raise(1, Challenge::new("valuation", "multiple looks rich"))
    }

    #[tokio::test]
    async fn test_full_run() {
        let orchestrator = CommitteeOrchestrator::new(committee(challenging_da()));
        let decision = orchestrator
            .run(
                AnalysisRequest::new("aapl").with_company_name("Apple Inc."),
                &WorkflowConfig::default(),
            )
            .await
            .unwrap();

        assert_eq!(decision.subject, "AAPL");
        assert_eq!(decision.debate.len(), 1);
        assert_eq!(decision.debate_summary.stop_reason, StopReason::NoChallenges);
        assert_eq!(decision.debate_summary.remaining_concerns, vec!["china exposure"]);
        assert_eq!(decision.score_changes.len(), 1);
        assert_eq!(decision.score_changes[0].worker, "valuation");
        assert_eq!(decision.score_changes[0].delta(), 0.5);

        // (8 + 6.5 + 7) / 3
        assert!((decision.weighted_score - 7.1667).abs() < 1e-3);
        assert_eq!(decision.recommendation, Recommendation::Buy);
        assert_eq!(decision.final_sentiment, Sentiment::Bullish);
        assert_eq!(decision.key_strengths, vec!["margin expansion"]);
        assert_eq!(decision.key_risks, vec!["customer concentration"]);
        assert!(decision.target_range.is_some());
        assert!(decision.excluded.is_empty());
        assert!(decision.has_consensus());
        assert!(!decision.run_id.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_challenger_matches_zero_rounds() {
        let orchestrator = CommitteeOrchestrator::new(committee(challenging_da()));

        let disabled = WorkflowConfig::builder()
            .include_devils_advocate(false)
            .build()
            .unwrap();
        let zero_rounds = WorkflowConfig::builder().max_debate_rounds(0).build().unwrap();

        let a = orchestrator
            .run(AnalysisRequest::new("AAPL"), &disabled)
            .await
            .unwrap();
        let b = orchestrator
            .run(AnalysisRequest::new("AAPL"), &zero_rounds)
            .await
            .unwrap();

        assert_eq!(a.weighted_score, b.weighted_score);
        assert_eq!(a.consensus_level, b.consensus_level);
        assert_eq!(a.recommendation, b.recommendation);
        assert_eq!(a.target_range, b.target_range);
        assert_eq!(a.key_strengths, b.key_strengths);
        assert_eq!(a.key_risks, b.key_risks);
        assert!(a.debate.is_empty());
        assert!(b.debate.is_empty());
        assert_eq!(
            a.excluded,
            vec![committee_core::Exclusion::new("da", ExclusionReason::Disabled)]
        );
    }

    #[tokio::test]
    async fn test_failures_are_listed() {
        let registry = WorkerRegistry::builder()
            .register(
                WorkerSpec::new("quant", Capability::Quant),
                member(ScriptedWorker::failing("no filings")),
            )
            .register(
                WorkerSpec::new("valuation", Capability::Valuation).depends_on(["quant"]),
                member(ScriptedWorker::scoring(9.0)),
            )
            .register(
                WorkerSpec::new("macro", Capability::Macro),
                member(ScriptedWorker::scoring(5.0)),
            )
            .register(
                WorkerSpec::new("industry", Capability::Industry),
                member(ScriptedWorker::scoring(6.0)),
            )
            .build()
            .unwrap();

        let config = WorkflowConfig::builder()
            .focus_areas(committee_core::FocusFilter::exclude([Capability::Industry]))
            .build()
            .unwrap();
        let decision = CommitteeOrchestrator::new(Arc::new(registry))
            .run(AnalysisRequest::new("AAPL"), &config)
            .await
            .unwrap();

        assert_eq!(decision.weighted_score, 5.0);
        assert_eq!(decision.failed_workers(), vec!["quant", "valuation"]);
        assert!(decision.excluded.contains(&committee_core::Exclusion::new(
            "industry",
            ExclusionReason::FilteredOut
        )));
        assert!(decision.excluded.contains(&committee_core::Exclusion::new(
            "valuation",
            ExclusionReason::DependencyFailed("quant".to_string())
        )));
    }

    #[tokio::test]
    async fn test_no_active_workers() {
        let registry = WorkerRegistry::builder()
            .register(
                WorkerSpec::new("quant", Capability::Quant),
                member(ScriptedWorker::failing("no data")),
            )
            .register(
                WorkerSpec::new("da", Capability::DevilsAdvocate),
                member(ScriptedWorker::challenger()),
            )
            .build()
            .unwrap();

        let result = CommitteeOrchestrator::new(Arc::new(registry))
            .run(AnalysisRequest::new("AAPL"), &WorkflowConfig::default())
            .await;

        match result {
            Err(RunFailure::NoActiveWorkers { excluded }) => {
                assert_eq!(excluded.len(), 1);
                assert_eq!(excluded[0].worker, "quant");
            }
            other => panic!("Expected NoActiveWorkers, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cycle_rejected_before_any_worker_runs() {
        let quant = Arc::new(ScriptedWorker::scoring(7.0));
        let registry = WorkerRegistry::builder()
            .register(
                WorkerSpec::new("quant", Capability::Quant).depends_on(["valuation"]),
                Arc::clone(&quant) as Arc<dyn Worker>,
            )
            .register(
                WorkerSpec::new("valuation", Capability::Valuation).depends_on(["quant"]),
                member(ScriptedWorker::scoring(6.0)),
            )
            .build()
            .unwrap();

        let result = CommitteeOrchestrator::new(Arc::new(registry))
            .run(AnalysisRequest::new("AAPL"), &WorkflowConfig::default())
            .await;

        assert!(matches!(
            result,
            Err(RunFailure::Configuration(ConfigError::DependencyCycle { .. }))
        ));
        assert_eq!(quant.analyze_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_workflow_config() {
        let orchestrator = CommitteeOrchestrator::new(committee(challenging_da()));
        let config = WorkflowConfig {
            per_worker_timeout: Duration::ZERO,
            ..WorkflowConfig::default()
        };
        let result = orchestrator.run(AnalysisRequest::new("AAPL"), &config).await;
        assert!(matches!(
            result,
            Err(RunFailure::Configuration(ConfigError::InvalidWorkflow(_)))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let orchestrator = CommitteeOrchestrator::new(committee(challenging_da()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orchestrator
            .run_with_cancellation(AnalysisRequest::new("AAPL"), &WorkflowConfig::default(), cancel)
            .await;

        match result {
            Err(RunFailure::NoActiveWorkers { excluded }) => {
                assert!(!excluded.is_empty());
                assert!(excluded.iter().all(|e| e.reason == ExclusionReason::Cancelled));
            }
            other => panic!("Expected NoActiveWorkers, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_keeps_finished_opinions() {
        let registry = WorkerRegistry::builder()
            .register(
                WorkerSpec::new("quant", Capability::Quant),
                member(ScriptedWorker::scoring(7.0)),
            )
            .register(
                WorkerSpec::new("macro", Capability::Macro),
                member(ScriptedWorker::scoring(3.0).delay(Duration::from_secs(10))),
            )
            .build()
            .unwrap();

        let config = WorkflowConfig::builder()
            .overall_deadline(Duration::from_secs(5))
            .per_worker_timeout(Duration::from_secs(60))
            .build()
            .unwrap();
        let decision = CommitteeOrchestrator::new(Arc::new(registry))
            .run(AnalysisRequest::new("AAPL"), &config)
            .await
            .unwrap();

        assert_eq!(decision.weighted_score, 7.0);
        assert_eq!(
            decision.excluded,
            vec![committee_core::Exclusion::new(
                "macro",
                ExclusionReason::DeadlineExceeded
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_debate_keeps_prior_opinion() {
        let registry = WorkerRegistry::builder()
            .register(
                WorkerSpec::new("a", Capability::Quant),
                member(
                    ScriptedWorker::scoring(8.0)
                        .respond_with(1, 4.0)
                        .delay(Duration::from_secs(3)),
                ),
            )
            .register(
                WorkerSpec::new("da", Capability::DevilsAdvocate),
                member(ScriptedWorker::challenger().raise(1, Challenge::new("a", "growth is priced in"))),
            )
            .build()
            .unwrap();

        let config = WorkflowConfig::builder()
            .overall_deadline(Duration::from_secs(5))
            .per_worker_timeout(Duration::from_secs(60))
            .build()
            .unwrap();
        let decision = CommitteeOrchestrator::new(Arc::new(registry))
            .run(AnalysisRequest::new("AAPL"), &config)
            .await
            .unwrap();

        assert_eq!(decision.debate_summary.stop_reason, StopReason::Interrupted);
        assert_eq!(decision.debate_summary.rounds_completed, 1);
        assert_eq!(decision.opinions["a"].score, 8.0);
        assert_eq!(decision.debate[0].stale_workers(), vec!["a"]);
        assert_eq!(
            decision.debate[0].responses[0].error.as_deref(),
            Some("run deadline exceeded")
        );
        assert!(decision.score_changes.is_empty());
        assert_eq!(decision.weighted_score, 8.0);
    }

    #[tokio::test]
    async fn test_decision_json_round_trip() {
        let orchestrator = CommitteeOrchestrator::builder(committee(challenging_da()))
            .aggregation(AggregationConfig::builder().max_key_items(2).build().unwrap())
            .context(Context::new().with_current_price(170.0))
            .build()
            .unwrap();

        let decision = orchestrator
            .run(AnalysisRequest::new("AAPL"), &WorkflowConfig::default())
            .await
            .unwrap();
        let json = decision.to_json().unwrap();
        let restored = CommitteeDecision::from_json(&json).unwrap();

        assert_eq!(restored, decision);
    }

    #[test]
    fn test_plan_honours_request_focus() {
        let orchestrator = CommitteeOrchestrator::new(committee(challenging_da()));
        let request = AnalysisRequest::new("AAPL")
            .with_focus(committee_core::FocusFilter::include([Capability::Risk]));

        let plan = orchestrator
            .plan(&request, &WorkflowConfig::default())
            .unwrap();
        assert!(plan.is_scheduled("risk"));
        assert!(plan.is_scheduled("da"));
        assert!(plan.is_skipped("quant"));
        assert!(!plan.is_scheduled("chair"));
    }
}
