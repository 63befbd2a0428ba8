//! Phase scheduling: dependency-ordered waves of concurrent workers
//!
//! The dependency graph is layered with Kahn's algorithm. Each wave holds
//! every not-yet-scheduled worker whose dependencies are all scheduled,
//! sorted by name so plans are deterministic. Workers of one wave run
//! concurrently against a frozen snapshot of the opinions produced by
//! earlier waves.

use crate::invoke::{RunControl, accept};
use crate::registry::WorkerRegistry;
use committee_core::{
    AnalysisRequest, Capability, ConfigError, Context, Exclusion, ExclusionReason, FocusFilter,
    OpinionMap, WorkerRequest,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ordered waves of worker names plus the workers left out of the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Waves in execution order; names within a wave are sorted
    pub waves: Vec<Vec<String>>,

    /// Workers removed by focus filtering or configuration
    pub skipped: Vec<Exclusion>,
}

impl ExecutionPlan {
    /// Scheduled workers in execution order
    pub fn scheduled(&self) -> impl Iterator<Item = &str> {
        self.waves.iter().flatten().map(String::as_str)
    }

    /// Index of the wave a worker runs in
    pub fn wave_of(&self, worker: &str) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|name| name == worker))
    }

    pub fn is_scheduled(&self, worker: &str) -> bool {
        self.wave_of(worker).is_some()
    }

    pub fn is_skipped(&self, worker: &str) -> bool {
        self.skipped.iter().any(|e| e.worker == worker)
    }

    pub fn worker_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }
}

/// Result of running every wave
#[derive(Debug, Clone, Default)]
pub struct PhaseOutcome {
    /// Round-0 opinions of the workers that succeeded
    pub opinions: OpinionMap,

    /// Workers that failed, timed out, were interrupted or lost a dependency
    pub failures: Vec<Exclusion>,
}

impl PhaseOutcome {
    pub fn failed(&self, worker: &str) -> bool {
        self.failures.iter().any(|e| e.worker == worker)
    }
}

/// Computes and runs execution plans
pub struct PhaseScheduler;

impl PhaseScheduler {
    /// Plan the waves for one run
    ///
    /// Analysts outside `focus` are skipped; moderator roles always stay.
    /// The devil's advocate is skipped when disabled. The chairman never
    /// runs in a wave: it only reviews debate rounds. Dependencies on workers
    /// that are not scheduled count as satisfied.
    pub fn plan(
        registry: &WorkerRegistry,
        focus: Option<&FocusFilter>,
        include_devils_advocate: bool,
    ) -> Result<ExecutionPlan, ConfigError> {
        let mut skipped = Vec::new();
        let mut nodes = BTreeSet::new();

        for spec in registry.specs() {
            match spec.capability {
                Capability::Chairman => {}
                Capability::DevilsAdvocate if !include_devils_advocate => {
                    skipped.push(Exclusion::new(&spec.name, ExclusionReason::Disabled));
                }
                capability if focus.is_some_and(|f| !f.admits(capability)) => {
                    skipped.push(Exclusion::new(&spec.name, ExclusionReason::FilteredOut));
                }
                _ => {
                    nodes.insert(spec.name.as_str());
                }
            }
        }

        let graph: BTreeMap<&str, BTreeSet<&str>> = nodes
            .iter()
            .map(|&name| {
                let deps = registry
                    .spec(name)
                    .map(|spec| {
                        spec.depends_on
                            .iter()
                            .map(String::as_str)
                            .filter(|dep| nodes.contains(dep))
                            .collect()
                    })
                    .unwrap_or_default();
                (name, deps)
            })
            .collect();

        let waves = layer(&graph)?;
        debug!(
            waves = waves.len(),
            skipped = skipped.len(),
            "Execution plan computed"
        );
        Ok(ExecutionPlan { waves, skipped })
    }

    /// Run every wave of `plan`
    ///
    /// A wave starts only after the previous one has fully finished. A worker
    /// whose dependency failed is recorded as `DependencyFailed` and never
    /// invoked. Once the run is interrupted, remaining workers are recorded
    /// with the interruption reason.
    pub async fn execute(
        registry: &WorkerRegistry,
        plan: &ExecutionPlan,
        request: &Arc<AnalysisRequest>,
        context: &Arc<Context>,
        control: &RunControl,
    ) -> PhaseOutcome {
        let mut opinions = OpinionMap::new();
        let mut failures = Vec::new();
        let mut failed: BTreeSet<String> = BTreeSet::new();

        for (index, wave) in plan.waves.iter().enumerate() {
            let snapshot = Arc::new(opinions.clone());
            let mut calls = Vec::with_capacity(wave.len());

            for name in wave {
                let Some(entry) = registry.get(name) else {
                    continue;
                };

                if let Some(interruption) = control.interruption() {
                    failures.push(Exclusion::new(name, ExclusionReason::from(&interruption)));
                    failed.insert(name.clone());
                    continue;
                }

                if let Some(dependency) = entry.spec.depends_on.iter().find(|d| failed.contains(*d)) {
                    warn!(worker = %name, dependency = %dependency, "Skipping worker, dependency failed");
                    failures.push(Exclusion::new(
                        name,
                        ExclusionReason::DependencyFailed(dependency.clone()),
                    ));
                    failed.insert(name.clone());
                    continue;
                }

                let worker = Arc::clone(&entry.worker);
                let worker_request = WorkerRequest {
                    worker: name.clone(),
                    capability: entry.spec.capability,
                    subject: request.subject.clone(),
                    round: 0,
                    opinions: Arc::clone(&snapshot),
                    request: Arc::clone(request),
                    context: Arc::clone(context),
                };
                calls.push((name.clone(), async move {
                    worker.analyze(&worker_request).await
                }));
            }

            info!(wave = index, workers = calls.len(), "Running wave");
            for (name, result) in control.invoke_all(calls).await {
                let accepted = match registry.spec(&name) {
                    Some(spec) => result.and_then(|op| accept(op, spec, &request.subject, 0)),
                    None => continue,
                };
                match accepted {
                    Ok(opinion) => {
                        debug!(
                            worker = %name,
                            score = opinion.score,
                            confidence = opinion.confidence,
                            "Opinion accepted"
                        );
                        opinions.insert(name, opinion);
                    }
                    Err(err) => {
                        warn!(worker = %name, wave = index, error = %err, "Worker failed");
                        failures.push(Exclusion::new(&name, ExclusionReason::from(&err)));
                        failed.insert(name);
                    }
                }
            }
        }

        PhaseOutcome { opinions, failures }
    }
}

/// Kahn layering over `node -> dependencies`
///
/// Every dependency must itself be a key of `graph`.
pub(crate) fn layer(graph: &BTreeMap<&str, BTreeSet<&str>>) -> Result<Vec<Vec<String>>, ConfigError> {
    let mut remaining = graph.clone();
    let mut scheduled: BTreeSet<&str> = BTreeSet::new();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, deps)| deps.iter().all(|d| scheduled.contains(d)))
            .map(|(name, _)| *name)
            .collect();

        if ready.is_empty() {
            return Err(ConfigError::DependencyCycle {
                workers: remaining.keys().map(ToString::to_string).collect(),
            });
        }

        for name in &ready {
            remaining.remove(name);
            scheduled.insert(*name);
        }
        waves.push(ready.into_iter().map(String::from).collect());
    }

    Ok(waves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedWorker;
    use committee_core::{Worker, WorkerSpec};
    use mockall::mock;
    use std::time::Duration;

    mock! {
        Analyst {}

        #[async_trait::async_trait]
        impl Worker for Analyst {
            async fn analyze(&self, request: &WorkerRequest) -> committee_core::WorkerResult<committee_core::Opinion>;
        }
    }

    fn scripted(score: f64) -> Arc<dyn Worker> {
        Arc::new(ScriptedWorker::scoring(score))
    }

    /// macro, quant -> qualitative, industry -> valuation -> risk, plus moderators
    fn committee() -> WorkerRegistry {
        WorkerRegistry::builder()
            .register(WorkerSpec::new("macro", Capability::Macro), scripted(6.0))
            .register(WorkerSpec::new("quant", Capability::Quant), scripted(7.0))
            .register(
                WorkerSpec::new("qualitative", Capability::Qualitative).depends_on(["quant"]),
                scripted(7.5),
            )
            .register(
                WorkerSpec::new("industry", Capability::Industry).depends_on(["macro"]),
                scripted(6.5),
            )
            .register(
                WorkerSpec::new("valuation", Capability::Valuation)
                    .depends_on(["quant", "qualitative", "industry"]),
                scripted(8.0),
            )
            .register(
                WorkerSpec::new("risk", Capability::Risk).depends_on(["valuation"]),
                scripted(5.0),
            )
            .register(
                WorkerSpec::new("da", Capability::DevilsAdvocate)
                    .depends_on(["valuation"]),
                scripted(4.0),
            )
            .register(WorkerSpec::new("chair", Capability::Chairman), scripted(5.0))
            .build()
            .unwrap()
    }

    fn run_inputs() -> (Arc<AnalysisRequest>, Arc<Context>, RunControl) {
        (
            Arc::new(AnalysisRequest::new("AAPL")),
            Arc::new(Context::new()),
            RunControl::with_timeout(Duration::from_secs(5)),
        )
    }

    #[test]
    fn test_plan_layers_dependencies() {
        let plan = PhaseScheduler::plan(&committee(), None, true).unwrap();
        assert_eq!(
            plan.waves,
            vec![
                vec!["macro", "quant"],
                vec!["industry", "qualitative"],
                vec!["valuation"],
                vec!["da", "risk"],
            ]
        );
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn test_plan_covers_each_worker_once_after_dependencies() {
        let registry = committee();
        let plan = PhaseScheduler::plan(&registry, None, true).unwrap();

        let scheduled: Vec<&str> = plan.scheduled().collect();
        let unique: BTreeSet<&str> = scheduled.iter().copied().collect();
        assert_eq!(scheduled.len(), unique.len());
        // everyone but the chairman
        assert_eq!(unique.len(), registry.len() - 1);
        assert!(!plan.is_scheduled("chair"));

        for name in plan.scheduled() {
            let wave = plan.wave_of(name).unwrap();
            for dep in &registry.spec(name).unwrap().depends_on {
                assert!(plan.wave_of(dep).unwrap() < wave, "{dep} must run before {name}");
            }
        }
    }

    #[test]
    fn test_plan_focus_filter_treats_filtered_dependencies_as_satisfied() {
        let focus = FocusFilter::include([Capability::Valuation, Capability::Risk]);
        let plan = PhaseScheduler::plan(&committee(), Some(&focus), true).unwrap();

        assert_eq!(plan.waves, vec![vec!["valuation"], vec!["da", "risk"]]);
        assert!(plan.is_skipped("macro"));
        assert!(plan.is_skipped("quant"));
        assert!(!plan.is_skipped("da"));
        assert!(
            plan.skipped
                .iter()
                .all(|e| e.reason == ExclusionReason::FilteredOut)
        );
    }

    #[test]
    fn test_plan_devils_advocate_disabled() {
        let plan = PhaseScheduler::plan(&committee(), None, false).unwrap();
        assert!(!plan.is_scheduled("da"));
        assert_eq!(
            plan.skipped,
            vec![Exclusion::new("da", ExclusionReason::Disabled)]
        );
    }

    #[test]
    fn test_layer_detects_cycles() {
        let mut graph: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        graph.insert("a", BTreeSet::from(["c"]));
        graph.insert("b", BTreeSet::from(["a"]));
        graph.insert("c", BTreeSet::from(["b"]));
        graph.insert("d", BTreeSet::new());

        let err = layer(&graph).unwrap_err();
        assert_eq!(
            err,
            ConfigError::DependencyCycle {
                workers: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            }
        );
    }

    #[test]
    fn test_cycle_reported_without_invoking_workers() {
        let mut first = MockAnalyst::new();
        first.expect_analyze().times(0);
        let mut second = MockAnalyst::new();
        second.expect_analyze().times(0);

        let registry = WorkerRegistry::builder()
            .register(
                WorkerSpec::new("quant", Capability::Quant).depends_on(["valuation"]),
                Arc::new(first),
            )
            .register(
                WorkerSpec::new("valuation", Capability::Valuation).depends_on(["quant"]),
                Arc::new(second),
            )
            .build()
            .unwrap();

        let err = PhaseScheduler::plan(&registry, None, true).unwrap_err();
        assert!(matches!(err, ConfigError::DependencyCycle { .. }));
    }

    #[tokio::test]
    async fn test_execute_collects_round_zero_opinions() {
        let registry = committee();
        let plan = PhaseScheduler::plan(&registry, None, true).unwrap();
        let (request, context, control) = run_inputs();

        let outcome = PhaseScheduler::execute(&registry, &plan, &request, &context, &control).await;

        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.opinions.len(), 7);
        let valuation = &outcome.opinions["valuation"];
        assert_eq!(valuation.worker, "valuation");
        assert_eq!(valuation.capability, Capability::Valuation);
        assert_eq!(valuation.subject, "AAPL");
        assert_eq!(valuation.round, 0);
    }

    #[tokio::test]
    async fn test_execute_wave_sees_prior_wave_snapshot() {
        struct Echo;

        #[async_trait::async_trait]
        impl Worker for Echo {
            async fn analyze(&self, request: &WorkerRequest) -> committee_core::WorkerResult<committee_core::Opinion> {
                // score reflects how many opinions were visible
                Ok(committee_core::Opinion::new(request.opinions.len() as f64, 50.0, "echo"))
            }
        }

        let registry = WorkerRegistry::builder()
            .register(WorkerSpec::new("a", Capability::Macro), Arc::new(Echo))
            .register(WorkerSpec::new("b", Capability::Quant), Arc::new(Echo))
            .register(WorkerSpec::new("c", Capability::Valuation).depends_on(["a"]), Arc::new(Echo))
            .register(WorkerSpec::new("d", Capability::Risk).depends_on(["a"]), Arc::new(Echo))
            .build()
            .unwrap();
        let plan = PhaseScheduler::plan(&registry, None, true).unwrap();
        let (request, context, control) = run_inputs();

        let outcome = PhaseScheduler::execute(&registry, &plan, &request, &context, &control).await;

        assert_eq!(outcome.opinions["a"].score, 0.0);
        assert_eq!(outcome.opinions["b"].score, 0.0);
        // both wave-1 workers saw exactly the two wave-0 opinions
        assert_eq!(outcome.opinions["c"].score, 2.0);
        assert_eq!(outcome.opinions["d"].score, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_failures_do_not_block_siblings() {
        let registry = WorkerRegistry::builder()
            .register(WorkerSpec::new("macro", Capability::Macro), scripted(6.0))
            .register(
                WorkerSpec::new("quant", Capability::Quant),
                Arc::new(ScriptedWorker::scoring(7.0).delay(Duration::from_secs(30))),
            )
            .register(
                WorkerSpec::new("industry", Capability::Industry),
                Arc::new(ScriptedWorker::scoring(6.0).panicking()),
            )
            .register(
                WorkerSpec::new("valuation", Capability::Valuation).depends_on(["quant"]),
                scripted(8.0),
            )
            .register(
                WorkerSpec::new("risk", Capability::Risk),
                Arc::new(ScriptedWorker::scoring(11.0)),
            )
            .build()
            .unwrap();
        let plan = PhaseScheduler::plan(&registry, None, true).unwrap();
        let (request, context, control) = run_inputs();

        let outcome = PhaseScheduler::execute(&registry, &plan, &request, &context, &control).await;

        assert_eq!(outcome.opinions.keys().collect::<Vec<_>>(), vec!["macro"]);
        let reason = |name: &str| {
            outcome
                .failures
                .iter()
                .find(|e| e.worker == name)
                .map(|e| e.reason.clone())
                .unwrap()
        };
        assert_eq!(reason("quant"), ExclusionReason::TimedOut);
        assert!(matches!(reason("industry"), ExclusionReason::Failed(msg) if msg.contains("panicked")));
        assert!(matches!(reason("risk"), ExclusionReason::Failed(msg) if msg.contains("invalid opinion")));
        assert_eq!(
            reason("valuation"),
            ExclusionReason::DependencyFailed("quant".to_string())
        );
    }

    #[tokio::test]
    async fn test_execute_after_cancellation_marks_everyone() {
        let registry = committee();
        let plan = PhaseScheduler::plan(&registry, None, true).unwrap();
        let (request, context, control) = run_inputs();
        control.cancel_token().cancel();

        let outcome = PhaseScheduler::execute(&registry, &plan, &request, &context, &control).await;

        assert!(outcome.opinions.is_empty());
        assert_eq!(outcome.failures.len(), plan.worker_count());
        assert!(
            outcome
                .failures
                .iter()
                .all(|e| e.reason == ExclusionReason::Cancelled)
        );
    }
}
