//! Worker registry: committee members and their static metadata

use committee_core::{Capability, ConfigError, Worker, WorkerSpec};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Tolerance used when matching the declared total weight
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// A worker together with its spec
#[derive(Clone)]
pub struct RegisteredWorker {
    pub spec: WorkerSpec,
    pub worker: Arc<dyn Worker>,
}

impl std::fmt::Debug for RegisteredWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredWorker")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Immutable set of committee members
///
/// Built once through [`WorkerRegistry::builder`], validated on build, and
/// shared read-only (usually behind an `Arc`) by every run.
#[derive(Debug, Clone)]
pub struct WorkerRegistry {
    workers: BTreeMap<String, RegisteredWorker>,
}

impl WorkerRegistry {
    pub fn builder() -> WorkerRegistryBuilder {
        WorkerRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredWorker> {
        self.workers.get(name)
    }

    pub fn spec(&self, name: &str) -> Option<&WorkerSpec> {
        self.workers.get(name).map(|w| &w.spec)
    }

    /// Specs in name order
    pub fn specs(&self) -> impl Iterator<Item = &WorkerSpec> {
        self.workers.values().map(|w| &w.spec)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.workers.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Weight of a worker, zero when unknown
    pub fn weight(&self, name: &str) -> f64 {
        self.spec(name).map_or(0.0, |s| s.weight)
    }

    /// Sum of all registered weights
    pub fn total_weight(&self) -> f64 {
        self.specs().map(|s| s.weight).sum()
    }

    /// The devil's advocate, if one is registered
    pub fn challenger(&self) -> Option<&RegisteredWorker> {
        self.by_capability(Capability::DevilsAdvocate)
    }

    /// The chairman, if one is registered
    pub fn moderator(&self) -> Option<&RegisteredWorker> {
        self.by_capability(Capability::Chairman)
    }

    fn by_capability(&self, capability: Capability) -> Option<&RegisteredWorker> {
        self.workers
            .values()
            .find(|w| w.spec.capability == capability)
    }
}

/// Builder for WorkerRegistry
#[derive(Default)]
pub struct WorkerRegistryBuilder {
    entries: Vec<RegisteredWorker>,
    expected_total_weight: Option<f64>,
}

impl WorkerRegistryBuilder {
    /// Register a worker
    pub fn register(mut self, spec: WorkerSpec, worker: Arc<dyn Worker>) -> Self {
        self.entries.push(RegisteredWorker { spec, worker });
        self
    }

    /// Require the registered weights to sum to `total`
    pub fn expected_total_weight(mut self, total: f64) -> Self {
        self.expected_total_weight = Some(total);
        self
    }

    /// Validate and build the registry
    ///
    /// Dependency cycles are not checked here; they are detected when a run
    /// is planned, since focus filtering decides which edges are live.
    pub fn build(self) -> Result<WorkerRegistry, ConfigError> {
        if self.entries.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }

        let mut workers = BTreeMap::new();
        for entry in self.entries {
            let name = entry.spec.name.clone();
            if workers.insert(name.clone(), entry).is_some() {
                return Err(ConfigError::DuplicateWorker(name));
            }
        }

        for (name, entry) in &workers {
            for dependency in &entry.spec.depends_on {
                if dependency == name {
                    return Err(ConfigError::SelfDependency(name.clone()));
                }
                if !workers.contains_key(dependency) {
                    return Err(ConfigError::UnknownDependency {
                        worker: name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }

            let weight = entry.spec.weight;
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidWeight {
                    worker: name.clone(),
                    weight,
                });
            }
        }

        let total: f64 = workers.values().map(|w| w.spec.weight).sum();
        if total <= 0.0 {
            return Err(ConfigError::ZeroTotalWeight);
        }
        if let Some(expected) = self.expected_total_weight {
            if (total - expected).abs() > WEIGHT_TOLERANCE {
                return Err(ConfigError::WeightTotalMismatch {
                    expected,
                    actual: total,
                });
            }
        }

        for capability in [Capability::DevilsAdvocate, Capability::Chairman] {
            let holders: Vec<String> = workers
                .values()
                .filter(|w| w.spec.capability == capability)
                .map(|w| w.spec.name.clone())
                .collect();
            if holders.len() > 1 {
                return Err(ConfigError::DuplicateRole {
                    capability: capability.to_string(),
                    workers: holders,
                });
            }
        }

        debug!(workers = workers.len(), total_weight = total, "Worker registry built");
        Ok(WorkerRegistry { workers })
    }
}
