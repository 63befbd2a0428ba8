//! Error types for committee-core
//!
//! Three layers, matching how far a failure is allowed to travel:
//! - [`WorkerError`]: one worker failed; recorded and recovered locally.
//! - [`ConfigError`]: the committee itself is malformed; fatal before any worker runs.
//! - [`RunFailure`]: what a run returns instead of a decision.

use crate::decision::Exclusion;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for committee-core
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for worker invocations
pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

/// Error raised while (de)serializing committee data
#[derive(Error, Debug)]
pub enum Error {
    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single worker invocation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerError {
    /// The worker reported an error
    #[error("{0}")]
    Failed(String),

    /// The worker did not finish within its per-worker timeout
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The run was cancelled while the worker was in flight
    #[error("cancelled")]
    Cancelled,

    /// The overall run deadline passed before the worker finished
    #[error("run deadline exceeded")]
    DeadlineExceeded,

    /// The worker returned an opinion that violates the data model
    #[error("invalid opinion: {0}")]
    InvalidOpinion(String),

    /// The worker does not implement the requested role
    #[error("operation '{0}' is not supported by this worker")]
    Unsupported(&'static str),

    /// The worker task panicked
    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl WorkerError {
    /// Convenience constructor for [`WorkerError::Failed`]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Whether the failure came from the run being stopped rather than the worker itself
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Convert anyhow::Error to WorkerError so worker authors can use `?` freely
impl From<anyhow::Error> for WorkerError {
    fn from(err: anyhow::Error) -> Self {
        WorkerError::Failed(format!("{err:#}"))
    }
}

/// Static configuration problems, detected before any worker executes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The registry has no workers
    #[error("committee has no registered workers")]
    EmptyRegistry,

    /// Two workers share a name
    #[error("worker '{0}' is registered more than once")]
    DuplicateWorker(String),

    /// A worker depends on a name that is not registered
    #[error("worker '{worker}' depends on unknown worker '{dependency}'")]
    UnknownDependency { worker: String, dependency: String },

    /// A worker lists itself as a dependency
    #[error("worker '{0}' depends on itself")]
    SelfDependency(String),

    /// The dependency graph contains a cycle through these workers
    #[error("dependency cycle among workers: {}", workers.join(", "))]
    DependencyCycle { workers: Vec<String> },

    /// A weight is negative or not finite
    #[error("worker '{worker}' has invalid weight {weight}")]
    InvalidWeight { worker: String, weight: f64 },

    /// All weights are zero
    #[error("total aggregation weight must be positive")]
    ZeroTotalWeight,

    /// Weights do not add up to the declared total
    #[error("aggregation weights sum to {actual}, expected {expected}")]
    WeightTotalMismatch { expected: f64, actual: f64 },

    /// More than one worker holds a role that must be unique
    #[error("only one '{capability}' worker may be registered, found: {}", workers.join(", "))]
    DuplicateRole {
        capability: String,
        workers: Vec<String>,
    },

    /// Recommendation thresholds are not strictly descending within the score range
    #[error("invalid recommendation thresholds: {0}")]
    InvalidThresholds(String),

    /// A workflow setting is out of range
    #[error("invalid workflow configuration: {0}")]
    InvalidWorkflow(String),
}

/// A run that ended without producing a decision
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunFailure {
    /// The committee or workflow configuration is invalid
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Filtering and failures left nobody to aggregate
    #[error("no active workers remain ({} excluded)", excluded.len())]
    NoActiveWorkers { excluded: Vec<Exclusion> },
}
