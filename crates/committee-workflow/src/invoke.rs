//! Guarded worker invocation
//!
//! Every worker call runs as its own tokio task, bounded by the per-worker
//! timeout, the run deadline and the run's cancellation token. Panics are
//! caught at the task boundary and reported as worker failures.

use committee_core::{Opinion, WorkerError, WorkerResult, WorkerSpec};
use futures::future::join_all;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Limits that apply to every worker call within one run
#[derive(Debug, Clone)]
pub struct RunControl {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    per_worker_timeout: Duration,
}

impl RunControl {
    pub fn new(
        cancel: CancellationToken,
        deadline: Option<Instant>,
        per_worker_timeout: Duration,
    ) -> Self {
        Self {
            cancel,
            deadline,
            per_worker_timeout,
        }
    }

    /// Control with no deadline and a fresh token
    pub fn with_timeout(per_worker_timeout: Duration) -> Self {
        Self::new(CancellationToken::new(), None, per_worker_timeout)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why new work must not start, if it must not
    pub fn interruption(&self) -> Option<WorkerError> {
        if self.cancel.is_cancelled() {
            Some(WorkerError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(WorkerError::DeadlineExceeded)
        } else {
            None
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interruption().is_some()
    }

    /// Drive `call` to completion within this run's limits
    ///
    /// Cancellation wins over the deadline, which wins over the per-worker
    /// timeout. The call is dropped as soon as any limit fires.
    pub async fn guard<T, F>(&self, call: F) -> WorkerResult<T>
    where
        F: Future<Output = WorkerResult<T>>,
    {
        if let Some(err) = self.interruption() {
            return Err(err);
        }

        let deadline = self.deadline;
        let run_deadline = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(WorkerError::Cancelled),
            () = run_deadline => Err(WorkerError::DeadlineExceeded),
            result = tokio::time::timeout(self.per_worker_timeout, call) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(WorkerError::TimedOut(self.per_worker_timeout)),
            },
        }
    }

    /// Spawn every call concurrently and wait for all of them
    ///
    /// Results come back in input order, keyed by the label given with each call.
    pub async fn invoke_all<T, F>(&self, calls: Vec<(String, F)>) -> Vec<(String, WorkerResult<T>)>
    where
        T: Send + 'static,
        F: Future<Output = WorkerResult<T>> + Send + 'static,
    {
        let (labels, handles): (Vec<_>, Vec<_>) = calls
            .into_iter()
            .map(|(label, call)| {
                let control = self.clone();
                let handle = tokio::spawn(async move { control.guard(call).await });
                (label, handle)
            })
            .unzip();

        let joined = join_all(handles).await;
        labels
            .into_iter()
            .zip(joined)
            .map(|(label, result)| (label, result.unwrap_or_else(|err| Err(join_failure(err)))))
            .collect()
    }

    /// Spawn a single call and wait for it
    pub async fn invoke_one<T, F>(&self, label: impl Into<String>, call: F) -> WorkerResult<T>
    where
        T: Send + 'static,
        F: Future<Output = WorkerResult<T>> + Send + 'static,
    {
        self.invoke_all(vec![(label.into(), call)])
            .await
            .pop()
            .map_or(Err(WorkerError::Cancelled), |(_, result)| result)
    }
}

fn join_failure(err: JoinError) -> WorkerError {
    if err.is_cancelled() {
        return WorkerError::Cancelled;
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    WorkerError::Panicked(message)
}

/// Stamp identity on a returned opinion and check it against the data model
///
/// Price targets are kept only for roles that supply them.
pub(crate) fn accept(
    opinion: Opinion,
    spec: &WorkerSpec,
    subject: &str,
    round: u32,
) -> WorkerResult<Opinion> {
    let mut opinion = opinion.stamped(&spec.name, spec.capability, subject, round);
    opinion.validate().map_err(WorkerError::InvalidOpinion)?;
    if opinion.target.is_some() && !spec.capability.supplies_targets() {
        warn!(worker = %spec.name, capability = %spec.capability, "Dropping price target from non-valuation worker");
        opinion.target = None;
    }
    Ok(opinion)
}
