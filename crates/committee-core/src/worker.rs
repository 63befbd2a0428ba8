//! The worker capability trait

use crate::capability::Capability;
use crate::context::Context;
use crate::error::{WorkerError, WorkerResult};
use crate::exchange::{Challenge, DebateExchange, ModeratorNote};
use crate::opinion::{Opinion, OpinionMap};
use crate::request::AnalysisRequest;
use async_trait::async_trait;
use std::sync::Arc;

/// Everything a worker sees for one invocation
///
/// All fields are owned snapshots; a worker cannot observe changes made
/// after it was spawned.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    /// Name of the invoked worker
    pub worker: String,

    /// Role of the invoked worker
    pub capability: Capability,

    /// Subject under analysis
    pub subject: String,

    /// Debate round (0 = initial analysis)
    pub round: u32,

    /// Opinions visible to this invocation
    pub opinions: Arc<OpinionMap>,

    /// The originating request
    pub request: Arc<AnalysisRequest>,

    /// Shared settings and data-provider handles
    pub context: Arc<Context>,
}

impl WorkerRequest {
    /// This worker's current opinion, if it has one
    pub fn own_opinion(&self) -> Option<&Opinion> {
        self.opinions.get(&self.worker)
    }

    /// Another worker's current opinion
    pub fn opinion_of(&self, worker: &str) -> Option<&Opinion> {
        self.opinions.get(worker)
    }
}

/// A committee member
///
/// Only [`Worker::analyze`] is required. Analysts that hold their position
/// under challenge can rely on the default [`Worker::respond`]; the challenger
/// implements [`Worker::challenge`] and the moderator [`Worker::moderate`].
#[async_trait]
pub trait Worker: Send + Sync {
    /// Produce an initial opinion on the subject
    async fn analyze(&self, request: &WorkerRequest) -> WorkerResult<Opinion>;

    /// Answer challenges with a revised opinion
    ///
    /// The default keeps the current opinion unchanged.
    async fn respond(
        &self,
        request: &WorkerRequest,
        _challenges: &[Challenge],
    ) -> WorkerResult<Opinion> {
        request
            .own_opinion()
            .cloned()
            .ok_or(WorkerError::Unsupported("respond"))
    }

    /// Raise challenges against the visible opinions
    async fn challenge(&self, _request: &WorkerRequest) -> WorkerResult<Vec<Challenge>> {
        Err(WorkerError::Unsupported("challenge"))
    }

    /// Review a completed exchange
    async fn moderate(
        &self,
        _request: &WorkerRequest,
        _exchange: &DebateExchange,
    ) -> WorkerResult<ModeratorNote> {
        Err(WorkerError::Unsupported("moderate"))
    }
}
