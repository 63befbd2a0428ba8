//! Core data model for the investment committee engine
//!
//! This crate defines the worker trait, the opinion and decision types that
//! flow between committee phases, and the error taxonomy shared by the
//! workflow crate.

pub mod capability;
pub mod context;
pub mod decision;
pub mod error;
pub mod exchange;
pub mod opinion;
pub mod request;
pub mod worker;
pub mod worker_spec;

pub use capability::{Capability, FocusFilter};
pub use context::Context;
pub use decision::{
    CommitteeDecision, DebateSummary, Disagreement, Exclusion, ExclusionReason, Recommendation,
    RecommendationBands, ScoreChange, StopReason,
};
pub use error::{ConfigError, Error, Result, RunFailure, WorkerError, WorkerResult};
pub use exchange::{Challenge, DebateExchange, ExchangeResponse, ModeratorNote, Severity};
pub use opinion::{Opinion, OpinionMap, Sentiment, TargetRange};
pub use request::AnalysisRequest;
pub use worker::{Worker, WorkerRequest};
pub use worker_spec::WorkerSpec;
