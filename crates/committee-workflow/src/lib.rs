//! Committee orchestration for committee-rs
//!
//! This crate runs an investment committee over a set of [`Worker`]s:
//! dependency-ordered analysis waves, bounded devil's-advocate debate rounds
//! and a weighted consensus that yields a [`CommitteeDecision`].
//!
//! [`Worker`]: committee_core::Worker
//! [`CommitteeDecision`]: committee_core::CommitteeDecision

pub mod config;
pub mod consensus;
pub mod debate;
pub mod invoke;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod scripted;

// Re-export for convenience
pub use config::{WorkflowConfig, WorkflowConfigBuilder};
pub use consensus::{Aggregate, AggregationConfig, AggregationConfigBuilder, ConsensusAggregator};
pub use debate::{DebateController, DebateOutcome, DebatePhase, DebateState, DebateTransition};
pub use invoke::RunControl;
pub use orchestrator::{CommitteeOrchestrator, CommitteeOrchestratorBuilder};
pub use registry::{RegisteredWorker, WorkerRegistry, WorkerRegistryBuilder};
pub use scheduler::{ExecutionPlan, PhaseOutcome, PhaseScheduler};
pub use scripted::{Script, ScriptedCommittee, ScriptedMember, ScriptedOpinion, ScriptedWorker};
pub use tokio_util::sync::CancellationToken;
