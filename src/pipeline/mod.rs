pub mod events;
pub mod gating;
pub mod orchestrator;
pub mod phase;
pub mod runner;
pub mod state;

pub use events::{EventEmitter, PipelineEvent};
pub use gating::{exploitation_decision, ExploitationDecision};
pub use orchestrator::Orchestrator;
pub use runner::PhaseRunner;
pub use state::{OrchestratorState, PhaseName, PhaseResult, RunOutcome, RunSummary};
