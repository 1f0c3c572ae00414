use tokio::sync::mpsc;
use crate::agents::registry::AgentName;
use super::phase::display_name;
use super::state::{PhaseName, RunSummary};

/// Lifecycle messages for progress display.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    RunStarted {
        session_id: String,
        web_url: String,
        resumed: bool,
    },
    PhaseStarted {
        phase: PhaseName,
        display_name: String,
    },
    PhaseCompleted {
        phase: PhaseName,
        display_name: String,
    },
    AgentStarted {
        agent: AgentName,
    },
    AgentCompleted {
        agent: AgentName,
        duration_ms: u64,
        cost_usd: Option<f64>,
    },
    /// Completed without work by exploitation gating
    AgentSkipped {
        agent: AgentName,
        reason: String,
    },
    AgentFailed {
        agent: AgentName,
        error: String,
    },
    AgentInterrupted {
        agent: AgentName,
    },
    RunCompleted {
        summary: RunSummary,
    },
    RunFailed {
        error: String,
    },
}

/// Optional channel to a progress consumer; sends never block or fail the run.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    tx: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl EventEmitter {
    pub fn new(tx: Option<mpsc::UnboundedSender<PipelineEvent>>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn phase_started(&self, phase: PhaseName) {
        self.emit(PipelineEvent::PhaseStarted { phase, display_name: display_name(phase).to_string() });
    }

    pub fn phase_completed(&self, phase: PhaseName) {
        self.emit(PipelineEvent::PhaseCompleted { phase, display_name: display_name(phase).to_string() });
    }
}
