use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::agents::registry::AgentName;
use crate::session::state::{AgentStatus, Session};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseName {
    PreRecon,
    Recon,
    VulnerabilityAnalysis,
    Exploitation,
    Reporting,
}

impl PhaseName {
    /// Fixed execution order.
    pub const ALL: [PhaseName; 5] = [
        PhaseName::PreRecon,
        PhaseName::Recon,
        PhaseName::VulnerabilityAnalysis,
        PhaseName::Exploitation,
        PhaseName::Reporting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreRecon => "pre-recon",
            Self::Recon => "recon",
            Self::VulnerabilityAnalysis => "vulnerability-analysis",
            Self::Exploitation => "exploitation",
            Self::Reporting => "reporting",
        }
    }
}

impl std::fmt::Display for PhaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level run state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OrchestratorState {
    Init,
    PreRecon,
    Recon,
    VulnAnalysis,
    Exploitation,
    Reporting,
    Done,
    Aborted,
}

impl From<PhaseName> for OrchestratorState {
    fn from(phase: PhaseName) -> Self {
        match phase {
            PhaseName::PreRecon => Self::PreRecon,
            PhaseName::Recon => Self::Recon,
            PhaseName::VulnerabilityAnalysis => Self::VulnAnalysis,
            PhaseName::Exploitation => Self::Exploitation,
            PhaseName::Reporting => Self::Reporting,
        }
    }
}

impl OrchestratorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub duration_ms: u64,
    pub cost_usd: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub model: Option<String>,
    pub attempt_count: u32,
}

/// What happened to each agent during one `run_phase` call.
#[derive(Debug, Clone, Default)]
pub struct PhaseResult {
    pub phase: Option<PhaseName>,
    pub completed: Vec<AgentName>,
    pub skipped: Vec<AgentName>,
    pub failed: Vec<(AgentName, String)>,
    pub interrupted: Vec<AgentName>,
    pub total_cost_usd: f64,
}

impl PhaseResult {
    pub fn for_phase(phase: PhaseName) -> Self {
        Self { phase: Some(phase), ..Default::default() }
    }

    pub fn failed_agents(&self) -> Vec<AgentName> {
        self.failed.iter().map(|(name, _)| *name).collect()
    }

    pub fn merge(&mut self, other: PhaseResult) {
        self.completed.extend(other.completed);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
        self.interrupted.extend(other.interrupted);
        self.total_cost_usd += other.total_cost_usd;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub session_id: String,
    pub total_cost_usd: f64,
    pub total_duration_ms: u64,
    pub agents_completed: usize,
    pub agents_skipped: usize,
    pub hypotheses: usize,
    pub exploited: usize,
}

impl RunSummary {
    pub fn from_session(session: &Session) -> Self {
        let metrics: Vec<&AgentMetrics> = session.agents.values().filter_map(|r| r.metrics.as_ref()).collect();
        let records = session.vulnerabilities.values().flatten();
        let (hypotheses, exploited) = records.fold((0, 0), |(h, e), r| (h + 1, e + usize::from(r.exploited)));
        Self {
            session_id: session.id.clone(),
            total_cost_usd: metrics.iter().filter_map(|m| m.cost_usd).sum(),
            total_duration_ms: metrics.iter().map(|m| m.duration_ms).sum(),
            agents_completed: session.agents_with_status(AgentStatus::Completed).len(),
            agents_skipped: session.agents.values().filter(|r| r.skipped).count(),
            hypotheses,
            exploited,
        }
    }
}

/// Handles returned once the run reaches `Done`.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report_path: PathBuf,
    pub audit_logs_path: PathBuf,
    pub summary: RunSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_is_fixed() {
        let mut sorted = PhaseName::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, PhaseName::ALL.to_vec());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(PhaseName::VulnerabilityAnalysis.to_string(), "vulnerability-analysis");
        assert_eq!(PhaseName::PreRecon.to_string(), "pre-recon");
    }

    #[test]
    fn test_state_from_phase() {
        assert_eq!(OrchestratorState::from(PhaseName::Exploitation), OrchestratorState::Exploitation);
        assert!(OrchestratorState::Aborted.is_terminal());
        assert!(!OrchestratorState::Recon.is_terminal());
    }
}
