use std::collections::BTreeMap;
use std::path::PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::agents::registry::{AgentDefinition, AgentName, AGENT_REGISTRY};
use crate::errors::WaypointError;
use crate::git::Checkpoint;
use crate::models::{VulnCategory, VulnerabilityRecord};
use crate::pipeline::state::{AgentMetrics, PhaseName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AgentStatus {
    #[default]
    NotStarted,
    Running,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub status: AgentStatus,
    /// Completed without invoking the agent (exploitation gating).
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub metrics: Option<AgentMetrics>,
}

impl AgentRecord {
    pub fn reset(&mut self) {
        *self = AgentRecord { attempts: self.attempts, ..Default::default() };
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub web_url: String,
    pub repo_path: PathBuf,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub target: TargetDescriptor,
    pub config_fingerprint: String,
    #[serde(default)]
    pub pipeline_testing: bool,
    #[serde(default)]
    pub disable_loader: bool,
    pub agents: BTreeMap<AgentName, AgentRecord>,
    #[serde(default)]
    pub checkpoints: BTreeMap<AgentName, Checkpoint>,
    #[serde(default)]
    pub vulnerabilities: BTreeMap<VulnCategory, Vec<VulnerabilityRecord>>,
    #[serde(default)]
    pub baseline_commit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: String, target: TargetDescriptor, config_fingerprint: String) -> Self {
        let now = Utc::now();
        let mut session = Self {
            id,
            target,
            config_fingerprint,
            pipeline_testing: false,
            disable_loader: false,
            agents: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
            vulnerabilities: BTreeMap::new(),
            baseline_commit: None,
            created_at: now,
            updated_at: now,
        };
        session.fill_missing_entries();
        session
    }

    /// Ensure every agent of the graph and every category has an entry.
    pub fn fill_missing_entries(&mut self) {
        for def in AGENT_REGISTRY.iter() {
            self.agents.entry(def.name).or_default();
        }
        for category in VulnCategory::ALL {
            self.vulnerabilities.entry(category).or_default();
        }
    }

    pub fn status(&self, name: AgentName) -> AgentStatus {
        self.agents.get(&name).map(|r| r.status).unwrap_or_default()
    }

    pub fn record(&self, name: AgentName) -> Option<&AgentRecord> {
        self.agents.get(&name)
    }

    pub fn is_completed(&self, name: AgentName) -> bool {
        self.status(name) == AgentStatus::Completed
    }

    pub fn is_skipped(&self, name: AgentName) -> bool {
        self.agents.get(&name).map(|r| r.skipped).unwrap_or(false)
    }

    pub fn check_prerequisites(&self, name: AgentName) -> bool {
        self.missing_prerequisites(name).is_empty()
    }

    pub fn missing_prerequisites(&self, name: AgentName) -> Vec<AgentName> {
        name.definition()
            .prerequisites
            .iter()
            .copied()
            .filter(|p| !self.is_completed(*p))
            .collect()
    }

    pub fn vulnerabilities_for(&self, category: VulnCategory) -> &[VulnerabilityRecord] {
        self.vulnerabilities
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn phase_complete(&self, phase: PhaseName) -> bool {
        AGENT_REGISTRY
            .iter()
            .filter(|d| d.phase == phase)
            .all(|d| self.is_completed(d.name))
    }

    /// First phase, in order, with an agent that has not completed.
    pub fn current_phase(&self) -> Option<PhaseName> {
        PhaseName::ALL.into_iter().find(|p| !self.phase_complete(*p))
    }

    pub fn is_done(&self) -> bool {
        self.current_phase().is_none()
    }

    pub fn agents_with_status(&self, status: AgentStatus) -> Vec<AgentName> {
        AGENT_REGISTRY
            .iter()
            .map(|d| d.name)
            .filter(|n| self.status(*n) == status)
            .collect()
    }

    /// Agents that can never run until the operator intervenes: failed ones and
    /// those waiting directly on a failed prerequisite.
    pub fn blocked_agents(&self) -> Vec<&'static AgentDefinition> {
        AGENT_REGISTRY
            .iter()
            .filter(|d| !self.is_completed(d.name))
            .filter(|d| {
                self.status(d.name) == AgentStatus::Failed
                    || d.prerequisites.iter().any(|p| self.status(*p) == AgentStatus::Failed)
            })
            .collect()
    }

    /// Running agents left behind by a process that died mid-flight are
    /// reverted so the next run re-attempts them. Returns the agents touched.
    pub fn recover_interrupted(&mut self) -> Vec<AgentName> {
        let mut touched = Vec::new();
        for (name, record) in self.agents.iter_mut() {
            if record.status == AgentStatus::Running {
                record.status = AgentStatus::NotStarted;
                record.started_at = None;
                touched.push(*name);
            }
        }
        touched
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn verify_invariants(&self) -> Result<(), WaypointError> {
        for def in AGENT_REGISTRY.iter() {
            let completed = self.is_completed(def.name);
            let has_checkpoint = self.checkpoints.contains_key(&def.name);
            if completed != has_checkpoint {
                return Err(WaypointError::Internal(format!(
                    "Session {}: agent {} completed={} but checkpoint present={}",
                    self.id, def.name, completed, has_checkpoint
                )));
            }
            if completed {
                let missing = self.missing_prerequisites(def.name);
                if !missing.is_empty() {
                    return Err(WaypointError::PrerequisiteViolation {
                        agent: def.name.to_string(),
                        missing: missing.iter().map(|m| m.to_string()).collect(),
                    });
                }
            }
        }
        Ok(())
    }
}
