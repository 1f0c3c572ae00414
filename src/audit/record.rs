use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::agents::agent::Usage;
use crate::agents::registry::AgentName;
use crate::errors::WaypointError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeRole {
    System,
    Prompt,
    Response,
    Tool,
}

/// One message in an agent's conversation with its LLM or tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub role: ExchangeRole,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl Exchange {
    pub fn new(role: ExchangeRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), at: Utc::now() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed { error_type: String, message: String, retryable: bool },
    Cancelled,
}

impl AttemptOutcome {
    pub fn from_error(error: &WaypointError) -> Self {
        if matches!(error, WaypointError::Cancelled) {
            return Self::Cancelled;
        }
        let class = error.classify();
        Self::Failed {
            error_type: class.error_type.to_string(),
            message: error.to_string(),
            retryable: class.retryable,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub session_id: String,
    pub agent: AgentName,
    /// 1-indexed attempt within this run of the agent.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exchanges: Vec<Exchange>,
    pub usage: Option<Usage>,
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}
