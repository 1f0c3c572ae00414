use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::errors::WaypointError;
use crate::utils::atomic::atomic_write;
use super::record::{AttemptOutcome, AttemptRecord};

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct SessionMetrics {
    pub session_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub total_cost_usd: f64,
    pub total_attempts: u32,
    pub agents: BTreeMap<String, AgentAttemptMetrics>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct AgentAttemptMetrics {
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_status: String,
    pub duration_ms: u64,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model: Option<String>,
}

/// Aggregates attempt records into `session.json`.
pub struct MetricsTracker {
    path: PathBuf,
    data: SessionMetrics,
}

impl MetricsTracker {
    /// Picks up an existing `session.json` so totals survive resumes.
    pub async fn load_or_new(base_dir: &Path, session_id: &str) -> Self {
        let path = base_dir.join("session.json");
        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<SessionMetrics>(&content).ok(),
            Err(_) => None,
        };
        let data = existing.unwrap_or_else(|| SessionMetrics {
            session_id: session_id.to_string(),
            started_at: Some(Utc::now()),
            ..Default::default()
        });
        Self { path, data }
    }

    pub fn data(&self) -> &SessionMetrics {
        &self.data
    }

    pub async fn record(&mut self, record: &AttemptRecord) -> Result<(), WaypointError> {
        let entry = self.data.agents.entry(record.agent.as_str().to_string()).or_default();
        entry.attempts += 1;
        entry.last_attempt_at = Some(record.finished_at);
        entry.last_status = match &record.outcome {
            AttemptOutcome::Succeeded => "succeeded".into(),
            AttemptOutcome::Failed { error_type, .. } => format!("failed ({})", error_type),
            AttemptOutcome::Cancelled => "cancelled".into(),
        };
        entry.duration_ms += record.duration_ms();

        if let Some(usage) = &record.usage {
            let cost = usage.cost_usd.unwrap_or(0.0);
            entry.cost_usd += cost;
            entry.input_tokens += usage.input_tokens.unwrap_or(0);
            entry.output_tokens += usage.output_tokens.unwrap_or(0);
            if usage.model.is_some() {
                entry.model = usage.model.clone();
            }
            self.data.total_cost_usd += cost;
        }
        self.data.total_attempts += 1;
        self.save().await
    }

    pub async fn save(&self) -> Result<(), WaypointError> {
        let json = serde_json::to_string_pretty(&self.data)?;
        atomic_write(&self.path, &json).await
    }
}
