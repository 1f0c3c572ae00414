use std::path::{Path, PathBuf};
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use crate::config::credentials::Redactor;
use crate::errors::WaypointError;
use super::record::AttemptRecord;

/// Writes one JSONL file per agent attempt under `agents/`.
pub struct AgentLogger {
    file: tokio::fs::File,
    path: PathBuf,
}

impl AgentLogger {
    pub async fn create(agents_dir: &Path, record: &AttemptRecord) -> Result<Self, WaypointError> {
        let filename = format!(
            "{}_{}_attempt{}.jsonl",
            record.started_at.format("%Y%m%d_%H%M%S%3f"),
            record.agent.as_str(),
            record.attempt,
        );
        let path = agents_dir.join(&filename);
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn log_event(&mut self, event_type: &str, data: &serde_json::Value) -> Result<(), WaypointError> {
        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event_type,
            "data": data,
        });
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        self.file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Header line, one line per exchange, then the outcome.
    pub async fn write_attempt(&mut self, record: &AttemptRecord, redactor: &Redactor) -> Result<(), WaypointError> {
        self.log_event("attempt_start", &serde_json::json!({
            "session_id": record.session_id,
            "agent": record.agent,
            "attempt": record.attempt,
            "started_at": record.started_at.to_rfc3339(),
        }))
        .await?;

        for exchange in &record.exchanges {
            let value = redactor.redact_json(&serde_json::to_value(exchange)?);
            self.log_event("exchange", &value).await?;
        }

        let outcome = redactor.redact_json(&serde_json::to_value(&record.outcome)?);
        self.log_event("attempt_end", &serde_json::json!({
            "outcome": outcome,
            "usage": record.usage,
            "duration_ms": record.duration_ms(),
        }))
        .await?;
        self.file.flush().await?;
        Ok(())
    }
}
