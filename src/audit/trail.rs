use std::path::{Path, PathBuf};
use async_trait::async_trait;
use tokio::sync::Mutex;
use crate::config::credentials::Redactor;
use crate::errors::WaypointError;
use super::agent_logger::AgentLogger;
use super::metrics_tracker::MetricsTracker;
use super::record::AttemptRecord;
use super::workflow_logger::WorkflowLogger;
use super::AuditLog;

/// File-backed audit trail under `<output>/<session-id>/audit-logs/`:
///
/// - `agents/<ts>_<agent>_attempt<n>.jsonl`: every exchange of one attempt
/// - `workflow.log`: timeline of attempts and milestones
/// - `session.json`: per-agent cost, token and attempt totals
pub struct AuditTrail {
    base_dir: PathBuf,
    session_id: String,
    metrics: Mutex<MetricsTracker>,
    workflow_logger: WorkflowLogger,
    redactor: Redactor,
}

impl AuditTrail {
    pub async fn initialize(
        session_output_dir: &Path,
        session_id: &str,
        redactor: Redactor,
    ) -> Result<Self, WaypointError> {
        let base_dir = session_output_dir.join("audit-logs");
        tokio::fs::create_dir_all(base_dir.join("agents")).await?;

        let metrics = MetricsTracker::load_or_new(&base_dir, session_id).await;
        let workflow_logger = WorkflowLogger::new(&base_dir);
        workflow_logger.initialize(session_id).await?;

        Ok(Self {
            base_dir,
            session_id: session_id.to_string(),
            metrics: Mutex::new(metrics),
            workflow_logger,
            redactor,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn total_cost_usd(&self) -> f64 {
        self.metrics.lock().await.data().total_cost_usd
    }
}

#[async_trait]
impl AuditLog for AuditTrail {
    async fn record_attempt(&self, record: &AttemptRecord) -> Result<(), WaypointError> {
        let mut logger = AgentLogger::create(&self.base_dir.join("agents"), record).await?;
        logger.write_attempt(record, &self.redactor).await?;

        self.metrics.lock().await.record(record).await?;

        let status = match &record.outcome {
            super::AttemptOutcome::Succeeded => "succeeded".to_string(),
            super::AttemptOutcome::Failed { message, .. } => {
                format!("failed: {}", self.redactor.redact(message))
            }
            super::AttemptOutcome::Cancelled => "cancelled".to_string(),
        };
        self.workflow_logger
            .log_event(&format!(
                "Agent {} attempt {} {} ({}ms)",
                record.agent,
                record.attempt,
                status,
                record.duration_ms()
            ))
            .await
    }

    async fn record_event(&self, message: &str) -> Result<(), WaypointError> {
        self.workflow_logger.log_event(&self.redactor.redact(message)).await
    }
}
