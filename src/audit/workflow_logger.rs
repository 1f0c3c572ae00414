use std::path::{Path, PathBuf};
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use crate::errors::WaypointError;

/// Human-readable timeline of a session, appended across resumes.
pub struct WorkflowLogger {
    path: PathBuf,
}

impl WorkflowLogger {
    pub fn new(base_dir: &Path) -> Self {
        Self { path: base_dir.join("workflow.log") }
    }

    pub async fn initialize(&self, session_id: &str) -> Result<(), WaypointError> {
        let header = if self.path.exists() {
            format!("\n# Resumed: {}\n\n", Utc::now().to_rfc3339())
        } else {
            format!("# Waypoint Workflow Log\n# Session: {}\n# Started: {}\n\n", session_id, Utc::now().to_rfc3339())
        };
        self.append(&header).await
    }

    pub async fn log_event(&self, message: &str) -> Result<(), WaypointError> {
        let line = format!("[{}] {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S"), message);
        self.append(&line).await
    }

    async fn append(&self, text: &str) -> Result<(), WaypointError> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_every_event_is_on_disk_when_log_event_returns() {
        let dir = TempDir::new().unwrap();
        let logger = WorkflowLogger::new(dir.path());
        logger.initialize("s-1").await.unwrap();
        for n in 1..=3 {
            logger.log_event(&format!("Phase {} stopped", n)).await.unwrap();
            let content = std::fs::read_to_string(dir.path().join("workflow.log")).unwrap();
            assert!(content.contains(&format!("Phase {} stopped", n)), "{}", content);
        }

        let resumed = WorkflowLogger::new(dir.path());
        resumed.initialize("s-1").await.unwrap();
        let content = std::fs::read_to_string(dir.path().join("workflow.log")).unwrap();
        assert!(content.contains("# Resumed:"));
        assert_eq!(content.matches("# Session: s-1").count(), 1);
    }
}
