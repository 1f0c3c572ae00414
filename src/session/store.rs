use std::path::{Path, PathBuf};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::errors::WaypointError;
use crate::pipeline::state::PhaseName;
use crate::utils::atomic::atomic_write;
use super::state::{AgentStatus, Session};
use tracing::{debug, warn};

/// Persistence port for session state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<Session>, WaypointError>;

    /// Must be atomic: a crash mid-save leaves the previous record intact.
    async fn save(&self, session: &Session) -> Result<(), WaypointError>;

    async fn list(&self) -> Result<Vec<SessionSummary>, WaypointError>;

    /// Returns false when nothing was stored under `session_id`.
    async fn discard(&self, session_id: &str) -> Result<bool, WaypointError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub web_url: String,
    pub repo_path: PathBuf,
    pub current_phase: Option<PhaseName>,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub updated_at: DateTime<Utc>,
}

impl SessionSummary {
    pub fn from_session(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            web_url: session.target.web_url.clone(),
            repo_path: session.target.repo_path.clone(),
            current_phase: session.current_phase(),
            completed: session.agents_with_status(AgentStatus::Completed).len(),
            failed: session.agents_with_status(AgentStatus::Failed).len(),
            total: session.agents.len(),
            updated_at: session.updated_at,
        }
    }

    pub fn is_done(&self) -> bool {
        self.current_phase.is_none()
    }
}

/// One pretty-printed JSON file per session: `<dir>/<session-id>.json`.
pub struct JsonSessionStore {
    dir: PathBuf,
}

impl JsonSessionStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, WaypointError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, WaypointError> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(WaypointError::InvalidInvocation(format!(
                "Invalid session id: {:?}",
                session_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", session_id)))
    }
}

#[async_trait]
impl SessionStore for JsonSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<Session>, WaypointError> {
        let path = self.path_for(session_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let mut session: Session = serde_json::from_str(&content)?;
        session.fill_missing_entries();
        debug!(session_id, path = %path.display(), "Session loaded");
        Ok(Some(session))
    }

    async fn save(&self, session: &Session) -> Result<(), WaypointError> {
        let path = self.path_for(&session.id)?;
        let json = serde_json::to_string_pretty(session)?;
        atomic_write(&path, &json).await
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, WaypointError> {
        let pattern = self.dir.join("*.json");
        let pattern_str = pattern.to_string_lossy();
        let entries = glob::glob(&pattern_str)
            .map_err(|e| WaypointError::Internal(format!("Invalid session glob: {}", e)))?;

        let mut summaries = Vec::new();
        for entry in entries.flatten() {
            let parsed = match tokio::fs::read_to_string(&entry).await {
                Ok(content) => serde_json::from_str::<Session>(&content).map_err(WaypointError::from),
                Err(e) => Err(e.into()),
            };
            match parsed {
                Ok(session) => summaries.push(SessionSummary::from_session(&session)),
                Err(e) => warn!(file = %entry.display(), error = %e, "Skipping unreadable session file"),
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn discard(&self, session_id: &str) -> Result<bool, WaypointError> {
        let path = self.path_for(session_id)?;
        if !path.exists() {
            return Ok(false);
        }
        tokio::fs::remove_file(&path).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::state::TargetDescriptor;
    use tempfile::TempDir;

    fn session(id: &str) -> Session {
        Session::new(
            id.to_string(),
            TargetDescriptor {
                web_url: "https://a.test".into(),
                repo_path: PathBuf::from("/tmp/repo"),
                config_path: None,
            },
            "fp".into(),
        )
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonSessionStore::open(dir.path()).await.unwrap();
        let s = session("abc-1");
        store.save(&s).await.unwrap();
        let loaded = store.load("abc-1").await.unwrap().unwrap();
        assert_eq!(loaded, s);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonSessionStore::open(dir.path()).await.unwrap();
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal_ids() {
        let dir = TempDir::new().unwrap();
        let store = JsonSessionStore::open(dir.path()).await.unwrap();
        assert!(store.load("../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_list_skips_garbage_and_discard_removes() {
        let dir = TempDir::new().unwrap();
        let store = JsonSessionStore::open(dir.path()).await.unwrap();
        store.save(&session("one")).await.unwrap();
        store.save(&session("two")).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|s| s.total == 14 && s.completed == 0));

        assert!(store.discard("one").await.unwrap());
        assert!(!store.discard("one").await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
