use std::path::{Path, PathBuf};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::agents::registry::{dependents_of, AgentName};
use crate::errors::WaypointError;
use crate::session::manager::SessionManager;
use crate::session::state::Session;
use super::backend::{CheckpointBackend, GitBackend};
use super::semaphore::GitSemaphore;
use tracing::{info, warn};

/// Snapshot of the source tree taken when an agent completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub agent: AgentName,
    pub commit_id: String,
    /// HEAD when the agent started, i.e. the tree it ran against.
    pub base_commit: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct CheckpointManager {
    backend: Arc<dyn CheckpointBackend>,
    lock: GitSemaphore,
}

impl CheckpointManager {
    pub fn new(backend: Arc<dyn CheckpointBackend>) -> Self {
        Self { backend, lock: GitSemaphore::new() }
    }

    pub fn git() -> Self {
        Self::new(Arc::new(GitBackend))
    }

    /// Commit the whole working tree and return the commit id. Returns HEAD
    /// unchanged when nothing differs from it.
    pub async fn capture_checkpoint(&self, source_dir: &Path, message: &str) -> Result<String, WaypointError> {
        let _permit = self.lock.acquire().await?;
        let backend = self.backend.clone();
        let dir = source_dir.to_path_buf();
        let message = message.to_string();
        tokio::task::spawn_blocking(move || backend.commit(&dir, &message, false)).await?
    }

    pub async fn head(&self, source_dir: &Path) -> Result<Option<String>, WaypointError> {
        let _permit = self.lock.acquire().await?;
        let backend = self.backend.clone();
        let dir = source_dir.to_path_buf();
        tokio::task::spawn_blocking(move || backend.head(&dir)).await?
    }

    /// Capture the tree after `agent` finished, remembering where it started.
    ///
    /// When the resulting commit is one of `distinct_from` (checkpoints other
    /// agents already own), an empty commit is made so every agent gets its
    /// own id.
    pub async fn checkpoint_agent(
        &self,
        source_dir: &Path,
        agent: AgentName,
        base_commit: Option<String>,
        note: &str,
        distinct_from: &[String],
    ) -> Result<Checkpoint, WaypointError> {
        let message = format!("waypoint: {} {}", agent, note);
        let _permit = self.lock.acquire().await?;
        let backend = self.backend.clone();
        let dir = source_dir.to_path_buf();
        let claimed = distinct_from.to_vec();
        let commit_id = tokio::task::spawn_blocking(move || {
            let id = backend.commit(&dir, &message, false)?;
            if claimed.contains(&id) {
                backend.commit(&dir, &message, true)
            } else {
                Ok(id)
            }
        })
        .await??;
        Ok(Checkpoint { agent, commit_id, base_commit, created_at: Utc::now() })
    }

    async fn reset_tree(&self, source_dir: PathBuf, commit_id: String) -> Result<(), WaypointError> {
        let _permit = self.lock.acquire().await?;
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || backend.reset(&source_dir, &commit_id)).await?
    }

    /// Restore the tree to just before `target` last ran and revert `target`
    /// plus every transitive dependent to not-started. Returns the agents reverted.
    pub async fn rollback_to_agent(
        &self,
        sessions: &SessionManager,
        session: &mut Session,
        target: AgentName,
    ) -> Result<Vec<AgentName>, WaypointError> {
        let checkpoint = session
            .checkpoints
            .get(&target)
            .cloned()
            .ok_or_else(|| WaypointError::NoCheckpoint { agent: target.to_string() })?;

        let restore_to = checkpoint
            .base_commit
            .clone()
            .or_else(|| latest_prerequisite_commit(session, target))
            .or_else(|| session.baseline_commit.clone())
            .ok_or_else(|| {
                WaypointError::Git(format!("No base commit recorded for {}", target))
            })?;

        let mut reverted = vec![target];
        reverted.extend(dependents_of(target));

        let started = session.record(target).and_then(|r| r.started_at);
        let overtaken: Vec<AgentName> = session
            .checkpoints
            .values()
            .filter(|c| !reverted.contains(&c.agent))
            .filter(|c| started.is_some_and(|s| c.created_at > s))
            .map(|c| c.agent)
            .collect();
        if !overtaken.is_empty() {
            warn!(
                session_id = %session.id,
                agents = ?overtaken,
                "Agents that finished while {} ran stay completed, but their files are rolled back with the tree",
                target
            );
        }

        self.revert(sessions, session, restore_to, &reverted).await?;
        info!(session_id = %session.id, agent = %target, reverted = reverted.len(), "Rolled back to before agent");
        Ok(reverted)
    }

    /// Restore the tree to `target`'s own checkpoint; `target` stays completed
    /// and only its dependents are reverted.
    pub async fn rollback_after_agent(
        &self,
        sessions: &SessionManager,
        session: &mut Session,
        target: AgentName,
    ) -> Result<Vec<AgentName>, WaypointError> {
        let checkpoint = session
            .checkpoints
            .get(&target)
            .cloned()
            .ok_or_else(|| WaypointError::NoCheckpoint { agent: target.to_string() })?;

        let reverted = dependents_of(target);
        self.revert(sessions, session, checkpoint.commit_id, &reverted).await?;
        info!(session_id = %session.id, agent = %target, reverted = reverted.len(), "Rolled back to after agent");
        Ok(reverted)
    }

    async fn revert(
        &self,
        sessions: &SessionManager,
        session: &mut Session,
        commit_id: String,
        agents: &[AgentName],
    ) -> Result<(), WaypointError> {
        let still_running: Vec<_> = agents
            .iter()
            .filter(|a| session.status(**a) == crate::session::state::AgentStatus::Running)
            .collect();
        if !still_running.is_empty() {
            warn!(session_id = %session.id, agents = ?still_running, "Reverting agents recorded as running");
        }

        // Tree before session state.
        self.reset_tree(session.target.repo_path.clone(), commit_id).await?;
        sessions.reset_agents(session, agents).await
    }
}

/// Newest checkpoint among `target`'s prerequisites, for sessions written
/// before base commits were recorded.
fn latest_prerequisite_commit(session: &Session, target: AgentName) -> Option<String> {
    target
        .definition()
        .prerequisites
        .iter()
        .filter_map(|p| session.checkpoints.get(p))
        .max_by_key(|c| c.created_at)
        .map(|c| c.commit_id.clone())
}
