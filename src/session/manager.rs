use std::sync::Arc;
use chrono::Utc;
use uuid::Uuid;
use crate::agents::registry::{AgentDefinition, AgentKind, AgentName, AGENT_REGISTRY};
use crate::errors::WaypointError;
use crate::git::Checkpoint;
use crate::models::{ExploitOutcome, VulnCategory, VulnerabilityRecord};
use crate::pipeline::state::{AgentMetrics, PhaseName};
use crate::utils::truncation::truncate_error;
use super::state::{AgentStatus, Session, TargetDescriptor};
use super::store::{SessionStore, SessionSummary};
use tracing::{error, info, warn};

/// Namespace for session ids and config fingerprints.
const WAYPOINT_NAMESPACE: Uuid = Uuid::from_u128(0x5f1c_9a7e_3b2d_4c8f_a0e1_6d4b_92c3_7e15);

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Resume this id instead of deriving one from the target.
    pub session_id: Option<String>,
    pub config_fingerprint: String,
    pub pipeline_testing: bool,
    pub disable_loader: bool,
}

/// Deterministic id for a target: the same URL, repository and config path
/// always map to the same session.
pub fn session_id_for(target: &TargetDescriptor) -> String {
    let key = format!(
        "{}|{}|{}",
        target.web_url.trim_end_matches('/'),
        target.repo_path.display(),
        target.config_path.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
    );
    Uuid::new_v5(&WAYPOINT_NAMESPACE, key.as_bytes()).to_string()
}

pub fn fingerprint(config_content: &str) -> String {
    Uuid::new_v5(&WAYPOINT_NAMESPACE, config_content.as_bytes()).to_string()
}

/// All mutations of a [`Session`] go through here and are persisted before
/// the call returns.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    retry_failed_on_resume: bool,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store, retry_failed_on_resume: true }
    }

    pub fn with_retry_failed(mut self, retry: bool) -> Self {
        self.retry_failed_on_resume = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub async fn create_or_resume_session(
        &self,
        target: &TargetDescriptor,
        options: &SessionOptions,
    ) -> Result<Session, WaypointError> {
        let id = options
            .session_id
            .clone()
            .unwrap_or_else(|| session_id_for(target));

        if let Some(mut session) = self.store.load(&id).await? {
            if session.target != *target {
                return Err(WaypointError::ConfigMismatch {
                    session_id: id,
                    detail: format!(
                        "stored target {} ({}) differs from {} ({})",
                        session.target.web_url,
                        session.target.repo_path.display(),
                        target.web_url,
                        target.repo_path.display()
                    ),
                });
            }
            if session.config_fingerprint != options.config_fingerprint {
                return Err(WaypointError::ConfigMismatch {
                    session_id: id,
                    detail: "config file changed since the session was created".into(),
                });
            }

            let recovered = session.recover_interrupted();
            if !recovered.is_empty() {
                warn!(session_id = %session.id, agents = ?recovered, "Agents left running by a previous process reset to not-started");
            }
            info!(
                session_id = %session.id,
                completed = session.agents_with_status(AgentStatus::Completed).len(),
                "Resuming session"
            );
            return Ok(session);
        }

        let mut session = Session::new(id, target.clone(), options.config_fingerprint.clone());
        session.pipeline_testing = options.pipeline_testing;
        session.disable_loader = options.disable_loader;
        self.store.save(&session).await?;
        info!(session_id = %session.id, web_url = %target.web_url, "Created session");
        Ok(session)
    }

    pub async fn load_session(&self, session_id: &str) -> Result<Session, WaypointError> {
        let mut session = self.store.load(session_id).await?.ok_or_else(|| {
            WaypointError::InvalidInvocation(format!("No session with id {}", session_id))
        })?;
        session.recover_interrupted();
        Ok(session)
    }

    fn eligible(&self, session: &Session, def: &AgentDefinition) -> bool {
        let status_ok = match session.status(def.name) {
            AgentStatus::NotStarted => true,
            AgentStatus::Failed => self.retry_failed_on_resume,
            AgentStatus::Running | AgentStatus::Completed => false,
        };
        status_ok && session.check_prerequisites(def.name)
    }

    /// First agent in graph order that may run now.
    pub fn next_agent(&self, session: &Session) -> Option<&'static AgentDefinition> {
        AGENT_REGISTRY.iter().find(|d| self.eligible(session, d))
    }

    pub fn next_agent_in_phase(&self, session: &Session, phase: PhaseName) -> Option<&'static AgentDefinition> {
        AGENT_REGISTRY
            .iter()
            .filter(|d| d.phase == phase)
            .find(|d| self.eligible(session, d))
    }

    /// Agents of `phase` that may run now, in graph order.
    pub fn runnable_in_phase(&self, session: &Session, phase: PhaseName) -> Vec<&'static AgentDefinition> {
        AGENT_REGISTRY
            .iter()
            .filter(|d| d.phase == phase)
            .filter(|d| self.eligible(session, d))
            .collect()
    }

    pub fn check_prerequisites(&self, session: &Session, agent: AgentName) -> bool {
        session.check_prerequisites(agent)
    }

    fn ensure_prerequisites(session: &Session, agent: AgentName) -> Result<(), WaypointError> {
        let missing = session.missing_prerequisites(agent);
        if missing.is_empty() {
            return Ok(());
        }
        let missing: Vec<String> = missing.iter().map(|m| m.to_string()).collect();
        error!(session_id = %session.id, agent = %agent, missing = ?missing, "Prerequisite violation");
        Err(WaypointError::PrerequisiteViolation { agent: agent.to_string(), missing })
    }

    async fn persist(&self, session: &mut Session) -> Result<(), WaypointError> {
        session.touch();
        self.store.save(session).await
    }

    pub async fn save(&self, session: &mut Session) -> Result<(), WaypointError> {
        self.persist(session).await
    }

    pub async fn mark_agent_running(&self, session: &mut Session, agent: AgentName) -> Result<(), WaypointError> {
        Self::ensure_prerequisites(session, agent)?;
        let def = agent.definition();
        // A re-run analysis agent replaces its category's hypotheses.
        if def.kind == AgentKind::VulnAnalyzer {
            if let Some(category) = def.category {
                session.vulnerabilities.insert(category, Vec::new());
            }
        }
        let record = session.agents.entry(agent).or_default();
        record.status = AgentStatus::Running;
        record.skipped = false;
        record.attempts += 1;
        record.started_at = Some(Utc::now());
        record.completed_at = None;
        record.error = None;
        self.persist(session).await
    }

    pub async fn mark_agent_completed(
        &self,
        session: &mut Session,
        agent: AgentName,
        checkpoint: Checkpoint,
        metrics: Option<AgentMetrics>,
    ) -> Result<(), WaypointError> {
        Self::ensure_prerequisites(session, agent)?;
        let record = session.agents.entry(agent).or_default();
        record.status = AgentStatus::Completed;
        record.skipped = false;
        record.completed_at = Some(Utc::now());
        record.error = None;
        record.metrics = metrics;
        session.checkpoints.insert(agent, checkpoint);
        self.persist(session).await
    }

    /// Gating outcome: completed without doing any work.
    pub async fn mark_agent_skipped(
        &self,
        session: &mut Session,
        agent: AgentName,
        checkpoint: Checkpoint,
    ) -> Result<(), WaypointError> {
        Self::ensure_prerequisites(session, agent)?;
        let now = Utc::now();
        let record = session.agents.entry(agent).or_default();
        record.status = AgentStatus::Completed;
        record.skipped = true;
        record.started_at.get_or_insert(now);
        record.completed_at = Some(now);
        record.error = None;
        record.metrics = None;
        session.checkpoints.insert(agent, checkpoint);
        self.persist(session).await
    }

    pub async fn mark_agent_failed(
        &self,
        session: &mut Session,
        agent: AgentName,
        error: &str,
    ) -> Result<(), WaypointError> {
        let record = session.agents.entry(agent).or_default();
        record.status = AgentStatus::Failed;
        record.completed_at = Some(Utc::now());
        record.error = Some(truncate_error(error));
        session.checkpoints.remove(&agent);
        self.persist(session).await
    }

    /// User abort: the agent goes back to not-started as if it never ran.
    pub async fn mark_agent_interrupted(&self, session: &mut Session, agent: AgentName) -> Result<(), WaypointError> {
        let record = session.agents.entry(agent).or_default();
        record.status = AgentStatus::NotStarted;
        record.started_at = None;
        record.completed_at = None;
        self.persist(session).await
    }

    /// Append hypotheses for `category`, assigning `<category>-<n>` ids to
    /// records that arrive without one. New records are never exploited.
    pub async fn record_vulnerabilities(
        &self,
        session: &mut Session,
        category: VulnCategory,
        records: Vec<VulnerabilityRecord>,
    ) -> Result<Vec<String>, WaypointError> {
        let list = session.vulnerabilities.entry(category).or_default();
        let mut ids = Vec::with_capacity(records.len());
        for mut record in records {
            if record.category != category {
                warn!(expected = %category, got = %record.category, "Hypothesis filed under the wrong category, correcting");
                record.category = category;
            }
            if record.id.is_empty() || list.iter().any(|r| r.id == record.id) {
                record.id = next_vuln_id(category, list);
            }
            record.exploited = false;
            record.proof = None;
            ids.push(record.id.clone());
            list.push(record);
        }
        self.persist(session).await?;
        Ok(ids)
    }

    /// Write exploitation verdicts back onto their records. Returns how many
    /// outcomes matched a known record.
    pub async fn record_exploitation(
        &self,
        session: &mut Session,
        category: VulnCategory,
        outcomes: Vec<ExploitOutcome>,
    ) -> Result<usize, WaypointError> {
        let list = session.vulnerabilities.entry(category).or_default();
        let mut matched = 0;
        for outcome in outcomes {
            match list.iter_mut().find(|r| r.id == outcome.vulnerability_id) {
                Some(record) => {
                    record.exploited = outcome.exploited;
                    record.proof = if outcome.exploited { outcome.proof } else { None };
                    matched += 1;
                }
                None => warn!(
                    category = %category,
                    vulnerability_id = %outcome.vulnerability_id,
                    "Exploitation outcome for unknown hypothesis ignored"
                ),
            }
        }
        self.persist(session).await?;
        Ok(matched)
    }

    /// Return `agents` to not-started, dropping their checkpoints and the
    /// data they produced.
    pub async fn reset_agents(&self, session: &mut Session, agents: &[AgentName]) -> Result<(), WaypointError> {
        for agent in agents {
            if let Some(record) = session.agents.get_mut(agent) {
                record.reset();
            }
            session.checkpoints.remove(agent);

            let def = agent.definition();
            match (def.kind, def.category) {
                (AgentKind::VulnAnalyzer, Some(category)) => {
                    session.vulnerabilities.insert(category, Vec::new());
                }
                (AgentKind::Exploiter, Some(category)) => {
                    for record in session.vulnerabilities.entry(category).or_default() {
                        record.exploited = false;
                        record.proof = None;
                    }
                }
                _ => {}
            }
        }
        self.persist(session).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, WaypointError> {
        self.store.list().await
    }

    pub async fn discard_session(&self, session_id: &str) -> Result<bool, WaypointError> {
        let removed = self.store.discard(session_id).await?;
        if removed {
            info!(session_id, "Session discarded");
        }
        Ok(removed)
    }
}

fn next_vuln_id(category: VulnCategory, existing: &[VulnerabilityRecord]) -> String {
    let mut n = existing.len() + 1;
    loop {
        let candidate = format!("{}-{}", category, n);
        if !existing.iter().any(|r| r.id == candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::JsonSessionStore;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn target() -> TargetDescriptor {
        TargetDescriptor {
            web_url: "https://shop.test".into(),
            repo_path: PathBuf::from("/srv/shop"),
            config_path: None,
        }
    }

    fn checkpoint(agent: AgentName) -> Checkpoint {
        Checkpoint { agent, commit_id: format!("c-{}", agent), base_commit: None, created_at: Utc::now() }
    }

    async fn manager(dir: &TempDir) -> SessionManager {
        let store = JsonSessionStore::open(dir.path()).await.unwrap();
        SessionManager::new(Arc::new(store))
    }

    #[test]
    fn test_session_id_is_deterministic() {
        let mut t = target();
        let a = session_id_for(&t);
        t.web_url.push('/');
        assert_eq!(a, session_id_for(&t));
        t.config_path = Some(PathBuf::from("cfg.yaml"));
        assert_ne!(a, session_id_for(&t));
        assert_eq!(fingerprint(""), fingerprint(""));
        assert_ne!(fingerprint("a"), fingerprint("b"));
    }

    #[tokio::test]
    async fn test_resume_returns_persisted_session() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir).await;
        let opts = SessionOptions { config_fingerprint: fingerprint(""), ..Default::default() };

        let mut s = mgr.create_or_resume_session(&target(), &opts).await.unwrap();
        mgr.mark_agent_running(&mut s, AgentName::PreReconCode).await.unwrap();
        mgr.mark_agent_completed(&mut s, AgentName::PreReconCode, checkpoint(AgentName::PreReconCode), None)
            .await
            .unwrap();

        let resumed = mgr.create_or_resume_session(&target(), &opts).await.unwrap();
        assert_eq!(resumed, s);
    }

    #[tokio::test]
    async fn test_fingerprint_change_is_a_mismatch() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir).await;
        let opts = SessionOptions { config_fingerprint: fingerprint("a"), ..Default::default() };
        let s = mgr.create_or_resume_session(&target(), &opts).await.unwrap();

        let changed = SessionOptions { config_fingerprint: fingerprint("b"), ..Default::default() };
        let err = mgr.create_or_resume_session(&target(), &changed).await.unwrap_err();
        assert!(matches!(err, WaypointError::ConfigMismatch { .. }));

        let stored = mgr.store().load(&s.id).await.unwrap().unwrap();
        assert_eq!(stored, s);
    }

    #[tokio::test]
    async fn test_completion_requires_prerequisites() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir).await;
        let mut s = mgr.create_or_resume_session(&target(), &SessionOptions::default()).await.unwrap();

        let err = mgr
            .mark_agent_completed(&mut s, AgentName::Recon, checkpoint(AgentName::Recon), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WaypointError::PrerequisiteViolation { .. }));
        assert!(!s.is_completed(AgentName::Recon));
    }

    #[tokio::test]
    async fn test_next_agent_follows_graph() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir).await;
        let mut s = mgr.create_or_resume_session(&target(), &SessionOptions::default()).await.unwrap();
        assert_eq!(mgr.next_agent(&s).unwrap().name, AgentName::PreReconCode);

        mgr.mark_agent_completed(&mut s, AgentName::PreReconCode, checkpoint(AgentName::PreReconCode), None)
            .await
            .unwrap();
        assert_eq!(mgr.next_agent(&s).unwrap().name, AgentName::PreReconTools);
        assert!(mgr.next_agent_in_phase(&s, PhaseName::Recon).is_none());

        mgr.mark_agent_failed(&mut s, AgentName::PreReconTools, "boom").await.unwrap();
        let strict = SessionManager::new(mgr.store().clone()).with_retry_failed(false);
        assert!(strict.next_agent(&s).is_none());
        assert_eq!(mgr.next_agent(&s).unwrap().name, AgentName::PreReconTools);
    }

    #[tokio::test]
    async fn test_vulnerability_ids_and_exploitation() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir).await;
        let mut s = mgr.create_or_resume_session(&target(), &SessionOptions::default()).await.unwrap();

        let ids = mgr
            .record_vulnerabilities(
                &mut s,
                VulnCategory::Xss,
                vec![
                    VulnerabilityRecord::hypothesis(VulnCategory::Xss, "reflected q param"),
                    VulnerabilityRecord::hypothesis(VulnCategory::Xss, "stored comment"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(ids, vec!["xss-1", "xss-2"]);

        let matched = mgr
            .record_exploitation(
                &mut s,
                VulnCategory::Xss,
                vec![
                    ExploitOutcome { vulnerability_id: "xss-2".into(), exploited: true, proof: None },
                    ExploitOutcome { vulnerability_id: "xss-9".into(), exploited: true, proof: None },
                ],
            )
            .await
            .unwrap();
        assert_eq!(matched, 1);
        let records = s.vulnerabilities_for(VulnCategory::Xss);
        assert!(!records[0].exploited);
        assert!(records[1].exploited);
    }

    #[tokio::test]
    async fn test_running_analysis_clears_stale_hypotheses() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir).await;
        let mut s = mgr.create_or_resume_session(&target(), &SessionOptions::default()).await.unwrap();
        for agent in [AgentName::PreReconCode, AgentName::PreReconTools, AgentName::Recon] {
            mgr.mark_agent_completed(&mut s, agent, checkpoint(agent), None).await.unwrap();
        }
        mgr.record_vulnerabilities(&mut s, VulnCategory::Auth, vec![VulnerabilityRecord::hypothesis(VulnCategory::Auth, "old")])
            .await
            .unwrap();

        mgr.mark_agent_running(&mut s, AgentName::AuthVuln).await.unwrap();
        assert!(s.vulnerabilities_for(VulnCategory::Auth).is_empty());
        assert_eq!(s.record(AgentName::AuthVuln).unwrap().attempts, 1);
    }
}
