use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use crate::agents::registry::AgentName;
use crate::agents::{AgentExecutor, AgentRegistry};
use crate::audit::{AuditLog, AuditTrail};
use crate::config::credentials::Redactor;
use crate::config::RunConfig;
use crate::errors::WaypointError;
use crate::git::{CheckpointBackend, CheckpointManager};
use crate::reporting::Reporter;
use crate::session::manager::SessionManager;
use crate::session::state::{AgentStatus, Session};
use crate::session::store::{JsonSessionStore, SessionStore};
use super::events::{EventEmitter, PipelineEvent};
use super::phase::agents_in_phase;
use super::runner::PhaseRunner;
use super::state::{OrchestratorState, PhaseName, PhaseResult, RunOutcome, RunSummary};
use tracing::{error, info, warn};

const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(15);

/// Top-level driver: resumes or creates the session for a target and walks
/// the phases until every agent has completed, then produces the report.
pub struct Orchestrator {
    config: RunConfig,
    sessions: Arc<SessionManager>,
    checkpoints: Arc<CheckpointManager>,
    agents: Arc<AgentRegistry>,
    reporter: Arc<dyn Reporter>,
    audit: Option<Arc<dyn AuditLog>>,
    cancel_token: CancellationToken,
    events: EventEmitter,
    state: OrchestratorState,
}

impl Orchestrator {
    /// Sessions persist under `<output>/sessions/`, checkpoints go to git.
    pub async fn new(
        config: RunConfig,
        agents: AgentRegistry,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, WaypointError> {
        let store = JsonSessionStore::open(config.sessions_dir()).await?;
        Ok(Self::with_store(config, Arc::new(store), agents, reporter))
    }

    pub fn with_store(
        config: RunConfig,
        store: Arc<dyn SessionStore>,
        agents: AgentRegistry,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let sessions = SessionManager::new(store).with_retry_failed(config.retry_failed_on_resume);
        Self {
            config,
            sessions: Arc::new(sessions),
            checkpoints: Arc::new(CheckpointManager::git()),
            agents: Arc::new(agents),
            reporter,
            audit: None,
            cancel_token: CancellationToken::new(),
            events: EventEmitter::default(),
            state: OrchestratorState::Init,
        }
    }

    pub fn with_checkpoint_backend(mut self, backend: Arc<dyn CheckpointBackend>) -> Self {
        self.checkpoints = Arc::new(CheckpointManager::new(backend));
        self
    }

    /// Use this audit sink instead of the file trail under the output directory.
    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Share an external token so Ctrl-C handlers can stop the run.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn with_event_channel(mut self, tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.events = EventEmitter::new(Some(tx));
        self
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        &self.checkpoints
    }

    fn transition(&mut self, next: OrchestratorState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "Orchestrator state change");
            self.state = next;
        }
    }

    pub async fn run(&mut self) -> Result<RunOutcome, WaypointError> {
        self.transition(OrchestratorState::Init);
        match self.drive().await {
            Ok(outcome) => {
                self.transition(OrchestratorState::Done);
                self.events.emit(PipelineEvent::RunCompleted { summary: outcome.summary.clone() });
                Ok(outcome)
            }
            Err(e) => {
                self.transition(OrchestratorState::Aborted);
                error!(error = %e, "Run aborted");
                self.events.emit(PipelineEvent::RunFailed { error: e.to_string() });
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<RunOutcome, WaypointError> {
        let (shared, audit) = self.open_session().await?;
        let session_id = shared.lock().await.id.clone();
        let runner = self.phase_runner(audit.clone());

        loop {
            if self.cancel_token.is_cancelled() {
                return Err(WaypointError::Cancelled);
            }
            let Some(phase) = shared.lock().await.current_phase() else {
                break;
            };

            self.transition(phase.into());
            self.events.phase_started(phase);
            record_event(audit.as_ref(), &format!("Phase {} started", phase)).await;

            let result = runner.run_phase(phase, &shared).await?;
            if !result.interrupted.is_empty() || self.cancel_token.is_cancelled() {
                warn!(session_id = %session_id, phase = %phase, interrupted = ?result.interrupted, "Run interrupted");
                return Err(WaypointError::Cancelled);
            }

            let s = shared.lock().await;
            if !s.phase_complete(phase) {
                let agents = incomplete_agents(&s, phase, &result);
                record_event(audit.as_ref(), &format!("Phase {} stopped: {}", phase, agents.join(", "))).await;
                return Err(WaypointError::AgentsFailed { session_id, agents });
            }
            drop(s);

            info!(session_id = %session_id, phase = %phase, completed = result.completed.len(), skipped = result.skipped.len(), "Phase completed");
            record_event(audit.as_ref(), &format!("Phase {} completed", phase)).await;
            self.events.phase_completed(phase);
        }

        self.transition(OrchestratorState::Reporting);
        let session = shared.lock().await.clone();
        let handles = self.reporter.generate_report(&session).await?;
        record_event(audit.as_ref(), &format!("Report written to {}", handles.report_path.display())).await;

        let summary = RunSummary::from_session(&session);
        info!(
            session_id = %session.id,
            exploited = summary.exploited,
            cost_usd = summary.total_cost_usd,
            "Run complete"
        );
        Ok(RunOutcome {
            report_path: handles.report_path,
            audit_logs_path: self.config.session_output_dir(&session.id).join("audit-logs"),
            summary,
        })
    }

    /// Run one agent outside phase sequencing.
    pub async fn run_agent(&mut self, agent: AgentName) -> Result<PhaseResult, WaypointError> {
        let (shared, audit) = self.open_session().await?;
        let runner = self.phase_runner(audit.clone());
        record_event(audit.as_ref(), &format!("Manual run of {}", agent)).await;
        runner.run_single_agent(agent, &shared).await
    }

    /// Create or resume the session, set up its audit trail, capture the
    /// baseline for fresh sessions and preflight the target.
    async fn open_session(&mut self) -> Result<(Arc<Mutex<Session>>, Arc<dyn AuditLog>), WaypointError> {
        let mut session = self
            .sessions
            .create_or_resume_session(&self.config.target, &self.config.session_options())
            .await?;
        let resumed = session.agents.values().any(|r| r.status != AgentStatus::NotStarted);

        self.events.emit(PipelineEvent::RunStarted {
            session_id: session.id.clone(),
            web_url: session.target.web_url.clone(),
            resumed,
        });

        let audit: Arc<dyn AuditLog> = match &self.audit {
            Some(audit) => audit.clone(),
            None => Arc::new(
                AuditTrail::initialize(
                    &self.config.session_output_dir(&session.id),
                    &session.id,
                    Redactor::new(self.config.secrets()),
                )
                .await?,
            ),
        };

        if session.baseline_commit.is_none() {
            let commit = self
                .checkpoints
                .capture_checkpoint(&session.target.repo_path, "waypoint: baseline")
                .await?;
            info!(session_id = %session.id, commit = %commit, "Baseline checkpoint captured");
            session.baseline_commit = Some(commit);
            self.sessions.save(&mut session).await?;
        }

        let nothing_ran = session.agents_with_status(AgentStatus::Completed).is_empty();
        if self.config.preflight && nothing_ran {
            preflight(&session.target.web_url).await?;
        }

        Ok((Arc::new(Mutex::new(session)), audit))
    }

    fn phase_runner(&self, audit: Arc<dyn AuditLog>) -> PhaseRunner {
        let executor = AgentExecutor::new(self.config.retry.clone(), self.config.agent_timeout, audit);
        PhaseRunner::new(
            self.sessions.clone(),
            self.checkpoints.clone(),
            Arc::new(executor),
            self.agents.clone(),
        )
        .with_cancel_token(self.cancel_token.clone())
        .with_events(self.events.clone())
        .with_rules(self.config.rules_text())
        .with_exploits_mutating_tree(self.config.exploits_mutate_tree)
    }
}

/// Failed agents first, then the ones left waiting behind them.
fn incomplete_agents(session: &Session, phase: PhaseName, result: &PhaseResult) -> Vec<String> {
    let mut agents: Vec<String> = result.failed.iter().map(|(a, _)| a.to_string()).collect();
    for def in agents_in_phase(phase) {
        let name = def.name.to_string();
        if !session.is_completed(def.name) && !agents.contains(&name) {
            agents.push(name);
        }
    }
    agents
}

async fn record_event(audit: &dyn AuditLog, message: &str) {
    if let Err(e) = audit.record_event(message).await {
        warn!(error = %e, "Failed to write workflow event");
    }
}

/// Any HTTP response counts as reachable; only transport failures abort.
async fn preflight(web_url: &str) -> Result<(), WaypointError> {
    let client = reqwest::Client::builder()
        .timeout(PREFLIGHT_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| WaypointError::Network(e.to_string()))?;
    match client.get(web_url).send().await {
        Ok(response) => {
            info!(web_url, status = response.status().as_u16(), "Target reachable");
            Ok(())
        }
        Err(e) => Err(WaypointError::TargetUnreachable(format!("{}: {}", web_url, e))),
    }
}
