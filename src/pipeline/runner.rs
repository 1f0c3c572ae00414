use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use crate::agents::registry::{AgentDefinition, AgentKind, AgentName};
use crate::agents::{AgentContext, AgentExecutor, AgentRegistry, AgentRun};
use crate::errors::WaypointError;
use crate::git::CheckpointManager;
use crate::session::manager::SessionManager;
use crate::session::state::{AgentStatus, Session};
use super::events::{EventEmitter, PipelineEvent};
use super::gating::exploitation_decision;
use super::phase::concurrency_groups;
use super::state::{PhaseName, PhaseResult};
use tracing::{error, info, warn};

/// What one agent run did to the session.
#[derive(Debug)]
enum AgentOutcome {
    Completed { agent: AgentName, cost_usd: f64 },
    Failed { agent: AgentName, error: String },
    Interrupted(AgentName),
}

/// Drives the agents of a phase: gating, concurrency groups, and the
/// running -> completed/failed bookkeeping around each executor call.
#[derive(Clone)]
pub struct PhaseRunner {
    sessions: Arc<SessionManager>,
    checkpoints: Arc<CheckpointManager>,
    executor: Arc<AgentExecutor>,
    agents: Arc<AgentRegistry>,
    events: EventEmitter,
    cancel: CancellationToken,
    rules: String,
    exploits_mutate_tree: bool,
}

impl PhaseRunner {
    pub fn new(
        sessions: Arc<SessionManager>,
        checkpoints: Arc<CheckpointManager>,
        executor: Arc<AgentExecutor>,
        agents: Arc<AgentRegistry>,
    ) -> Self {
        Self {
            sessions,
            checkpoints,
            executor,
            agents,
            events: EventEmitter::default(),
            cancel: CancellationToken::new(),
            rules: String::new(),
            exploits_mutate_tree: false,
        }
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn with_rules(mut self, rules: String) -> Self {
        self.rules = rules;
        self
    }

    /// Serialize exploitation agents when they are allowed to edit the tree.
    pub fn with_exploits_mutating_tree(mut self, mutate: bool) -> Self {
        self.exploits_mutate_tree = mutate;
        self
    }

    /// Run every eligible agent of `phase`, one concurrency group at a time.
    ///
    /// Agent failures are recorded in the session and reported in the result;
    /// only infrastructure errors (persistence, git) are returned as `Err`.
    pub async fn run_phase(
        &self,
        phase: PhaseName,
        session: &Arc<Mutex<Session>>,
    ) -> Result<PhaseResult, WaypointError> {
        let mut result = PhaseResult::for_phase(phase);

        for group in concurrency_groups(phase) {
            if self.cancel.is_cancelled() {
                break;
            }
            let group_id = group[0].concurrency_group;
            let runnable: Vec<&'static AgentDefinition> = {
                let s = session.lock().await;
                self.sessions
                    .runnable_in_phase(&s, phase)
                    .into_iter()
                    .filter(|d| d.concurrency_group == group_id)
                    .collect()
            };
            if runnable.is_empty() {
                continue;
            }

            let mut to_run = Vec::with_capacity(runnable.len());
            for def in runnable {
                if self.skip_if_gated(def, session).await? {
                    result.skipped.push(def.name);
                } else {
                    to_run.push(def);
                }
            }
            if to_run.is_empty() {
                continue;
            }

            let serialize = to_run.iter().any(|d| d.mutates_tree)
                || (self.exploits_mutate_tree && to_run.iter().any(|d| d.kind == AgentKind::Exploiter));
            let slots = if serialize { 1 } else { to_run.len() };
            let limiter = Arc::new(Semaphore::new(slots));
            info!(phase = %phase, group = group_id, agents = to_run.len(), slots, "Running agent group");

            let mut handles = Vec::with_capacity(to_run.len());
            for def in to_run {
                let runner = self.clone();
                let session = session.clone();
                let limiter = limiter.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = limiter
                        .acquire_owned()
                        .await
                        .map_err(|e| WaypointError::Internal(format!("Agent limiter closed: {}", e)))?;
                    runner.run_agent(def, &session).await
                }));
            }

            let mut first_error = None;
            for joined in futures::future::join_all(handles).await {
                match joined {
                    Ok(Ok(outcome)) => self.fold(&mut result, outcome),
                    Ok(Err(e)) => {
                        error!(phase = %phase, error = %e, "Agent bookkeeping failed");
                        first_error.get_or_insert(e);
                    }
                    Err(e) => {
                        error!(phase = %phase, error = %e, "Agent task panicked");
                        first_error.get_or_insert(WaypointError::from(e));
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        Ok(result)
    }

    /// Run exactly one agent, regardless of phase order. Refuses agents that
    /// already completed or whose prerequisites have not.
    pub async fn run_single_agent(
        &self,
        agent: AgentName,
        session: &Arc<Mutex<Session>>,
    ) -> Result<PhaseResult, WaypointError> {
        let def = agent.definition();
        {
            let s = session.lock().await;
            if s.status(agent) == AgentStatus::Completed {
                return Err(WaypointError::InvalidInvocation(format!(
                    "{} already completed; roll back to it first to run it again",
                    agent
                )));
            }
            let missing = s.missing_prerequisites(agent);
            if !missing.is_empty() {
                let missing: Vec<&str> = missing.iter().map(|m| m.as_str()).collect();
                return Err(WaypointError::InvalidInvocation(format!(
                    "{} cannot run before {}",
                    agent,
                    missing.join(", ")
                )));
            }
        }

        let mut result = PhaseResult::for_phase(def.phase);
        if self.skip_if_gated(def, session).await? {
            result.skipped.push(agent);
            return Ok(result);
        }
        let outcome = self.run_agent(def, session).await?;
        self.fold(&mut result, outcome);
        Ok(result)
    }

    fn fold(&self, result: &mut PhaseResult, outcome: AgentOutcome) {
        match outcome {
            AgentOutcome::Completed { agent, cost_usd } => {
                result.completed.push(agent);
                result.total_cost_usd += cost_usd;
            }
            AgentOutcome::Failed { agent, error } => result.failed.push((agent, error)),
            AgentOutcome::Interrupted(agent) => result.interrupted.push(agent),
        }
    }

    /// Complete an exploitation agent without running it when its category
    /// has no hypotheses. Returns whether it was skipped.
    async fn skip_if_gated(
        &self,
        def: &'static AgentDefinition,
        session: &Arc<Mutex<Session>>,
    ) -> Result<bool, WaypointError> {
        let Some(category) = def.category.filter(|_| def.kind == AgentKind::Exploiter) else {
            return Ok(false);
        };

        let mut s = session.lock().await;
        let decision = exploitation_decision(&s, category);
        if decision.should_exploit {
            info!(agent = %def.name, hypotheses = decision.vulnerability_count, "Exploitation enabled");
            return Ok(false);
        }

        let repo = s.target.repo_path.clone();
        let head = self.checkpoints.head(&repo).await?;
        let checkpoint = self
            .checkpoints
            .checkpoint_agent(&repo, def.name, head, "skipped", &[])
            .await?;
        self.sessions.mark_agent_skipped(&mut s, def.name, checkpoint).await?;
        info!(agent = %def.name, category = %category, "No hypotheses recorded, exploitation skipped");

        self.events.emit(PipelineEvent::AgentSkipped {
            agent: def.name,
            reason: format!("no {} hypotheses", category),
        });
        Ok(true)
    }

    async fn run_agent(
        &self,
        def: &'static AgentDefinition,
        session: &Arc<Mutex<Session>>,
    ) -> Result<AgentOutcome, WaypointError> {
        let name = def.name;
        if self.cancel.is_cancelled() {
            return Ok(AgentOutcome::Interrupted(name));
        }
        let agent = self.agents.get(name)?;

        let (snapshot, ctx) = {
            let mut s = session.lock().await;
            self.sessions.mark_agent_running(&mut s, name).await?;
            let deliverables_dir = s.target.repo_path.join("deliverables");
            let ctx = AgentContext::new(&s, name, deliverables_dir, self.rules.clone())
                .with_cancel(self.cancel.child_token());
            (s.clone(), ctx)
        };
        let repo = snapshot.target.repo_path.clone();
        self.events.emit(PipelineEvent::AgentStarted { agent: name });

        let base_commit = match self.checkpoints.head(&repo).await {
            Ok(head) => head,
            Err(e) => return self.fail(session, name, e).await,
        };

        match self.executor.run_agent(agent.as_ref(), &snapshot, &ctx).await {
            Ok(run) => self.complete(session, def, base_commit, run).await,
            Err(WaypointError::Cancelled) => {
                let mut s = session.lock().await;
                self.sessions.mark_agent_interrupted(&mut s, name).await?;
                self.events.emit(PipelineEvent::AgentInterrupted { agent: name });
                Ok(AgentOutcome::Interrupted(name))
            }
            Err(e) => self.fail(session, name, e).await,
        }
    }

    async fn complete(
        &self,
        session: &Arc<Mutex<Session>>,
        def: &'static AgentDefinition,
        base_commit: Option<String>,
        run: AgentRun,
    ) -> Result<AgentOutcome, WaypointError> {
        let name = def.name;
        let mut s = session.lock().await;

        let payload = run.output.payload;
        if let Some(category) = def.category {
            match def.kind {
                AgentKind::VulnAnalyzer => {
                    let ids = self
                        .sessions
                        .record_vulnerabilities(&mut s, category, payload.vulnerabilities)
                        .await?;
                    info!(agent = %name, hypotheses = ids.len(), "Hypotheses recorded");
                }
                AgentKind::Exploiter => {
                    let exploited = payload.exploitation.iter().filter(|o| o.exploited).count();
                    let matched = self
                        .sessions
                        .record_exploitation(&mut s, category, payload.exploitation)
                        .await?;
                    info!(agent = %name, matched, exploited, "Exploitation verdicts recorded");
                }
                _ => {}
            }
        }

        let repo = s.target.repo_path.clone();
        // Siblings that finished first may already have committed this tree.
        let claimed: Vec<String> = s
            .checkpoints
            .values()
            .filter(|c| c.agent != name)
            .map(|c| c.commit_id.clone())
            .collect();
        let checkpoint = match self
            .checkpoints
            .checkpoint_agent(&repo, name, base_commit, "completed", &claimed)
            .await
        {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                drop(s);
                return self.fail(session, name, e).await;
            }
        };

        let duration_ms = run.metrics.duration_ms;
        let cost_usd = run.metrics.cost_usd;
        self.sessions
            .mark_agent_completed(&mut s, name, checkpoint, Some(run.metrics))
            .await?;
        self.events.emit(PipelineEvent::AgentCompleted { agent: name, duration_ms, cost_usd });
        Ok(AgentOutcome::Completed { agent: name, cost_usd: cost_usd.unwrap_or(0.0) })
    }

    async fn fail(
        &self,
        session: &Arc<Mutex<Session>>,
        agent: AgentName,
        error: WaypointError,
    ) -> Result<AgentOutcome, WaypointError> {
        warn!(agent = %agent, error = %error, "Agent failed");
        let message = error.to_string();
        let mut s = session.lock().await;
        self.sessions.mark_agent_failed(&mut s, agent, &message).await?;
        self.events.emit(PipelineEvent::AgentFailed { agent, error: message.clone() });
        Ok(AgentOutcome::Failed { agent, error: message })
    }
}
