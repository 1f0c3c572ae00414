#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use tempfile::TempDir;
use waypoint::agents::registry::{AgentKind, AgentName, AGENT_REGISTRY};
use waypoint::agents::{Agent, AgentContext, AgentOutput, AgentPayload, AgentRegistry, Usage};
use waypoint::audit::NullAudit;
use waypoint::config::RunConfig;
use waypoint::errors::{RetryPolicy, WaypointError};
use waypoint::git::{CheckpointBackend, GitBackend};
use waypoint::models::{ExploitOutcome, ExploitProof, VulnerabilityRecord};
use waypoint::pipeline::Orchestrator;
use waypoint::reporting::MarkdownReporter;
use waypoint::session::manager::SessionManager;
use waypoint::session::state::{Session, TargetDescriptor};
use waypoint::session::store::JsonSessionStore;

/// What a scripted agent does on each call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Script {
    /// Write the deliverable, return an empty payload.
    Succeed,
    /// Write the deliverable and hand back `n` hypotheses.
    Hypotheses(usize),
    /// Write the deliverable, wait so siblings write theirs too, then hand
    /// back `n` hypotheses.
    Lingering(usize),
    /// Mark every hypothesis it was given as exploited.
    ExploitAll,
    /// Fail with a retryable error on the first `n` calls, then succeed.
    FailTimes(u32),
    /// Fail with a retryable error on every call.
    AlwaysFail,
    /// Fail with a non-retryable error.
    Fatal,
    /// Block until cancelled.
    Hang,
}

pub struct ScriptedAgent {
    name: AgentName,
    script: Mutex<Script>,
    calls: AtomicU32,
}

impl ScriptedAgent {
    pub fn new(name: AgentName, script: Script) -> Self {
        Self { name, script: Mutex::new(script), calls: AtomicU32::new(0) }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    fn hypotheses(&self, n: usize) -> Vec<VulnerabilityRecord> {
        let category = self.name.definition().category.expect("vuln agent has a category");
        (0..n)
            .map(|i| VulnerabilityRecord::hypothesis(category, format!("{} hypothesis {}", category, i)))
            .collect()
    }

    async fn write_deliverable(&self, ctx: &AgentContext, call: u32) -> PathBuf {
        tokio::fs::create_dir_all(&ctx.deliverables_dir).await.unwrap();
        let path = ctx.deliverable_path();
        tokio::fs::write(&path, format!("{} output, call {}\n", self.name, call)).await.unwrap();
        path
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> AgentName {
        self.name
    }

    async fn execute(&self, _session: &Session, ctx: &AgentContext) -> Result<AgentOutput, WaypointError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let script = *self.script.lock().unwrap();
        let usage = Usage { cost_usd: Some(0.01), elapsed_ms: 5, ..Default::default() };
        let mut payload = AgentPayload::default();

        match script {
            Script::Succeed => {}
            Script::Hypotheses(n) => payload.vulnerabilities = self.hypotheses(n),
            Script::Lingering(n) => {
                payload.deliverables.push(self.write_deliverable(ctx, call).await);
                tokio::time::sleep(Duration::from_millis(200)).await;
                payload.vulnerabilities = self.hypotheses(n);
                return Ok(AgentOutput::succeeded(payload, usage));
            }
            Script::ExploitAll => {
                payload.exploitation = ctx
                    .hypotheses
                    .iter()
                    .map(|h| ExploitOutcome {
                        vulnerability_id: h.id.clone(),
                        exploited: true,
                        proof: Some(ExploitProof {
                            payload: format!("payload for {}", h.id),
                            observed_response: "HTTP/1.1 200 OK".into(),
                            evidence: None,
                        }),
                    })
                    .collect();
            }
            Script::FailTimes(n) if call <= n => {
                return Err(WaypointError::LLMApi(format!("transient failure {}", call)));
            }
            Script::FailTimes(_) => {}
            Script::AlwaysFail => return Err(WaypointError::LLMApi("provider returned 500".into())),
            Script::Fatal => return Err(WaypointError::Authentication("invalid api key".into())),
            Script::Hang => {
                ctx.cancel.cancelled().await;
                return Err(WaypointError::Cancelled);
            }
        }

        payload.deliverables.push(self.write_deliverable(ctx, call).await);
        Ok(AgentOutput::succeeded(payload, usage))
    }
}

/// Git backend that counts commits and can be told to start failing.
#[derive(Default)]
pub struct CountingBackend {
    inner: GitBackend,
    pub commits: AtomicU32,
    pub fail_commits: AtomicBool,
}

impl CheckpointBackend for CountingBackend {
    fn commit(&self, source_dir: &Path, message: &str, allow_empty: bool) -> Result<String, WaypointError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(WaypointError::Git("disk full".into()));
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit(source_dir, message, allow_empty)
    }

    fn reset(&self, source_dir: &Path, commit_id: &str) -> Result<(), WaypointError> {
        self.inner.reset(source_dir, commit_id)
    }

    fn head(&self, source_dir: &Path) -> Result<Option<String>, WaypointError> {
        self.inner.head(source_dir)
    }
}

/// A target repository, an output directory and one scripted agent per node.
pub struct Harness {
    pub repo: TempDir,
    pub out: TempDir,
    pub agents: BTreeMap<AgentName, Arc<ScriptedAgent>>,
    pub backend: Arc<CountingBackend>,
}

impl Harness {
    /// Every agent succeeds; analysis agents record nothing.
    pub fn new() -> Self {
        Self::with_scripts(&[])
    }

    pub fn with_scripts(scripts: &[(AgentName, Script)]) -> Self {
        let repo = TempDir::new().unwrap();
        std::fs::create_dir_all(repo.path().join("src")).unwrap();
        std::fs::write(repo.path().join("src/app.py"), "def handler(request):\n    return 'ok'\n").unwrap();

        let agents = AGENT_REGISTRY
            .iter()
            .map(|def| {
                let script = scripts
                    .iter()
                    .find(|(name, _)| *name == def.name)
                    .map(|(_, s)| *s)
                    .unwrap_or(Script::Succeed);
                (def.name, Arc::new(ScriptedAgent::new(def.name, script)))
            })
            .collect();

        Self { repo, out: TempDir::new().unwrap(), agents, backend: Arc::new(CountingBackend::default()) }
    }

    pub fn repo_path(&self) -> PathBuf {
        self.repo.path().canonicalize().unwrap()
    }

    pub fn target(&self) -> TargetDescriptor {
        TargetDescriptor {
            web_url: "https://shop.test".into(),
            repo_path: self.repo_path(),
            config_path: None,
        }
    }

    pub fn config(&self) -> RunConfig {
        let mut config = RunConfig::for_target(self.target(), self.out.path());
        config.preflight = false;
        config.retry = RetryPolicy::accelerated(3);
        config.agent_timeout = Duration::from_secs(10);
        config
    }

    pub fn agent(&self, name: AgentName) -> &Arc<ScriptedAgent> {
        &self.agents[&name]
    }

    pub fn calls(&self, name: AgentName) -> u32 {
        self.agent(name).calls()
    }

    pub fn registry(&self) -> AgentRegistry {
        self.agents
            .values()
            .fold(AgentRegistry::builder(), |builder, agent| builder.register(agent.clone()))
            .build()
            .unwrap()
    }

    pub async fn store(&self) -> Arc<JsonSessionStore> {
        Arc::new(JsonSessionStore::open(self.out.path().join("sessions")).await.unwrap())
    }

    pub async fn sessions(&self) -> SessionManager {
        SessionManager::new(self.store().await)
    }

    pub async fn orchestrator_with(&self, config: RunConfig) -> Orchestrator {
        Orchestrator::with_store(
            config,
            self.store().await,
            self.registry(),
            Arc::new(MarkdownReporter::new(self.out.path())),
        )
        .with_checkpoint_backend(self.backend.clone())
        .with_audit(Arc::new(NullAudit))
    }

    pub async fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(self.config()).await
    }

    /// The persisted session for this target.
    pub async fn session(&self) -> Session {
        let id = waypoint::session::manager::session_id_for(&self.target());
        self.sessions().await.load_session(&id).await.unwrap()
    }

    pub fn deliverable(&self, name: AgentName) -> PathBuf {
        self.repo_path().join("deliverables").join(name.definition().deliverable)
    }
}

pub fn exploit_agents_of_kind() -> Vec<AgentName> {
    AGENT_REGISTRY
        .iter()
        .filter(|d| d.kind == AgentKind::Exploiter)
        .map(|d| d.name)
        .collect()
}
