use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use crate::audit::{Exchange, ExchangeRole};
use crate::config::types::Scanner;
use crate::errors::WaypointError;
use crate::llm::LLMProvider;
use crate::models::{ExploitOutcome, VulnerabilityRecord};
use crate::pipeline::state::PhaseName;
use crate::session::state::{Session, TargetDescriptor};
use super::analyst::AnalystAgent;
use super::registry::{AgentDefinition, AgentKind, AgentName, AGENT_REGISTRY};
use super::tools::ToolRunnerAgent;

/// Cost and token usage of one agent attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub cost_usd: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub elapsed_ms: u64,
    pub model: Option<String>,
}

impl Usage {
    /// Fold another call's usage into this one.
    pub fn absorb(&mut self, other: &Usage) {
        fn add<T: std::ops::Add<Output = T> + Copy>(a: Option<T>, b: Option<T>) -> Option<T> {
            match (a, b) {
                (Some(x), Some(y)) => Some(x + y),
                (x, None) => x,
                (None, y) => y,
            }
        }
        self.cost_usd = add(self.cost_usd, other.cost_usd);
        self.input_tokens = add(self.input_tokens, other.input_tokens);
        self.output_tokens = add(self.output_tokens, other.output_tokens);
        self.elapsed_ms += other.elapsed_ms;
        if other.model.is_some() {
            self.model = other.model.clone();
        }
    }
}

/// What a successful attempt hands back to the phase runner.
#[derive(Debug, Clone, Default)]
pub struct AgentPayload {
    /// New hypotheses (vulnerability-analysis agents).
    pub vulnerabilities: Vec<VulnerabilityRecord>,
    /// Verdicts on existing hypotheses (exploitation agents).
    pub exploitation: Vec<ExploitOutcome>,
    pub deliverables: Vec<PathBuf>,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct AgentOutput {
    pub success: bool,
    pub payload: AgentPayload,
    pub usage: Usage,
    /// Why the agent considers its own result unusable, when `success` is false.
    pub note: Option<String>,
}

impl AgentOutput {
    pub fn succeeded(payload: AgentPayload, usage: Usage) -> Self {
        Self { success: true, payload, usage, note: None }
    }

    pub fn unusable(reason: impl Into<String>, usage: Usage) -> Self {
        Self { success: false, payload: AgentPayload::default(), usage, note: Some(reason.into()) }
    }
}

/// Inputs for one attempt of one agent.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub session_id: String,
    pub agent: AgentName,
    pub attempt: u32,
    pub target: TargetDescriptor,
    pub deliverables_dir: PathBuf,
    pub rules: String,
    pub pipeline_testing: bool,
    /// Hypotheses of the agent's category, for exploitation agents.
    pub hypotheses: Vec<VulnerabilityRecord>,
    pub cancel: CancellationToken,
    transcript: Arc<Mutex<Vec<Exchange>>>,
}

impl AgentContext {
    pub fn new(session: &Session, agent: AgentName, deliverables_dir: PathBuf, rules: String) -> Self {
        let hypotheses = match (agent.definition().kind, agent.definition().category) {
            (AgentKind::Exploiter, Some(category)) => session.vulnerabilities_for(category).to_vec(),
            _ => Vec::new(),
        };
        Self {
            session_id: session.id.clone(),
            agent,
            attempt: 0,
            target: session.target.clone(),
            deliverables_dir,
            rules,
            pipeline_testing: session.pipeline_testing,
            hypotheses,
            cancel: CancellationToken::new(),
            transcript: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Same inputs, fresh transcript.
    pub fn for_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            transcript: Arc::new(Mutex::new(Vec::new())),
            ..self.clone()
        }
    }

    pub fn deliverable_path(&self) -> PathBuf {
        self.deliverables_dir.join(self.agent.definition().deliverable)
    }

    pub fn record(&self, role: ExchangeRole, content: impl Into<String>) {
        let mut transcript = self.transcript.lock().unwrap_or_else(|e| e.into_inner());
        transcript.push(Exchange::new(role, content));
    }

    pub fn take_transcript(&self) -> Vec<Exchange> {
        let mut transcript = self.transcript.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *transcript)
    }
}

/// A unit of pentest work bound to one node of the agent graph.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> AgentName;

    fn definition(&self) -> &'static AgentDefinition {
        self.name().definition()
    }

    fn phase(&self) -> PhaseName {
        self.definition().phase
    }

    fn prerequisites(&self) -> &'static [AgentName] {
        self.definition().prerequisites
    }

    fn concurrency_group(&self) -> u8 {
        self.definition().concurrency_group
    }

    /// Perform the work. Must not mutate session state; results travel back
    /// in the output payload.
    async fn execute(&self, session: &Session, ctx: &AgentContext) -> Result<AgentOutput, WaypointError>;
}

/// Implementations for every agent of the static graph, built once per run.
pub struct AgentRegistry {
    agents: BTreeMap<AgentName, Arc<dyn Agent>>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Default)]
pub struct AgentRegistryBuilder {
    agents: BTreeMap<AgentName, Arc<dyn Agent>>,
}

impl AgentRegistryBuilder {
    pub fn register(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent.name(), agent);
        self
    }

    /// Fails unless every agent of the graph has an implementation.
    pub fn build(self) -> Result<AgentRegistry, WaypointError> {
        let missing: Vec<&str> = AGENT_REGISTRY
            .iter()
            .filter(|d| !self.agents.contains_key(&d.name))
            .map(|d| d.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(WaypointError::Config(format!(
                "No implementation registered for agent(s): {}",
                missing.join(", ")
            )));
        }
        Ok(AgentRegistry { agents: self.agents })
    }
}

impl AgentRegistry {
    pub fn builder() -> AgentRegistryBuilder {
        AgentRegistryBuilder::default()
    }

    /// LLM analysts for every node except the external scanner runner.
    pub fn standard(llm: Arc<dyn LLMProvider>, scanners: Vec<Scanner>) -> Result<Self, WaypointError> {
        let mut builder = Self::builder();
        for def in AGENT_REGISTRY.iter() {
            let agent: Arc<dyn Agent> = match def.kind {
                AgentKind::ToolRunner => Arc::new(ToolRunnerAgent::new(def.name, scanners.clone())),
                _ => Arc::new(AnalystAgent::new(def.name, llm.clone())),
            };
            builder = builder.register(agent);
        }
        builder.build()
    }

    pub fn get(&self, name: AgentName) -> Result<Arc<dyn Agent>, WaypointError> {
        self.agents
            .get(&name)
            .cloned()
            .ok_or_else(|| WaypointError::UnknownAgent(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(AgentName);

    #[async_trait]
    impl Agent for Noop {
        fn name(&self) -> AgentName {
            self.0
        }

        async fn execute(&self, _session: &Session, _ctx: &AgentContext) -> Result<AgentOutput, WaypointError> {
            Ok(AgentOutput::succeeded(AgentPayload::default(), Usage::default()))
        }
    }

    #[test]
    fn test_registry_rejects_incomplete_set() {
        let err = AgentRegistry::builder()
            .register(Arc::new(Noop(AgentName::Recon)))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("pre-recon-code"));
    }

    #[test]
    fn test_registry_with_every_agent() {
        let mut builder = AgentRegistry::builder();
        for def in AGENT_REGISTRY.iter() {
            builder = builder.register(Arc::new(Noop(def.name)));
        }
        let registry = builder.build().unwrap();
        let agent = registry.get(AgentName::XssExploit).unwrap();
        assert_eq!(agent.prerequisites(), &[AgentName::XssVuln]);
        assert_eq!(agent.phase(), PhaseName::Exploitation);
    }

    #[test]
    fn test_usage_absorb() {
        let mut total = Usage { cost_usd: Some(0.1), elapsed_ms: 5, ..Default::default() };
        total.absorb(&Usage {
            cost_usd: Some(0.2),
            input_tokens: Some(10),
            elapsed_ms: 7,
            model: Some("m".into()),
            ..Default::default()
        });
        assert!((total.cost_usd.unwrap() - 0.3).abs() < 1e-9);
        assert_eq!(total.input_tokens, Some(10));
        assert_eq!(total.elapsed_ms, 12);
        assert_eq!(total.model.as_deref(), Some("m"));
    }

    #[test]
    fn test_transcript_is_per_attempt() {
        let session = Session::new(
            "s".into(),
            TargetDescriptor { web_url: "https://a.test".into(), repo_path: "/tmp/r".into(), config_path: None },
            "fp".into(),
        );
        let ctx = AgentContext::new(&session, AgentName::Recon, "/tmp/r/deliverables".into(), String::new());
        let first = ctx.for_attempt(1);
        first.record(ExchangeRole::Prompt, "hello");
        let second = ctx.for_attempt(2);
        assert!(second.take_transcript().is_empty());
        assert_eq!(first.take_transcript().len(), 1);
        assert!(first.take_transcript().is_empty());
    }
}
