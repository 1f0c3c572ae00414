use std::collections::{BTreeSet, VecDeque};
use std::sync::LazyLock;
use crate::errors::WaypointError;
use crate::models::VulnCategory;
use crate::pipeline::state::PhaseName;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentName {
    PreReconCode,
    PreReconTools,
    Recon,
    InjectionVuln,
    XssVuln,
    AuthVuln,
    SsrfVuln,
    AuthzVuln,
    InjectionExploit,
    XssExploit,
    AuthExploit,
    SsrfExploit,
    AuthzExploit,
    Report,
}

impl AgentName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreReconCode => "pre-recon-code",
            Self::PreReconTools => "pre-recon-tools",
            Self::Recon => "recon",
            Self::InjectionVuln => "injection-vuln",
            Self::XssVuln => "xss-vuln",
            Self::AuthVuln => "auth-vuln",
            Self::SsrfVuln => "ssrf-vuln",
            Self::AuthzVuln => "authz-vuln",
            Self::InjectionExploit => "injection-exploit",
            Self::XssExploit => "xss-exploit",
            Self::AuthExploit => "auth-exploit",
            Self::SsrfExploit => "ssrf-exploit",
            Self::AuthzExploit => "authz-exploit",
            Self::Report => "report",
        }
    }

    pub fn definition(&self) -> &'static AgentDefinition {
        // Every variant has exactly one entry; registry_covers_every_variant guards this.
        AGENT_REGISTRY
            .iter()
            .find(|d| d.name == *self)
            .unwrap_or(&AGENT_REGISTRY[0])
    }
}

impl std::fmt::Display for AgentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentName {
    type Err = WaypointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AGENT_REGISTRY
            .iter()
            .map(|d| d.name)
            .find(|name| name.as_str() == s)
            .ok_or_else(|| WaypointError::UnknownAgent(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    CodeAnalyst,
    ToolRunner,
    ReconAnalyst,
    VulnAnalyzer,
    Exploiter,
    Reporter,
}

#[derive(Debug)]
pub struct AgentDefinition {
    pub name: AgentName,
    pub display_name: &'static str,
    pub phase: PhaseName,
    pub prerequisites: &'static [AgentName],
    /// Agents of one phase sharing a group run concurrently; groups run in ascending order.
    pub concurrency_group: u8,
    pub category: Option<VulnCategory>,
    pub kind: AgentKind,
    pub deliverable: &'static str,
    /// True when the agent edits files under the source tree beyond its own deliverable.
    pub mutates_tree: bool,
}

const EXPLOIT_AGENTS: &[AgentName] = &[
    AgentName::InjectionExploit, AgentName::XssExploit, AgentName::AuthExploit,
    AgentName::SsrfExploit, AgentName::AuthzExploit,
];

pub static AGENT_REGISTRY: LazyLock<Vec<AgentDefinition>> = LazyLock::new(|| vec![
    AgentDefinition {
        name: AgentName::PreReconCode,
        display_name: "Pre-recon code analysis",
        phase: PhaseName::PreRecon,
        prerequisites: &[],
        concurrency_group: 0,
        category: None,
        kind: AgentKind::CodeAnalyst,
        deliverable: "code_analysis_deliverable.md",
        mutates_tree: false,
    },
    AgentDefinition {
        name: AgentName::PreReconTools,
        display_name: "Pre-recon external scanners",
        phase: PhaseName::PreRecon,
        prerequisites: &[AgentName::PreReconCode],
        concurrency_group: 1,
        category: None,
        kind: AgentKind::ToolRunner,
        deliverable: "pre_recon_tools_deliverable.md",
        mutates_tree: false,
    },
    AgentDefinition {
        name: AgentName::Recon,
        display_name: "Reconnaissance",
        phase: PhaseName::Recon,
        prerequisites: &[AgentName::PreReconCode, AgentName::PreReconTools],
        concurrency_group: 0,
        category: None,
        kind: AgentKind::ReconAnalyst,
        deliverable: "recon_deliverable.md",
        mutates_tree: false,
    },
    vuln_agent(AgentName::InjectionVuln, "Injection vuln agent", VulnCategory::Injection, "injection_analysis_deliverable.md"),
    vuln_agent(AgentName::XssVuln, "XSS vuln agent", VulnCategory::Xss, "xss_analysis_deliverable.md"),
    vuln_agent(AgentName::AuthVuln, "Auth vuln agent", VulnCategory::Auth, "auth_analysis_deliverable.md"),
    vuln_agent(AgentName::SsrfVuln, "SSRF vuln agent", VulnCategory::Ssrf, "ssrf_analysis_deliverable.md"),
    vuln_agent(AgentName::AuthzVuln, "Authz vuln agent", VulnCategory::Authz, "authz_analysis_deliverable.md"),
    exploit_agent(AgentName::InjectionExploit, "Injection exploit agent", VulnCategory::Injection,
        &[AgentName::InjectionVuln], "injection_exploitation_evidence.md"),
    exploit_agent(AgentName::XssExploit, "XSS exploit agent", VulnCategory::Xss,
        &[AgentName::XssVuln], "xss_exploitation_evidence.md"),
    exploit_agent(AgentName::AuthExploit, "Auth exploit agent", VulnCategory::Auth,
        &[AgentName::AuthVuln], "auth_exploitation_evidence.md"),
    exploit_agent(AgentName::SsrfExploit, "SSRF exploit agent", VulnCategory::Ssrf,
        &[AgentName::SsrfVuln], "ssrf_exploitation_evidence.md"),
    exploit_agent(AgentName::AuthzExploit, "Authz exploit agent", VulnCategory::Authz,
        &[AgentName::AuthzVuln], "authz_exploitation_evidence.md"),
    AgentDefinition {
        name: AgentName::Report,
        display_name: "Report agent",
        phase: PhaseName::Reporting,
        prerequisites: EXPLOIT_AGENTS,
        concurrency_group: 0,
        category: None,
        kind: AgentKind::Reporter,
        deliverable: "executive_summary.md",
        mutates_tree: false,
    },
]);

fn vuln_agent(
    name: AgentName,
    display_name: &'static str,
    category: VulnCategory,
    deliverable: &'static str,
) -> AgentDefinition {
    AgentDefinition {
        name,
        display_name,
        phase: PhaseName::VulnerabilityAnalysis,
        prerequisites: &[AgentName::Recon],
        concurrency_group: 0,
        category: Some(category),
        kind: AgentKind::VulnAnalyzer,
        deliverable,
        mutates_tree: false,
    }
}

fn exploit_agent(
    name: AgentName,
    display_name: &'static str,
    category: VulnCategory,
    prerequisites: &'static [AgentName],
    deliverable: &'static str,
) -> AgentDefinition {
    AgentDefinition {
        name,
        display_name,
        phase: PhaseName::Exploitation,
        prerequisites,
        concurrency_group: 0,
        category: Some(category),
        kind: AgentKind::Exploiter,
        deliverable,
        mutates_tree: false,
    }
}

pub fn vuln_agents() -> &'static [AgentName] {
    &[AgentName::InjectionVuln, AgentName::XssVuln, AgentName::AuthVuln,
      AgentName::SsrfVuln, AgentName::AuthzVuln]
}

pub fn exploit_agents() -> &'static [AgentName] {
    EXPLOIT_AGENTS
}

pub fn vuln_agent_for(category: VulnCategory) -> AgentName {
    match category {
        VulnCategory::Injection => AgentName::InjectionVuln,
        VulnCategory::Xss => AgentName::XssVuln,
        VulnCategory::Auth => AgentName::AuthVuln,
        VulnCategory::Ssrf => AgentName::SsrfVuln,
        VulnCategory::Authz => AgentName::AuthzVuln,
    }
}

/// Every agent that depends on `name`, directly or transitively, in graph order.
pub fn dependents_of(name: AgentName) -> Vec<AgentName> {
    let mut found = BTreeSet::new();
    let mut queue = VecDeque::from([name]);
    while let Some(current) = queue.pop_front() {
        for def in AGENT_REGISTRY.iter() {
            if def.prerequisites.contains(&current) && found.insert(def.name) {
                queue.push_back(def.name);
            }
        }
    }
    AGENT_REGISTRY
        .iter()
        .map(|d| d.name)
        .filter(|n| found.contains(n))
        .collect()
}
