use super::state::PhaseName;
use crate::agents::registry::{AgentDefinition, AGENT_REGISTRY};

pub struct PhaseDefinition {
    pub name: PhaseName,
    pub display_name: &'static str,
    pub description: &'static str,
}

pub static PHASES: &[PhaseDefinition] = &[
    PhaseDefinition {
        name: PhaseName::PreRecon,
        display_name: "Pre-Reconnaissance",
        description: "Source code analysis followed by external scanners",
    },
    PhaseDefinition {
        name: PhaseName::Recon,
        display_name: "Reconnaissance",
        description: "Attack surface mapping of the live application",
    },
    PhaseDefinition {
        name: PhaseName::VulnerabilityAnalysis,
        display_name: "Vulnerability Analysis",
        description: "Hypothesis generation across five categories",
    },
    PhaseDefinition {
        name: PhaseName::Exploitation,
        display_name: "Exploitation",
        description: "Proof-of-concept exploitation of hypothesised vulnerabilities",
    },
    PhaseDefinition {
        name: PhaseName::Reporting,
        display_name: "Reporting",
        description: "Executive summary of proven findings",
    },
];

pub fn display_name(phase: PhaseName) -> &'static str {
    PHASES
        .iter()
        .find(|p| p.name == phase)
        .map(|p| p.display_name)
        .unwrap_or("Unknown")
}

pub fn agents_in_phase(phase: PhaseName) -> impl Iterator<Item = &'static AgentDefinition> {
    AGENT_REGISTRY.iter().filter(move |d| d.phase == phase)
}

/// Concurrency groups of a phase in execution order.
pub fn concurrency_groups(phase: PhaseName) -> Vec<Vec<&'static AgentDefinition>> {
    let mut groups: Vec<(u8, Vec<&'static AgentDefinition>)> = Vec::new();
    for def in agents_in_phase(phase) {
        match groups.iter_mut().find(|(g, _)| *g == def.concurrency_group) {
            Some((_, members)) => members.push(def),
            None => groups.push((def.concurrency_group, vec![def])),
        }
    }
    groups.sort_by_key(|(g, _)| *g);
    groups.into_iter().map(|(_, members)| members).collect()
}
