use crate::models::VulnCategory;
use crate::session::state::Session;

/// Whether an exploitation agent has anything to work on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExploitationDecision {
    pub should_exploit: bool,
    pub vulnerability_count: usize,
    pub category: VulnCategory,
}

/// An exploitation agent runs only when its paired analysis agent recorded at
/// least one hypothesis. Evaluated from the persisted session, never from
/// files in the working tree.
pub fn exploitation_decision(session: &Session, category: VulnCategory) -> ExploitationDecision {
    let vulnerability_count = session.vulnerabilities_for(category).len();
    ExploitationDecision {
        should_exploit: vulnerability_count > 0,
        vulnerability_count,
        category,
    }
}
