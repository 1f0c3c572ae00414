use serde::{Deserialize, Serialize};

/// Vulnerability category shared by a vulnerability-analysis agent and its
/// exploitation pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VulnCategory {
    Injection,
    Xss,
    Auth,
    Ssrf,
    Authz,
}

impl VulnCategory {
    pub const ALL: [VulnCategory; 5] = [
        VulnCategory::Injection,
        VulnCategory::Xss,
        VulnCategory::Auth,
        VulnCategory::Ssrf,
        VulnCategory::Authz,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Injection => "injection",
            Self::Xss => "xss",
            Self::Auth => "auth",
            Self::Ssrf => "ssrf",
            Self::Authz => "authz",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Injection => "Injection",
            Self::Xss => "Cross-Site Scripting",
            Self::Auth => "Authentication",
            Self::Ssrf => "Server-Side Request Forgery",
            Self::Authz => "Authorization",
        }
    }
}

impl std::fmt::Display for VulnCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

/// Proof that a hypothesised vulnerability was exploited against the live target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploitProof {
    pub payload: String,
    pub observed_response: String,
    #[serde(default)]
    pub evidence: Option<String>,
}

/// A vulnerability hypothesis recorded by an analysis agent.
///
/// `exploited` starts false; only the paired exploitation agent flips it, and
/// only exploited records are eligible for the final report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityRecord {
    #[serde(default)]
    pub id: String,
    pub category: VulnCategory,
    pub hypothesis: String,
    #[serde(default)]
    pub evidence_ref: Option<String>,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub exploited: bool,
    #[serde(default)]
    pub proof: Option<ExploitProof>,
}

impl VulnerabilityRecord {
    pub fn hypothesis(category: VulnCategory, hypothesis: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            category,
            hypothesis: hypothesis.into(),
            evidence_ref: None,
            confidence: Confidence::default(),
            exploited: false,
            proof: None,
        }
    }

    pub fn is_reportable(&self) -> bool {
        self.exploited
    }
}

/// Result an exploitation agent reports for one hypothesis.
///
/// `exploited` has no serde default: an outcome without an explicit verdict
/// does not parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploitOutcome {
    pub vulnerability_id: String,
    pub exploited: bool,
    #[serde(default)]
    pub proof: Option<ExploitProof>,
}
