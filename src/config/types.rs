use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WaypointConfig {
    pub rules: Option<RulesConfig>,
    pub llm: Option<LLMConfig>,
    pub retry: Option<RetryConfig>,
    pub execution: Option<ExecutionConfig>,
    pub tools: Option<ToolsConfig>,
    pub output: Option<OutputConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RulesConfig {
    pub avoid: Option<Vec<Rule>>,
    pub focus: Option<Vec<Rule>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rule {
    pub description: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub url_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Path,
    Subdomain,
    Domain,
    Method,
    Header,
    Parameter,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Subdomain => "subdomain",
            Self::Domain => "domain",
            Self::Method => "method",
            Self::Header => "header",
            Self::Parameter => "parameter",
        }
    }
}

impl RulesConfig {
    /// Rules rendered for inclusion in agent instructions.
    pub fn describe(&self) -> String {
        let mut lines = Vec::new();
        for (label, rules) in [("Avoid", &self.avoid), ("Focus", &self.focus)] {
            for rule in rules.iter().flatten() {
                lines.push(format!(
                    "- {} {} `{}`: {}",
                    label,
                    rule.rule_type.as_str(),
                    rule.url_path,
                    rule.description
                ));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LLMConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Providers tried in order when the primary is rate limited or unavailable.
    #[serde(default)]
    pub fallback: Vec<LLMFallbackConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LLMFallbackConfig {
    pub provider: String,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: Option<bool>,
    /// Re-attempt agents recorded as failed when a session is resumed.
    pub retry_failed_on_resume: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ExecutionConfig {
    pub agent_timeout_secs: Option<u64>,
    pub pipeline_testing: Option<bool>,
    pub disable_loader: Option<bool>,
    /// Exploitation agents edit the source tree, so they must not share it concurrently.
    pub exploits_mutate_tree: Option<bool>,
    pub preflight: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scanner {
    Nmap,
    Subfinder,
    Whatweb,
}

impl Scanner {
    pub const ALL: [Scanner; 3] = [Scanner::Nmap, Scanner::Subfinder, Scanner::Whatweb];

    pub fn binary(&self) -> &'static str {
        match self {
            Self::Nmap => "nmap",
            Self::Subfinder => "subfinder",
            Self::Whatweb => "whatweb",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ToolsConfig {
    pub enabled: Option<Vec<Scanner>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct OutputConfig {
    pub directory: Option<String>,
}
