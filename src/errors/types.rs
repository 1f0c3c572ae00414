use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaypointError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session {session_id} was created for a different target or config: {detail}")]
    ConfigMismatch { session_id: String, detail: String },

    #[error("Prerequisite violation: {agent} cannot complete before {missing:?}")]
    PrerequisiteViolation { agent: String, missing: Vec<String> },

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Permission error: {0}")]
    Permission(String),

    #[error("LLM API error: {0}")]
    LLMApi(String),

    #[error("Provider rejected request: {0}")]
    ProviderRejected(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Output validation error: {0}")]
    OutputValidation(String),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Tool execution error: {0}")]
    Tool(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Target unreachable: {0}")]
    TargetUnreachable(String),

    #[error("No checkpoint recorded for agent {agent}; it has not completed")]
    NoCheckpoint { agent: String },

    #[error("Session {session_id} stopped: agent(s) failed or blocked: {}", agents.join(", "))]
    AgentsFailed { session_id: String, agents: Vec<String> },

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Invalid invocation: {0}")]
    InvalidInvocation(String),

    #[error("Cancelled by user")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WaypointError {
    /// Process exit code for the CLI: 2 for invalid invocations, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoCheckpoint { .. }
            | Self::UnknownAgent(_)
            | Self::InvalidInvocation(_) => 2,
            _ => 1,
        }
    }
}

impl From<git2::Error> for WaypointError {
    fn from(e: git2::Error) -> Self {
        WaypointError::Git(e.message().to_string())
    }
}

impl From<tokio::task::JoinError> for WaypointError {
    fn from(e: tokio::task::JoinError) -> Self {
        WaypointError::Internal(format!("Task failed to join: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(WaypointError::NoCheckpoint { agent: "recon".into() }.exit_code(), 2);
        assert_eq!(WaypointError::UnknownAgent("nope".into()).exit_code(), 2);
        assert_eq!(WaypointError::Cancelled.exit_code(), 1);
        assert_eq!(WaypointError::Config("bad".into()).exit_code(), 1);
    }

    #[test]
    fn test_agents_failed_message_lists_agents() {
        let err = WaypointError::AgentsFailed {
            session_id: "abc".into(),
            agents: vec!["xss-vuln".into(), "xss-exploit".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("abc"));
        assert!(msg.contains("xss-vuln, xss-exploit"));
    }
}
