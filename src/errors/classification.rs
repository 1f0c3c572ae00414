use super::types::WaypointError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub retryable: bool,
}

impl ErrorClassification {
    fn retryable(error_type: &'static str) -> Self {
        Self { error_type, retryable: true }
    }

    fn fatal(error_type: &'static str) -> Self {
        Self { error_type, retryable: false }
    }
}

impl WaypointError {
    /// Classify this error to determine its type and whether an agent attempt
    /// that raised it may be retried.
    pub fn classify(&self) -> ErrorClassification {
        match self {
            // Transient agent failures
            WaypointError::RateLimit(_) => ErrorClassification::retryable("RateLimitError"),
            WaypointError::Network(_) => ErrorClassification::retryable("NetworkError"),
            WaypointError::Timeout(_) => ErrorClassification::retryable("TimeoutError"),
            WaypointError::LLMApi(_) => ErrorClassification::retryable("LLMApiError"),
            WaypointError::OutputValidation(_) => ErrorClassification::retryable("OutputValidationError"),
            WaypointError::Tool(_) => ErrorClassification::retryable("ToolError"),
            WaypointError::Git(_) => ErrorClassification::retryable("GitError"),
            WaypointError::Io(_) => ErrorClassification::retryable("IoError"),
            WaypointError::Json(_) => ErrorClassification::retryable("JsonError"),

            // Permanent agent failures
            WaypointError::Authentication(_) => ErrorClassification::fatal("AuthenticationError"),
            WaypointError::Permission(_) => ErrorClassification::fatal("PermissionError"),
            WaypointError::ProviderRejected(_) => ErrorClassification::fatal("ProviderRejectedError"),
            WaypointError::InvalidTarget(_) => ErrorClassification::fatal("InvalidTargetError"),
            WaypointError::Config(_) => ErrorClassification::fatal("ConfigError"),
            WaypointError::Yaml(_) => ErrorClassification::fatal("YamlError"),

            // Orchestration-level conditions are never retried by the executor
            WaypointError::ConfigMismatch { .. } => ErrorClassification::fatal("ConfigMismatch"),
            WaypointError::PrerequisiteViolation { .. } => ErrorClassification::fatal("PrerequisiteViolation"),
            WaypointError::TargetUnreachable(_) => ErrorClassification::fatal("TargetUnreachable"),
            WaypointError::NoCheckpoint { .. } => ErrorClassification::fatal("NoCheckpoint"),
            WaypointError::AgentsFailed { .. } => ErrorClassification::fatal("AgentsFailed"),
            WaypointError::UnknownAgent(_) => ErrorClassification::fatal("UnknownAgent"),
            WaypointError::InvalidInvocation(_) => ErrorClassification::fatal("InvalidInvocation"),
            WaypointError::Cancelled => ErrorClassification::fatal("Cancelled"),
            WaypointError::Internal(_) => ErrorClassification::fatal("InternalError"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_retryable() {
        let class = WaypointError::RateLimit("too many requests".into()).classify();
        assert!(class.retryable);
        assert_eq!(class.error_type, "RateLimitError");
    }

    #[test]
    fn test_auth_error_not_retryable() {
        let class = WaypointError::Authentication("bad key".into()).classify();
        assert!(!class.retryable);
        assert_eq!(class.error_type, "AuthenticationError");
    }

    #[test]
    fn test_timeout_retryable() {
        assert!(WaypointError::Timeout("timed out".into()).classify().retryable);
    }

    #[test]
    fn test_provider_rejection_not_retryable() {
        assert!(!WaypointError::ProviderRejected("content policy".into()).classify().retryable);
    }

    #[test]
    fn test_invalid_target_not_retryable() {
        assert!(!WaypointError::InvalidTarget("ftp://x".into()).classify().retryable);
    }

    #[test]
    fn test_cancel_never_retried() {
        assert!(!WaypointError::Cancelled.classify().retryable);
    }

    #[test]
    fn test_output_validation_retryable() {
        assert!(WaypointError::OutputValidation("missing queue".into()).classify().retryable);
    }
}
