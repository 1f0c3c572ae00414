use tracing::debug;

/// Resolve a config value that may reference the environment as `$VAR`.
/// An unset variable resolves to `None` rather than to the literal text.
pub fn resolve_credential(value: &str) -> Option<String> {
    match value.strip_prefix('$') {
        Some(var_name) => match std::env::var(var_name) {
            Ok(resolved) if !resolved.is_empty() => {
                debug!(var = %var_name, "Resolved credential from environment");
                Some(resolved)
            }
            _ => {
                debug!(var = %var_name, "Credential variable not set");
                None
            }
        },
        None if value.is_empty() => None,
        None => Some(value.to_string()),
    }
}

/// Masks known secrets before text reaches the audit trail.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Vec<String>,
}

impl Redactor {
    /// Secrets shorter than four characters are ignored; masking them would
    /// mangle ordinary text.
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut secrets: Vec<String> = secrets
            .into_iter()
            .map(Into::into)
            .filter(|s| s.chars().count() >= 4)
            .collect();
        // Longest first so a secret containing another is masked whole
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        Self { secrets }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut result = text.to_string();
        for secret in &self.secrets {
            if result.contains(secret.as_str()) {
                result = result.replace(secret.as_str(), "[REDACTED]");
            }
        }
        result
    }

    pub fn redact_json(&self, value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::String(s) => serde_json::Value::String(self.redact(s)),
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| self.redact_json(v)).collect())
            }
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), self.redact_json(v))).collect(),
            ),
            other => other.clone(),
        }
    }
}
