use serde_yaml::Value;
use crate::errors::WaypointError;

/// Rejected wherever they occur in a string value.
const DANGEROUS_FRAGMENTS: &[&str] = &["../", "..\\", "<script", "\0"];

/// Rejected as the leading scheme of a string value.
const DANGEROUS_SCHEMES: &[&str] = &["javascript:", "data:", "file:", "vbscript:"];

/// Walk the raw YAML tree and refuse values that could smuggle paths or
/// script payloads into agent instructions or tool arguments.
pub fn validate_security_patterns(value: &Value) -> Result<(), WaypointError> {
    let mut stack: Vec<(String, &Value)> = vec![(String::new(), value)];
    while let Some((path, node)) = stack.pop() {
        match node {
            Value::String(s) => {
                if let Some(pattern) = dangerous_pattern(s) {
                    let location = if path.is_empty() { "root" } else { path.as_str() };
                    return Err(WaypointError::Config(format!(
                        "Dangerous pattern '{}' found at config path: {}",
                        pattern.escape_debug(),
                        location
                    )));
                }
            }
            Value::Mapping(map) => {
                for (k, v) in map {
                    let key = k.as_str().unwrap_or("?");
                    let child = if path.is_empty() { key.to_string() } else { format!("{}.{}", path, key) };
                    stack.push((child, v));
                }
            }
            Value::Sequence(seq) => {
                for (i, v) in seq.iter().enumerate() {
                    stack.push((format!("{}[{}]", path, i), v));
                }
            }
            Value::Tagged(tagged) => stack.push((path, &tagged.value)),
            _ => {}
        }
    }
    Ok(())
}

fn dangerous_pattern(s: &str) -> Option<&'static str> {
    let lower = s.to_lowercase();
    if let Some(p) = DANGEROUS_FRAGMENTS.iter().find(|p| lower.contains(*p)) {
        return Some(p);
    }
    let trimmed = lower.trim_start();
    DANGEROUS_SCHEMES.iter().find(|p| trimmed.starts_with(*p)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(yaml: &str) -> Result<(), WaypointError> {
        validate_security_patterns(&serde_yaml::from_str::<Value>(yaml).unwrap())
    }

    #[test]
    fn test_safe_config_passes() {
        assert!(check("llm:\n  provider: anthropic\n  base_url: https://api.anthropic.com").is_ok());
        assert!(check("execution:\n  agent_timeout_secs: 600\n  preflight: true").is_ok());
    }

    #[test]
    fn test_directory_traversal_blocked() {
        let err = check("rules:\n  avoid:\n    - url_path: '../../secret'").unwrap_err();
        assert!(err.to_string().contains("rules.avoid[0].url_path"));
    }

    #[test]
    fn test_script_injection_blocked() {
        assert!(check("value: '<SCRIPT>alert(1)</script>'").is_err());
    }

    #[test]
    fn test_schemes_blocked_only_at_start() {
        assert!(check("url: 'javascript:void(0)'").is_err());
        assert!(check("url: ' file:///etc/passwd'").is_err());
        assert!(check("description: 'user profile: settings page'").is_ok());
    }
}
