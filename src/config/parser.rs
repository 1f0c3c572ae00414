use std::path::Path;
use crate::errors::WaypointError;
use super::types::WaypointConfig;
use super::security::validate_security_patterns;
use super::schema::CONFIG_SCHEMA;
use tracing::{debug, warn};

const MAX_CONFIG_BYTES: u64 = 1_048_576;

/// Load, screen, schema-check and type a config file. Returns the parsed
/// config together with the raw text it was read from.
pub async fn parse_config(path: &Path) -> Result<(WaypointConfig, String), WaypointError> {
    if !path.exists() {
        return Err(WaypointError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > MAX_CONFIG_BYTES {
        return Err(WaypointError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    let config = parse_config_str(&content)?;
    debug!(path = %path.display(), "Config parsed");
    Ok((config, content))
}

pub fn parse_config_str(content: &str) -> Result<WaypointConfig, WaypointError> {
    if content.trim().is_empty() {
        return Ok(WaypointConfig::default());
    }
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)?;

    validate_security_patterns(&yaml)?;
    validate_schema(&yaml)?;

    let config: WaypointConfig = serde_yaml::from_value(yaml)?;
    validate_conflicts(&config)?;
    Ok(config)
}

/// Structural validation. Any violation is fatal.
fn validate_schema(yaml: &serde_yaml::Value) -> Result<(), WaypointError> {
    let json_value = serde_json::to_value(yaml)
        .map_err(|e| WaypointError::Config(format!("Config conversion error: {}", e)))?;

    let compiled = jsonschema::JSONSchema::compile(&CONFIG_SCHEMA)
        .map_err(|e| WaypointError::Config(format!("Schema compilation error: {}", e)))?;

    if let Err(errors) = compiled.validate(&json_value) {
        let messages: Vec<String> = errors
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();
        if !messages.is_empty() {
            return Err(WaypointError::Config(format!(
                "Config failed schema validation: {}",
                messages.join("; ")
            )));
        }
    }
    Ok(())
}

/// Semantic checks the schema cannot express.
fn validate_conflicts(config: &WaypointConfig) -> Result<(), WaypointError> {
    if let Some(rules) = &config.rules {
        if let (Some(avoid), Some(focus)) = (&rules.avoid, &rules.focus) {
            for a in avoid {
                if focus.iter().any(|f| f.url_path == a.url_path && f.rule_type == a.rule_type) {
                    return Err(WaypointError::Config(format!(
                        "Conflicting rules: path '{}' appears in both avoid and focus lists",
                        a.url_path
                    )));
                }
            }
        }
    }

    if let Some(retry) = &config.retry {
        if let (Some(base), Some(max)) = (retry.base_delay_ms, retry.max_delay_ms) {
            if base > max {
                return Err(WaypointError::Config(format!(
                    "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                    base, max
                )));
            }
        }
    }

    if let Some(tools) = &config.tools {
        if tools.enabled.as_ref().is_some_and(|e| e.is_empty()) {
            warn!("tools.enabled is empty; the external scanner agent will only record that nothing ran");
        }
    }

    Ok(())
}
