use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use crate::errors::WaypointError;
use super::types::LLMResponse;

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Free-form text completion
    async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<LLMResponse, WaypointError>;

    /// Provider name for logging
    fn provider_name(&self) -> &str;

    /// Model identifier
    fn model_name(&self) -> &str;
}

/// Map a non-success HTTP status onto the error taxonomy. `None` for 2xx.
pub fn status_error(provider: &str, status: StatusCode, body: &str) -> Option<WaypointError> {
    if status.is_success() {
        return None;
    }
    let detail = api_error_message(body).unwrap_or_else(|| status.to_string());
    let msg = format!("{}: {}", provider, detail);
    Some(match status.as_u16() {
        401 => WaypointError::Authentication(msg),
        403 => WaypointError::Permission(msg),
        408 | 504 => WaypointError::Timeout(msg),
        429 => WaypointError::RateLimit(msg),
        400 | 404 | 413 | 422 => {
            let lower = detail.to_lowercase();
            let permanent = ["billing", "credit", "quota", "context", "too long"]
                .iter()
                .any(|k| lower.contains(k));
            if permanent {
                WaypointError::ProviderRejected(msg)
            } else {
                WaypointError::LLMApi(msg)
            }
        }
        529 => WaypointError::RateLimit(msg),
        _ => WaypointError::LLMApi(msg),
    })
}

fn api_error_message(body: &str) -> Option<String> {
    let data: Value = serde_json::from_str(body).ok()?;
    data["error"]["message"]
        .as_str()
        .or_else(|| data["error"].as_str())
        .map(str::to_string)
}

/// Pull a JSON value out of an LLM reply: the whole text, a fenced ```json
/// block, or the outermost braces, in that order.
pub fn extract_json(text: &str) -> Result<Value, WaypointError> {
    if let Ok(v) = serde_json::from_str::<Value>(text.trim()) {
        return Ok(v);
    }
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            let json_str = rest[..end].trim();
            return serde_json::from_str(json_str)
                .map_err(|e| WaypointError::OutputValidation(format!("Invalid JSON in code block: {}", e)));
        }
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return serde_json::from_str(&text[start..=end])
                .map_err(|e| WaypointError::OutputValidation(format!("Invalid JSON extraction: {}", e)));
        }
    }
    Err(WaypointError::OutputValidation("No valid JSON found in LLM response".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(status_error("x", StatusCode::OK, "").is_none());
        assert!(matches!(status_error("x", StatusCode::UNAUTHORIZED, ""), Some(WaypointError::Authentication(_))));
        assert!(matches!(status_error("x", StatusCode::TOO_MANY_REQUESTS, ""), Some(WaypointError::RateLimit(_))));
        assert!(matches!(status_error("x", StatusCode::BAD_GATEWAY, ""), Some(WaypointError::LLMApi(_))));
        let billing = r#"{"error":{"message":"Your credit balance is too low"}}"#;
        assert!(matches!(
            status_error("x", StatusCode::BAD_REQUEST, billing),
            Some(WaypointError::ProviderRejected(_))
        ));
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json("{\"a\":1}").unwrap()["a"], 1);
        let fenced = "Here you go:\n```json\n{\"vulnerabilities\": []}\n```\nDone.";
        assert!(extract_json(fenced).unwrap()["vulnerabilities"].is_array());
        assert_eq!(extract_json("prefix {\"b\": true} suffix").unwrap()["b"], true);
        assert!(matches!(extract_json("no json"), Err(WaypointError::OutputValidation(_))));
    }
}
