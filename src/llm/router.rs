use std::sync::Arc;
use crate::config::resolved::LLMSettings;
use crate::errors::WaypointError;
use super::provider::LLMProvider;
use super::anthropic::AnthropicProvider;
use super::fallback::FallbackProvider;
use super::gemini::GeminiProvider;
use super::openai::OpenAIProvider;

/// The configured provider, wrapped in a [`FallbackProvider`] when
/// `llm.fallback` lists others.
pub fn create_provider(settings: &LLMSettings) -> Result<Arc<dyn LLMProvider>, WaypointError> {
    let primary = create_single(settings)?;
    if settings.fallback.is_empty() {
        return Ok(primary);
    }
    let mut providers = vec![primary];
    for fallback in &settings.fallback {
        providers.push(create_single(fallback)?);
    }
    Ok(Arc::new(FallbackProvider::new(providers)?))
}

fn create_single(settings: &LLMSettings) -> Result<Arc<dyn LLMProvider>, WaypointError> {
    let model = settings.model.as_deref();
    let base_url = settings.base_url.as_deref();
    let require_key = || {
        settings.api_key.as_deref().ok_or_else(|| {
            WaypointError::Config(format!(
                "No API key for provider '{}'; set llm.api_key or the provider's environment variable",
                settings.provider
            ))
        })
    };

    match settings.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(require_key()?, model, base_url))),
        "openai" => Ok(Arc::new(OpenAIProvider::new(require_key()?, model, base_url))),
        "gemini" => Ok(Arc::new(GeminiProvider::new(require_key()?, model, base_url))),
        "local" => Ok(Arc::new(OpenAIProvider::local(base_url, model, settings.api_key.as_deref()))),
        other => Err(WaypointError::Config(format!("Unknown LLM provider: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(provider: &str, key: Option<&str>) -> LLMSettings {
        LLMSettings {
            provider: provider.into(),
            model: None,
            api_key: key.map(str::to_string),
            base_url: None,
            fallback: Vec::new(),
        }
    }

    #[test]
    fn test_create_known_providers() {
        assert_eq!(create_provider(&settings("anthropic", Some("k"))).unwrap().provider_name(), "anthropic");
        assert_eq!(create_provider(&settings("openai", Some("k"))).unwrap().model_name(), "gpt-4o");
        assert_eq!(create_provider(&settings("gemini", Some("k"))).unwrap().model_name(), "gemini-2.5-flash");
        assert_eq!(create_provider(&settings("local", None)).unwrap().provider_name(), "local");
    }

    #[test]
    fn test_missing_key_and_unknown_provider() {
        assert!(matches!(create_provider(&settings("anthropic", None)), Err(WaypointError::Config(_))));
        assert!(matches!(create_provider(&settings("mistral", Some("k"))), Err(WaypointError::Config(_))));
    }

    #[test]
    fn test_fallback_chain_reports_primary() {
        let mut primary = settings("anthropic", Some("k"));
        primary.fallback = vec![settings("gemini", Some("g")), settings("local", None)];
        let provider = create_provider(&primary).unwrap();
        assert_eq!(provider.provider_name(), "anthropic");

        primary.fallback.push(settings("openai", None));
        assert!(matches!(create_provider(&primary), Err(WaypointError::Config(_))));
    }
}
