use std::sync::Arc;
use async_trait::async_trait;
use crate::errors::WaypointError;
use super::provider::LLMProvider;
use super::types::LLMResponse;
use tracing::{info, warn};

/// Tries providers in order, moving on when one is rate limited, out of
/// quota or unavailable. Any other error is returned as is.
pub struct FallbackProvider {
    providers: Vec<Arc<dyn LLMProvider>>,
}

impl FallbackProvider {
    /// `providers` must not be empty; the first one is the primary.
    pub fn new(providers: Vec<Arc<dyn LLMProvider>>) -> Result<Self, WaypointError> {
        if providers.is_empty() {
            return Err(WaypointError::Config("No LLM providers configured".into()));
        }
        Ok(Self { providers })
    }

    fn primary(&self) -> &Arc<dyn LLMProvider> {
        &self.providers[0]
    }
}

fn falls_through(err: &WaypointError) -> bool {
    matches!(
        err,
        WaypointError::RateLimit(_)
            | WaypointError::LLMApi(_)
            | WaypointError::Network(_)
            | WaypointError::Timeout(_)
            | WaypointError::ProviderRejected(_)
    )
}

#[async_trait]
impl LLMProvider for FallbackProvider {
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<LLMResponse, WaypointError> {
        let mut last_error = None;
        for (i, provider) in self.providers.iter().enumerate() {
            match provider.complete(prompt, system).await {
                Ok(response) => {
                    if i > 0 {
                        info!(provider = provider.provider_name(), skipped = i, "Fallback provider answered");
                    }
                    return Ok(response);
                }
                Err(e) if falls_through(&e) => {
                    warn!(provider = provider.provider_name(), error = %e, "LLM provider failed, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        // The executor classifies the last failure for its own retry.
        Err(last_error.unwrap_or_else(|| WaypointError::LLMApi("No LLM providers configured".into())))
    }

    fn provider_name(&self) -> &str {
        self.primary().provider_name()
    }

    fn model_name(&self) -> &str {
        self.primary().model_name()
    }
}
