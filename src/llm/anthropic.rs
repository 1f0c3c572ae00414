use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use crate::errors::WaypointError;
use super::provider::{status_error, LLMProvider};
use super::types::{LLMResponse, Pricing};
use tracing::debug;

const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const SONNET_PRICING: Pricing = Pricing { input_per_mtok: 3.0, output_per_mtok: 15.0 };

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: Option<&str>, base_url: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            base_url: base_url.unwrap_or("https://api.anthropic.com").trim_end_matches('/').to_string(),
            max_tokens: 8192,
        }
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<LLMResponse, WaypointError> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{"role": "user", "content": prompt}]
        });

        if let Some(sys) = system {
            body["system"] = json!(sys);
        }

        let resp = self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| WaypointError::Network(format!("Anthropic API request failed: {}", e)))?;

        let status = resp.status();
        let text = resp.text().await
            .map_err(|e| WaypointError::Network(format!("Failed to read Anthropic response: {}", e)))?;
        if let Some(err) = status_error("Anthropic", status, &text) {
            return Err(err);
        }

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| WaypointError::LLMApi(format!("Failed to parse Anthropic response: {}", e)))?;

        // Concatenate every text block; tool_use blocks are not requested
        let content: String = data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        if content.is_empty() {
            return Err(WaypointError::LLMApi("No content in Anthropic response".into()));
        }

        let input_tokens = data["usage"]["input_tokens"].as_u64();
        let output_tokens = data["usage"]["output_tokens"].as_u64();
        let cost_usd = SONNET_PRICING.estimate(input_tokens, output_tokens);

        debug!(model = %self.model, input_tokens, output_tokens, "Anthropic completion");

        Ok(LLMResponse {
            content,
            input_tokens,
            output_tokens,
            cost_usd,
            model: self.model.clone(),
        })
    }

    fn provider_name(&self) -> &str { "anthropic" }
    fn model_name(&self) -> &str { &self.model }
}
