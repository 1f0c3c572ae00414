use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use crate::errors::WaypointError;
use super::provider::{status_error, LLMProvider};
use super::types::{LLMResponse, Pricing};
use tracing::debug;

const GPT4O_PRICING: Pricing = Pricing { input_per_mtok: 2.5, output_per_mtok: 10.0 };

/// OpenAI chat-completions API, also used for self-hosted compatible servers.
pub struct OpenAIProvider {
    client: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    name: &'static str,
    pricing: Option<Pricing>,
}

impl OpenAIProvider {
    pub fn new(api_key: &str, model: Option<&str>, base_url: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            api_key: Some(api_key.to_string()),
            model: model.unwrap_or("gpt-4o").to_string(),
            base_url: base_url.unwrap_or("https://api.openai.com/v1").trim_end_matches('/').to_string(),
            name: "openai",
            pricing: Some(GPT4O_PRICING),
        }
    }

    /// Local OpenAI-compatible endpoint (Ollama, vLLM); no key, no cost.
    pub fn local(base_url: Option<&str>, model: Option<&str>, api_key: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.map(str::to_string),
            model: model.unwrap_or("qwen2.5-coder:7b").to_string(),
            base_url: base_url.unwrap_or("http://localhost:11434/v1").trim_end_matches('/').to_string(),
            name: "local",
            pricing: None,
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<LLMResponse, WaypointError> {
        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(json!({"role": "system", "content": sys}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": 4096,
        });

        let mut request = self.client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        let resp = request
            .send()
            .await
            .map_err(|e| WaypointError::Network(format!("{} request failed: {}", self.name, e)))?;

        let status = resp.status();
        let text = resp.text().await
            .map_err(|e| WaypointError::Network(format!("Failed to read {} response: {}", self.name, e)))?;
        if let Some(err) = status_error(self.name, status, &text) {
            return Err(err);
        }

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| WaypointError::LLMApi(format!("Failed to parse {} response: {}", self.name, e)))?;

        let content = data["choices"][0]["message"]["content"].as_str()
            .ok_or_else(|| WaypointError::LLMApi(format!("No content in {} response", self.name)))?
            .to_string();
        let input_tokens = data["usage"]["prompt_tokens"].as_u64();
        let output_tokens = data["usage"]["completion_tokens"].as_u64();
        let cost_usd = self.pricing.and_then(|p| p.estimate(input_tokens, output_tokens));

        debug!(provider = self.name, model = %self.model, input_tokens, output_tokens, "Chat completion");

        Ok(LLMResponse {
            content,
            input_tokens,
            output_tokens,
            cost_usd,
            model: self.model.clone(),
        })
    }

    fn provider_name(&self) -> &str { self.name }
    fn model_name(&self) -> &str { &self.model }
}
