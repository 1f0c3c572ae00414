use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use crate::errors::WaypointError;
use super::provider::{status_error, LLMProvider};
use super::types::{LLMResponse, Pricing};
use tracing::debug;

const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const FLASH_PRICING: Pricing = Pricing { input_per_mtok: 0.30, output_per_mtok: 2.50 };

pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: &str, model: Option<&str>, base_url: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            base_url: base_url
                .unwrap_or("https://generativelanguage.googleapis.com")
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn request_body(prompt: &str, system: Option<&str>) -> Value {
        let text = match system {
            Some(sys) => format!("System: {}\n\n{}", sys, prompt),
            None => prompt.to_string(),
        };
        json!({
            "contents": [{"role": "user", "parts": [{"text": text}]}],
            "generationConfig": { "maxOutputTokens": 16384 }
        })
    }
}

/// Text of the first candidate, every part joined.
fn candidate_text(data: &Value) -> String {
    data["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<LLMResponse, WaypointError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let resp = self.client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(prompt, system))
            .send()
            .await
            .map_err(|e| WaypointError::Network(format!("Gemini request failed: {}", e)))?;

        let status = resp.status();
        let text = resp.text().await
            .map_err(|e| WaypointError::Network(format!("Failed to read Gemini response: {}", e)))?;
        if let Some(err) = status_error("Gemini", status, &text) {
            return Err(err);
        }

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| WaypointError::LLMApi(format!("Failed to parse Gemini response: {}", e)))?;
        let content = candidate_text(&data);
        if content.is_empty() {
            let reason = data["candidates"][0]["finishReason"].as_str().unwrap_or("no candidates");
            return Err(WaypointError::LLMApi(format!("No content in Gemini response ({})", reason)));
        }

        let input_tokens = data["usageMetadata"]["promptTokenCount"].as_u64();
        let output_tokens = data["usageMetadata"]["candidatesTokenCount"].as_u64();
        debug!(model = %self.model, input_tokens, output_tokens, "Gemini completion");

        Ok(LLMResponse {
            content,
            input_tokens,
            output_tokens,
            cost_usd: FLASH_PRICING.estimate(input_tokens, output_tokens),
            model: self.model.clone(),
        })
    }

    fn provider_name(&self) -> &str { "gemini" }
    fn model_name(&self) -> &str { &self.model }
}
