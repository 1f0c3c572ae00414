use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cost_usd: Option<f64>,
    pub model: String,
}

/// Per-million-token prices used to estimate cost when the provider does not report it.
#[derive(Debug, Clone, Copy)]
pub struct Pricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl Pricing {
    pub fn estimate(&self, input_tokens: Option<u64>, output_tokens: Option<u64>) -> Option<f64> {
        match (input_tokens, output_tokens) {
            (Some(inp), Some(out)) => Some(
                inp as f64 * self.input_per_mtok / 1_000_000.0
                    + out as f64 * self.output_per_mtok / 1_000_000.0,
            ),
            _ => None,
        }
    }
}
