pub mod provider;
pub mod anthropic;
pub mod fallback;
pub mod gemini;
pub mod openai;
pub mod router;
pub mod types;

pub use provider::{extract_json, LLMProvider};
pub use fallback::FallbackProvider;
pub use router::create_provider;
pub use types::LLMResponse;
