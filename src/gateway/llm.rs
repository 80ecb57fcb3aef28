use async_trait::async_trait;
use thiserror::Error;

/// Text-generation failure at the provider boundary
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("generation timed out after {0}s")]
    Timeout(u64),
}

/// Black-box text completion: `generate(prompt, context) -> text`.
///
/// Implementations must absorb provider fallback internally; callers see a
/// single generate call.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError>;
}
