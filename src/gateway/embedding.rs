use async_trait::async_trait;
use thiserror::Error;

/// Fixed-dimension embedding vector. Text and image encoders must produce
/// the same dimensionality so cross-modal comparison stays meaningful.
pub type Embedding = Vec<f32>;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding failed: {0}")]
    Backend(String),
    #[error("nothing to embed")]
    EmptyInput,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Embedding, EmbedError>;

    async fn embed_image(&self, bytes: &[u8]) -> Result<Embedding, EmbedError>;
}
