use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("vector search failed: {0}")]
    Backend(String),
}

/// One nearest-neighbor hit. Product fields travel in `metadata`
/// (`product_id`, `product_name`, `category_id`, `category_name`, `price`).
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub metadata: HashMap<String, String>,
    pub distance: f32,
}

/// Nearest-neighbor lookup by embedding plus metadata filter
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &HashMap<String, String>,
    ) -> Result<Vec<VectorHit>, VectorError>;
}
