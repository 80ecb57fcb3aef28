//! In-memory cosine-similarity vector index over the product catalog.
//!
//! Built once at startup by embedding every product's name and description.
//! Distance reported to the retriever is `1 - cosine similarity`, matching
//! the `similarity = 1 - distance` convention on the other side.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::gateway::{Embedder, Embedding, ProductRow, VectorError, VectorHit, VectorIndex};

struct Entry {
    id: String,
    embedding: Embedding,
    metadata: HashMap<String, String>,
}

#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: Vec<Entry>,
}

impl InMemoryVectorIndex {
    /// Embed the catalog into a fresh index
    pub async fn from_products(
        products: &[ProductRow],
        embedder: &dyn Embedder,
    ) -> anyhow::Result<Self> {
        let mut entries = Vec::with_capacity(products.len());
        for product in products {
            let text = match &product.description {
                Some(description) => format!("{} {}", product.product_name, description),
                None => product.product_name.clone(),
            };
            let embedding = embedder.embed_text(&text).await?;

            let mut metadata = HashMap::new();
            metadata.insert("content_type".to_string(), "product".to_string());
            metadata.insert("product_id".to_string(), product.product_id.clone());
            metadata.insert("product_name".to_string(), product.product_name.clone());
            metadata.insert("category_id".to_string(), product.category_id.clone());
            metadata.insert("category_name".to_string(), product.category_name.clone());
            if let Some(price) = product.price {
                metadata.insert("price".to_string(), price.to_string());
            }
            entries.push(Entry {
                id: product.product_id.clone(),
                embedding,
                metadata,
            });
        }
        println!("✅ Vector index built: {} entries", entries.len());
        Ok(Self { entries })
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            return 0.0;
        }
        dot / (na * nb)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &HashMap<String, String>,
    ) -> Result<Vec<VectorHit>, VectorError> {
        let mut hits: Vec<VectorHit> = self
            .entries
            .iter()
            .filter(|e| {
                filter
                    .iter()
                    .all(|(k, v)| e.metadata.get(k).is_some_and(|m| m == v))
            })
            .map(|e| VectorHit {
                id: e.id.clone(),
                metadata: e.metadata.clone(),
                distance: 1.0 - Self::cosine(embedding, &e.embedding),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::embed::HashEmbedder;

    fn product(id: &str, name: &str, category: &str) -> ProductRow {
        ProductRow {
            product_id: id.to_string(),
            product_name: name.to_string(),
            category_id: "C1".to_string(),
            category_name: category.to_string(),
            price: Some(100_000.0),
            description: None,
        }
    }

    async fn index() -> InMemoryVectorIndex {
        let embedder = HashEmbedder::default();
        InMemoryVectorIndex::from_products(
            &[
                product("SP001", "Cá hồi phi lê", "Hải sản"),
                product("SP002", "Thịt bò Mỹ", "Thịt"),
            ],
            &embedder,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_nearest_is_first() {
        let embedder = HashEmbedder::default();
        let query = embedder.embed_text("cá hồi phi lê").await.unwrap();
        let mut filter = HashMap::new();
        filter.insert("content_type".to_string(), "product".to_string());

        let hits = index().await.search(&query, 5, &filter).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "SP001");
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn test_category_filter_restricts() {
        let embedder = HashEmbedder::default();
        let query = embedder.embed_text("cá hồi").await.unwrap();
        let mut filter = HashMap::new();
        filter.insert("content_type".to_string(), "product".to_string());
        filter.insert("category_name".to_string(), "Thịt".to_string());

        let hits = index().await.search(&query, 5, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "SP002");
    }
}
