//! Deterministic feature-hash embedder.
//!
//! Stands in for a hosted embedding service: bag-of-words feature hashing
//! into a fixed-dimension L2-normalized vector. Identical input always
//! produces the identical vector, which keeps the vector stage usable
//! offline and fully reproducible in tests. Image bytes are hashed in
//! fixed-size chunks into the same dimensionality so both modalities share
//! one index.

use async_trait::async_trait;
use md5::{Digest, Md5};

use crate::gateway::{EmbedError, Embedder, Embedding};

pub const DEFAULT_DIM: usize = 256;

pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    fn bucket(&self, data: &[u8]) -> usize {
        let digest = Md5::digest(data);
        let mut idx = 0usize;
        for b in digest.iter().take(8) {
            idx = (idx << 8) | *b as usize;
        }
        idx % self.dim
    }

    fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIM)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Embedding, EmbedError> {
        let mut vector = vec![0.0f32; self.dim];
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(vector);
        }
        for token in &tokens {
            vector[self.bucket(token.as_bytes())] += 1.0;
        }
        // Adjacent-token bigrams give short Vietnamese phrases some word
        // order sensitivity
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            vector[self.bucket(bigram.as_bytes())] += 0.5;
        }
        Ok(Self::normalize(vector))
    }

    async fn embed_image(&self, image: &[u8]) -> Result<Embedding, EmbedError> {
        if image.is_empty() {
            return Err(EmbedError::EmptyInput);
        }
        let mut vector = vec![0.0f32; self.dim];
        for chunk in image.chunks(64) {
            vector[self.bucket(chunk)] += 1.0;
        }
        Ok(Self::normalize(vector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deterministic() {
        let e = HashEmbedder::default();
        let a = e.embed_text("cá hồi phi lê").await.unwrap();
        let b = e.embed_text("cá hồi phi lê").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_unit_norm() {
        let e = HashEmbedder::default();
        let v = e.embed_text("cá hồi tươi").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_similar_texts_closer_than_unrelated() {
        let e = HashEmbedder::default();
        let salmon = e.embed_text("cá hồi phi lê").await.unwrap();
        let salmon2 = e.embed_text("cá hồi tươi").await.unwrap();
        let beef = e.embed_text("thịt bò mỹ").await.unwrap();
        let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        assert!(dot(&salmon, &salmon2) > dot(&salmon, &beef));
    }

    #[tokio::test]
    async fn test_empty_image_rejected() {
        let e = HashEmbedder::default();
        assert!(e.embed_image(&[]).await.is_err());
    }
}
