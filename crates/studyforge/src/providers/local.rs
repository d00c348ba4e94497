//! Deterministic offline embedder for development and tests.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::providers::embedding::EmbeddingProvider;

/// Hash-derived embeddings: no model, no network, same text always maps to
/// the same unit vector. Useful when no Ollama server is available; the
/// vectors carry no semantics beyond equality.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(hash_vector(text, self.dimensions))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// Each SHA-256 of (text, lane) yields eight f32 lanes in [-1, 1]; the
/// result is L2-normalized.
fn hash_vector(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = Vec::with_capacity(dimensions);
    let mut lane = 0u32;
    while vector.len() < dimensions {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(lane.to_le_bytes());
        let digest = hasher.finalize();
        for bytes in digest.chunks_exact(4) {
            if vector.len() == dimensions {
                break;
            }
            let n = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            vector.push((n as f32 / u32::MAX as f32) * 2.0 - 1.0);
        }
        lane += 1;
    }

    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
    vector
}
