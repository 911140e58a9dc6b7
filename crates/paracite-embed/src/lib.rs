//! Paracite embedding service
//!
//! Turns paragraph summaries and candidate abstracts into fixed-length
//! vectors so the ranker can compare them.
//!
//! # Backends
//! - `HttpEmbedder` for OpenAI-style `/v1/embeddings` endpoints and Ollama
//! - `MiniLmEmbedder` (feature `local`): all-MiniLM-L6-v2 via Candle, no
//!   network after the first model download
//!
//! Every backend returns one vector per input, in input order, all of the
//! same length. Callers still verify this, since remote services do not
//! always honour it.

pub mod error;
pub mod http;
#[cfg(feature = "local")]
pub mod local;
#[cfg(feature = "local")]
pub mod pooling;

use async_trait::async_trait;

pub use error::{EmbedError, Result};
pub use http::{HttpEmbedder, HttpEmbeddingBackend, HttpEmbeddingConfig};
#[cfg(feature = "local")]
pub use local::{LocalEmbeddingConfig, MiniLmEmbedder};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; returns one vector per text, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn model_id(&self) -> &str;

    /// Expected vector length, when known up front.
    fn dimension(&self) -> Option<usize>;
}

/// Cosine similarity between two embedding vectors, in [-1, 1].
/// Mismatched, empty or zero-norm inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Check that a response holds `expected` vectors of one shared, non-zero length.
pub fn validate_vectors(vectors: &[Vec<f32>], expected: usize) -> Result<usize> {
    if vectors.len() != expected {
        return Err(EmbedError::InvalidOutput(format!(
            "expected {expected} vectors, got {}",
            vectors.len()
        )));
    }
    let dim = vectors.first().map(|v| v.len()).unwrap_or(0);
    if dim == 0 {
        return Err(EmbedError::InvalidOutput("empty embedding vector".to_string()));
    }
    if let Some(bad) = vectors.iter().position(|v| v.len() != dim) {
        return Err(EmbedError::InvalidOutput(format!(
            "dimension mismatch at {bad}: {} vs {dim}",
            vectors[bad].len()
        )));
    }
    Ok(dim)
}
