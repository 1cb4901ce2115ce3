//! Embedding provider trait and vector math.

use anyhow::Result;
use async_trait::async_trait;

/// Converts text to fixed-dimension vectors.
///
/// Implementations must return one vector per input, in input order, each of
/// length [`dimension`](EmbeddingProvider::dimension). Batching across a
/// provider call is allowed as long as order is preserved.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector dimension this provider produces.
    fn dimension(&self) -> usize;
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched dimensions or zero-norm inputs; otherwise a
/// value in [-1, 1].
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Mean of a set of equal-dimension vectors.
///
/// Returns None for an empty set or inconsistent dimensions.
#[must_use]
pub fn centroid(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dimension = first.len();
    if dimension == 0 || vectors.iter().any(|v| v.len() != dimension) {
        return None;
    }
    let mut mean = vec![0.0f32; dimension];
    for vector in vectors {
        for (slot, value) in mean.iter_mut().zip(vector.iter()) {
            *slot += value;
        }
    }
    let count = vectors.len() as f32;
    for slot in &mut mean {
        *slot /= count;
    }
    Some(mean)
}
