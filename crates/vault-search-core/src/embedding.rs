//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, a validating [`embed_one`] helper, and cosine similarity.
//!
//! Concrete provider implementations (OpenAI-compatible HTTP, disabled)
//! live in the `vault-search` app crate.

use anyhow::{bail, Result};
use async_trait::async_trait;

/// Trait for embedding providers.
///
/// The vector length is not part of the trait: stores detect it once by
/// embedding a sample string and pin it for their lifetime.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single text and validate the response.
///
/// Fails if the provider returns no vector or an empty one.
pub async fn embed_one(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let vectors = provider.embed(&[text.to_string()]).await?;
    validate_vectors(&vectors, 1)?;
    Ok(vectors.into_iter().next().unwrap_or_default())
}

/// Check that a provider response holds `expected` non-empty vectors of
/// equal length.
pub fn validate_vectors(vectors: &[Vec<f32>], expected: usize) -> Result<()> {
    if vectors.len() != expected {
        bail!(
            "embedding provider returned {} vectors for {} inputs",
            vectors.len(),
            expected
        );
    }
    let Some(first) = vectors.first() else {
        return Ok(());
    };
    if first.is_empty() {
        bail!("embedding provider returned an empty vector");
    }
    if vectors.iter().any(|v| v.len() != first.len()) {
        bail!("embedding provider returned vectors of unequal length");
    }
    Ok(())
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
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

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
