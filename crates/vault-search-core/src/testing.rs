//! Test utilities shared by this crate's unit tests and the app crate's tests.
//!
//! Compiled for `cfg(test)` and behind the `test-utils` feature.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::models::Chunk;
use crate::partition::partition_for;
use crate::query::tokenize;

/// Deterministic bag-of-words embedder.
///
/// Each token is hashed into one of `dims` buckets; the vector is L2
/// normalized. Texts sharing words therefore have positive cosine
/// similarity, which is enough to exercise ranking without a model.
pub struct HashEmbedder {
    model: String,
    dims: usize,
    calls: AtomicUsize,
    fail_when_contains: Mutex<Option<String>>,
}

impl HashEmbedder {
    pub fn new(model: &str, dims: usize) -> Self {
        Self {
            model: model.to_string(),
            dims: dims.max(1),
            calls: AtomicUsize::new(0),
            fail_when_contains: Mutex::new(None),
        }
    }

    /// Make every call whose input contains `needle` fail.
    pub fn fail_when_contains(&self, needle: &str) {
        *self.fail_when_contains.lock().unwrap() = Some(needle.to_string());
    }

    /// Number of `embed` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Embed synchronously; used to build fixtures.
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let tokens = tokenize(text);
        if tokens.is_empty() {
            v[0] = 1.0;
            return v;
        }
        for token in tokens {
            v[partition_for(&token, self.dims)] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter_mut().for_each(|x| *x /= norm);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let needle = self.fail_when_contains.lock().unwrap().clone();
        if let Some(needle) = needle {
            if texts.iter().any(|t| t.contains(&needle)) {
                bail!("embedding request failed for input containing {needle:?}");
            }
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Embedder that always fails with the given message.
pub struct FailingEmbedder {
    pub message: String,
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("{}", self.message)
    }
}

/// Build a single-chunk fixture with the given embedding.
pub fn make_chunk(path: &str, body: &str, embedding: Vec<f32>, model: &str) -> Chunk {
    let title = crate::chunk::note_title(path);
    let content = format!("{}{}", crate::chunk::context_header(&title), body);
    Chunk {
        id: crate::chunk::chunk_id(path, &content),
        path: path.to_string(),
        title,
        nchars: content.chars().count(),
        content,
        embedding,
        embedding_model: model.to_string(),
        tags: crate::chunk::collect_tags(&serde_json::Map::new(), body),
        extension: "md".to_string(),
        metadata: serde_json::Map::new(),
        ctime: 0,
        mtime: 0,
        created_at: 0,
        chunk_index: 0,
    }
}
