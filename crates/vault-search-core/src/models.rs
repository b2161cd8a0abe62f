//! Core data models used throughout Vault Search.
//!
//! These types represent the chunks stored in the index, the per-query
//! options supplied by callers, and the ranked documents handed back.

use serde::{Deserialize, Serialize};

/// A bounded slice of a note, the unit of embedding and storage.
///
/// Serialized in camelCase because the same shape is written verbatim into
/// the partition files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// SHA-256 over the note path and chunk content.
    pub id: String,
    /// Vault-relative path of the source note.
    pub path: String,
    /// Note basename without extension.
    pub title: String,
    /// Chunk text including the contextual header.
    pub content: String,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub extension: String,
    /// Frontmatter key/value pairs.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Creation time of the note (Unix milliseconds).
    pub ctime: i64,
    /// Modification time of the note (Unix milliseconds).
    pub mtime: i64,
    /// Index time (Unix milliseconds).
    pub created_at: i64,
    pub nchars: usize,
    /// Position of this chunk within its note.
    #[serde(default)]
    pub chunk_index: usize,
}

impl Chunk {
    /// Chunk content with the contextual header removed.
    pub fn body(&self) -> &str {
        crate::chunk::strip_header(&self.content)
    }
}

/// Inclusive time window in Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

/// Per-query retrieval options. Immutable for the lifetime of a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieverOptions {
    pub min_similarity_score: f64,
    pub max_k: usize,
    #[serde(default)]
    pub salient_terms: Vec<String>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    /// Lexical weight for hybrid scoring. Defaults to 0.5.
    #[serde(default)]
    pub text_weight: Option<f64>,
    #[serde(default)]
    pub return_all: bool,
    #[serde(default)]
    pub use_reranker_threshold: Option<f64>,
    #[serde(default)]
    pub skip_query_rewrite: bool,
}

impl Default for RetrieverOptions {
    fn default() -> Self {
        Self {
            min_similarity_score: 0.1,
            max_k: 10,
            salient_terms: Vec::new(),
            time_range: None,
            text_weight: None,
            return_all: false,
            use_reranker_threshold: None,
            skip_query_rewrite: false,
        }
    }
}

/// Which retrieval path produced a [`RankedDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultSource {
    /// Note referenced by name in the query (`[[Note]]`).
    Explicit,
    /// Vector + lexical store search.
    Hybrid,
    /// Daily note whose title falls inside the requested time range.
    DailyNote,
    /// Note modified inside the requested time range.
    TimeRange,
    /// Result returned by the remote hybrid-search service.
    Remote,
}

/// A single retrieval result. Produced fresh per query, never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedDocument {
    pub path: String,
    pub title: String,
    pub content: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
    /// Pre-rerank score, kept for diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_score: Option<f64>,
    pub include_in_context: bool,
    pub source: ResultSource,
    /// Chunk id when the document maps to a single stored chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    pub mtime: i64,
}

impl RankedDocument {
    /// Build a result from a stored chunk.
    pub fn from_chunk(chunk: &Chunk, score: f64, source: ResultSource) -> Self {
        Self {
            path: chunk.path.clone(),
            title: chunk.title.clone(),
            content: chunk.content.clone(),
            score,
            rerank_score: None,
            original_score: None,
            include_in_context: true,
            source,
            chunk_id: Some(chunk.id.clone()),
            mtime: chunk.mtime,
        }
    }
}
