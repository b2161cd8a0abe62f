//! Storage abstraction for indexed note chunks.
//!
//! The [`Store`] trait defines every operation the indexing pipeline and the
//! retrievers need, so the same code runs against the persisted
//! partitioned store in the app crate and the [`memory::InMemoryStore`]
//! used in tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Chunk;
use crate::search::{ChunkHit, SearchQuery};

/// Predicate selecting chunks without scoring them.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkFilter {
    /// Every chunk of one note.
    Path(String),
    /// Every chunk of any of these notes.
    Paths(Vec<String>),
    /// Notes whose title matches one of these, case-insensitively.
    Titles(Vec<String>),
    /// Chunks whose note mtime lies in `[start, end]` (Unix ms).
    ModifiedBetween { start: i64, end: i64 },
}

impl ChunkFilter {
    pub fn matches(&self, chunk: &Chunk) -> bool {
        match self {
            ChunkFilter::Path(path) => chunk.path == *path,
            ChunkFilter::Paths(paths) => paths.iter().any(|p| *p == chunk.path),
            ChunkFilter::Titles(titles) => {
                let title = chunk.title.to_lowercase();
                titles.iter().any(|t| t.to_lowercase() == title)
            }
            ChunkFilter::ModifiedBetween { start, end } => {
                chunk.mtime >= *start && chunk.mtime <= *end
            }
        }
    }
}

/// Abstract chunk storage.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | `upsert` | Insert or replace a chunk by id |
/// | `remove_by_path` | Drop every chunk of a note |
/// | `retain_path_chunks` | Drop a note's chunks not in a keep set |
/// | `find` | Unscored lookup by [`ChunkFilter`] |
/// | `search` | Scored lookup by [`SearchQuery`] |
/// | `garbage_collect` | Drop chunks of notes no longer in the vault |
/// | `indexed_mtimes` | Latest indexed mtime per note |
/// | `sample_embedding_model` | Model name recorded on any stored chunk |
/// | `count` | Number of stored chunks |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert `chunk`, replacing any chunk with the same id. Returns the
    /// stored chunk.
    async fn upsert(&self, chunk: Chunk) -> Result<Chunk>;

    /// Remove every chunk whose path is `path`. Returns how many were removed.
    async fn remove_by_path(&self, path: &str) -> Result<usize>;

    /// Remove chunks of `path` whose id is not in `keep`.
    async fn retain_path_chunks(&self, path: &str, keep: &HashSet<String>) -> Result<usize>;

    async fn find(&self, filter: &ChunkFilter) -> Result<Vec<Chunk>>;

    async fn search(&self, query: &SearchQuery<'_>) -> Result<Vec<ChunkHit>>;

    /// Remove chunks whose path is not in `live_paths`.
    async fn garbage_collect(&self, live_paths: &HashSet<String>) -> Result<usize>;

    /// Highest stored mtime for every indexed note.
    async fn indexed_mtimes(&self) -> Result<HashMap<String, i64>>;

    /// Embedding model recorded on an arbitrary stored chunk, if any.
    async fn sample_embedding_model(&self) -> Result<Option<String>>;

    async fn count(&self) -> Result<usize>;
}
