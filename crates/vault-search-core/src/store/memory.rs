//! In-memory [`Store`] implementation.
//!
//! Chunks live in a `HashMap` keyed by id behind a `std::sync::RwLock`.
//! Search is a brute-force scan through [`rank_chunks`]. The persisted store
//! in the app crate uses one of these as its working table.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::Chunk;
use crate::search::{rank_chunks, ChunkHit, SearchQuery};

use super::{ChunkFilter, Store};

#[derive(Default)]
struct Table {
    chunks: HashMap<String, Chunk>,
    vector_length: Option<usize>,
}

/// In-memory chunk table with optional embedding length enforcement.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Table>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects chunks whose embedding is not `len` long.
    pub fn with_vector_length(len: usize) -> Self {
        let store = Self::new();
        store.set_vector_length(Some(len));
        store
    }

    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn vector_length(&self) -> Option<usize> {
        self.read().vector_length
    }

    pub fn set_vector_length(&self, len: Option<usize>) {
        self.write().vector_length = len;
    }

    pub fn get(&self, id: &str) -> Option<Chunk> {
        self.read().chunks.get(id).cloned()
    }

    /// Insert a chunk whose id must not already be present.
    pub fn insert(&self, chunk: Chunk) -> Result<()> {
        let mut table = self.write();
        check_vector_length(table.vector_length, &chunk)?;
        if table.chunks.contains_key(&chunk.id) {
            bail!("duplicate chunk id {}", chunk.id);
        }
        table.chunks.insert(chunk.id.clone(), chunk);
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Option<Chunk> {
        self.write().chunks.remove(id)
    }

    pub fn clear(&self) {
        self.write().chunks.clear();
    }

    pub fn all(&self) -> Vec<Chunk> {
        self.read().chunks.values().cloned().collect()
    }

    /// Replace the whole table, validating every chunk first.
    pub fn replace_all(&self, chunks: Vec<Chunk>) -> Result<()> {
        let mut table = self.write();
        for chunk in &chunks {
            check_vector_length(table.vector_length, chunk)?;
        }
        table.chunks = chunks.into_iter().map(|c| (c.id.clone(), c)).collect();
        Ok(())
    }

    fn remove_where(&self, pred: impl Fn(&Chunk) -> bool) -> usize {
        let mut table = self.write();
        let before = table.chunks.len();
        table.chunks.retain(|_, c| !pred(c));
        before - table.chunks.len()
    }
}

fn check_vector_length(expected: Option<usize>, chunk: &Chunk) -> Result<()> {
    if let Some(expected) = expected {
        if chunk.embedding.len() != expected {
            bail!(
                "chunk {} has embedding length {}, store expects {}",
                chunk.id,
                chunk.embedding.len(),
                expected
            );
        }
    }
    Ok(())
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert(&self, chunk: Chunk) -> Result<Chunk> {
        let mut table = self.write();
        check_vector_length(table.vector_length, &chunk)?;
        table.chunks.insert(chunk.id.clone(), chunk.clone());
        Ok(chunk)
    }

    async fn remove_by_path(&self, path: &str) -> Result<usize> {
        Ok(self.remove_where(|c| c.path == path))
    }

    async fn retain_path_chunks(&self, path: &str, keep: &HashSet<String>) -> Result<usize> {
        Ok(self.remove_where(|c| c.path == path && !keep.contains(&c.id)))
    }

    async fn find(&self, filter: &ChunkFilter) -> Result<Vec<Chunk>> {
        let mut found: Vec<Chunk> = self
            .read()
            .chunks
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.path.cmp(&b.path).then(a.chunk_index.cmp(&b.chunk_index)));
        Ok(found)
    }

    async fn search(&self, query: &SearchQuery<'_>) -> Result<Vec<ChunkHit>> {
        Ok(rank_chunks(self.read().chunks.values(), query))
    }

    async fn garbage_collect(&self, live_paths: &HashSet<String>) -> Result<usize> {
        Ok(self.remove_where(|c| !live_paths.contains(&c.path)))
    }

    async fn indexed_mtimes(&self) -> Result<HashMap<String, i64>> {
        let mut mtimes: HashMap<String, i64> = HashMap::new();
        for chunk in self.read().chunks.values() {
            let entry = mtimes.entry(chunk.path.clone()).or_insert(chunk.mtime);
            *entry = (*entry).max(chunk.mtime);
        }
        Ok(mtimes)
    }

    async fn sample_embedding_model(&self) -> Result<Option<String>> {
        Ok(self
            .read()
            .chunks
            .values()
            .map(|c| c.embedding_model.clone())
            .find(|m| !m.is_empty()))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read().chunks.len())
    }
}
