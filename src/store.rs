//! Partitioned on-disk chunk store.
//!
//! [`ChunkStore`] keeps every chunk in an [`InMemoryStore`] working table
//! and persists it as JSON:
//!
//! ```text
//! {dir}/{prefix}-metadata.json     manifest
//! {dir}/{prefix}-chunk-0.json      chunks with partition_for(id, n) == 0
//! {dir}/{prefix}-chunk-1.json
//! ...
//! ```
//!
//! With one partition the legacy single-file layout `{dir}/{prefix}.json`
//! is used instead. Saves are serialized; each file is written to a
//! temporary sibling and renamed into place. A store whose files cannot be
//! parsed is replaced by a fresh empty one.
//!
//! Changing the partition count rewrites every partition on the next load.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use vault_search_core::embedding::{embed_one, EmbeddingProvider};
use vault_search_core::models::Chunk;
use vault_search_core::partition::partition_for;
use vault_search_core::search::{ChunkHit, SearchQuery};
use vault_search_core::store::memory::InMemoryStore;
use vault_search_core::store::{ChunkFilter, Store};

use crate::config::StoreConfig;
use crate::error::Error;

/// Layout version written to every manifest.
pub const SCHEMA_VERSION: &str = "vault-search/1";

const DIMENSION_PROBE: &str = "vault search dimension probe";

/// Where and how a store is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    pub dir: PathBuf,
    pub prefix: String,
    pub num_partitions: usize,
}

impl StoreLayout {
    /// Partitioned layout from `[store]`.
    pub fn partitioned(config: &StoreConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            prefix: config.prefix.clone(),
            num_partitions: config.num_partitions.max(1),
        }
    }

    /// Single-file legacy layout from `[store]`.
    pub fn legacy(config: &StoreConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            prefix: config.legacy_prefix.clone(),
            num_partitions: 1,
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.num_partitions == 1
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(format!("{}-metadata.json", self.prefix))
    }

    pub fn partition_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}-chunk-{}.json", self.prefix, index))
    }

    pub fn legacy_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.prefix))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    num_partitions: usize,
    vector_length: usize,
    schema: String,
    last_modified: i64,
    /// path → chunk id → partition index
    #[serde(default)]
    document_partitions: BTreeMap<String, BTreeMap<String, usize>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyFile {
    vector_length: usize,
    schema: String,
    last_modified: i64,
    chunks: Vec<Chunk>,
}

struct Loaded {
    num_partitions: usize,
    vector_length: usize,
    chunks: Vec<Chunk>,
}

/// Persistent, partitioned chunk store.
pub struct ChunkStore {
    layout: StoreLayout,
    table: InMemoryStore,
    upsert_lock: Mutex<()>,
    save_lock: Mutex<()>,
    dirty: AtomicBool,
}

impl ChunkStore {
    /// Open the store at `layout`, creating it if needed.
    ///
    /// A new store needs `embedder` to detect the vector length; without one
    /// only an existing store can be opened.
    pub async fn initialize(
        layout: StoreLayout,
        embedder: Option<&dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let loaded = match load(&layout).await {
            Ok(loaded) => loaded,
            Err(e) => {
                let error = format!("{e:#}");
                warn!(dir = %layout.dir.display(), %error, "store files unreadable, starting fresh");
                None
            }
        };

        if let Some(loaded) = loaded {
            let store = Self::from_loaded(layout, loaded.vector_length, loaded.chunks);
            if loaded.num_partitions != store.layout.num_partitions {
                info!(
                    from = loaded.num_partitions,
                    to = store.layout.num_partitions,
                    "partition count changed, rewriting store"
                );
                store.save().await?;
                remove_stale_files(&store.layout, loaded.num_partitions).await?;
            }
            return Ok(store);
        }

        let embedder = embedder.ok_or_else(|| {
            Error::StoreInit("no existing store and no embedding provider to size a new one".into())
        })?;
        let vector_length = detect_vector_length(embedder).await?;
        let store = Self::from_loaded(layout, vector_length, Vec::new());
        store.save().await?;
        info!(vector_length, dir = %store.layout.dir.display(), "created new store");
        Ok(store)
    }

    fn from_loaded(layout: StoreLayout, vector_length: usize, chunks: Vec<Chunk>) -> Self {
        let table = InMemoryStore::with_vector_length(vector_length);
        let mut dropped = 0usize;
        for chunk in chunks {
            if table.insert(chunk).is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!(count = dropped, "dropped chunks that do not fit the store schema");
        }
        Self {
            layout,
            table,
            upsert_lock: Mutex::new(()),
            save_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn num_partitions(&self) -> usize {
        self.layout.num_partitions
    }

    pub fn vector_length(&self) -> usize {
        self.table.vector_length().unwrap_or(0)
    }

    /// True when there are changes not yet saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Reset the store if `embedder` uses a different model than the stored
    /// chunks. Returns true when a reset happened.
    ///
    /// An empty store has no model to compare, so it is reset when the
    /// embedder's vector length differs from the schema.
    pub async fn check_and_handle_embedding_model_change(
        &self,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<bool> {
        let stored = self.table.sample_embedding_model().await?;
        let vector_length = match stored.as_deref() {
            Some(model) if model == embedder.model_name() => return Ok(false),
            Some(_) => detect_vector_length(embedder).await?,
            None => match detect_vector_length(embedder).await {
                Ok(len) if len != self.vector_length() => len,
                Ok(_) => return Ok(false),
                Err(e) => {
                    let error = format!("{e:#}");
                    debug!(%error, "could not detect vector length of empty store");
                    return Ok(false);
                }
            },
        };

        info!(
            from = stored.as_deref().unwrap_or("<empty>"),
            to = %embedder.model_name(),
            vector_length,
            "embedding model changed, resetting store"
        );
        let guard = self.upsert_lock.lock().await;
        self.table.clear();
        self.table.set_vector_length(Some(vector_length));
        self.dirty.store(true, Ordering::SeqCst);
        drop(guard);
        self.save().await?;
        Ok(true)
    }

    /// Remove every chunk and persist the empty store.
    pub async fn clear(&self) -> Result<()> {
        {
            let _guard = self.upsert_lock.lock().await;
            self.table.clear();
            self.dirty.store(true, Ordering::SeqCst);
        }
        self.save().await
    }

    /// Write the store to disk. Concurrent calls run one at a time.
    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        self.dirty.store(false, Ordering::SeqCst);
        if let Err(e) = self.write_snapshot().await {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }
        debug!(dir = %self.layout.dir.display(), "store saved");
        Ok(())
    }

    async fn write_snapshot(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.layout.dir)
            .await
            .with_context(|| format!("Failed to create store dir {}", self.layout.dir.display()))?;

        let mut chunks = self.table.all();
        chunks.sort_by(|a, b| a.path.cmp(&b.path).then(a.chunk_index.cmp(&b.chunk_index)));
        let now = chrono::Utc::now().timestamp_millis();
        let vector_length = self.vector_length();

        if self.layout.is_legacy() {
            let file = LegacyFile {
                vector_length,
                schema: SCHEMA_VERSION.to_string(),
                last_modified: now,
                chunks,
            };
            write_json_atomic(&self.layout.legacy_path(), &file).await?;
        } else {
            let n = self.layout.num_partitions;
            let mut partitions: Vec<Vec<Chunk>> = vec![Vec::new(); n];
            let mut document_partitions: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
            for chunk in chunks {
                let index = partition_for(&chunk.id, n);
                document_partitions
                    .entry(chunk.path.clone())
                    .or_default()
                    .insert(chunk.id.clone(), index);
                partitions[index].push(chunk);
            }
            for (index, partition) in partitions.iter().enumerate() {
                write_json_atomic(&self.layout.partition_path(index), partition).await?;
            }
            let manifest = Manifest {
                num_partitions: n,
                vector_length,
                schema: SCHEMA_VERSION.to_string(),
                last_modified: now,
                document_partitions,
            };
            write_json_atomic(&self.layout.manifest_path(), &manifest).await?;
        }
        Ok(())
    }

    /// Replace the in-memory table with what is on disk.
    pub async fn load(&self) -> Result<()> {
        let loaded = load(&self.layout)
            .await?
            .ok_or_else(|| Error::StoreInit(format!("no store at {}", self.layout.dir.display())))?;
        let _guard = self.upsert_lock.lock().await;
        self.table.set_vector_length(Some(loaded.vector_length));
        let chunks: Vec<Chunk> = loaded
            .chunks
            .into_iter()
            .filter(|c| c.embedding.len() == loaded.vector_length)
            .collect();
        self.table.replace_all(chunks)?;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Store for ChunkStore {
    async fn upsert(&self, chunk: Chunk) -> Result<Chunk> {
        let _guard = self.upsert_lock.lock().await;
        let previous = self.table.remove(&chunk.id);
        if let Err(e) = self.table.insert(chunk.clone()) {
            if let Some(old) = previous {
                if let Err(restore) = self.table.insert(old) {
                    warn!(id = %chunk.id, error = %restore, "could not restore chunk after failed upsert");
                }
            }
            return Err(Error::Upsert {
                id: chunk.id,
                reason: format!("{e:#}"),
            }
            .into());
        }
        self.dirty.store(true, Ordering::SeqCst);
        Ok(chunk)
    }

    async fn remove_by_path(&self, path: &str) -> Result<usize> {
        let removed = self.table.remove_by_path(path).await?;
        if removed > 0 {
            self.dirty.store(true, Ordering::SeqCst);
        }
        Ok(removed)
    }

    async fn retain_path_chunks(&self, path: &str, keep: &HashSet<String>) -> Result<usize> {
        let removed = self.table.retain_path_chunks(path, keep).await?;
        if removed > 0 {
            self.dirty.store(true, Ordering::SeqCst);
        }
        Ok(removed)
    }

    async fn find(&self, filter: &ChunkFilter) -> Result<Vec<Chunk>> {
        self.table.find(filter).await
    }

    async fn search(&self, query: &SearchQuery<'_>) -> Result<Vec<ChunkHit>> {
        self.table.search(query).await
    }

    async fn garbage_collect(&self, live_paths: &HashSet<String>) -> Result<usize> {
        let removed = self.table.garbage_collect(live_paths).await?;
        if removed > 0 {
            self.dirty.store(true, Ordering::SeqCst);
            info!(count = removed, "garbage collected chunks of deleted notes");
        }
        Ok(removed)
    }

    async fn indexed_mtimes(&self) -> Result<HashMap<String, i64>> {
        self.table.indexed_mtimes().await
    }

    async fn sample_embedding_model(&self) -> Result<Option<String>> {
        self.table.sample_embedding_model().await
    }

    async fn count(&self) -> Result<usize> {
        self.table.count().await
    }
}

async fn detect_vector_length(embedder: &dyn EmbeddingProvider) -> Result<usize> {
    let vector = embed_one(embedder, DIMENSION_PROBE)
        .await
        .map_err(|e| Error::StoreInit(format!("could not detect vector length: {e:#}")))?;
    Ok(vector.len())
}

async fn load(layout: &StoreLayout) -> Result<Option<Loaded>> {
    let manifest_path = layout.manifest_path();
    if tokio::fs::try_exists(&manifest_path).await? {
        let manifest: Manifest = read_json(&manifest_path).await?;
        let mut chunks = Vec::new();
        for index in 0..manifest.num_partitions {
            let path = layout.partition_path(index);
            if !tokio::fs::try_exists(&path).await? {
                warn!(path = %path.display(), "partition file missing");
                continue;
            }
            let partition: Vec<Chunk> = read_json(&path).await?;
            chunks.extend(partition);
        }
        return Ok(Some(Loaded {
            num_partitions: manifest.num_partitions,
            vector_length: manifest.vector_length,
            chunks,
        }));
    }

    let legacy_path = layout.legacy_path();
    if tokio::fs::try_exists(&legacy_path).await? {
        let file: LegacyFile = read_json(&legacy_path).await?;
        return Ok(Some(Loaded {
            num_partitions: 1,
            vector_length: file.vector_length,
            chunks: file.chunks,
        }));
    }

    Ok(None)
}

/// Delete files of the previous layout that the current one no longer uses.
async fn remove_stale_files(layout: &StoreLayout, previous_partitions: usize) -> Result<()> {
    let mut stale = Vec::new();
    if layout.is_legacy() {
        stale.push(layout.manifest_path());
        stale.extend((0..previous_partitions).map(|i| layout.partition_path(i)));
    } else {
        stale.push(layout.legacy_path());
        stale.extend((layout.num_partitions..previous_partitions).map(|i| layout.partition_path(i)));
    }
    for path in stale {
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vault_search_core::testing::{make_chunk, HashEmbedder};

    fn layout(dir: &Path, n: usize) -> StoreLayout {
        StoreLayout {
            dir: dir.to_path_buf(),
            prefix: "test".into(),
            num_partitions: n,
        }
    }

    fn chunk(embedder: &HashEmbedder, path: &str, body: &str) -> Chunk {
        make_chunk(path, body, embedder.vector(body), embedder.model_name())
    }

    #[tokio::test]
    async fn test_new_store_requires_embedder() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChunkStore::initialize(layout(dir.path(), 4), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::StoreInit(_))));
    }

    #[tokio::test]
    async fn test_new_store_detects_vector_length() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashEmbedder::new("hash-a", 16);
        let store = ChunkStore::initialize(layout(dir.path(), 4), Some(&embedder))
            .await
            .unwrap();
        assert_eq!(store.vector_length(), 16);
        assert!(store.layout().manifest_path().exists());
        assert!(store.layout().partition_path(3).exists());
    }

    #[tokio::test]
    async fn test_save_and_reload_places_chunks_by_partition() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashEmbedder::new("hash-a", 8);
        let store = ChunkStore::initialize(layout(dir.path(), 3), Some(&embedder))
            .await
            .unwrap();
        for i in 0..12 {
            store
                .upsert(chunk(&embedder, &format!("n{i}.md"), &format!("note {i}")))
                .await
                .unwrap();
        }
        assert!(store.is_dirty());
        store.save().await.unwrap();
        assert!(!store.is_dirty());

        for index in 0..3 {
            let bytes = std::fs::read(store.layout().partition_path(index)).unwrap();
            let chunks: Vec<Chunk> = serde_json::from_slice(&bytes).unwrap();
            for c in chunks {
                assert_eq!(partition_for(&c.id, 3), index);
            }
        }

        let reopened = ChunkStore::initialize(layout(dir.path(), 3), None).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 12);
        assert_eq!(reopened.vector_length(), 8);
    }

    #[tokio::test]
    async fn test_legacy_layout_is_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashEmbedder::new("hash-a", 8);
        let store = ChunkStore::initialize(layout(dir.path(), 1), Some(&embedder))
            .await
            .unwrap();
        store.upsert(chunk(&embedder, "a.md", "alpha")).await.unwrap();
        store.save().await.unwrap();

        assert!(dir.path().join("test.json").exists());
        assert!(!dir.path().join("test-metadata.json").exists());

        let reopened = ChunkStore::initialize(layout(dir.path(), 1), None).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_manifest_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test-metadata.json"), "{ not json").unwrap();
        let embedder = HashEmbedder::new("hash-a", 8);
        let store = ChunkStore::initialize(layout(dir.path(), 2), Some(&embedder))
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("test-metadata.json")).unwrap())
                .unwrap();
        assert_eq!(manifest["numPartitions"], 2);
        assert_eq!(manifest["vectorLength"], 8);
    }

    #[tokio::test]
    async fn test_model_change_resets_vector_length() {
        let dir = tempfile::tempdir().unwrap();
        let model_a = HashEmbedder::new("model-a", 8);
        let store = ChunkStore::initialize(layout(dir.path(), 2), Some(&model_a))
            .await
            .unwrap();
        store.upsert(chunk(&model_a, "a.md", "alpha")).await.unwrap();

        assert!(!store
            .check_and_handle_embedding_model_change(&model_a)
            .await
            .unwrap());

        let model_b = HashEmbedder::new("model-b", 4);
        assert!(store
            .check_and_handle_embedding_model_change(&model_b)
            .await
            .unwrap());
        assert_eq!(store.vector_length(), 4);
        assert_eq!(store.count().await.unwrap(), 0);

        let reopened = ChunkStore::initialize(layout(dir.path(), 2), None).await.unwrap();
        assert_eq!(reopened.vector_length(), 4);
    }

    #[tokio::test]
    async fn test_model_change_detected_on_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let model_a = HashEmbedder::new("model-a", 8);
        let store = ChunkStore::initialize(layout(dir.path(), 2), Some(&model_a))
            .await
            .unwrap();
        assert!(!store
            .check_and_handle_embedding_model_change(&model_a)
            .await
            .unwrap());

        let model_b = HashEmbedder::new("model-b", 4);
        assert!(store
            .check_and_handle_embedding_model_change(&model_b)
            .await
            .unwrap());
        assert_eq!(store.vector_length(), 4);
        store.upsert(chunk(&model_b, "a.md", "alpha")).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashEmbedder::new("hash-a", 8);
        let store = Arc::new(
            ChunkStore::initialize(layout(dir.path(), 3), Some(&embedder))
                .await
                .unwrap(),
        );
        for i in 0..200 {
            store
                .upsert(chunk(&embedder, &format!("n{i}.md"), &format!("note {i}")))
                .await
                .unwrap();
        }

        let mut tasks = Vec::new();
        for _ in 0..2 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.save().await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let reopened = ChunkStore::initialize(layout(dir.path(), 3), None).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_failed_upsert_restores_previous() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashEmbedder::new("hash-a", 8);
        let store = ChunkStore::initialize(layout(dir.path(), 2), Some(&embedder))
            .await
            .unwrap();
        let good = chunk(&embedder, "a.md", "alpha");
        store.upsert(good.clone()).await.unwrap();

        let mut bad = good.clone();
        bad.embedding = vec![1.0; 3];
        let err = store.upsert(bad).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Upsert { .. })));

        let found = store.find(&ChunkFilter::Path("a.md".into())).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].embedding.len(), 8);
    }

    #[tokio::test]
    async fn test_repartition_rewrites_everything() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashEmbedder::new("hash-a", 8);
        let store = ChunkStore::initialize(layout(dir.path(), 1), Some(&embedder))
            .await
            .unwrap();
        for i in 0..6 {
            store
                .upsert(chunk(&embedder, &format!("n{i}.md"), &format!("body {i}")))
                .await
                .unwrap();
        }
        store.save().await.unwrap();

        let resharded = ChunkStore::initialize(layout(dir.path(), 3), None).await.unwrap();
        assert_eq!(resharded.count().await.unwrap(), 6);
        assert!(!dir.path().join("test.json").exists());
        assert!(dir.path().join("test-chunk-2.json").exists());
    }

    #[tokio::test]
    async fn test_clear_persists_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashEmbedder::new("hash-a", 8);
        let store = ChunkStore::initialize(layout(dir.path(), 2), Some(&embedder))
            .await
            .unwrap();
        store.upsert(chunk(&embedder, "a.md", "alpha")).await.unwrap();
        store.save().await.unwrap();
        store.clear().await.unwrap();

        store.load().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.vector_length(), 8);
    }
}
