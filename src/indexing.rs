//! Vault indexing pipeline.
//!
//! # Run
//!
//! 1. Reset the store if the embedding model changed (forces a full run).
//! 2. List vault files matching the include/exclude globs.
//! 3. Full run: clear the store and index every file. Incremental run:
//!    garbage-collect chunks of deleted notes, then index files that were
//!    never indexed or whose mtime is newer than their indexed mtime.
//! 4. Per file: chunk, embed every chunk under the rate limiter, then
//!    upsert and prune chunks the new version no longer produces. A file
//!    whose embedding fails writes nothing.
//! 5. Save every `checkpoint_interval` files and once at the end.
//!
//! Pause and cancel are cooperative: flags are polled between files and
//! between embedding calls. A rate-limit error ends the run early; other
//! per-file errors are collected and the run continues.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use vault_search_core::chunk::{chunk_note, ChunkParams, NoteSource};
use vault_search_core::embedding::{validate_vectors, EmbeddingProvider};
use vault_search_core::store::Store;

use crate::config::IndexingConfig;
use crate::error::{is_rate_limit, Error};
use crate::links::WikiLinkGraph;
use crate::progress::{IndexingProgressEvent, NoProgress, ProgressReporter};
use crate::rate_limit::RateLimiter;
use crate::store::ChunkStore;
use crate::vault::{FileFilter, Vault, VaultFile};

const PAUSE_POLL: Duration = Duration::from_millis(100);

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    /// Stopped early because the embedding provider throttled us.
    RateLimited,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileError {
    pub path: String,
    pub message: String,
}

/// Snapshot of the current (or last) run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingState {
    pub run_id: Option<String>,
    pub phase: RunPhase,
    pub is_paused: bool,
    pub is_cancelled: bool,
    pub indexed_count: usize,
    pub total_files_to_index: usize,
    pub errors: Vec<FileError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub indexed: usize,
    pub total: usize,
    pub removed_chunks: usize,
    pub model_changed: bool,
    pub errors: Vec<FileError>,
}

/// Host file-system notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Modified(String),
    Deleted(String),
}

/// Tunables that [`IndexingPipeline::reconfigure`] can swap at runtime.
#[derive(Debug, Clone)]
pub struct IndexingSettings {
    pub chunk: ChunkParams,
    pub filter: FileFilter,
    pub checkpoint_interval: usize,
    pub requests_per_second: f64,
}

impl IndexingSettings {
    pub fn from_config(config: &IndexingConfig) -> Result<Self> {
        Ok(Self {
            chunk: ChunkParams {
                chunk_size: config.chunk_size,
                chunk_overlap: config.chunk_overlap,
            },
            filter: FileFilter::new(&config.include_globs, &config.exclude_globs)?,
            checkpoint_interval: config.checkpoint_interval.max(1),
            requests_per_second: config.embedding_requests_per_second,
        })
    }
}

/// Pause/cancel handle shared with hosts.
#[derive(Debug, Clone, Default)]
pub struct IndexingControl {
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl IndexingControl {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Stop the run before the next file or embedding call.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Clears the running flag when a run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct IndexingPipeline {
    store: Arc<ChunkStore>,
    vault: Arc<dyn Vault>,
    embedder: Arc<dyn EmbeddingProvider>,
    progress: Arc<dyn ProgressReporter>,
    links: Option<Arc<WikiLinkGraph>>,
    settings: RwLock<Arc<IndexingSettings>>,
    limiter: RwLock<Arc<RateLimiter>>,
    control: IndexingControl,
    running: AtomicBool,
    state: Mutex<IndexingState>,
}

impl IndexingPipeline {
    pub fn new(
        store: Arc<ChunkStore>,
        vault: Arc<dyn Vault>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: IndexingSettings,
    ) -> Self {
        let limiter = RateLimiter::new(settings.requests_per_second);
        Self {
            store,
            vault,
            embedder,
            progress: Arc::new(NoProgress),
            links: None,
            settings: RwLock::new(Arc::new(settings)),
            limiter: RwLock::new(Arc::new(limiter)),
            control: IndexingControl::default(),
            running: AtomicBool::new(false),
            state: Mutex::new(IndexingState::default()),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Keep `links` in sync with indexed notes.
    pub fn with_link_graph(mut self, links: Arc<WikiLinkGraph>) -> Self {
        self.links = Some(links);
        self
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    pub fn control(&self) -> IndexingControl {
        self.control.clone()
    }

    pub fn pause(&self) {
        self.control.pause();
        self.update_state(|s| {
            if s.phase == RunPhase::Running {
                s.phase = RunPhase::Paused;
            }
        });
    }

    pub fn resume(&self) {
        self.control.resume();
        self.update_state(|s| {
            if s.phase == RunPhase::Paused {
                s.phase = RunPhase::Running;
            }
        });
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> IndexingState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner).clone();
        state.is_paused = self.control.is_paused();
        state.is_cancelled = self.control.is_cancelled();
        if state.phase == RunPhase::Running && state.is_paused {
            state.phase = RunPhase::Paused;
        }
        state
    }

    /// Swap chunking, filtering and checkpoint settings and re-create the
    /// rate limiter. Takes effect for the next file.
    pub fn reconfigure(&self, settings: IndexingSettings) {
        let limiter = Arc::new(RateLimiter::new(settings.requests_per_second));
        info!(
            requests_per_second = settings.requests_per_second,
            chunk_size = settings.chunk.chunk_size,
            "indexing reconfigured"
        );
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(settings);
        *self.limiter.write().unwrap_or_else(PoisonError::into_inner) = limiter;
    }

    fn settings(&self) -> Arc<IndexingSettings> {
        self.settings.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn limiter(&self) -> Arc<RateLimiter> {
        self.limiter.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn update_state(&self, f: impl FnOnce(&mut IndexingState)) {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Index the vault. See the module docs for the algorithm.
    pub async fn index_vault(&self, overwrite: bool) -> Result<IndexingReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::IndexingInProgress.into());
        }
        let _running = RunningGuard(&self.running);

        self.control.reset();
        let run_id = uuid::Uuid::new_v4().to_string();
        self.update_state(|s| {
            *s = IndexingState {
                run_id: Some(run_id.clone()),
                phase: RunPhase::Running,
                ..IndexingState::default()
            };
        });
        info!(%run_id, overwrite, "indexing run started");

        match self.run(&run_id, overwrite).await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.update_state(|s| s.phase = RunPhase::Failed);
                let state = self.state();
                self.progress.report(IndexingProgressEvent::Finished {
                    run_id: run_id.clone(),
                    outcome: RunOutcome::Failed,
                    indexed: state.indexed_count,
                    failed: state.errors.len(),
                });
                let error = format!("{e:#}");
                warn!(%run_id, %error, "indexing run failed");
                Err(e)
            }
        }
    }

    async fn run(&self, run_id: &str, overwrite: bool) -> Result<IndexingReport> {
        self.progress.report(IndexingProgressEvent::Discovering {
            run_id: run_id.to_string(),
        });

        let model_changed = self
            .store
            .check_and_handle_embedding_model_change(self.embedder.as_ref())
            .await?;
        let overwrite = overwrite || model_changed;

        let settings = self.settings();
        let files: Vec<VaultFile> = self
            .vault
            .list_files()
            .await
            .context("Failed to list vault files")?
            .into_iter()
            .filter(|f| settings.filter.matches(&f.path))
            .collect();

        let (to_index, removed_chunks): (Vec<VaultFile>, usize) = if overwrite {
            let removed = self.store.count().await?;
            self.store.clear().await?;
            (files, removed)
        } else {
            let live: HashSet<String> = files.iter().map(|f| f.path.clone()).collect();
            let removed = self.store.garbage_collect(&live).await?;
            let indexed = self.store.indexed_mtimes().await?;
            let changed = files
                .into_iter()
                .filter(|f| indexed.get(&f.path).map_or(true, |m| f.mtime > *m))
                .collect();
            (changed, removed)
        };

        let total = to_index.len();
        self.update_state(|s| s.total_files_to_index = total);
        self.progress.report(IndexingProgressEvent::Discovered {
            run_id: run_id.to_string(),
            total,
        });
        debug!(%run_id, total, removed_chunks, "file set resolved");

        let mut outcome = RunOutcome::Completed;
        let mut indexed = 0usize;
        let mut errors: Vec<FileError> = Vec::new();

        for (i, file) in to_index.iter().enumerate() {
            if !self.wait_while_paused().await {
                outcome = RunOutcome::Cancelled;
                break;
            }

            match self.index_file_checked(file, true).await {
                Ok(Some(chunks)) => {
                    indexed += 1;
                    self.update_state(|s| s.indexed_count = indexed);
                    self.progress.report(IndexingProgressEvent::FileIndexed {
                        run_id: run_id.to_string(),
                        path: file.path.clone(),
                        chunks,
                        n: indexed,
                        total,
                    });
                }
                Ok(None) => {
                    outcome = RunOutcome::Cancelled;
                    break;
                }
                Err(e) => {
                    let error = FileError {
                        path: file.path.clone(),
                        message: format!("{e:#}"),
                    };
                    self.progress.report(IndexingProgressEvent::FileFailed {
                        run_id: run_id.to_string(),
                        path: error.path.clone(),
                        error: error.message.clone(),
                    });
                    errors.push(error.clone());
                    self.update_state(|s| s.errors.push(error));
                    if is_rate_limit(&e) {
                        warn!(%run_id, path = %file.path, "rate limited, stopping run");
                        outcome = RunOutcome::RateLimited;
                        break;
                    }
                }
            }

            if (i + 1) % settings.checkpoint_interval == 0 && i + 1 < total {
                self.store.save().await?;
                self.progress.report(IndexingProgressEvent::Checkpoint {
                    run_id: run_id.to_string(),
                    n: i + 1,
                });
            }
        }

        self.store.save().await?;

        if !errors.is_empty() {
            let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
            warn!(%run_id, count = errors.len(), ?paths, "some files failed to index");
        }

        let phase = match outcome {
            RunOutcome::Completed => RunPhase::Completed,
            RunOutcome::Cancelled => RunPhase::Cancelled,
            RunOutcome::RateLimited | RunOutcome::Failed => RunPhase::Failed,
        };
        self.update_state(|s| s.phase = phase);
        self.progress.report(IndexingProgressEvent::Finished {
            run_id: run_id.to_string(),
            outcome,
            indexed,
            failed: errors.len(),
        });
        info!(%run_id, ?outcome, indexed, total, "indexing run finished");

        Ok(IndexingReport {
            run_id: run_id.to_string(),
            outcome,
            indexed,
            total,
            removed_chunks,
            model_changed,
            errors,
        })
    }

    /// Index one file immediately, ignoring pause and cancel.
    pub async fn index_file(&self, file: &VaultFile) -> Result<usize> {
        Ok(self.index_file_checked(file, false).await?.unwrap_or(0))
    }

    /// Returns `None` when cancelled before anything was written.
    async fn index_file_checked(&self, file: &VaultFile, cancellable: bool) -> Result<Option<usize>> {
        let settings = self.settings();
        let content = self.vault.read_file(&file.path).await?;
        let note = NoteSource {
            path: &file.path,
            content: &content,
            ctime: file.ctime,
            mtime: file.mtime,
            indexed_at: chrono::Utc::now().timestamp_millis(),
        };
        let mut chunks = chunk_note(&note, &settings.chunk);

        let model = self.embedder.model_name().to_string();
        for chunk in chunks.iter_mut() {
            if cancellable && !self.wait_while_paused().await {
                return Ok(None);
            }
            self.limiter().acquire().await;
            let vectors = self
                .embedder
                .embed(std::slice::from_ref(&chunk.content))
                .await
                .with_context(|| format!("embedding chunk {} of {}", chunk.chunk_index, file.path))?;
            validate_vectors(&vectors, 1).map_err(|e| Error::Embedding(e.to_string()))?;
            chunk.embedding = vectors.into_iter().next().unwrap_or_default();
            chunk.embedding_model = model.clone();
        }

        let count = chunks.len();
        let mut keep: HashSet<String> = HashSet::with_capacity(count);
        for chunk in chunks {
            keep.insert(chunk.id.clone());
            self.store.upsert(chunk).await?;
        }
        let pruned = self.store.retain_path_chunks(&file.path, &keep).await?;
        if let Some(links) = &self.links {
            links.update_note(&file.path, &content);
        }
        debug!(path = %file.path, chunks = count, pruned, "file indexed");
        Ok(Some(count))
    }

    /// React to a host file event and persist the result.
    pub async fn handle_event(&self, event: FileEvent) -> Result<()> {
        let settings = self.settings();
        match event {
            FileEvent::Modified(path) => {
                if !settings.filter.matches(&path) {
                    return Ok(());
                }
                match self.vault.stat(&path).await? {
                    Some(file) => {
                        self.index_file(&file).await?;
                    }
                    None => self.remove_note(&path).await?,
                }
            }
            FileEvent::Deleted(path) => self.remove_note(&path).await?,
        }
        self.store.save().await
    }

    async fn remove_note(&self, path: &str) -> Result<()> {
        let removed = self.store.remove_by_path(path).await?;
        if let Some(links) = &self.links {
            links.remove_note(path);
        }
        debug!(%path, removed, "note removed from index");
        Ok(())
    }

    /// Block while paused. Returns false once cancelled.
    async fn wait_while_paused(&self) -> bool {
        loop {
            if self.control.is_cancelled() {
                return false;
            }
            if !self.control.is_paused() {
                return true;
            }
            tokio::time::sleep(PAUSE_POLL).await;
        }
    }
}
