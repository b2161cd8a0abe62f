//! Backend selection: local partitioned store, legacy single-file store, or
//! the remote hybrid-search service.
//!
//! The remote backend is chosen only when it is enabled and a self-host
//! validation was recorded within the last [`SELF_HOST_GRACE_DAYS`] days.
//! If the chosen backend cannot be built, the local one is used instead.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use vault_search_core::embedding::EmbeddingProvider;
use vault_search_core::query::QueryRewriter;
use vault_search_core::rerank::RerankProvider;

use crate::config::{BackendConfig, Config, RemoteConfig};
use crate::embedding::create_provider;
use crate::indexing::{IndexingPipeline, IndexingSettings};
use crate::links::WikiLinkGraph;
use crate::progress::{NoProgress, ProgressReporter};
use crate::remote::{RemoteRetriever, RemoteSearchClient};
use crate::rerank::HttpRerankProvider;
use crate::retriever::{HybridRetriever, Retriever};
use crate::rewrite::ChatQueryRewriter;
use crate::store::{ChunkStore, StoreLayout};
use crate::vault::Vault;

pub const SELF_HOST_GRACE_DAYS: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Legacy,
    Remote,
}

/// True when a self-host validation is recorded and not older than the
/// grace period.
pub fn self_host_valid(remote: &RemoteConfig, now: DateTime<Utc>) -> bool {
    remote
        .self_host_validated_at
        .is_some_and(|at| now - at <= Duration::days(SELF_HOST_GRACE_DAYS))
}

/// Mark the self-hosted remote service as validated at `now`.
pub fn record_validation(remote: &mut RemoteConfig, now: DateTime<Utc>) {
    remote.self_host_validated_at = Some(now);
}

/// The backend `config` asks for at `now`.
pub fn desired_backend(config: &BackendConfig, now: DateTime<Utc>) -> BackendKind {
    if config.remote.enabled && self_host_valid(&config.remote, now) {
        BackendKind::Remote
    } else if config.use_legacy_store {
        BackendKind::Legacy
    } else {
        BackendKind::Local
    }
}

/// A constructed backend. Local kinds carry their store and pipeline.
pub struct ActiveBackend {
    pub kind: BackendKind,
    pub retriever: Arc<dyn Retriever>,
    pub store: Option<Arc<ChunkStore>>,
    pub pipeline: Option<Arc<IndexingPipeline>>,
}

pub struct BackendSelector {
    vault: Arc<dyn Vault>,
    embedder: Arc<dyn EmbeddingProvider>,
    rewriter: Option<Arc<dyn QueryRewriter>>,
    reranker: Option<Arc<dyn RerankProvider>>,
    progress: Arc<dyn ProgressReporter>,
    links: Option<Arc<WikiLinkGraph>>,
    active: Mutex<Option<Arc<ActiveBackend>>>,
}

impl BackendSelector {
    pub fn new(vault: Arc<dyn Vault>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            vault,
            embedder,
            rewriter: None,
            reranker: None,
            progress: Arc::new(NoProgress),
            links: None,
            active: Mutex::new(None),
        }
    }

    /// Build providers from `config`. API keys come from the environment.
    pub fn from_config(config: &Config, vault: Arc<dyn Vault>) -> Result<Self> {
        let mut selector = Self::new(vault, create_provider(&config.embedding)?);
        if config.rewrite.enabled {
            selector.rewriter = Some(Arc::new(ChatQueryRewriter::from_env(&config.rewrite)?));
        }
        if config.rerank.enabled {
            selector.reranker = Some(Arc::new(HttpRerankProvider::from_env(&config.rerank)?));
        }
        Ok(selector)
    }

    pub fn with_rewriter(mut self, rewriter: Arc<dyn QueryRewriter>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn RerankProvider>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_link_graph(mut self, links: Arc<WikiLinkGraph>) -> Self {
        self.links = Some(links);
        self
    }

    /// The backend currently in use, if one was built.
    pub async fn current(&self) -> Option<Arc<ActiveBackend>> {
        self.active.lock().await.clone()
    }

    /// Return the backend `config` asks for, building it if the kind
    /// changed. A kind change cancels any indexing run on the old backend.
    pub async fn get_active_retriever(&self, config: &Config) -> Result<Arc<ActiveBackend>> {
        let wanted = desired_backend(&config.backend, Utc::now());
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref().filter(|c| c.kind == wanted) {
            return Ok(current.clone());
        }

        let built = match self.build(wanted, config).await {
            Ok(built) => built,
            Err(e) if wanted != BackendKind::Local => {
                let error = format!("{e:#}");
                warn!(?wanted, %error, "backend construction failed, falling back to local");
                if let Some(current) = active.as_ref().filter(|c| c.kind == BackendKind::Local) {
                    return Ok(current.clone());
                }
                self.build(BackendKind::Local, config).await?
            }
            Err(e) => return Err(e),
        };

        if let Some(old) = active.take() {
            if let Some(pipeline) = &old.pipeline {
                pipeline.cancel();
            }
            info!(from = ?old.kind, to = ?built.kind, "backend switched");
        } else {
            info!(kind = ?built.kind, "backend initialized");
        }
        let built = Arc::new(built);
        *active = Some(built.clone());
        Ok(built)
    }

    async fn build(&self, kind: BackendKind, config: &Config) -> Result<ActiveBackend> {
        let layout = match kind {
            BackendKind::Remote => {
                let client = RemoteSearchClient::new(&config.backend.remote)?;
                return Ok(ActiveBackend {
                    kind,
                    retriever: Arc::new(RemoteRetriever::new(client)),
                    store: None,
                    pipeline: None,
                });
            }
            BackendKind::Legacy => StoreLayout::legacy(&config.store),
            BackendKind::Local => StoreLayout::partitioned(&config.store),
        };

        let store = Arc::new(ChunkStore::initialize(layout, Some(self.embedder.as_ref())).await?);
        let mut pipeline = IndexingPipeline::new(
            store.clone(),
            self.vault.clone(),
            self.embedder.clone(),
            IndexingSettings::from_config(&config.indexing)?,
        )
        .with_progress(self.progress.clone());
        if let Some(links) = &self.links {
            pipeline = pipeline.with_link_graph(links.clone());
        }

        let mut retriever = HybridRetriever::new(store.clone(), self.embedder.clone());
        if let Some(rewriter) = &self.rewriter {
            retriever = retriever.with_rewriter(rewriter.clone());
        }
        if let Some(reranker) = &self.reranker {
            retriever = retriever.with_reranker(reranker.clone());
        }

        Ok(ActiveBackend {
            kind,
            retriever: Arc::new(retriever),
            store: Some(store),
            pipeline: Some(Arc::new(pipeline)),
        })
    }
}
