//! TOML configuration.
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration that indexes `**/*.md` into `.vault-search/` with
//! embeddings disabled.
//!
//! ```toml
//! [store]
//! dir = ".vault-search"
//! num_partitions = 4
//!
//! [indexing]
//! include_globs = ["**/*.md"]
//! exclude_globs = ["templates/**"]
//! embedding_requests_per_second = 5.0
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//!
//! [retrieval]
//! min_similarity_score = 0.1
//! max_k = 10
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::Error;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub rewrite: RewriteConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_num_partitions")]
    pub num_partitions: usize,
    /// File prefix of the single-file legacy store.
    #[serde(default = "default_legacy_prefix")]
    pub legacy_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
            prefix: default_prefix(),
            num_partitions: default_num_partitions(),
            legacy_prefix: default_legacy_prefix(),
        }
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".vault-search")
}
fn default_prefix() -> String {
    "vault-search".to_string()
}
fn default_num_partitions() -> usize {
    4
}
fn default_legacy_prefix() -> String {
    "vault-search-legacy".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Persist the store after this many indexed files.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
    #[serde(default = "default_requests_per_second")]
    pub embedding_requests_per_second: f64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            checkpoint_interval: default_checkpoint_interval(),
            embedding_requests_per_second: default_requests_per_second(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}
fn default_chunk_size() -> usize {
    vault_search_core::chunk::DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    vault_search_core::chunk::DEFAULT_CHUNK_OVERLAP
}
fn default_checkpoint_interval() -> usize {
    200
}
fn default_requests_per_second() -> f64 {
    10.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_openai_base")]
    pub api_base: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_base: default_openai_base(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_base: String,
    #[serde(default = "default_rerank_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: String::new(),
            model: default_rerank_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_rerank_model() -> String {
    "rerank-2".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RewriteConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_openai_base")]
    pub api_base: String,
    #[serde(default = "default_rewrite_model")]
    pub model: String,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: default_openai_base(),
            model: default_rewrite_model(),
        }
    }
}

fn default_rewrite_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_min_similarity")]
    pub min_similarity_score: f64,
    #[serde(default = "default_max_k")]
    pub max_k: usize,
    #[serde(default)]
    pub text_weight: Option<f64>,
    #[serde(default)]
    pub reranker_threshold: Option<f64>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_similarity_score: default_min_similarity(),
            max_k: default_max_k(),
            text_weight: None,
            reranker_threshold: None,
        }
    }
}

fn default_min_similarity() -> f64 {
    0.1
}
fn default_max_k() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub use_legacy_store: bool,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_source_id")]
    pub source_id: String,
    /// Last successful self-host validation.
    #[serde(default)]
    pub self_host_validated_at: Option<DateTime<Utc>>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_token: None,
            timeout_secs: default_timeout_secs(),
            source_id: default_source_id(),
            self_host_validated_at: None,
        }
    }
}

fn default_source_id() -> String {
    "vault".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    Error::Config(message.into()).into()
}

pub fn validate(config: &Config) -> Result<()> {
    if config.store.num_partitions == 0 {
        return Err(invalid("store.num_partitions must be >= 1"));
    }
    if config.store.prefix.is_empty() {
        return Err(invalid("store.prefix must not be empty"));
    }

    let indexing = &config.indexing;
    if indexing.chunk_size == 0 {
        return Err(invalid("indexing.chunk_size must be > 0"));
    }
    if indexing.chunk_overlap >= indexing.chunk_size {
        return Err(invalid("indexing.chunk_overlap must be < indexing.chunk_size"));
    }
    if indexing.checkpoint_interval == 0 {
        return Err(invalid("indexing.checkpoint_interval must be >= 1"));
    }
    let rps = indexing.embedding_requests_per_second;
    if !rps.is_finite() || rps <= 0.0 {
        return Err(invalid("indexing.embedding_requests_per_second must be > 0"));
    }

    if config.retrieval.max_k == 0 {
        return Err(invalid("retrieval.max_k must be >= 1"));
    }
    if let Some(w) = config.retrieval.text_weight {
        if !(0.0..=1.0).contains(&w) {
            return Err(invalid("retrieval.text_weight must be in [0.0, 1.0]"));
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                return Err(invalid(format!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                )));
            }
        }
        other => {
            return Err(invalid(format!(
                "Unknown embedding provider: '{}'. Must be disabled or openai.",
                other
            )))
        }
    }

    if config.rerank.enabled && config.rerank.api_base.is_empty() {
        return Err(invalid("rerank.api_base must be set when rerank is enabled"));
    }
    if config.backend.remote.enabled && config.backend.remote.base_url.is_empty() {
        return Err(invalid("backend.remote.base_url must be set when the remote backend is enabled"));
    }

    Ok(())
}
