//! Client for a remote hybrid-search service.
//!
//! The service owns chunking, embedding and storage; this side only sends
//! notes to `/ingest` and queries `/search`.
//!
//! | Endpoint | Request | Response |
//! |----------|---------|----------|
//! | `POST /search` | `{query, limit, filters}` | `{results}` |
//! | `POST /ingest` | `{file, force, source_id}` | `{status, action, chunks_created}` |
//! | `POST /delete` | `{file_path}` \| `{file_paths}` \| `{filter}` | `{deleted_chunks}` |
//! | `GET /files` | `source_id, search, offset, limit` | `{files, has_more}` |
//! | `GET /health` | | `{status, qdrant}` |

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vault_search_core::chunk::note_title;
use vault_search_core::models::{RankedDocument, ResultSource, RetrieverOptions};

use crate::config::RemoteConfig;
use crate::error::Error;
use crate::retriever::{result_cap, CancelFlag, Retriever};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchFilter {
    pub field: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
    filters: &'a [SearchFilter],
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteSearchResult {
    #[serde(alias = "path")]
    pub file_path: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(alias = "text")]
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub chunk_id: Option<String>,
    #[serde(default)]
    pub mtime: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RemoteSearchResult>,
}

/// A note as sent to `/ingest`.
#[derive(Debug, Clone, Serialize)]
pub struct IngestFile {
    pub path: String,
    pub content: String,
    pub ctime: i64,
    pub mtime: i64,
}

#[derive(Debug, Serialize)]
struct IngestRequest<'a> {
    file: &'a IngestFile,
    force: bool,
    source_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub chunks_created: usize,
}

/// What `/delete` should remove.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DeleteTarget {
    FilePath { file_path: String },
    FilePaths { file_paths: Vec<String> },
    Filter { filter: serde_json::Value },
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    deleted_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteFile {
    #[serde(alias = "path")]
    pub file_path: String,
    #[serde(default)]
    pub chunks: Option<usize>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FilePage {
    #[serde(default)]
    pub files: Vec<RemoteFile>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub qdrant: serde_json::Value,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.as_str(), "ok" | "healthy")
    }
}

pub struct RemoteSearchClient {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    source_id: String,
    timeout_secs: u64,
}

impl RemoteSearchClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(Error::Config("backend.remote.base_url is empty".into()).into());
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            source_id: config.source_id.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    fn request(&self, method: reqwest::Method, endpoint: &str) -> reqwest::RequestBuilder {
        let req = self.client.request(method, format!("{}{endpoint}", self.base_url));
        match &self.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow::Error::from(Error::Timeout(self.timeout_secs))
            } else {
                anyhow::Error::from(e)
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteApi {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        Ok(response.json().await?)
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &[SearchFilter],
    ) -> Result<Vec<RemoteSearchResult>> {
        let body = SearchRequest {
            query,
            limit,
            filters,
        };
        let response: SearchResponse = self
            .send(self.request(reqwest::Method::POST, "/search").json(&body))
            .await?;
        debug!(results = response.results.len(), "remote search done");
        Ok(response.results)
    }

    pub async fn ingest(&self, file: &IngestFile, force: bool) -> Result<IngestResponse> {
        let body = IngestRequest {
            file,
            force,
            source_id: &self.source_id,
        };
        self.send(self.request(reqwest::Method::POST, "/ingest").json(&body))
            .await
    }

    /// Returns the number of deleted chunks.
    pub async fn delete(&self, target: &DeleteTarget) -> Result<usize> {
        let response: DeleteResponse = self
            .send(self.request(reqwest::Method::POST, "/delete").json(target))
            .await?;
        Ok(response.deleted_chunks)
    }

    pub async fn list_files(
        &self,
        search: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<FilePage> {
        let mut query: Vec<(&str, String)> = vec![
            ("source_id", self.source_id.clone()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(search) = search {
            query.push(("search", search.to_string()));
        }
        self.send(self.request(reqwest::Method::GET, "/files").query(&query))
            .await
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        self.send(self.request(reqwest::Method::GET, "/health")).await
    }
}

/// [`Retriever`] backed by the remote service.
pub struct RemoteRetriever {
    client: RemoteSearchClient,
}

impl RemoteRetriever {
    pub fn new(client: RemoteSearchClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RemoteSearchClient {
        &self.client
    }

    async fn try_retrieve(
        &self,
        query: &str,
        options: &RetrieverOptions,
        cancel: &CancelFlag,
    ) -> Result<Vec<RankedDocument>> {
        let cap = result_cap(options);
        let filters = [SearchFilter {
            field: "source_id".into(),
            value: self.client.source_id().into(),
        }];
        let results = cancel
            .guard(self.client.search(query, cap, &filters))
            .await?;
        let mut docs: Vec<RankedDocument> = results
            .into_iter()
            .filter(|r| r.score.is_nan() || r.score >= options.min_similarity_score)
            .map(into_document)
            .collect();
        docs.truncate(cap);
        Ok(docs)
    }
}

fn into_document(result: RemoteSearchResult) -> RankedDocument {
    let title = result
        .title
        .unwrap_or_else(|| note_title(&result.file_path));
    RankedDocument {
        path: result.file_path,
        title,
        content: result.content,
        score: result.score,
        rerank_score: None,
        original_score: None,
        include_in_context: true,
        source: ResultSource::Remote,
        chunk_id: result.chunk_id,
        mtime: result.mtime.unwrap_or(0),
    }
}

#[async_trait]
impl Retriever for RemoteRetriever {
    async fn retrieve(
        &self,
        query: &str,
        options: &RetrieverOptions,
        cancel: &CancelFlag,
    ) -> Vec<RankedDocument> {
        match self.try_retrieve(query, options, cancel).await {
            Ok(docs) => docs,
            Err(e) if matches!(e.downcast_ref::<Error>(), Some(Error::Cancelled)) => Vec::new(),
            Err(e) => {
                let error = format!("{e:#}");
                warn!(%error, "remote retrieval failed");
                Vec::new()
            }
        }
    }
}
