//! HTTP cross-encoder rerank provider.
//!
//! Posts `{model, query, documents}` to `{api_base}/rerank` and accepts
//! either a `results` or a `data` array of `{index, relevance_score}` (or
//! `score`) entries, which covers Cohere, Voyage, Jina and most
//! self-hosted rerank servers.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;

use vault_search_core::rerank::{RerankProvider, RerankScore};

use crate::config::RerankConfig;
use crate::error::Error;

pub struct HttpRerankProvider {
    client: reqwest::Client,
    api_base: String,
    model: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl HttpRerankProvider {
    pub fn new(config: &RerankConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }

    /// Build from config, reading the key from `RERANK_API_KEY`.
    pub fn from_env(config: &RerankConfig) -> Result<Self> {
        Self::new(config, std::env::var("RERANK_API_KEY").ok())
    }
}

#[async_trait]
impl RerankProvider for HttpRerankProvider {
    async fn rerank(&self, query: &str, texts: &[String]) -> Result<Vec<RerankScore>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "documents": texts,
        });
        let mut req = self.client.post(format!("{}/rerank", self.api_base)).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow::Error::from(Error::Timeout(self.timeout_secs))
            } else {
                anyhow::Error::from(e)
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::RateLimit(format!("rerank API returned {status}: {text}")).into());
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::RemoteApi {
                status: status.as_u16(),
                body: text,
            }
            .into());
        }

        let json: Value = response.json().await?;
        parse_rerank_response(&json, texts.len())
    }
}

fn parse_rerank_response(json: &Value, doc_count: usize) -> Result<Vec<RerankScore>> {
    let results = json
        .get("results")
        .or_else(|| json.get("data"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("Rerank response is missing results array."))?;

    let mut scores = Vec::with_capacity(results.len());
    for item in results {
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow!("Rerank result missing index."))? as usize;
        let relevance_score = item
            .get("relevance_score")
            .or_else(|| item.get("score"))
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow!("Rerank result missing score."))?;
        if index < doc_count {
            scores.push(RerankScore {
                index,
                relevance_score,
            });
        }
    }
    Ok(scores)
}
