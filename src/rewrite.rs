//! HyDE query rewriting through an OpenAI-compatible chat endpoint.
//!
//! The model is asked for a short passage that would answer the query; the
//! retriever embeds that passage instead of the bare question.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;

use vault_search_core::query::QueryRewriter;

use crate::config::RewriteConfig;
use crate::error::Error;

const SYSTEM_PROMPT: &str = "Write a short passage, as it might appear in a personal note, \
that answers the user's question. Reply with the passage only.";

const REWRITE_TIMEOUT_SECS: u64 = 30;

pub struct ChatQueryRewriter {
    client: reqwest::Client,
    api_base: String,
    model: String,
    api_key: Option<String>,
}

impl ChatQueryRewriter {
    pub fn new(config: &RewriteConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REWRITE_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    /// Build from config, reading the key from `OPENAI_API_KEY`.
    pub fn from_env(config: &RewriteConfig) -> Result<Self> {
        Self::new(config, std::env::var("OPENAI_API_KEY").ok())
    }
}

#[async_trait]
impl QueryRewriter for ChatQueryRewriter {
    async fn rewrite(&self, query: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": query },
            ],
        });
        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::RemoteApi {
                status: status.as_u16(),
                body: text,
            }
            .into());
        }
        let json: Value = response.json().await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &Value) -> Result<String> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default();
    if content.is_empty() {
        return Err(anyhow!("Chat response has no message content"));
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_mock;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    #[test]
    fn test_parse_chat_response() {
        let json = json!({ "choices": [{ "message": { "content": "  A passage.  " } }] });
        assert_eq!(parse_chat_response(&json).unwrap(), "A passage.");
        assert!(parse_chat_response(&json!({ "choices": [] })).is_err());
    }

    #[tokio::test]
    async fn test_rewrite_against_mock() {
        let app = Router::new().route(
            "/chat/completions",
            post(|Json(body): Json<Value>| async move {
                let question = body["messages"][1]["content"].as_str().unwrap_or("").to_string();
                Json(json!({
                    "choices": [{ "message": { "content": format!("Answer about {question}") } }]
                }))
            }),
        );
        let (base, _shutdown) = spawn_mock(app).await;
        let config = RewriteConfig {
            enabled: true,
            api_base: base,
            model: "test-chat".into(),
        };
        let rewriter = ChatQueryRewriter::new(&config, None).unwrap();
        assert_eq!(rewriter.rewrite("tides").await.unwrap(), "Answer about tides");
    }
}
