//! Typed error taxonomy.
//!
//! Functions return `anyhow::Result`; the variants here are raised where a
//! caller needs to branch on the failure kind and are recovered with
//! `err.downcast_ref::<Error>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The store could not be created or loaded.
    #[error("store initialization failed: {0}")]
    StoreInit(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    /// Insert failed after the previous version was removed.
    #[error("upsert of chunk {id} failed: {reason}")]
    Upsert { id: String, reason: String },

    /// The provider throttled the request (HTTP 429 or equivalent).
    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("remote API returned {status}: {body}")]
    RemoteApi { status: u16, body: String },

    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    #[error("an indexing run is already in progress")]
    IndexingInProgress,

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

const RATE_LIMIT_PATTERNS: &[&str] = &["429", "rate limit", "too many requests"];

/// True when `err` is a typed [`Error::RateLimit`] or its message looks like
/// a throttling response from a provider that only reports text.
pub fn is_rate_limit(err: &anyhow::Error) -> bool {
    if matches!(err.downcast_ref::<Error>(), Some(Error::RateLimit(_))) {
        return true;
    }
    let message = format!("{err:#}").to_lowercase();
    RATE_LIMIT_PATTERNS.iter().any(|p| message.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[test]
    fn test_typed_rate_limit() {
        let err: anyhow::Error = Error::RateLimit("slow down".into()).into();
        assert!(is_rate_limit(&err));
    }

    #[test]
    fn test_rate_limit_by_message() {
        assert!(is_rate_limit(&anyhow!("HTTP 429 from provider")));
        assert!(is_rate_limit(&anyhow!("Rate Limit exceeded")));
        let wrapped = Err::<(), _>(anyhow!("too many requests"))
            .context("embedding chunk 3")
            .unwrap_err();
        assert!(is_rate_limit(&wrapped));
        assert!(!is_rate_limit(&anyhow!("connection refused")));
    }

    #[test]
    fn test_downcast_through_context() {
        let err = Err::<(), _>(anyhow::Error::from(Error::RemoteApi {
            status: 503,
            body: "down".into(),
        }))
        .context("searching remote")
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::RemoteApi { status: 503, .. })
        ));
    }
}
