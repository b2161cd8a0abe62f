//! Per-query retrieval orchestration.
//!
//! # Pipeline
//!
//! 1. **Time range**: when `options.time_range` is set, return daily notes
//!    dated inside the range and notes modified inside it, scored by
//!    recency. Nothing else runs.
//! 2. **Explicit references**: every chunk of each `[[Note]]` named in the
//!    query, score 1.0.
//! 3. **HyDE rewrite**: optional; on failure the original query is used.
//! 4. **Hybrid search**: vector similarity of the (rewritten) query blended
//!    with lexical relevance of the salient terms.
//! 5. **Filter**: hits below `min_similarity_score` are dropped; NaN
//!    scores are kept.
//! 6. **Merge**: explicit chunks first, then hits not already present and
//!    not from a fully included note.
//! 7. **Rerank**: when `use_reranker_threshold` is set and the hits look
//!    weak.
//! 8. **Cap**: `max_k`, or 100 with `return_all`. Explicit chunks are
//!    never cut.
//!
//! Any failure yields an empty result. Every await races the caller's
//! [`CancelFlag`]; cancellation also yields an empty result.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Days, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vault_search_core::chunk::context_header;
use vault_search_core::embedding::{embed_one, EmbeddingProvider};
use vault_search_core::models::{Chunk, RankedDocument, ResultSource, RetrieverOptions, TimeRange};
use vault_search_core::query::{extract_note_references, tokenize, QueryRewriter};
use vault_search_core::rerank::{
    apply_rerank, rerank_inputs, rerank_trigger_scores, RerankProvider, RERANK_MAX_DOCUMENTS,
};
use vault_search_core::search::{cmp_score_desc, resolve_text_weight, ChunkHit, SearchQuery};
use vault_search_core::store::{ChunkFilter, Store};

use crate::error::Error;

/// Result cap when `return_all` is set.
pub const RETURN_ALL_LIMIT: usize = 100;

/// Longest time range served, in days.
pub const MAX_TIME_RANGE_DAYS: u64 = 365;

const MS_PER_DAY: i64 = 86_400_000;
const RECENCY_WINDOW_DAYS: f64 = 30.0;
const MIN_RECENCY_SCORE: f64 = 0.3;

/// Shared per-query cancel flag.
///
/// Clones share state. Cancelling interrupts any await wrapped in
/// [`CancelFlag::guard`].
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(CancellationToken);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Run `fut` unless cancelled first; a cancel while it is pending drops
    /// it and returns [`Error::Cancelled`].
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.0.cancelled() => Err(Error::Cancelled.into()),
            out = fut => out,
        }
    }
}

/// Anything that turns a query into ranked documents.
///
/// Implementations never fail: errors are logged and produce an empty list.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        options: &RetrieverOptions,
        cancel: &CancelFlag,
    ) -> Vec<RankedDocument>;
}

/// Retriever over a local [`Store`].
pub struct HybridRetriever {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    rewriter: Option<Arc<dyn QueryRewriter>>,
    reranker: Option<Arc<dyn RerankProvider>>,
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            rewriter: None,
            reranker: None,
        }
    }

    pub fn with_rewriter(mut self, rewriter: Arc<dyn QueryRewriter>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn RerankProvider>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    async fn try_retrieve(
        &self,
        query: &str,
        options: &RetrieverOptions,
        cancel: &CancelFlag,
    ) -> Result<Vec<RankedDocument>> {
        let cap = result_cap(options);

        if let Some(range) = options.time_range {
            return self
                .time_range_documents(range, Utc::now(), cap, cancel)
                .await;
        }

        let explicit = cancel.guard(self.explicit_documents(query)).await?;
        let search_text = cancel
            .guard(async { Ok(self.expand_query(query, options).await) })
            .await?;

        let terms: Vec<String> = if options.salient_terms.is_empty() {
            tokenize(query)
        } else {
            options.salient_terms.iter().flat_map(|t| tokenize(t)).collect()
        };
        let vector = cancel
            .guard(embed_one(self.embedder.as_ref(), &search_text))
            .await?;

        let text_weight = resolve_text_weight(&terms, options.text_weight);
        let limit = cap.max(RERANK_MAX_DOCUMENTS);
        let search = SearchQuery::hybrid(&terms, Some(&vector), limit, text_weight);
        let hits = cancel.guard(self.store.search(&search)).await?;

        let hits = filter_hits(hits, options.min_similarity_score);
        let mut found = merge_hits(&explicit, hits);
        debug!(
            explicit = explicit.len(),
            hits = found.len(),
            text_weight,
            "hybrid search done"
        );

        if let Some(threshold) = options.use_reranker_threshold {
            found = cancel
                .guard(self.maybe_rerank(query, &explicit, found, threshold))
                .await?;
        }

        found.truncate(cap.saturating_sub(explicit.len()));
        let mut results = explicit;
        results.extend(found);
        Ok(results)
    }

    /// Every chunk of each note referenced as `[[Note]]` in `query`.
    async fn explicit_documents(&self, query: &str) -> Result<Vec<RankedDocument>> {
        let mut docs = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for reference in extract_note_references(query) {
            let filter = if reference.contains('/') {
                let path = if reference.ends_with(".md") {
                    reference
                } else {
                    format!("{reference}.md")
                };
                ChunkFilter::Path(path)
            } else {
                ChunkFilter::Titles(vec![reference])
            };
            for chunk in self.store.find(&filter).await? {
                if seen.insert(chunk.id.clone()) {
                    docs.push(RankedDocument::from_chunk(&chunk, 1.0, ResultSource::Explicit));
                }
            }
        }
        Ok(docs)
    }

    async fn expand_query(&self, query: &str, options: &RetrieverOptions) -> String {
        let Some(rewriter) = self.rewriter.as_ref().filter(|_| !options.skip_query_rewrite) else {
            return query.to_string();
        };
        match rewriter.rewrite(query).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => {
                debug!(chars = rewritten.len(), "query rewritten");
                rewritten
            }
            Ok(_) => query.to_string(),
            Err(e) => {
                let error = format!("{e:#}");
                warn!(%error, "query rewrite failed, using original query");
                query.to_string()
            }
        }
    }

    /// Rerank `docs` when the best score of the merged results (`explicit`
    /// plus `docs`) is weak. Only `docs` are sent to the reranker.
    async fn maybe_rerank(
        &self,
        query: &str,
        explicit: &[RankedDocument],
        docs: Vec<RankedDocument>,
        threshold: f64,
    ) -> Result<Vec<RankedDocument>> {
        if docs.is_empty() {
            return Ok(docs);
        }
        let scores = explicit.iter().chain(docs.iter()).map(|d| d.score);
        let Some(trigger) = rerank_trigger_scores(scores, threshold) else {
            return Ok(docs);
        };
        let Some(reranker) = &self.reranker else {
            debug!(?trigger, "rerank wanted but no reranker configured");
            return Ok(docs);
        };
        info!(?trigger, candidates = docs.len().min(RERANK_MAX_DOCUMENTS), "reranking");
        let scores = reranker.rerank(query, &rerank_inputs(&docs)).await?;
        Ok(apply_rerank(docs, &scores))
    }

    async fn time_range_documents(
        &self,
        range: TimeRange,
        now: DateTime<Utc>,
        cap: usize,
        cancel: &CancelFlag,
    ) -> Result<Vec<RankedDocument>> {
        let range = cap_time_range(range);
        let titles = daily_note_titles(range);

        let daily = cancel
            .guard(self.store.find(&ChunkFilter::Titles(titles)))
            .await?;
        let mut docs = group_by_note(daily, ResultSource::DailyNote, |_| 1.0);
        let daily_paths: HashSet<String> = docs.iter().map(|d| d.path.clone()).collect();

        let modified = cancel
            .guard(self.store.find(&ChunkFilter::ModifiedBetween {
                start: range.start,
                end: range.end,
            }))
            .await?;
        let now_ms = now.timestamp_millis();
        let modified: Vec<Chunk> = modified
            .into_iter()
            .filter(|c| !daily_paths.contains(&c.path))
            .collect();
        docs.extend(group_by_note(modified, ResultSource::TimeRange, |mtime| {
            recency_score(mtime, now_ms)
        }));

        docs.sort_by(|a, b| cmp_score_desc(a.score, b.score).then(b.mtime.cmp(&a.mtime)));
        docs.truncate(cap);
        debug!(count = docs.len(), "time range retrieval done");
        Ok(docs)
    }
}

#[async_trait]
impl Retriever for HybridRetriever {
    async fn retrieve(
        &self,
        query: &str,
        options: &RetrieverOptions,
        cancel: &CancelFlag,
    ) -> Vec<RankedDocument> {
        match self.try_retrieve(query, options, cancel).await {
            Ok(docs) => docs,
            Err(e) if matches!(e.downcast_ref::<Error>(), Some(Error::Cancelled)) => {
                debug!("retrieval cancelled");
                Vec::new()
            }
            Err(e) => {
                let error = format!("{e:#}");
                warn!(%error, "retrieval failed");
                Vec::new()
            }
        }
    }
}

pub(crate) fn result_cap(options: &RetrieverOptions) -> usize {
    if options.return_all {
        RETURN_ALL_LIMIT
    } else {
        options.max_k
    }
}

/// Drop hits scoring below `min_score`. NaN scores pass.
pub fn filter_hits(hits: Vec<ChunkHit>, min_score: f64) -> Vec<ChunkHit> {
    hits.into_iter()
        .filter(|h| h.score.is_nan() || h.score >= min_score)
        .collect()
}

/// Hits not already covered by `explicit`, in hit order.
fn merge_hits(explicit: &[RankedDocument], hits: Vec<ChunkHit>) -> Vec<RankedDocument> {
    let full_notes: HashSet<&str> = explicit.iter().map(|d| d.path.as_str()).collect();
    let mut seen: HashSet<String> = explicit.iter().filter_map(|d| d.chunk_id.clone()).collect();
    hits.into_iter()
        .filter(|h| !full_notes.contains(h.chunk.path.as_str()))
        .filter(|h| seen.insert(h.chunk.id.clone()))
        .map(|h| RankedDocument::from_chunk(&h.chunk, h.score, ResultSource::Hybrid))
        .collect()
}

/// Clip `range` to its most recent [`MAX_TIME_RANGE_DAYS`] days.
pub fn cap_time_range(range: TimeRange) -> TimeRange {
    let max_span = MAX_TIME_RANGE_DAYS as i64 * MS_PER_DAY;
    if range.end.saturating_sub(range.start) > max_span {
        TimeRange {
            start: range.end.saturating_sub(max_span),
            end: range.end,
        }
    } else {
        range
    }
}

/// `clamp(1 - days_since_modified / 30, 0.3, 1.0)`.
pub fn recency_score(mtime: i64, now_ms: i64) -> f64 {
    let days = (now_ms - mtime).max(0) as f64 / MS_PER_DAY as f64;
    (1.0 - days / RECENCY_WINDOW_DAYS).clamp(MIN_RECENCY_SCORE, 1.0)
}

/// `YYYY-MM-DD` titles for every UTC day touched by `range`.
fn daily_note_titles(range: TimeRange) -> Vec<String> {
    let (Some(start), Some(end)) = (
        DateTime::<Utc>::from_timestamp_millis(range.start),
        DateTime::<Utc>::from_timestamp_millis(range.end),
    ) else {
        return Vec::new();
    };
    let end = end.date_naive();
    let mut day = start.date_naive();
    let mut titles = Vec::new();
    while day <= end {
        titles.push(day.format("%Y-%m-%d").to_string());
        match day.checked_add_days(Days::new(1)) {
            Some(next) => day = next,
            None => break,
        }
    }
    titles
}

/// One document per note, chunks joined in order under a single header.
fn group_by_note(
    chunks: Vec<Chunk>,
    source: ResultSource,
    score: impl Fn(i64) -> f64,
) -> Vec<RankedDocument> {
    let mut by_path: BTreeMap<String, Vec<Chunk>> = BTreeMap::new();
    for chunk in chunks {
        by_path.entry(chunk.path.clone()).or_default().push(chunk);
    }

    by_path
        .into_values()
        .filter_map(|mut chunks| {
            chunks.sort_by_key(|c| c.chunk_index);
            let first = chunks.first()?;
            let mtime = chunks.iter().map(|c| c.mtime).max().unwrap_or(first.mtime);
            let body = chunks.iter().map(|c| c.body()).collect::<Vec<_>>().join("\n\n");
            Some(RankedDocument {
                path: first.path.clone(),
                title: first.title.clone(),
                content: format!("{}{}", context_header(&first.title), body),
                score: score(mtime),
                rerank_score: None,
                original_score: None,
                include_in_context: true,
                source,
                chunk_id: (chunks.len() == 1).then(|| first.id.clone()),
                mtime,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use vault_search_core::rerank::RerankScore;
    use vault_search_core::store::memory::InMemoryStore;
    use vault_search_core::testing::{make_chunk, FailingEmbedder, HashEmbedder};

    const DIMS: usize = 32;

    async fn store_with(notes: &[(&str, &str, i64)]) -> (Arc<InMemoryStore>, Arc<HashEmbedder>) {
        let embedder = Arc::new(HashEmbedder::new("hash", DIMS));
        let store = Arc::new(InMemoryStore::with_vector_length(DIMS));
        for (path, body, mtime) in notes {
            let mut chunk = make_chunk(path, body, embedder.vector(body), "hash");
            chunk.mtime = *mtime;
            store.upsert(chunk).await.unwrap();
        }
        (store, embedder)
    }

    fn options() -> RetrieverOptions {
        RetrieverOptions {
            min_similarity_score: 0.0,
            ..RetrieverOptions::default()
        }
    }

    struct BrokenRewriter;

    #[async_trait]
    impl QueryRewriter for BrokenRewriter {
        async fn rewrite(&self, _query: &str) -> Result<String> {
            bail!("chat endpoint unavailable")
        }
    }

    /// Scores documents by how often they contain "priority".
    struct KeywordReranker;

    #[async_trait]
    impl RerankProvider for KeywordReranker {
        async fn rerank(&self, _query: &str, texts: &[String]) -> Result<Vec<RerankScore>> {
            Ok(texts
                .iter()
                .enumerate()
                .map(|(index, t)| RerankScore {
                    index,
                    relevance_score: t.matches("priority").count() as f64,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_explicit_reference_first_with_full_score() {
        let (store, embedder) = store_with(&[
            ("note1.md", "Hello world", 0),
            ("note2.md", "Hello [[note1]]", 0),
        ])
        .await;
        let retriever = HybridRetriever::new(store, embedder);
        let docs = retriever
            .retrieve("what about [[Note1|the first]]", &options(), &CancelFlag::new())
            .await;
        assert_eq!(docs[0].path, "note1.md");
        assert_eq!(docs[0].score, 1.0);
        assert_eq!(docs[0].source, ResultSource::Explicit);
        assert_eq!(docs.iter().filter(|d| d.path == "note1.md").count(), 1);
    }

    #[tokio::test]
    async fn test_explicit_never_cut_by_max_k() {
        let (store, embedder) = store_with(&[
            ("a.md", "garden plans", 0),
            ("b.md", "garden tools", 0),
            ("c.md", "garden soil", 0),
        ])
        .await;
        let retriever = HybridRetriever::new(store, embedder);
        let opts = RetrieverOptions {
            max_k: 1,
            ..options()
        };
        let docs = retriever
            .retrieve("[[a]] [[b]] garden", &opts, &CancelFlag::new())
            .await;
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.source == ResultSource::Explicit));
    }

    #[tokio::test]
    async fn test_min_score_filters_hybrid_hits() {
        let (store, embedder) = store_with(&[
            ("fish.md", "salmon trout salmon", 0),
            ("car.md", "engine wheel", 0),
        ])
        .await;
        let retriever = HybridRetriever::new(store, embedder);
        let opts = RetrieverOptions {
            min_similarity_score: 0.5,
            ..options()
        };
        let docs = retriever.retrieve("salmon trout", &opts, &CancelFlag::new()).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, "fish.md");
        assert_eq!(docs[0].source, ResultSource::Hybrid);
    }

    #[test]
    fn test_filter_hits_keeps_nan() {
        let chunk = make_chunk("a.md", "x", vec![], "m");
        let hit = |score: f64| ChunkHit {
            chunk: chunk.clone(),
            score,
            lexical_score: 0.0,
            vector_score: 0.0,
        };
        let kept = filter_hits(vec![hit(0.05), hit(f64::NAN), hit(0.4)], 0.1);
        assert_eq!(kept.len(), 2);
        assert!(kept[0].score.is_nan());
    }

    #[tokio::test]
    async fn test_rewrite_failure_falls_back() {
        let (store, embedder) = store_with(&[("fish.md", "salmon trout", 0)]).await;
        let retriever =
            HybridRetriever::new(store, embedder).with_rewriter(Arc::new(BrokenRewriter));
        let docs = retriever.retrieve("salmon", &options(), &CancelFlag::new()).await;
        assert_eq!(docs[0].path, "fish.md");
    }

    #[tokio::test]
    async fn test_rerank_below_threshold_reorders() {
        let (store, embedder) = store_with(&[
            ("a.md", "meeting notes monday", 0),
            ("b.md", "meeting priority priority items", 0),
        ])
        .await;
        let retriever =
            HybridRetriever::new(store, embedder).with_reranker(Arc::new(KeywordReranker));
        let opts = RetrieverOptions {
            use_reranker_threshold: Some(2.0),
            ..options()
        };
        let docs = retriever.retrieve("meeting", &opts, &CancelFlag::new()).await;
        assert_eq!(docs[0].path, "b.md");
        assert_eq!(docs[0].rerank_score, Some(2.0));
        assert!(docs[0].original_score.is_some());
    }

    /// Counts calls and leaves the order untouched.
    #[derive(Default)]
    struct CountingReranker {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl RerankProvider for CountingReranker {
        async fn rerank(&self, _query: &str, texts: &[String]) -> Result<Vec<RerankScore>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(texts
                .iter()
                .enumerate()
                .map(|(index, _)| RerankScore {
                    index,
                    relevance_score: 0.0,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_explicit_reference_suppresses_rerank() {
        let (store, embedder) = store_with(&[
            ("note1.md", "Hello world", 0),
            ("note2.md", "garden soil weak", 0),
        ])
        .await;
        let reranker = Arc::new(CountingReranker::default());
        let retriever = HybridRetriever::new(store, embedder).with_reranker(reranker.clone());
        let opts = RetrieverOptions {
            use_reranker_threshold: Some(0.9),
            ..options()
        };
        let docs = retriever
            .retrieve("[[note1]] garden", &opts, &CancelFlag::new())
            .await;
        assert_eq!(docs[0].path, "note1.md");
        assert_eq!(docs[0].source, ResultSource::Explicit);
        assert!(docs.iter().all(|d| d.rerank_score.is_none()));
        assert_eq!(reranker.calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        let weak = RetrieverOptions {
            use_reranker_threshold: Some(1.5),
            ..options()
        };
        retriever.retrieve("garden", &weak, &CancelFlag::new()).await;
        assert_eq!(reranker.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    /// Never answers within a test's lifetime.
    struct StalledEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StalledEmbedder {
        fn model_name(&self) -> &str {
            "stalled"
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            bail!("unreachable in tests")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_pending_embedding() {
        let (store, _) = store_with(&[("a.md", "alpha", 0)]).await;
        let retriever = HybridRetriever::new(store, Arc::new(StalledEmbedder));
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let docs = retriever.retrieve("alpha", &options(), &cancel).await;
        assert!(docs.is_empty());
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_embedding_failure_yields_empty() {
        let (store, _) = store_with(&[("a.md", "alpha", 0)]).await;
        let retriever = HybridRetriever::new(
            store,
            Arc::new(FailingEmbedder {
                message: "model offline".into(),
            }),
        );
        assert!(retriever
            .retrieve("alpha", &options(), &CancelFlag::new())
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_query_yields_empty() {
        let (store, embedder) = store_with(&[("a.md", "alpha", 0)]).await;
        let retriever = HybridRetriever::new(store, embedder);
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert!(retriever.retrieve("alpha", &options(), &cancel).await.is_empty());
    }

    #[tokio::test]
    async fn test_time_range_is_exclusive() {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let yesterday = (now - chrono::Duration::days(1)).format("%Y-%m-%d").to_string();
        let daily_path = format!("daily/{yesterday}.md");
        let (store, embedder) = store_with(&[
            (daily_path.as_str(), "standup", 0),
            ("recent.md", "edited lately", now_ms - 3 * MS_PER_DAY),
            ("older.md", "edited a while ago", now_ms - 60 * MS_PER_DAY),
            ("ancient.md", "standup edited lately", 0),
        ])
        .await;
        let retriever = HybridRetriever::new(store, embedder);
        let opts = RetrieverOptions {
            time_range: Some(TimeRange {
                start: now_ms - 90 * MS_PER_DAY,
                end: now_ms,
            }),
            ..options()
        };
        let docs = retriever.retrieve("standup edited", &opts, &CancelFlag::new()).await;
        let paths: Vec<&str> = docs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec![daily_path.as_str(), "recent.md", "older.md"]);
        assert_eq!(docs[0].source, ResultSource::DailyNote);
        assert_eq!(docs[0].score, 1.0);
        assert!((docs[1].score - 0.9).abs() < 0.01);
        assert_eq!(docs[2].score, 0.3);
        assert!(docs.iter().all(|d| d.source != ResultSource::Hybrid));
    }

    #[test]
    fn test_cap_time_range_keeps_most_recent_year() {
        let end = 1_000 * MS_PER_DAY;
        let capped = cap_time_range(TimeRange { start: 0, end });
        assert_eq!(capped.end, end);
        assert_eq!(capped.end - capped.start, 365 * MS_PER_DAY);
        let short = TimeRange { start: end - MS_PER_DAY, end };
        assert_eq!(cap_time_range(short), short);

        let extreme = cap_time_range(TimeRange {
            start: i64::MIN,
            end: i64::MAX,
        });
        assert_eq!(extreme.end, i64::MAX);
        assert_eq!(extreme.end - extreme.start, 365 * MS_PER_DAY);
    }

    #[test]
    fn test_recency_score_bounds() {
        assert_eq!(recency_score(1_000, 1_000), 1.0);
        assert!((recency_score(0, 15 * MS_PER_DAY) - 0.5).abs() < 1e-9);
        assert_eq!(recency_score(0, 100 * MS_PER_DAY), 0.3);
    }

    #[test]
    fn test_daily_note_titles_inclusive() {
        let start = DateTime::parse_from_rfc3339("2024-02-28T10:00:00Z")
            .unwrap()
            .timestamp_millis();
        let end = DateTime::parse_from_rfc3339("2024-03-01T01:00:00Z")
            .unwrap()
            .timestamp_millis();
        assert_eq!(
            daily_note_titles(TimeRange { start, end }),
            vec!["2024-02-28", "2024-02-29", "2024-03-01"]
        );
    }
}
