//! Cross-encoder reranking: provider trait, trigger rule, and merge.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::models::RankedDocument;
use crate::search::cmp_score_desc;

/// Most candidates sent to the reranker in one call.
pub const RERANK_MAX_DOCUMENTS: usize = 50;

/// Per-document character budget for rerank inputs.
pub const RERANK_MAX_CHARS: usize = 3000;

/// Relevance of the document at `index` in the request.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RerankScore {
    pub index: usize,
    pub relevance_score: f64,
}

#[async_trait]
pub trait RerankProvider: Send + Sync {
    async fn rerank(&self, query: &str, texts: &[String]) -> Result<Vec<RerankScore>>;
}

/// Why a rerank pass was triggered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RerankTrigger {
    /// The best numeric score was below the configured threshold.
    BelowThreshold { best: f64, threshold: f64 },
    /// No document carried a numeric score.
    NoNumericScores,
}

/// Decide whether `docs` need reranking against `threshold`.
pub fn rerank_trigger(docs: &[RankedDocument], threshold: f64) -> Option<RerankTrigger> {
    rerank_trigger_scores(docs.iter().map(|d| d.score), threshold)
}

/// [`rerank_trigger`] over bare scores. An empty iterator never triggers.
pub fn rerank_trigger_scores(
    scores: impl IntoIterator<Item = f64>,
    threshold: f64,
) -> Option<RerankTrigger> {
    let mut any = false;
    let best = scores
        .into_iter()
        .inspect(|_| any = true)
        .filter(|s| !s.is_nan())
        .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
    if !any {
        return None;
    }
    match best {
        None => Some(RerankTrigger::NoNumericScores),
        Some(best) if best < threshold => Some(RerankTrigger::BelowThreshold { best, threshold }),
        Some(_) => None,
    }
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((pos, _)) => &text[..pos],
        None => text,
    }
}

/// Texts to send for the first [`RERANK_MAX_DOCUMENTS`] of `docs`.
pub fn rerank_inputs(docs: &[RankedDocument]) -> Vec<String> {
    docs.iter()
        .take(RERANK_MAX_DOCUMENTS)
        .map(|d| truncate_chars(&d.content, RERANK_MAX_CHARS).to_string())
        .collect()
}

/// Reorder `docs` by rerank relevance.
///
/// Scored documents move to the front in relevance order with the previous
/// score kept in `original_score`. Documents the reranker did not score keep
/// their relative order after them. Out-of-range indices are ignored.
pub fn apply_rerank(docs: Vec<RankedDocument>, scores: &[RerankScore]) -> Vec<RankedDocument> {
    let mut relevance: Vec<Option<f64>> = vec![None; docs.len()];
    for s in scores {
        if let Some(slot) = relevance.get_mut(s.index) {
            *slot = Some(s.relevance_score);
        }
    }

    let mut scored = Vec::new();
    let mut rest = Vec::new();
    for (mut doc, rel) in docs.into_iter().zip(relevance) {
        match rel {
            Some(rel) => {
                doc.original_score = Some(doc.score);
                doc.rerank_score = Some(rel);
                doc.score = rel;
                scored.push(doc);
            }
            None => rest.push(doc),
        }
    }
    scored.sort_by(|a, b| cmp_score_desc(a.score, b.score));
    scored.extend(rest);
    scored
}
