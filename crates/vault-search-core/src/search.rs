//! Chunk ranking with lexical, vector, and hybrid modes.
//!
//! Stores call [`rank_chunks`] over the chunks they hold; the scoring here
//! has no storage or configuration dependencies.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Lexical: per-term saturated term frequency over the chunk body, a
//!    smaller bonus for title hits, and exact tag matches for `#tag` terms.
//! 2. Normalize lexical scores to `[0, 1]` by dividing by the maximum.
//! 3. Vector: cosine similarity between the query vector and the chunk
//!    embedding.
//! 4. Blend: `score = w × lexical + (1 − w) × vector`, where `w` is the text
//!    weight (default 0.5, forced to 1.0 when every term is a tag).
//! 5. Sort by score (desc, NaN last), mtime (desc), id (asc).
//! 6. Truncate to `limit`.

use std::cmp::Ordering;

use crate::embedding::cosine_similarity;
use crate::models::Chunk;
use crate::query::{all_tag_terms, is_tag_term};

/// Default lexical weight in hybrid mode.
pub const DEFAULT_TEXT_WEIGHT: f64 = 0.5;

const TF_SATURATION: f64 = 1.2;
const TITLE_BONUS: f64 = 0.5;

/// Which signals contribute to a chunk's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Vector,
    Lexical,
    Hybrid,
}

/// Inputs for a single ranking pass.
#[derive(Debug, Clone)]
pub struct SearchQuery<'a> {
    pub mode: SearchMode,
    /// Tokenized query terms (see [`crate::query::tokenize`]).
    pub terms: &'a [String],
    /// Query embedding; required for vector signal.
    pub vector: Option<&'a [f32]>,
    pub limit: usize,
    /// Resolved lexical weight in `[0, 1]`.
    pub text_weight: f64,
    /// Skip every chunk of this note.
    pub exclude_path: Option<&'a str>,
}

impl<'a> SearchQuery<'a> {
    pub fn vector(vector: &'a [f32], limit: usize) -> Self {
        Self {
            mode: SearchMode::Vector,
            terms: &[],
            vector: Some(vector),
            limit,
            text_weight: 0.0,
            exclude_path: None,
        }
    }

    pub fn hybrid(terms: &'a [String], vector: Option<&'a [f32]>, limit: usize, text_weight: f64) -> Self {
        Self {
            mode: SearchMode::Hybrid,
            terms,
            vector,
            limit,
            text_weight,
            exclude_path: None,
        }
    }

    pub fn excluding(mut self, path: &'a str) -> Self {
        self.exclude_path = Some(path);
        self
    }
}

/// A scored chunk.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk: Chunk,
    pub score: f64,
    /// Normalized lexical component.
    pub lexical_score: f64,
    /// Cosine similarity component.
    pub vector_score: f64,
}

/// Lexical weight for a query: 1.0 when every term is a tag, otherwise the
/// requested weight (clamped) or [`DEFAULT_TEXT_WEIGHT`].
pub fn resolve_text_weight(terms: &[String], requested: Option<f64>) -> f64 {
    if all_tag_terms(terms) {
        return 1.0;
    }
    requested
        .filter(|w| w.is_finite())
        .map(|w| w.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_TEXT_WEIGHT)
}

pub fn blend_scores(lexical: f64, vector: f64, text_weight: f64) -> f64 {
    text_weight * lexical + (1.0 - text_weight) * vector
}

/// Unnormalized lexical score of `chunk` for `terms`.
pub fn lexical_score(chunk: &Chunk, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let body = chunk.body().to_lowercase();
    let title = chunk.title.to_lowercase();

    terms
        .iter()
        .map(|term| {
            if is_tag_term(term) {
                if chunk.tags.iter().any(|t| t == term) || body.contains(term.as_str()) {
                    1.0
                } else {
                    0.0
                }
            } else {
                let tf = body.matches(term.as_str()).count() as f64;
                let title_hit = if title.contains(term.as_str()) { TITLE_BONUS } else { 0.0 };
                tf / (tf + TF_SATURATION) + title_hit
            }
        })
        .sum()
}

/// Divide every score by the maximum so the best is 1.0.
///
/// All-zero (or empty) input is returned unchanged.
pub fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().filter(|s| s.is_finite()).fold(0.0, f64::max);
    if max <= 0.0 {
        return scores.to_vec();
    }
    scores.iter().map(|s| s / max).collect()
}

/// Score and rank `chunks` for `query`.
pub fn rank_chunks<'c, I>(chunks: I, query: &SearchQuery<'_>) -> Vec<ChunkHit>
where
    I: IntoIterator<Item = &'c Chunk>,
{
    let use_lexical = query.mode != SearchMode::Vector && !query.terms.is_empty();
    let query_vector = match query.mode {
        SearchMode::Lexical => None,
        _ => query.vector.filter(|v| !v.is_empty()),
    };

    let mut candidates: Vec<(&Chunk, f64, Option<f64>)> = Vec::new();
    for chunk in chunks {
        if query.exclude_path == Some(chunk.path.as_str()) {
            continue;
        }
        let raw_lexical = if use_lexical { lexical_score(chunk, query.terms) } else { 0.0 };
        let vector = query_vector
            .filter(|qv| qv.len() == chunk.embedding.len())
            .map(|qv| f64::from(cosine_similarity(qv, &chunk.embedding)));
        if raw_lexical > 0.0 || vector.is_some() {
            candidates.push((chunk, raw_lexical, vector));
        }
    }

    let raw: Vec<f64> = candidates.iter().map(|(_, lex, _)| *lex).collect();
    let normalized = normalize_scores(&raw);

    let mut hits: Vec<ChunkHit> = candidates
        .into_iter()
        .zip(normalized)
        .filter_map(|((chunk, _, vector), lexical)| {
            let vector_score = vector.unwrap_or(0.0);
            let score = match query.mode {
                SearchMode::Vector => vector?,
                SearchMode::Lexical => lexical,
                SearchMode::Hybrid => blend_scores(lexical, vector_score, query.text_weight),
            };
            Some(ChunkHit {
                chunk: chunk.clone(),
                score,
                lexical_score: lexical,
                vector_score,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        cmp_score_desc(a.score, b.score)
            .then(b.chunk.mtime.cmp(&a.chunk.mtime))
            .then(a.chunk.id.cmp(&b.chunk.id))
    });
    hits.truncate(query.limit);
    hits
}

/// Descending order with NaN sorted after every number.
pub fn cmp_score_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}
