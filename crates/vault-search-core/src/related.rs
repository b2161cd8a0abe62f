//! Related-note ranking from embedding similarity and wiki links.
//!
//! A candidate's merged score is `similarity × 0.7 + link bonus`, where the
//! bonus is 0.3 when the notes link both ways, 0.24 when they link one way,
//! and 0 otherwise. Candidates are ordered by similarity tier first so a
//! strongly similar note is never outranked by a weakly similar but heavily
//! linked one.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde::Serialize;

use crate::chunk::note_title;
use crate::search::{cmp_score_desc, SearchQuery};
use crate::store::{ChunkFilter, Store};

/// Most similarity candidates kept before link merging.
pub const MAX_SIMILAR_NOTES: usize = 20;

const SIMILARITY_WEIGHT: f64 = 0.7;
const LINK_BONUS: f64 = 0.3;
const SINGLE_LINK_FACTOR: f64 = 0.8;
const HIGH_TIER: f64 = 0.7;
const MEDIUM_TIER: f64 = 0.55;

// Hits requested per source chunk before aggregating by path.
const PER_CHUNK_LIMIT: usize = 50;

/// Link structure of the vault.
pub trait LinkGraph: Send + Sync {
    /// Notes that `path` links to.
    fn linked_notes(&self, path: &str) -> Vec<String>;
    /// Notes that link to `path`.
    fn backlinked_notes(&self, path: &str) -> Vec<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedNote {
    pub path: String,
    pub title: String,
    /// Merged score.
    pub score: f64,
    pub similarity_score: f64,
    pub has_outgoing_links: bool,
    pub has_backlinks: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimilarityTier {
    Low,
    Medium,
    High,
}

impl SimilarityTier {
    pub fn of(similarity: f64) -> Self {
        if similarity > HIGH_TIER {
            SimilarityTier::High
        } else if similarity > MEDIUM_TIER {
            SimilarityTier::Medium
        } else {
            SimilarityTier::Low
        }
    }
}

pub fn link_bonus(outgoing: bool, backlink: bool) -> f64 {
    match (outgoing, backlink) {
        (true, true) => LINK_BONUS,
        (true, false) | (false, true) => LINK_BONUS * SINGLE_LINK_FACTOR,
        (false, false) => 0.0,
    }
}

pub fn merged_score(similarity: f64, outgoing: bool, backlink: bool) -> f64 {
    similarity * SIMILARITY_WEIGHT + link_bonus(outgoing, backlink)
}

/// Order by similarity tier (desc), then merged score (desc).
pub fn rank_related(mut notes: Vec<RelatedNote>) -> Vec<RelatedNote> {
    notes.sort_by(|a, b| {
        SimilarityTier::of(b.similarity_score)
            .cmp(&SimilarityTier::of(a.similarity_score))
            .then(cmp_score_desc(a.score, b.score))
            .then(a.path.cmp(&b.path))
    });
    notes
}

/// Find notes related to `path`.
///
/// Searches the store once per embedded chunk of the note, keeps the best
/// similarity per candidate note, caps to the top [`MAX_SIMILAR_NOTES`], and
/// merges in link evidence. Notes reached only through links enter with
/// similarity 0.
pub async fn find_related(
    store: &dyn Store,
    links: &dyn LinkGraph,
    path: &str,
) -> Result<Vec<RelatedNote>> {
    let source_chunks = store.find(&ChunkFilter::Path(path.to_string())).await?;

    let mut best: HashMap<String, (String, f64)> = HashMap::new();
    for chunk in source_chunks.iter().filter(|c| !c.embedding.is_empty()) {
        let query = SearchQuery::vector(&chunk.embedding, PER_CHUNK_LIMIT).excluding(path);
        for hit in store.search(&query).await? {
            let entry = best
                .entry(hit.chunk.path.clone())
                .or_insert_with(|| (hit.chunk.title.clone(), hit.score));
            if hit.score > entry.1 {
                entry.1 = hit.score;
            }
        }
    }

    let mut similar: Vec<(String, String, f64)> = best
        .into_iter()
        .map(|(p, (title, score))| (p, title, score))
        .collect();
    similar.sort_by(|a, b| cmp_score_desc(a.2, b.2).then(a.0.cmp(&b.0)));
    similar.truncate(MAX_SIMILAR_NOTES);

    let outgoing: HashSet<String> = links.linked_notes(path).into_iter().collect();
    let backlinks: HashSet<String> = links.backlinked_notes(path).into_iter().collect();

    let mut notes: Vec<RelatedNote> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for (p, title, similarity) in similar {
        seen.insert(p.clone());
        notes.push(related_note(p, title, similarity, &outgoing, &backlinks));
    }
    let mut link_only: Vec<&String> = outgoing
        .union(&backlinks)
        .filter(|p| p.as_str() != path && !seen.contains(p.as_str()))
        .collect();
    link_only.sort();
    for p in link_only {
        notes.push(related_note(p.clone(), note_title(p), 0.0, &outgoing, &backlinks));
    }

    Ok(rank_related(notes))
}

fn related_note(
    path: String,
    title: String,
    similarity: f64,
    outgoing: &HashSet<String>,
    backlinks: &HashSet<String>,
) -> RelatedNote {
    let has_outgoing_links = outgoing.contains(&path);
    let has_backlinks = backlinks.contains(&path);
    RelatedNote {
        score: merged_score(similarity, has_outgoing_links, has_backlinks),
        path,
        title,
        similarity_score: similarity,
        has_outgoing_links,
        has_backlinks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::testing::make_chunk;

    struct StaticLinks {
        outgoing: Vec<String>,
        backlinks: Vec<String>,
    }

    impl LinkGraph for StaticLinks {
        fn linked_notes(&self, _path: &str) -> Vec<String> {
            self.outgoing.clone()
        }
        fn backlinked_notes(&self, _path: &str) -> Vec<String> {
            self.backlinks.clone()
        }
    }

    fn note(path: &str, similarity: f64, score: f64) -> RelatedNote {
        RelatedNote {
            path: path.to_string(),
            title: note_title(path),
            score,
            similarity_score: similarity,
            has_outgoing_links: false,
            has_backlinks: false,
        }
    }

    #[test]
    fn test_link_bonus() {
        assert_eq!(link_bonus(true, true), 0.3);
        assert!((link_bonus(true, false) - 0.24).abs() < 1e-9);
        assert!((link_bonus(false, true) - 0.24).abs() < 1e-9);
        assert_eq!(link_bonus(false, false), 0.0);
        assert!((merged_score(0.5, true, true) - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_tier_beats_merged_score() {
        let ranked = rank_related(vec![
            note("low.md", 0.5, 0.95),
            note("high.md", 0.8, 0.75),
            note("medium.md", 0.6, 0.9),
        ]);
        let paths: Vec<&str> = ranked.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["high.md", "medium.md", "low.md"]);
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(SimilarityTier::of(0.7), SimilarityTier::Medium);
        assert_eq!(SimilarityTier::of(0.71), SimilarityTier::High);
        assert_eq!(SimilarityTier::of(0.55), SimilarityTier::Low);
    }

    #[tokio::test]
    async fn test_find_related_merges_links() {
        let store = InMemoryStore::new();
        store
            .insert(make_chunk("source.md", "a", vec![1.0, 0.0], "m"))
            .unwrap();
        store
            .insert(make_chunk("close.md", "b", vec![1.0, 0.1], "m"))
            .unwrap();
        store
            .insert(make_chunk("far.md", "c", vec![0.0, 1.0], "m"))
            .unwrap();

        let links = StaticLinks {
            outgoing: vec!["far.md".to_string(), "linked-only.md".to_string()],
            backlinks: vec!["far.md".to_string()],
        };
        let related = find_related(&store, &links, "source.md").await.unwrap();
        let paths: Vec<&str> = related.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["close.md", "far.md", "linked-only.md"]);

        let far = &related[1];
        assert!(far.has_outgoing_links && far.has_backlinks);
        assert!((far.score - 0.3).abs() < 1e-6);

        let linked_only = &related[2];
        assert_eq!(linked_only.similarity_score, 0.0);
        assert!((linked_only.score - 0.24).abs() < 1e-9);
        assert!(related.iter().all(|n| n.path != "source.md"));
    }
}
