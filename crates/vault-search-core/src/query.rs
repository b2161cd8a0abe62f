//! Query parsing: tokenization, tag terms, and explicit note references.

use anyhow::Result;
use async_trait::async_trait;

/// Rewrites a query into a passage that is easier to match semantically,
/// e.g. a hypothetical answer (HyDE).
#[async_trait]
pub trait QueryRewriter: Send + Sync {
    async fn rewrite(&self, query: &str) -> Result<String>;
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "how", "i", "in", "is", "it",
    "me", "my", "of", "on", "or", "the", "to", "was", "what", "when", "where", "which", "who",
    "why", "with",
];

/// Split text into lowercase search terms.
///
/// `#tag` tokens keep their marker; stopwords and one-letter words are
/// dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '#' || c == '_' || c == '-' || c == '/'))
        .flat_map(split_inner_hashes)
        .map(|t| t.trim_matches(|c: char| c == '-' || c == '/').to_lowercase())
        .filter(|t| {
            if is_tag_term(t) {
                return true;
            }
            !t.starts_with('#') && t.chars().count() > 1 && !STOPWORDS.contains(&t.as_str())
        })
        .collect()
}

// "foo#bar" is a word followed by a tag, not one token.
fn split_inner_hashes(token: &str) -> Vec<&str> {
    match token[1.min(token.len())..].find('#') {
        Some(pos) => {
            let split = pos + 1;
            let mut parts = vec![&token[..split]];
            parts.extend(split_inner_hashes(&token[split..]));
            parts
        }
        None => vec![token],
    }
}

/// True for `#tag` style terms.
pub fn is_tag_term(term: &str) -> bool {
    term.len() > 1 && term.starts_with('#') && !term[1..].contains('#')
}

/// True when there is at least one term and every term is a tag.
pub fn all_tag_terms(terms: &[String]) -> bool {
    !terms.is_empty() && terms.iter().all(|t| is_tag_term(t))
}

/// Extract `[[Note]]` references from a query.
///
/// Alias (`[[Note|shown]]`) and heading (`[[Note#Section]]`) forms reduce to
/// the note name. Results are de-duplicated in first-seen order.
pub fn extract_note_references(query: &str) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    let mut rest = query;
    while let Some(open) = rest.find("[[") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("]]") else {
            break;
        };
        let inner = &after[..close];
        let target = inner
            .split(['|', '#'])
            .next()
            .unwrap_or_default()
            .trim();
        if !target.is_empty() && !refs.iter().any(|r| r == target) {
            refs.push(target.to_string());
        }
        rest = &after[close + 2..];
    }
    refs
}
