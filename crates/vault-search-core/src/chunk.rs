//! Paragraph-boundary note chunker with overlap and contextual headers.
//!
//! Splits a note body into [`Chunk`]s no longer than a configurable number of
//! bytes. Splitting happens on paragraph boundaries (`\n\n`) where possible;
//! consecutive chunks share a short overlapping tail so sentences that cross
//! a boundary stay retrievable from either side.
//!
//! Every chunk is prefixed with a header naming its source note, so a chunk
//! read out of context still says where it came from:
//!
//! ```text
//! NOTE TITLE: [[Project Alpha]]
//!
//! NOTE BLOCK CONTENT:
//!
//! ...chunk text...
//! ```
//!
//! # Algorithm
//!
//! 1. Strip YAML frontmatter into the chunk metadata and collect tags from
//!    the `tags` key and inline `#tag` tokens.
//! 2. Split the body on `\n\n` and accumulate paragraphs until the next one
//!    would exceed `chunk_size`.
//! 3. On flush, carry up to `chunk_overlap` trailing bytes (snapped to a word
//!    start) into the next buffer.
//! 4. Paragraphs larger than `chunk_size` are hard-split at the nearest
//!    newline or space, with the same overlap.
//! 5. Each chunk id is the SHA-256 of `path \0 content`, so re-chunking an
//!    unchanged note reproduces the same ids.
//!
//! # Example
//!
//! ```rust
//! use vault_search_core::chunk::{chunk_note, ChunkParams, NoteSource};
//!
//! let note = NoteSource {
//!     path: "notes/hello.md",
//!     content: "Hello world.\n\nSecond paragraph.",
//!     ctime: 0,
//!     mtime: 0,
//!     indexed_at: 0,
//! };
//! let chunks = chunk_note(&note, &ChunkParams::default());
//! assert_eq!(chunks.len(), 1);
//! assert!(chunks[0].content.starts_with("NOTE TITLE: [[hello]]"));
//! ```

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Default maximum chunk body size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 6000;

/// Default overlap carried between consecutive chunks, in bytes.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

const HEADER_PREFIX: &str = "NOTE TITLE: [[";
const HEADER_BODY_MARKER: &str = "NOTE BLOCK CONTENT:\n\n";

/// Chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A note as read from the vault, ready to be chunked.
#[derive(Debug, Clone, Copy)]
pub struct NoteSource<'a> {
    pub path: &'a str,
    pub content: &'a str,
    pub ctime: i64,
    pub mtime: i64,
    /// Index time stamped on every produced chunk (Unix milliseconds).
    pub indexed_at: i64,
}

/// Split a note into header-prefixed chunks.
///
/// The returned chunks carry no embedding yet; the indexing pipeline fills
/// `embedding` and `embedding_model`. A note with a blank body yields no
/// chunks.
pub fn chunk_note(note: &NoteSource<'_>, params: &ChunkParams) -> Vec<Chunk> {
    let (metadata, body) = parse_frontmatter(note.content);
    let tags = collect_tags(&metadata, body);
    let title = note_title(note.path);
    let extension = note_extension(note.path);
    let header = context_header(&title);

    split_text(body, params.chunk_size, params.chunk_overlap)
        .into_iter()
        .enumerate()
        .map(|(index, piece)| {
            let content = format!("{header}{piece}");
            Chunk {
                id: chunk_id(note.path, &content),
                path: note.path.to_string(),
                title: title.clone(),
                nchars: content.chars().count(),
                content,
                embedding: Vec::new(),
                embedding_model: String::new(),
                tags: tags.clone(),
                extension: extension.clone(),
                metadata: metadata.clone(),
                ctime: note.ctime,
                mtime: note.mtime,
                created_at: note.indexed_at,
                chunk_index: index,
            }
        })
        .collect()
}

/// Header injected in front of every chunk of the note titled `title`.
pub fn context_header(title: &str) -> String {
    format!("{HEADER_PREFIX}{title}]]\n\n{HEADER_BODY_MARKER}")
}

/// Remove the contextual header from chunk content, if present.
pub fn strip_header(content: &str) -> &str {
    if !content.starts_with(HEADER_PREFIX) {
        return content;
    }
    match content.find(HEADER_BODY_MARKER) {
        Some(pos) => &content[pos + HEADER_BODY_MARKER.len()..],
        None => content,
    }
}

/// Deterministic chunk id: SHA-256 of `path \0 content`, hex encoded.
pub fn chunk_id(path: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Note basename without directory or extension.
pub fn note_title(path: &str) -> String {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(pos) if pos > 0 => name[..pos].to_string(),
        _ => name.to_string(),
    }
}

fn note_extension(path: &str) -> String {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(pos) if pos > 0 => name[pos + 1..].to_string(),
        _ => String::new(),
    }
}

/// Split text into overlapping pieces on paragraph boundaries.
///
/// Pieces are at most `max_chars` bytes (snapped to UTF-8 boundaries),
/// except that a single character wider than the limit still forms a piece.
pub fn split_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let overlap = overlap.min(max_chars / 2);

    let mut pieces = Vec::new();
    let mut current = String::new();
    // Bytes at the front of `current` that were carried over from the
    // previous piece.
    let mut carried = 0usize;

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current.is_empty() {
            trimmed.len()
        } else {
            current.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && current.len() > carried {
            let tail = overlap_tail(&current, overlap).to_string();
            pieces.push(std::mem::take(&mut current));
            carried = 0;
            if !tail.is_empty() && tail.len() + 2 + trimmed.len() <= max_chars {
                current.push_str(&tail);
                carried = tail.len();
            }
        }

        if trimmed.len() > max_chars {
            if current.len() > carried {
                pieces.push(std::mem::take(&mut current));
            }
            current.clear();
            carried = 0;

            let mut remaining = trimmed;
            while remaining.len() > max_chars {
                let cut = hard_split_point(remaining, max_chars);
                let piece = remaining[..cut].trim();
                if !piece.is_empty() {
                    pieces.push(piece.to_string());
                }
                let mut next = snap_to_char_boundary(remaining, cut.saturating_sub(overlap));
                if overlap > 0 {
                    if let Some(ws) = remaining[next..cut].find(char::is_whitespace) {
                        next += ws + 1;
                    }
                }
                if next == 0 || next > cut {
                    next = cut;
                }
                remaining = remaining[next..].trim_start();
            }
            if !remaining.is_empty() {
                current.push_str(remaining);
            }
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(trimmed);
        }
    }

    if current.len() > carried {
        pieces.push(current);
    }

    pieces
}

/// Byte index at which to hard-split an oversized paragraph.
fn hard_split_point(s: &str, max_chars: usize) -> usize {
    let limit = snap_to_char_boundary(s, max_chars);
    let limit = if limit == 0 { first_char_end(s) } else { limit };
    let split = s[..limit]
        .rfind('\n')
        .or_else(|| s[..limit].rfind(' '))
        .map(|pos| pos + 1)
        .unwrap_or(limit);
    let split = snap_to_char_boundary(s, split);
    if split == 0 {
        first_char_end(s)
    } else {
        split
    }
}

fn first_char_end(s: &str) -> usize {
    s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
}

/// Trailing slice of `s` of at most `overlap` bytes, starting on a word.
fn overlap_tail(s: &str, overlap: usize) -> &str {
    if overlap == 0 || s.is_empty() {
        return "";
    }
    let start = snap_to_char_boundary(s, s.len().saturating_sub(overlap));
    let start = if start == 0 {
        0
    } else {
        match s[start..].find(char::is_whitespace) {
            Some(ws) => start + ws + 1,
            None => return "",
        }
    };
    s[start.min(s.len())..].trim()
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Split leading YAML frontmatter into a metadata map and the body.
///
/// A block that is not a YAML mapping yields empty metadata; the block is
/// still stripped from the body.
pub fn parse_frontmatter(content: &str) -> (serde_json::Map<String, serde_json::Value>, &str) {
    let rest = match content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    {
        Some(rest) => rest,
        None => return (serde_json::Map::new(), content),
    };

    let Some((block_end, body_start)) = find_frontmatter_end(rest) else {
        return (serde_json::Map::new(), content);
    };
    let (block, body) = (&rest[..block_end], &rest[body_start..]);

    let metadata = match serde_yaml::from_str::<serde_json::Value>(block) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    (metadata, body)
}

/// Returns (end of block, start of body) byte offsets within `rest`.
fn find_frontmatter_end(rest: &str) -> Option<(usize, usize)> {
    if rest.starts_with("---") {
        let after = rest[3..].find('\n').map(|p| 3 + p + 1).unwrap_or(rest.len());
        return Some((0, after));
    }
    let pos = rest.find("\n---")?;
    let after_marker = pos + 4;
    let body_start = rest[after_marker..]
        .find('\n')
        .map(|p| after_marker + p + 1)
        .unwrap_or(rest.len());
    Some((pos + 1, body_start))
}

/// Collect `#tag` tokens from frontmatter `tags` and the note body.
///
/// Tags are lowercased, `#`-prefixed, and de-duplicated in first-seen order.
pub fn collect_tags(metadata: &serde_json::Map<String, serde_json::Value>, body: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let mut push = |raw: &str| {
        let name = raw.trim().trim_start_matches('#');
        if name.is_empty() {
            return;
        }
        let tag = format!("#{}", name.to_lowercase());
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    };

    match metadata.get("tags") {
        Some(serde_json::Value::Array(items)) => {
            for item in items {
                if let Some(s) = item.as_str() {
                    push(s);
                }
            }
        }
        Some(serde_json::Value::String(s)) => {
            for part in s.split([',', ' ']) {
                push(part);
            }
        }
        _ => {}
    }

    for line in body.lines() {
        let mut prev: Option<char> = None;
        for (i, c) in line.char_indices() {
            if c == '#' && prev.map_or(true, char::is_whitespace) {
                let rest = &line[i + 1..];
                let len = rest
                    .find(|ch: char| !(ch.is_alphanumeric() || ch == '_' || ch == '-' || ch == '/'))
                    .unwrap_or(rest.len());
                let name = &rest[..len];
                if !name.is_empty() && !name.chars().all(|ch| ch.is_ascii_digit()) {
                    push(name);
                }
            }
            prev = Some(c);
        }
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note<'a>(path: &'a str, content: &'a str) -> NoteSource<'a> {
        NoteSource {
            path,
            content,
            ctime: 1,
            mtime: 2,
            indexed_at: 3,
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_note(&note("a/Hello.md", "Hello, world!"), &ChunkParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].title, "Hello");
        assert_eq!(chunks[0].extension, "md");
        assert_eq!(chunks[0].body(), "Hello, world!");
        assert_eq!(chunks[0].mtime, 2);
        assert_eq!(chunks[0].created_at, 3);
    }

    #[test]
    fn test_blank_note_has_no_chunks() {
        assert!(chunk_note(&note("empty.md", ""), &ChunkParams::default()).is_empty());
        assert!(chunk_note(&note("ws.md", "\n\n  \n"), &ChunkParams::default()).is_empty());
    }

    #[test]
    fn test_header_names_the_note() {
        let chunks = chunk_note(&note("Daily/2024-01-05.md", "Walked the dog."), &ChunkParams::default());
        assert!(chunks[0]
            .content
            .starts_with("NOTE TITLE: [[2024-01-05]]\n\nNOTE BLOCK CONTENT:\n\n"));
        assert_eq!(strip_header(&chunks[0].content), "Walked the dog.");
    }

    #[test]
    fn test_multiple_paragraphs_exceed_limit() {
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let pieces = split_text(text, 30, 0);
        assert_eq!(
            pieces,
            vec![
                "This is paragraph one.",
                "This is paragraph two.",
                "This is paragraph three."
            ]
        );
    }

    #[test]
    fn test_overlap_carries_tail() {
        let text = "alpha beta gamma delta\n\nepsilon zeta";
        let pieces = split_text(text, 30, 11);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0], "alpha beta gamma delta");
        assert!(pieces[1].starts_with("delta"), "got {:?}", pieces[1]);
        assert!(pieces[1].ends_with("epsilon zeta"));
    }

    #[test]
    fn test_oversized_paragraph_hard_split() {
        let text = "word ".repeat(100);
        let pieces = split_text(&text, 50, 10);
        assert!(pieces.len() > 1);
        for p in &pieces {
            assert!(p.len() <= 50, "piece too long: {}", p.len());
            assert!(!p.starts_with(' '));
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let pieces = split_text(text, 12, 4);
        assert!(!pieces.is_empty());
        for p in &pieces {
            assert!(!p.is_empty());
        }
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let params = ChunkParams {
            chunk_size: 60,
            chunk_overlap: 10,
        };
        let chunks = chunk_note(&note("n.md", &text), &params);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_deterministic_ids() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let params = ChunkParams {
            chunk_size: 12,
            chunk_overlap: 0,
        };
        let c1 = chunk_note(&note("x.md", text), &params);
        let c2 = chunk_note(&note("x.md", text), &params);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.id, b.id);
        }
        let moved = chunk_note(&note("y/x.md", text), &params);
        assert_ne!(c1[0].id, moved[0].id);
    }

    #[test]
    fn test_frontmatter_parsed_and_stripped() {
        let content = "---\ntitle: Trip\ntags: [travel, Japan]\nrating: 4\naliases:\n  - kyoto\n---\nWe went to #kyoto and #food-market.\n";
        let chunks = chunk_note(&note("trip.md", content), &ChunkParams::default());
        assert_eq!(chunks.len(), 1);
        let c = &chunks[0];
        assert_eq!(c.metadata["title"], "Trip");
        assert_eq!(c.metadata["rating"], 4);
        assert_eq!(c.metadata["aliases"], serde_json::json!(["kyoto"]));
        assert_eq!(c.tags, vec!["#travel", "#japan", "#kyoto", "#food-market"]);
        assert!(!c.body().contains("rating"));
    }

    #[test]
    fn test_frontmatter_nested_and_quoted_values() {
        let (meta, body) = parse_frontmatter(
            "---\nauthor:\n  name: Ada\n  email: a@b.c\naliases: [\"Trip, 2024\", x]\ndraft: true\n---\nbody",
        );
        assert_eq!(body, "body");
        assert_eq!(
            meta["author"],
            serde_json::json!({"name": "Ada", "email": "a@b.c"})
        );
        assert_eq!(meta["aliases"], serde_json::json!(["Trip, 2024", "x"]));
        assert_eq!(meta["draft"], true);
        assert!(!meta.contains_key("name"));
    }

    #[test]
    fn test_frontmatter_without_mapping() {
        let (meta, body) = parse_frontmatter("---\n- just\n- a list\n---\ntext");
        assert!(meta.is_empty());
        assert_eq!(body, "text");

        let (meta, body) = parse_frontmatter("no frontmatter here");
        assert!(meta.is_empty());
        assert_eq!(body, "no frontmatter here");
    }

    #[test]
    fn test_headings_and_numbers_are_not_tags() {
        let tags = collect_tags(&serde_json::Map::new(), "# Heading\nissue #42 and #real_tag");
        assert_eq!(tags, vec!["#real_tag"]);
    }

    #[test]
    fn test_note_title() {
        assert_eq!(note_title("a/b/My Note.md"), "My Note");
        assert_eq!(note_title("plain"), "plain");
        assert_eq!(note_title(".hidden"), ".hidden");
    }
}
