//! Wiki-link graph built from note contents.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use tracing::debug;

use vault_search_core::chunk::note_title;
use vault_search_core::query::extract_note_references;
use vault_search_core::related::LinkGraph;

use crate::vault::{FileFilter, Vault};

#[derive(Default)]
struct Graph {
    /// Every known note path.
    notes: BTreeSet<String>,
    /// path → raw link targets written in the note
    targets: BTreeMap<String, Vec<String>>,
}

impl Graph {
    /// Resolve a link target to a note path.
    ///
    /// `folder/Note` matches by path; a bare `Note` matches by title,
    /// case-insensitively, first path in sort order.
    fn resolve(&self, target: &str) -> Option<String> {
        let target = target.strip_suffix(".md").unwrap_or(target);
        if target.contains('/') {
            let with_ext = format!("{target}.md");
            return self
                .notes
                .iter()
                .find(|p| **p == with_ext || p.as_str() == target)
                .cloned();
        }
        let wanted = target.to_lowercase();
        self.notes
            .iter()
            .find(|p| note_title(p).to_lowercase() == wanted)
            .cloned()
    }

    fn outgoing(&self, path: &str) -> Vec<String> {
        let mut out: BTreeSet<String> = BTreeSet::new();
        for target in self.targets.get(path).into_iter().flatten() {
            if let Some(resolved) = self.resolve(target) {
                if resolved != path {
                    out.insert(resolved);
                }
            }
        }
        out.into_iter().collect()
    }
}

/// [`LinkGraph`] over `[[wiki links]]`.
///
/// Links resolve lazily against the current note set, so a link written
/// before its target exists starts resolving once the target is added.
#[derive(Default)]
pub struct WikiLinkGraph {
    inner: RwLock<Graph>,
}

impl WikiLinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every note matched by `filter` and record its links.
    pub async fn build(vault: &dyn Vault, filter: &FileFilter) -> Result<Self> {
        let graph = Self::new();
        for file in vault.list_files().await? {
            if !filter.matches(&file.path) {
                continue;
            }
            let content = vault.read_file(&file.path).await?;
            graph.update_note(&file.path, &content);
        }
        debug!(notes = graph.note_count(), "link graph built");
        Ok(graph)
    }

    /// Record (or replace) the links of one note.
    pub fn update_note(&self, path: &str, content: &str) {
        let mut graph = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        graph.notes.insert(path.to_string());
        graph
            .targets
            .insert(path.to_string(), extract_note_references(content));
    }

    pub fn remove_note(&self, path: &str) {
        let mut graph = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        graph.notes.remove(path);
        graph.targets.remove(path);
    }

    pub fn note_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .notes
            .len()
    }
}

impl LinkGraph for WikiLinkGraph {
    fn linked_notes(&self, path: &str) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .outgoing(path)
    }

    fn backlinked_notes(&self, path: &str) -> Vec<String> {
        let graph = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        graph
            .targets
            .keys()
            .filter(|source| source.as_str() != path)
            .filter(|source| graph.outgoing(source).iter().any(|p| p == path))
            .cloned()
            .collect()
    }
}
