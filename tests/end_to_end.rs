use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use vault_search::backend::{BackendKind, BackendSelector};
use vault_search::config::{load_config, Config};
use vault_search::indexing::{FileEvent, RunOutcome};
use vault_search::links::WikiLinkGraph;
use vault_search::retriever::CancelFlag;
use vault_search::vault::{FileFilter, FsVault};
use vault_search_core::models::{ResultSource, RetrieverOptions};
use vault_search_core::related::find_related;
use vault_search_core::store::{ChunkFilter, Store};
use vault_search_core::testing::HashEmbedder;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let vault_dir = root.join("vault");
    fs::create_dir_all(vault_dir.join(".obsidian")).unwrap();
    fs::write(vault_dir.join("note1.md"), "Hello world").unwrap();
    fs::write(vault_dir.join("note2.md"), "Hello [[note1]]").unwrap();
    fs::write(vault_dir.join(".obsidian/workspace.md"), "ignored").unwrap();

    let config_content = format!(
        r#"[store]
dir = "{}/store"
num_partitions = 3

[indexing]
include_globs = ["**/*.md"]
checkpoint_interval = 1
embedding_requests_per_second = 1000.0

[retrieval]
min_similarity_score = 0.0
max_k = 5
"#,
        root.display()
    );
    fs::write(root.join("vault-search.toml"), config_content).unwrap();

    (tmp, root)
}

fn options(config: &Config) -> RetrieverOptions {
    RetrieverOptions {
        min_similarity_score: config.retrieval.min_similarity_score,
        max_k: config.retrieval.max_k,
        ..RetrieverOptions::default()
    }
}

async fn selector(root: &Path, config: &Config) -> (BackendSelector, Arc<WikiLinkGraph>) {
    let vault = Arc::new(FsVault::new(root.join("vault")).unwrap());
    let filter =
        FileFilter::new(&config.indexing.include_globs, &config.indexing.exclude_globs).unwrap();
    let links = Arc::new(WikiLinkGraph::build(vault.as_ref(), &filter).await.unwrap());
    let selector = BackendSelector::new(vault, Arc::new(HashEmbedder::new("hash", 32)))
        .with_link_graph(links.clone());
    (selector, links)
}

#[tokio::test]
async fn test_explicit_reference_end_to_end() {
    let (_tmp, root) = setup_test_env();
    let config = load_config(&root.join("vault-search.toml")).unwrap();
    let (selector, _links) = selector(&root, &config).await;

    let backend = selector.get_active_retriever(&config).await.unwrap();
    assert_eq!(backend.kind, BackendKind::Local);
    let pipeline = backend.pipeline.clone().unwrap();
    let store = backend.store.clone().unwrap();

    let report = pipeline.index_vault(false).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.indexed, 2);
    assert!(root.join("store/vault-search-metadata.json").exists());

    let docs = backend
        .retriever
        .retrieve("[[note1]]", &options(&config), &CancelFlag::new())
        .await;
    assert_eq!(docs[0].path, "note1.md");
    assert_eq!(docs[0].score, 1.0);
    assert_eq!(docs[0].source, ResultSource::Explicit);
    assert!(docs[0].content.ends_with("Hello world"));

    fs::remove_file(root.join("vault/note1.md")).unwrap();
    store.remove_by_path("note1.md").await.unwrap();
    let docs = backend
        .retriever
        .retrieve("[[note1]]", &options(&config), &CancelFlag::new())
        .await;
    assert!(docs
        .iter()
        .all(|d| !(d.path == "note1.md" && d.source == ResultSource::Explicit)));
}

#[tokio::test]
async fn test_store_survives_restart() {
    let (_tmp, root) = setup_test_env();
    let config = load_config(&root.join("vault-search.toml")).unwrap();

    {
        let (selector, _) = selector(&root, &config).await;
        let backend = selector.get_active_retriever(&config).await.unwrap();
        backend.pipeline.clone().unwrap().index_vault(false).await.unwrap();
    }

    let (selector, _) = selector(&root, &config).await;
    let backend = selector.get_active_retriever(&config).await.unwrap();
    let store = backend.store.clone().unwrap();
    assert_eq!(store.count().await.unwrap(), 2);
    assert_eq!(store.num_partitions(), 3);

    let report = backend.pipeline.clone().unwrap().index_vault(false).await.unwrap();
    assert_eq!(report.total, 0);
}

#[tokio::test]
async fn test_related_notes_and_file_events() {
    let (_tmp, root) = setup_test_env();
    let config = load_config(&root.join("vault-search.toml")).unwrap();
    let (selector, links) = selector(&root, &config).await;
    let backend = selector.get_active_retriever(&config).await.unwrap();
    let pipeline = backend.pipeline.clone().unwrap();
    let store = backend.store.clone().unwrap();
    pipeline.index_vault(false).await.unwrap();

    let related = find_related(store.as_ref(), links.as_ref(), "note1.md")
        .await
        .unwrap();
    let note2 = related.iter().find(|r| r.path == "note2.md").unwrap();
    assert!(note2.has_backlinks);
    assert!(note2.similarity_score > 0.0);

    fs::write(root.join("vault/note3.md"), "Links to [[note2]]").unwrap();
    pipeline
        .handle_event(FileEvent::Modified("note3.md".into()))
        .await
        .unwrap();
    let note3 = store
        .find(&ChunkFilter::Path("note3.md".into()))
        .await
        .unwrap();
    assert_eq!(note3.len(), 1);

    let related = find_related(store.as_ref(), links.as_ref(), "note2.md")
        .await
        .unwrap();
    assert!(related.iter().any(|r| r.path == "note3.md" && r.has_backlinks));
}
