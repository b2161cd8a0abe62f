//! # Vault Search
//!
//! Local-first hybrid retrieval over a vault of markdown notes.
//!
//! Notes are split into header-prefixed chunks, embedded under a rate
//! limit, and stored in a partitioned on-disk store. Queries blend vector
//! similarity with lexical relevance, pull in explicitly referenced notes,
//! and can be reranked by a cross-encoder.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌────────────────┐   ┌──────────────┐
//! │  Vault  │──▶│ IndexingPipeline│──▶│  ChunkStore  │
//! │ (notes) │   │ chunk + embed  │   │ partitions   │
//! └─────────┘   └────────────────┘   └──────┬───────┘
//!                                           │
//!                   ┌───────────────────────┤
//!                   ▼                       ▼
//!            ┌──────────────┐        ┌──────────────┐
//!            │HybridRetriever│       │RemoteRetriever│
//!            └──────────────┘        └──────────────┘
//!                   ▲                       ▲
//!                   └──── BackendSelector ──┘
//! ```
//!
//! Pure logic (chunking, scoring, rerank merging, related notes) lives in
//! [`vault_search_core`]; this crate adds the runtime, storage and HTTP.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`backend`] | Choose local, legacy or remote backend |
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | HTTP embedding providers |
//! | [`error`] | Typed error taxonomy |
//! | [`indexing`] | Rate-limited indexing pipeline |
//! | [`links`] | Wiki-link graph |
//! | [`progress`] | Indexing progress reporting |
//! | [`rate_limit`] | Request spacing |
//! | [`remote`] | Remote hybrid-search client |
//! | [`rerank`] | HTTP rerank provider |
//! | [`retriever`] | Per-query retrieval |
//! | [`rewrite`] | HyDE query rewriting |
//! | [`store`] | Partitioned persistent chunk store |
//! | [`vault`] | Vault access and file filtering |

pub mod backend;
pub mod config;
pub mod embedding;
pub mod error;
pub mod indexing;
pub mod links;
pub mod progress;
pub mod rate_limit;
pub mod remote;
pub mod rerank;
pub mod retriever;
pub mod rewrite;
pub mod store;
pub mod vault;

#[cfg(test)]
mod testing;

pub use vault_search_core as core;
