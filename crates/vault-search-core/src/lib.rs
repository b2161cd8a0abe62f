//! # Vault Search Core
//!
//! Shared, runtime-free logic for Vault Search: the chunk data model,
//! partition routing, chunking, query parsing, hybrid scoring, the store
//! abstraction with an in-memory implementation, rerank merging, and
//! related-note ranking.
//!
//! This crate contains no tokio, filesystem I/O, or HTTP. Everything that
//! talks to the outside world (embedding models, rerankers, the vault, the
//! on-disk partitions) is expressed as a trait and implemented by the
//! `vault-search` application crate.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod partition;
pub mod query;
pub mod related;
pub mod rerank;
pub mod search;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
