//! Indexing progress reporting.
//!
//! The indexing pipeline emits an [`IndexingProgressEvent`] at discovery,
//! after every file, at each checkpoint, and when the run ends. Hosts plug
//! in a [`ProgressReporter`] to drive their own notices; the library ships
//! a `tracing`-backed reporter and a no-op one.

use tracing::{info, warn};

use crate::indexing::RunOutcome;

/// A single progress event for an indexing run.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexingProgressEvent {
    /// Listing the vault. Total unknown.
    Discovering { run_id: String },
    /// File set resolved; `total` files will be indexed.
    Discovered { run_id: String, total: usize },
    /// One file indexed (`n` of `total`).
    FileIndexed {
        run_id: String,
        path: String,
        chunks: usize,
        n: usize,
        total: usize,
    },
    /// One file failed; the run continues.
    FileFailed {
        run_id: String,
        path: String,
        error: String,
    },
    /// Store persisted after `n` files.
    Checkpoint { run_id: String, n: usize },
    Finished {
        run_id: String,
        outcome: RunOutcome,
        indexed: usize,
        failed: usize,
    },
}

/// Receives progress events. Called from the indexing task.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: IndexingProgressEvent);
}

/// Logs progress through `tracing`.
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn report(&self, event: IndexingProgressEvent) {
        match event {
            IndexingProgressEvent::Discovering { run_id } => {
                info!(%run_id, "discovering vault files");
            }
            IndexingProgressEvent::Discovered { run_id, total } => {
                info!(%run_id, total, "{} files to index", format_number(total));
            }
            IndexingProgressEvent::FileIndexed {
                run_id,
                path,
                chunks,
                n,
                total,
            } => {
                info!(
                    %run_id,
                    %path,
                    chunks,
                    "indexed {} / {} files",
                    format_number(n),
                    format_number(total)
                );
            }
            IndexingProgressEvent::FileFailed {
                run_id,
                path,
                error,
            } => {
                warn!(%run_id, %path, %error, "failed to index file");
            }
            IndexingProgressEvent::Checkpoint { run_id, n } => {
                info!(%run_id, n, "checkpoint saved");
            }
            IndexingProgressEvent::Finished {
                run_id,
                outcome,
                indexed,
                failed,
            } => {
                info!(%run_id, ?outcome, indexed, failed, "indexing finished");
            }
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: IndexingProgressEvent) {}
}

fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
