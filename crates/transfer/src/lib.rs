//! Client-side chunking and fingerprinting.
//!
//! A file is partitioned into a fixed number of contiguous byte spans and
//! fingerprinted by digesting every span in index order into one whole-file
//! hash. The fingerprint is what the server uses to deduplicate uploads and
//! to namespace stored chunks.

mod hash;
mod split;

pub use hash::{HashEvent, fingerprint_spans, spawn_fingerprint};
pub use split::{ChunkSpan, chunk_id, read_span, split_spans};

/// Default number of chunks a file is split into.
pub const DEFAULT_CHUNK_COUNT: usize = 10;

/// Errors produced by splitting and hashing.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hash worker failed: {0}")]
    HashWorker(String),
}
