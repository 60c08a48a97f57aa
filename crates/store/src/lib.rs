//! Server-side chunk store.
//!
//! Chunks are persisted under a directory namespace keyed by the file
//! fingerprint; completed files live next to those directories, keyed by
//! fingerprint plus the original name's extension. All resumability is
//! derived from what exists on disk; there is no in-memory session state.

mod paths;
mod store;

pub use paths::{chunk_index, file_extension, validate_store_name};
pub use store::{ChunkStore, SessionState};

/// Errors produced by the chunk store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("chunks incomplete: missing indices {missing:?}")]
    ChunksIncomplete { missing: Vec<u32> },

    #[error("unexpected chunk: {0}")]
    UnexpectedChunk(String),
}
