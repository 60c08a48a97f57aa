//! Client-side upload coordination.
//!
//! The [`UploadCoordinator`] drives one file through the transfer protocol:
//! split into fixed-count chunks, fingerprint by sequential content hash,
//! ask the server which chunks it already holds, transmit only the missing
//! ones under a bounded concurrency limit, then request the merge. Pause
//! cancels in-flight transmissions; resume re-queries the server and
//! re-issues only what is still missing.
//!
//! Transport is behind the [`ServerConnection`] trait so the state machine
//! is testable with mocks; [`WsConnection`] is the real WebSocket client.

mod connection;
mod coordinator;
mod types;
mod ws;

pub use connection::ServerConnection;
pub use coordinator::UploadCoordinator;
pub use types::{
    ChunkProgress, ChunkState, UploadEvent, UploadSnapshot, UploadState, UploaderConfig,
};
pub use ws::WsConnection;

/// Errors produced by the upload coordinator and its transport.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] chunklift_transfer::TransferError),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("server error {code}: {message}")]
    Server { code: i32, message: String },

    #[error("empty {0} response")]
    EmptyResponse(&'static str),

    #[error("no file selected")]
    NoFileSelected,

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("hashing failed: {0}")]
    Hashing(String),

    #[error("transfer incomplete: chunks {failed:?} not acknowledged")]
    TransferIncomplete { failed: Vec<usize> },
}
