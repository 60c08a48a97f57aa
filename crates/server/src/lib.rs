//! WebSocket server for the chunklift transfer protocol.
//!
//! Accepts any number of concurrent client connections, dispatches JSON
//! envelopes and binary chunk frames to a [`Handler`], and manages the
//! connection lifecycle. The bundled [`TransferHandler`] implements the
//! verify / receive-chunk / merge operations over a [`chunklift_store`]
//! chunk store; handlers hold no cross-request state, everything is
//! derived from the store per request.

mod binary;
mod connection;
mod handler;
mod server;
mod transfer;

pub use binary::{ChunkFrameHeader, FrameError, encode_chunk_frame, parse_chunk_frame};
pub use connection::Sender;
pub use handler::{Handler, HandlerFuture};
pub use server::{ServerConfig, TransferServer};
pub use transfer::TransferHandler;

/// Send buffer capacity per connection.
///
/// Each stored chunk produces one ack in addition to verify/merge replies.
/// A saturated buffer makes `try_send()` drop messages, so leave headroom.
pub const SEND_BUFFER_SIZE: usize = 2048;

/// Errors produced by the transfer server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("send queue full or connection closed")]
    SendFailed,
}
