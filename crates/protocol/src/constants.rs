use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for a pong response (or any incoming message).
///
/// This acts as a read deadline: if *nothing* arrives within this window
/// the connection is considered dead. Set high enough to tolerate slow
/// chunk persistence on the server side during large transfers.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send keepalive pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Maximum message size in bytes (64 MB).
///
/// Bounds a single chunk frame; a file split into the default chunk count
/// stays well under this for anything up to hundreds of megabytes.
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Timeout for request/response operations (text messages).
pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for binary chunk transmissions.
///
/// Chunk uploads may take significantly longer than text requests due to
/// disk I/O and network conditions.
pub const WS_CHUNK_TIMEOUT: Duration = Duration::from_secs(120);

/// WebSocket message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from client to server
    #[serde(rename = "verify")]
    Verify,
    #[serde(rename = "merge")]
    Merge,
    #[serde(rename = "ping")]
    Ping,

    // Responses from server to client
    #[serde(rename = "verify_response")]
    VerifyResponse,
    #[serde(rename = "chunk_ack")]
    ChunkAck,
    #[serde(rename = "merge_response")]
    MergeResponse,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_wire_names() {
        let json = serde_json::to_string(&MessageType::Verify).unwrap();
        assert_eq!(json, "\"verify\"");

        let json = serde_json::to_string(&MessageType::ChunkAck).unwrap();
        assert_eq!(json, "\"chunk_ack\"");

        let parsed: MessageType = serde_json::from_str("\"merge_response\"").unwrap();
        assert_eq!(parsed, MessageType::MergeResponse);
    }

    #[test]
    fn ping_period_shorter_than_pong_wait() {
        assert!(WS_PING_PERIOD < WS_PONG_WAIT);
    }
}
