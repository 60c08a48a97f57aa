//! Abstract connection to a transfer server.

use std::future::Future;
use std::pin::Pin;

use chunklift_protocol::MessageType;
use chunklift_protocol::envelope::Message;

use crate::UploadError;

/// Abstract connection to a transfer server.
///
/// The coordinator drives this trait instead of a concrete socket, which
/// keeps the state machine decoupled from transport and testable with
/// mocks. [`WsConnection`](crate::WsConnection) is the real implementation.
pub trait ServerConnection: Send + Sync {
    /// Sends a JSON request and waits for the correlated response.
    fn send_request(
        &self,
        msg_type: MessageType,
        payload: &serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<Message, UploadError>> + Send + '_>>;

    /// Sends one chunk as a binary frame and waits for its ack.
    ///
    /// `header` carries `fileName`, `fileHash` and `chunkId`; the
    /// implementation injects the correlation id.
    fn send_chunk(
        &self,
        header: &serde_json::Value,
        data: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<Message, UploadError>> + Send + '_>>;
}
