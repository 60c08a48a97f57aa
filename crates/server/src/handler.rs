//! Handler trait for processing protocol messages.
//!
//! Implementors provide the storage-side operations while the server
//! framework handles connection management, framing, and dispatch.

use std::future::Future;
use std::pin::Pin;

use chunklift_protocol::MessageType;
use chunklift_protocol::envelope::Message;

use crate::binary::ChunkFrameHeader;
use crate::connection::Sender;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling protocol messages from a client.
///
/// Each dispatched message runs as its own task, so chunk receives for the
/// same transfer proceed concurrently. Default implementations reply "not
/// implemented" so handlers only override what they support.
pub trait Handler: Send + Sync + 'static {
    /// Called for `verify` requests.
    fn on_verify(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg.id, 501, "verify not implemented");
        })
    }

    /// Called for a binary chunk frame.
    fn on_chunk(&self, sender: Sender, header: ChunkFrameHeader, data: Vec<u8>) -> HandlerFuture<'_> {
        let _ = data;
        Box::pin(async move {
            let _ = sender.send_error(&header.id, 501, "chunk upload not implemented");
        })
    }

    /// Called for `merge` requests.
    fn on_merge(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg.id, 501, "merge not implemented");
        })
    }

    /// Called for `ping` messages.
    fn on_ping(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Ok(reply) = msg.reply(MessageType::Pong, Option::<&()>::None) {
                let _ = sender.send_msg(reply);
            }
        })
    }

    /// Called when a client disconnects (cleanup hook).
    fn on_client_disconnected(&self) -> HandlerFuture<'_> {
        Box::pin(async {})
    }
}
