//! Per-connection read/write pumps and message dispatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use chunklift_protocol::MessageType;
use chunklift_protocol::envelope::Message;

use crate::binary::parse_chunk_frame;
use crate::handler::Handler;
use crate::{SEND_BUFFER_SIZE, ServerError};

/// Channel for sending replies back to a client.
///
/// Cheap to clone; every dispatched handler task gets its own.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<tungstenite::Message>,
    connected: Arc<AtomicBool>,
}

impl Sender {
    /// Queues an envelope for sending.
    pub fn send_msg(&self, msg: Message) -> Result<(), ServerError> {
        let json = serde_json::to_string(&msg)?;
        self.tx
            .try_send(tungstenite::Message::Text(json.into()))
            .map_err(|_| ServerError::SendFailed)
    }

    /// Queues an error reply addressed to `request_id`.
    pub fn send_error(
        &self,
        request_id: &str,
        code: i32,
        message: impl Into<String>,
    ) -> Result<(), ServerError> {
        self.send_msg(Message::error(request_id, code, message))
    }

    /// Returns `true` while the connection is alive.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Runs one client connection to completion.
///
/// The read loop dispatches every parsed message as its own task so slow
/// storage work on one chunk never blocks the next frame. Returns when the
/// peer disconnects or `cancel` fires.
pub(crate) async fn serve_connection<H: Handler>(
    ws_stream: WebSocketStream<TcpStream>,
    handler: Arc<H>,
    cancel: CancellationToken,
) {
    let (write, mut read) = ws_stream.split();
    let (write_tx, write_rx) = mpsc::channel(SEND_BUFFER_SIZE);
    let connected = Arc::new(AtomicBool::new(true));
    let sender = Sender {
        tx: write_tx.clone(),
        connected: Arc::clone(&connected),
    };

    let write_handle = tokio::spawn(write_pump(write, write_rx, cancel.clone()));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = read.next() => match msg {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    dispatch_text(&text, &sender, &handler);
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    dispatch_binary(&data, &sender, &handler);
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                }
                Some(Ok(tungstenite::Message::Pong(_))) => {}
                Some(Ok(tungstenite::Message::Close(_))) => {
                    debug!("client sent close frame");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket read error: {e}");
                    break;
                }
                None => {
                    debug!("WebSocket stream ended");
                    break;
                }
            }
        }
    }

    connected.store(false, Ordering::Relaxed);
    cancel.cancel();
    handler.on_client_disconnected().await;
    let _ = write_handle.await;
}

/// Parses a text frame and dispatches it to the handler in its own task.
fn dispatch_text<H: Handler>(text: &str, sender: &Sender, handler: &Arc<H>) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse message: {e}");
            return;
        }
    };

    let sender = sender.clone();
    let handler = Arc::clone(handler);
    tokio::spawn(async move {
        match &msg.msg_type {
            MessageType::Verify => handler.on_verify(sender, msg).await,
            MessageType::Merge => handler.on_merge(sender, msg).await,
            MessageType::Ping => handler.on_ping(sender, msg).await,
            other => {
                debug!(?other, id = %msg.id, "unexpected message type");
                let _ = sender.send_error(&msg.id, 400, "unexpected message type");
            }
        }
    });
}

/// Parses a binary chunk frame and dispatches it to the handler.
fn dispatch_binary<H: Handler>(data: &[u8], sender: &Sender, handler: &Arc<H>) {
    let (header, payload) = match parse_chunk_frame(data) {
        Ok(parsed) => parsed,
        Err(e) => {
            // No request id is recoverable from a malformed frame.
            warn!("dropping malformed binary frame: {e}");
            return;
        }
    };

    let sender = sender.clone();
    let handler = Arc::clone(handler);
    tokio::spawn(async move {
        handler.on_chunk(sender, header, payload).await;
    });
}

/// Writes queued messages to the WebSocket until cancellation.
async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                match msg {
                    Some(m) => {
                        if let Err(e) = write.send(m).await {
                            warn!("WebSocket write error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
