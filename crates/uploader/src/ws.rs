//! WebSocket client for the transfer protocol.
//!
//! Implements the request-response pattern with UUID correlation: every
//! outbound request (text or binary) registers a oneshot under its id, and
//! the read pump completes it when the matching envelope arrives.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use chunklift_protocol::MessageType;
use chunklift_protocol::constants::{
    WS_CHUNK_TIMEOUT, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT, WS_REQUEST_TIMEOUT,
};
use chunklift_protocol::envelope::Message;

use crate::UploadError;
use crate::connection::ServerConnection;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>;

/// WebSocket connection to a single transfer server.
pub struct WsConnection {
    write_tx: mpsc::Sender<tungstenite::Message>,
    pending: PendingMap,
    cancel: CancellationToken,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    _ping_handle: tokio::task::JoinHandle<()>,
}

impl WsConnection {
    /// Connects to a transfer server WebSocket endpoint.
    pub async fn connect(url: &str) -> Result<Self, UploadError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let write_handle = tokio::spawn(write_pump(write, write_rx, cancel.clone()));
        let read_handle = tokio::spawn(read_pump(
            read,
            Arc::clone(&pending),
            write_tx.clone(),
            cancel.clone(),
        ));
        let ping_handle = tokio::spawn(ping_pump(write_tx.clone(), cancel.clone()));

        Ok(Self {
            write_tx,
            pending,
            cancel,
            _read_handle: read_handle,
            _write_handle: write_handle,
            _ping_handle: ping_handle,
        })
    }

    /// Gracefully closes the connection.
    pub async fn close(&self) {
        self.cancel.cancel();
        let _ = self
            .write_tx
            .send(tungstenite::Message::Close(None))
            .await;
    }

    /// Registers a pending slot, sends the frame, and awaits the response.
    async fn round_trip(
        &self,
        id: String,
        frame: tungstenite::Message,
        timeout: std::time::Duration,
    ) -> Result<Message, UploadError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if self.write_tx.send(frame).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(UploadError::Closed);
        }

        let result = tokio::time::timeout(timeout, rx).await;
        // Clean up the pending entry on any exit path.
        self.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(resp)) => {
                if let Some(err) = &resp.error {
                    return Err(UploadError::Server {
                        code: err.code,
                        message: err.message.clone(),
                    });
                }
                Ok(resp)
            }
            Ok(Err(_)) => Err(UploadError::Closed),
            Err(_) => Err(UploadError::Timeout),
        }
    }
}

impl ServerConnection for WsConnection {
    fn send_request(
        &self,
        msg_type: MessageType,
        payload: &serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<Message, UploadError>> + Send + '_>> {
        let result = (|| {
            let id = uuid::Uuid::new_v4().to_string();
            let msg = Message::new(&id, msg_type, Some(payload))?;
            let json = serde_json::to_string(&msg)?;
            Ok::<_, UploadError>((id, tungstenite::Message::Text(json.into())))
        })();

        Box::pin(async move {
            let (id, frame) = result?;
            self.round_trip(id, frame, WS_REQUEST_TIMEOUT).await
        })
    }

    fn send_chunk(
        &self,
        header: &serde_json::Value,
        data: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<Message, UploadError>> + Send + '_>> {
        let result = (|| {
            let id = uuid::Uuid::new_v4().to_string();

            // Inject the correlation id into the header.
            let mut header = header.clone();
            if let Some(obj) = header.as_object_mut() {
                obj.insert("id".into(), serde_json::Value::String(id.clone()));
            }

            // Wire frame: [4 bytes BE header length][header JSON][chunk bytes].
            let header_bytes = serde_json::to_vec(&header)?;
            let mut frame = Vec::with_capacity(4 + header_bytes.len() + data.len());
            frame.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
            frame.extend_from_slice(&header_bytes);
            frame.extend_from_slice(data);

            Ok::<_, UploadError>((id, tungstenite::Message::Binary(frame.into())))
        })();

        Box::pin(async move {
            let (id, frame) = result?;
            // Chunk uploads tolerate slow disk I/O on the server side.
            self.round_trip(id, frame, WS_CHUNK_TIMEOUT).await
        })
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
        self._ping_handle.abort();
    }
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

/// Reads envelopes and completes the matching pending request.
///
/// Any incoming message resets the pong deadline; if nothing arrives within
/// [`WS_PONG_WAIT`] the connection is considered dead.
async fn read_pump<S>(
    mut read: S,
    pending: PendingMap,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let pong_deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut pong_deadline => {
                warn!("pong timeout, closing connection");
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        pong_deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                route_envelope(&text, &pending).await;
                            }
                            tungstenite::Message::Ping(data) => {
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => {
                                trace!("received pong");
                            }
                            tungstenite::Message::Close(_) => {
                                debug!("server sent close frame");
                                break;
                            }
                            _ => {}
                        }
                    }
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
    }

    cancel.cancel();
    // Dropping the pending senders wakes every waiter with `Closed`.
    pending.lock().await.clear();
}

/// Routes one text envelope to its pending request.
async fn route_envelope(text: &str, pending: &PendingMap) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse message: {e}");
            return;
        }
    };

    trace!(msg_type = ?msg.msg_type, id = %msg.id, "received message");

    let mut map = pending.lock().await;
    if let Some(tx) = map.remove(&msg.id) {
        let _ = tx.send(msg);
    } else {
        debug!(id = %msg.id, "response with no pending request, dropping");
    }
}

/// Sends periodic pings to keep the connection alive.
async fn ping_pump(write_tx: mpsc::Sender<tungstenite::Message>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(WS_PING_PERIOD);
    interval.tick().await; // Skip the immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let ping = tungstenite::Message::Ping(vec![].into());
                if write_tx.send(ping).await.is_err() {
                    break;
                }
            }
        }
    }
}
