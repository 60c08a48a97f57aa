//! The storage-backed [`Handler`] implementing verify / receive-chunk / merge.

use std::sync::Arc;

use tracing::{debug, warn};

use chunklift_protocol::MessageType;
use chunklift_protocol::envelope::Message;
use chunklift_protocol::messages::{
    CHUNK_STORED, CHUNKS_MERGED, ChunkAck, FILE_ALREADY_EXISTS, MergeRequest, MergeResponse,
    VerifyRequest, VerifyResponse,
};
use chunklift_store::{ChunkStore, StoreError};

use crate::binary::ChunkFrameHeader;
use crate::connection::Sender;
use crate::handler::{Handler, HandlerFuture};

/// Implements the transfer protocol over a [`ChunkStore`].
///
/// Stateless between requests: every operation derives what it needs from
/// the store, so any number of handlers and connections can share one
/// store. Blocking filesystem work runs on the blocking pool.
pub struct TransferHandler {
    store: Arc<ChunkStore>,
}

impl TransferHandler {
    /// Creates a handler over the given store.
    pub fn new(store: Arc<ChunkStore>) -> Self {
        Self { store }
    }
}

/// Maps a store error to a wire error code.
///
/// Bad names are the caller's fault (400), an incomplete or inconsistent
/// merge is a conflict with stored state (409), everything else is a
/// storage failure (500).
fn error_code(err: &StoreError) -> i32 {
    match err {
        StoreError::InvalidName(_) => 400,
        StoreError::ChunksIncomplete { .. } | StoreError::UnexpectedChunk(_) => 409,
        StoreError::Io(_) => 500,
    }
}

impl Handler for TransferHandler {
    fn on_verify(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: VerifyRequest = match msg.parse_payload() {
                Ok(Some(req)) => req,
                Ok(None) => {
                    let _ = sender.send_error(&msg.id, 400, "missing verify payload");
                    return;
                }
                Err(e) => {
                    let _ = sender.send_error(&msg.id, 400, format!("invalid verify payload: {e}"));
                    return;
                }
            };

            let store = Arc::clone(&self.store);
            let result = tokio::task::spawn_blocking(move || {
                store.derive_session_state(&req.file_name, &req.file_hash)
            })
            .await;

            match result {
                Ok(Ok(state)) => {
                    debug!(
                        id = %msg.id,
                        has_final = state.has_final,
                        stored = state.stored_chunk_ids.len(),
                        "verify"
                    );
                    let resp = VerifyResponse {
                        should_upload: !state.has_final,
                        uploaded_chunks: state.stored_chunk_ids,
                    };
                    if let Ok(reply) = msg.reply(MessageType::VerifyResponse, Some(&resp)) {
                        let _ = sender.send_msg(reply);
                    }
                }
                Ok(Err(e)) => {
                    let _ = sender.send_error(&msg.id, error_code(&e), e.to_string());
                }
                Err(e) => {
                    warn!("verify task failed: {e}");
                    let _ = sender.send_error(&msg.id, 500, "internal error");
                }
            }
        })
    }

    fn on_chunk(&self, sender: Sender, header: ChunkFrameHeader, data: Vec<u8>) -> HandlerFuture<'_> {
        Box::pin(async move {
            if header.file_name.is_empty() || header.file_hash.is_empty() || header.chunk_id.is_empty()
            {
                let _ = sender.send_error(&header.id, 400, "missing chunk header fields");
                return;
            }

            let store = Arc::clone(&self.store);
            let ChunkFrameHeader {
                id,
                file_name,
                file_hash,
                chunk_id,
            } = header;

            let result = tokio::task::spawn_blocking(move || {
                // Reject early once the final file exists; the chunk bytes
                // are discarded without touching the store.
                if store.has_final(&file_name, &file_hash)? {
                    return Ok(ChunkAck {
                        chunk_id,
                        already_complete: true,
                        message: FILE_ALREADY_EXISTS.into(),
                    });
                }
                store.publish_chunk(&file_hash, &chunk_id, &data)?;
                Ok::<_, StoreError>(ChunkAck {
                    chunk_id,
                    already_complete: false,
                    message: CHUNK_STORED.into(),
                })
            })
            .await;

            match result {
                Ok(Ok(ack)) => {
                    if let Ok(reply) = Message::new(&id, MessageType::ChunkAck, Some(&ack)) {
                        let _ = sender.send_msg(reply);
                    }
                }
                Ok(Err(e)) => {
                    // A failed publish is a hard failure for this chunk only;
                    // the client's resume path will retransmit it.
                    let _ = sender.send_error(&id, error_code(&e), e.to_string());
                }
                Err(e) => {
                    warn!("chunk task failed: {e}");
                    let _ = sender.send_error(&id, 500, "internal error");
                }
            }
        })
    }

    fn on_merge(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: MergeRequest = match msg.parse_payload() {
                Ok(Some(req)) => req,
                Ok(None) => {
                    let _ = sender.send_error(&msg.id, 400, "missing merge payload");
                    return;
                }
                Err(e) => {
                    let _ = sender.send_error(&msg.id, 400, format!("invalid merge payload: {e}"));
                    return;
                }
            };

            let store = Arc::clone(&self.store);
            let result = tokio::task::spawn_blocking(move || {
                store.merge(&req.file_name, &req.file_hash, req.chunk_count)
            })
            .await;

            match result {
                Ok(Ok(path)) => {
                    debug!(id = %msg.id, path = %path.display(), "merge complete");
                    let resp = MergeResponse {
                        message: CHUNKS_MERGED.into(),
                    };
                    if let Ok(reply) = msg.reply(MessageType::MergeResponse, Some(&resp)) {
                        let _ = sender.send_msg(reply);
                    }
                }
                Ok(Err(e)) => {
                    let _ = sender.send_error(&msg.id, error_code(&e), e.to_string());
                }
                Err(e) => {
                    warn!("merge task failed: {e}");
                    let _ = sender.send_error(&msg.id, 500, "internal error");
                }
            }
        })
    }
}
