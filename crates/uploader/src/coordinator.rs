//! Upload coordinator state machine.
//!
//! Drives one file through `Initial → Hashing → Verifying → Pending →
//! Success`, with `Pending ⇄ Paused` on a user toggle and any state back to
//! `Initial` on a fresh file selection. All resumability comes from the
//! server's verify answer: the coordinator never persists anything.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use chunklift_protocol::MessageType;
use chunklift_protocol::messages::{MergeRequest, MergeResponse, VerifyRequest, VerifyResponse};
use chunklift_transfer::{ChunkSpan, HashEvent, chunk_id, read_span, spawn_fingerprint, split_spans};

use crate::UploadError;
use crate::connection::ServerConnection;
use crate::types::{
    ChunkProgress, ChunkState, UploadEvent, UploadSnapshot, UploadState, UploaderConfig,
};

/// Size of the event channel to the presentation layer.
const EVENT_BUFFER_SIZE: usize = 256;

struct SelectedFile {
    path: PathBuf,
    name: String,
    size: u64,
}

struct ChunkRecord {
    span: ChunkSpan,
    state: ChunkState,
    percentage: f64,
}

struct Inner {
    /// Bumped on every file selection; stale async work checks it and bails.
    generation: u64,
    state: UploadState,
    file: Option<SelectedFile>,
    fingerprint: Option<String>,
    chunks: Vec<ChunkRecord>,
    hash_percentage: f64,
    /// Monotonic display value: never regresses between snapshots.
    display_percentage: f64,
    hash_cancel: CancellationToken,
    round_cancel: CancellationToken,
}

/// Orchestrates splitting, hashing, verification, chunk transmission and
/// merge for a single file at a time.
pub struct UploadCoordinator {
    conn: Arc<dyn ServerConnection>,
    config: UploaderConfig,
    inner: Arc<Mutex<Inner>>,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
}

impl UploadCoordinator {
    /// Creates a coordinator over the given connection.
    pub fn new(conn: Arc<dyn ServerConnection>, config: UploaderConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        Self {
            conn,
            config,
            inner: Arc::new(Mutex::new(Inner {
                generation: 0,
                state: UploadState::Initial,
                file: None,
                fingerprint: None,
                chunks: Vec::new(),
                hash_percentage: 0.0,
                display_percentage: 0.0,
                hash_cancel: CancellationToken::new(),
                round_cancel: CancellationToken::new(),
            })),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns the current coordinator state.
    pub fn state(&self) -> UploadState {
        self.inner.lock().unwrap().state
    }

    /// Returns the read model the presentation layer renders from.
    pub fn snapshot(&self) -> UploadSnapshot {
        let mut inner = self.inner.lock().unwrap();
        let computed = match inner.state {
            UploadState::Initial => 0.0,
            UploadState::Success => 100.0,
            _ if inner.chunks.is_empty() => 0.0,
            _ => {
                let mean = inner.chunks.iter().map(|c| c.percentage).sum::<f64>()
                    / inner.chunks.len() as f64;
                (mean - self.config.merge_margin).max(0.0)
            }
        };
        if computed > inner.display_percentage {
            inner.display_percentage = computed;
        }

        UploadSnapshot {
            state: inner.state,
            hash_percentage: inner.hash_percentage,
            chunks: inner
                .chunks
                .iter()
                .map(|c| ChunkProgress {
                    index: c.span.index,
                    percentage: c.percentage,
                })
                .collect(),
            aggregate_percentage: inner.display_percentage,
        }
    }

    /// Selects a file, resetting all derived state.
    ///
    /// Any in-progress hash or transmissions for the previous selection are
    /// abandoned: the hash worker stops without resolving and cancelled
    /// sends are never published by the server.
    pub fn select_file(&self, path: impl AsRef<Path>) -> Result<(), UploadError> {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or(UploadError::NoFileSelected)?;
        let size = std::fs::metadata(&path)?.len();

        {
            let mut inner = self.inner.lock().unwrap();
            inner.generation += 1;
            inner.hash_cancel.cancel();
            inner.round_cancel.cancel();
            inner.hash_cancel = CancellationToken::new();
            inner.round_cancel = CancellationToken::new();
            inner.state = UploadState::Initial;
            inner.file = Some(SelectedFile { path, name, size });
            inner.fingerprint = None;
            inner.chunks.clear();
            inner.hash_percentage = 0.0;
            inner.display_percentage = 0.0;
        }
        self.emit(UploadEvent::StateChanged(UploadState::Initial));
        Ok(())
    }

    /// Runs the full upload flow for the selected file.
    ///
    /// Returns once the transfer reaches `Success`, is paused, or fails.
    /// Failed transmissions leave their chunks unacknowledged and surface
    /// as [`UploadError::TransferIncomplete`]; resuming retries them.
    pub async fn start_upload(&self) -> Result<(), UploadError> {
        let (generation, path, name, size, hash_cancel) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != UploadState::Initial {
                return Err(UploadError::InvalidState(
                    "upload already started for this file",
                ));
            }
            let file = inner.file.as_ref().ok_or(UploadError::NoFileSelected)?;
            let path = file.path.clone();
            let name = file.name.clone();
            let size = file.size;
            inner.state = UploadState::Hashing;
            (
                inner.generation,
                path,
                name,
                size,
                inner.hash_cancel.clone(),
            )
        };
        self.emit(UploadEvent::StateChanged(UploadState::Hashing));

        // Split, then hash all spans sequentially off the async runtime.
        let spans = split_spans(size, self.config.chunk_count);
        let mut rx = spawn_fingerprint(path.clone(), spans.clone(), hash_cancel);

        let mut fingerprint = None;
        while let Some(event) = rx.recv().await {
            match event {
                HashEvent::Progress { percentage } => {
                    {
                        let mut inner = self.inner.lock().unwrap();
                        if inner.generation != generation {
                            return Ok(());
                        }
                        if percentage > inner.hash_percentage {
                            inner.hash_percentage = percentage;
                        }
                    }
                    self.emit(UploadEvent::HashProgress { percentage });
                }
                HashEvent::Done { fingerprint: f } => fingerprint = Some(f),
                HashEvent::Failed { error } => {
                    {
                        let mut inner = self.inner.lock().unwrap();
                        if inner.generation == generation {
                            inner.state = UploadState::Initial;
                        }
                    }
                    self.emit(UploadEvent::Failed {
                        error: error.clone(),
                    });
                    self.emit(UploadEvent::StateChanged(UploadState::Initial));
                    return Err(UploadError::Hashing(error));
                }
            }
        }
        let Some(fingerprint) = fingerprint else {
            // Cancelled by a new file selection; nothing to do.
            debug!("hash abandoned, upload not started");
            return Ok(());
        };

        {
            let mut inner = self.inner.lock().unwrap();
            if inner.generation != generation {
                return Ok(());
            }
            inner.hash_percentage = 100.0;
            inner.fingerprint = Some(fingerprint.clone());
            inner.state = UploadState::Verifying;
        }
        self.emit(UploadEvent::StateChanged(UploadState::Verifying));
        debug!(%fingerprint, chunks = spans.len(), "file hashed");

        let verify = self.verify(&name, &fingerprint).await?;
        if !verify.should_upload {
            // The server already holds this content; no transfer needed.
            self.finish(generation);
            return Ok(());
        }

        {
            let mut inner = self.inner.lock().unwrap();
            if inner.generation != generation {
                return Ok(());
            }
            inner.chunks = spans
                .iter()
                .map(|span| {
                    let already = verify
                        .uploaded_chunks
                        .contains(&chunk_id(&fingerprint, span.index));
                    ChunkRecord {
                        span: *span,
                        state: if already {
                            ChunkState::Acked
                        } else {
                            ChunkState::Pending
                        },
                        percentage: if already { 100.0 } else { 0.0 },
                    }
                })
                .collect();
            inner.state = UploadState::Pending;
            inner.round_cancel = CancellationToken::new();
        }
        self.emit(UploadEvent::StateChanged(UploadState::Pending));

        self.run_transfer_round(generation, &path, &name, &fingerprint)
            .await
    }

    /// Toggles between `Pending` and `Paused`.
    ///
    /// Pausing cancels every in-flight transmission; acked chunks stay
    /// acked. Resuming re-queries verify for the authoritative stored set
    /// and re-issues only chunks not yet acknowledged, then drives the
    /// transfer to completion like [`start_upload`](Self::start_upload).
    pub async fn toggle_pause(&self) -> Result<UploadState, UploadError> {
        enum Action {
            Paused,
            Resume {
                generation: u64,
                path: PathBuf,
                name: String,
                fingerprint: String,
            },
        }

        let action = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                UploadState::Pending => {
                    inner.round_cancel.cancel();
                    inner.state = UploadState::Paused;
                    Action::Paused
                }
                UploadState::Paused => {
                    let file = inner.file.as_ref().ok_or(UploadError::NoFileSelected)?;
                    let path = file.path.clone();
                    let name = file.name.clone();
                    let fingerprint = inner
                        .fingerprint
                        .clone()
                        .ok_or(UploadError::InvalidState("no fingerprint computed"))?;
                    inner.state = UploadState::Pending;
                    inner.round_cancel = CancellationToken::new();
                    Action::Resume {
                        generation: inner.generation,
                        path,
                        name,
                        fingerprint,
                    }
                }
                _ => {
                    return Err(UploadError::InvalidState(
                        "pause only toggles a pending or paused upload",
                    ));
                }
            }
        };

        match action {
            Action::Paused => {
                self.emit(UploadEvent::StateChanged(UploadState::Paused));
                Ok(UploadState::Paused)
            }
            Action::Resume {
                generation,
                path,
                name,
                fingerprint,
            } => {
                self.emit(UploadEvent::StateChanged(UploadState::Pending));

                // The server is the authority on what survived the pause.
                let verify = self.verify(&name, &fingerprint).await?;
                if !verify.should_upload {
                    self.finish(generation);
                    return Ok(UploadState::Success);
                }

                {
                    let mut inner = self.inner.lock().unwrap();
                    if inner.generation != generation {
                        return Ok(inner.state);
                    }
                    for chunk in inner.chunks.iter_mut() {
                        if verify
                            .uploaded_chunks
                            .contains(&chunk_id(&fingerprint, chunk.span.index))
                        {
                            chunk.state = ChunkState::Acked;
                            chunk.percentage = 100.0;
                        }
                    }
                }

                self.run_transfer_round(generation, &path, &name, &fingerprint)
                    .await?;
                Ok(self.state())
            }
        }
    }

    /// Issues one transmission per unacknowledged chunk, joins them all,
    /// and requests the merge once everything acked.
    async fn run_transfer_round(
        &self,
        generation: u64,
        path: &Path,
        name: &str,
        fingerprint: &str,
    ) -> Result<(), UploadError> {
        let (work, chunk_count, cancel) = {
            let inner = self.inner.lock().unwrap();
            if inner.generation != generation {
                return Ok(());
            }
            let work: Vec<ChunkSpan> = inner
                .chunks
                .iter()
                .filter(|c| c.state != ChunkState::Acked)
                .map(|c| c.span)
                .collect();
            (work, inner.chunks.len(), inner.round_cancel.clone())
        };

        debug!(missing = work.len(), total = chunk_count, "transfer round");

        // Bounded fan-out: transmissions queue on the semaphore instead of
        // all hitting the transport at once.
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_chunks.max(1)));
        let mut tasks = JoinSet::new();

        for span in work {
            let conn = Arc::clone(&self.conn);
            let inner = Arc::clone(&self.inner);
            let events = self.events_tx.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let path = path.to_path_buf();
            let name = name.to_string();
            let fingerprint = fingerprint.to_string();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if cancel.is_cancelled() {
                    return;
                }

                let index = span.index;
                mark_chunk(&inner, &events, generation, index, ChunkState::InFlight, 0.0);

                let read = tokio::task::spawn_blocking({
                    let path = path.clone();
                    move || read_span(&path, &span)
                })
                .await;
                let data = match read {
                    Ok(Ok(data)) => data,
                    Ok(Err(e)) => {
                        warn!(index, "failed to read chunk: {e}");
                        mark_chunk(&inner, &events, generation, index, ChunkState::Pending, 0.0);
                        let _ = events.try_send(UploadEvent::ChunkFailed {
                            index,
                            error: e.to_string(),
                        });
                        return;
                    }
                    Err(e) => {
                        warn!(index, "chunk read task failed: {e}");
                        mark_chunk(&inner, &events, generation, index, ChunkState::Pending, 0.0);
                        return;
                    }
                };

                let header = serde_json::json!({
                    "fileName": name,
                    "fileHash": fingerprint,
                    "chunkId": chunk_id(&fingerprint, index),
                });

                tokio::select! {
                    _ = cancel.cancelled() => {
                        // Abandoned mid-flight: the server never publishes a
                        // temp write it did not finish receiving.
                        let mut guard = inner.lock().unwrap();
                        if guard.generation == generation
                            && let Some(chunk) = guard.chunks.get_mut(index)
                            && chunk.state == ChunkState::InFlight
                        {
                            chunk.state = ChunkState::Pending;
                        }
                    }
                    result = conn.send_chunk(&header, &data) => match result {
                        Ok(_ack) => {
                            mark_chunk(&inner, &events, generation, index, ChunkState::Acked, 100.0);
                        }
                        Err(e) => {
                            warn!(index, "chunk transmission failed: {e}");
                            mark_chunk(&inner, &events, generation, index, ChunkState::Pending, 0.0);
                            let _ = events.try_send(UploadEvent::ChunkFailed {
                                index,
                                error: e.to_string(),
                            });
                        }
                    }
                }
            });
        }

        // Explicit join: merge must never race an in-flight chunk write.
        while tasks.join_next().await.is_some() {}

        enum Outcome {
            Stale,
            Paused,
            Incomplete(Vec<usize>),
            Complete,
        }
        let outcome = {
            let inner = self.inner.lock().unwrap();
            if inner.generation != generation {
                Outcome::Stale
            } else if inner.state == UploadState::Paused {
                Outcome::Paused
            } else {
                let failed: Vec<usize> = inner
                    .chunks
                    .iter()
                    .filter(|c| c.state != ChunkState::Acked)
                    .map(|c| c.span.index)
                    .collect();
                if failed.is_empty() {
                    Outcome::Complete
                } else {
                    Outcome::Incomplete(failed)
                }
            }
        };

        match outcome {
            Outcome::Stale | Outcome::Paused => Ok(()),
            Outcome::Incomplete(failed) => Err(UploadError::TransferIncomplete { failed }),
            Outcome::Complete => {
                self.merge(name, fingerprint, chunk_count as u32).await?;
                self.finish(generation);
                Ok(())
            }
        }
    }

    async fn verify(&self, name: &str, fingerprint: &str) -> Result<VerifyResponse, UploadError> {
        let req = VerifyRequest {
            file_name: name.to_string(),
            file_hash: fingerprint.to_string(),
        };
        let payload = serde_json::to_value(&req)?;
        let resp = self.conn.send_request(MessageType::Verify, &payload).await?;
        resp.parse_payload::<VerifyResponse>()?
            .ok_or(UploadError::EmptyResponse("verify"))
    }

    async fn merge(
        &self,
        name: &str,
        fingerprint: &str,
        chunk_count: u32,
    ) -> Result<(), UploadError> {
        let req = MergeRequest {
            file_name: name.to_string(),
            file_hash: fingerprint.to_string(),
            chunk_count,
        };
        let payload = serde_json::to_value(&req)?;
        let result = self.conn.send_request(MessageType::Merge, &payload).await;
        match result {
            Ok(resp) => {
                let _: Option<MergeResponse> = resp.parse_payload()?;
                Ok(())
            }
            Err(e) => {
                self.emit(UploadEvent::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Transitions to `Success` and notifies the presentation layer.
    fn finish(&self, generation: u64) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.generation != generation {
                return;
            }
            inner.state = UploadState::Success;
            inner.display_percentage = 100.0;
        }
        self.emit(UploadEvent::StateChanged(UploadState::Success));
        self.emit(UploadEvent::Completed);
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.events_tx.try_send(event);
    }
}

/// Updates one chunk's state and notifies the presentation layer.
fn mark_chunk(
    inner: &Arc<Mutex<Inner>>,
    events: &mpsc::Sender<UploadEvent>,
    generation: u64,
    index: usize,
    state: ChunkState,
    percentage: f64,
) {
    {
        let mut guard = inner.lock().unwrap();
        if guard.generation != generation {
            return;
        }
        if let Some(chunk) = guard.chunks.get_mut(index) {
            chunk.state = state;
            chunk.percentage = percentage;
        }
    }
    let _ = events.try_send(UploadEvent::ChunkProgress { index, percentage });
}
