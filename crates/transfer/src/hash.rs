use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::split::ChunkSpan;
use crate::TransferError;

/// Event emitted by the fingerprint worker.
#[derive(Debug, Clone, PartialEq)]
pub enum HashEvent {
    /// One more span has been digested. `percentage` is `(done / total) * 100`.
    Progress { percentage: f64 },
    /// All spans digested; carries the hex-encoded whole-file fingerprint.
    Done { fingerprint: String },
    /// The worker hit an I/O error and stopped.
    Failed { error: String },
}

/// Digests every span of `path` in index order and returns the fingerprint.
///
/// The digest is order-dependent: spans must be fed strictly sequentially,
/// never in parallel. Two files with identical bytes and identical span
/// tables always produce identical fingerprints.
pub fn fingerprint_spans(path: &Path, spans: &[ChunkSpan]) -> Result<String, TransferError> {
    let fingerprint = digest_spans(path, spans, |_| true)?;
    // The tick callback never aborts, so a fingerprint is always produced.
    fingerprint.ok_or_else(|| TransferError::HashWorker("digest aborted".into()))
}

/// Spawns the fingerprint computation on a blocking worker.
///
/// Progress and the terminal result arrive on the returned channel. The
/// worker checks `cancel` between spans: once cancelled it exits without
/// ever emitting [`HashEvent::Done`], and dropping the receiver tears the
/// worker down the same way.
pub fn spawn_fingerprint(
    path: PathBuf,
    spans: Vec<ChunkSpan>,
    cancel: CancellationToken,
) -> mpsc::Receiver<HashEvent> {
    let (tx, rx) = mpsc::channel(spans.len().max(1) + 1);

    tokio::task::spawn_blocking(move || {
        let result = digest_spans(&path, &spans, |done| {
            if cancel.is_cancelled() {
                return false;
            }
            let percentage = (done as f64 / spans.len() as f64) * 100.0;
            tx.blocking_send(HashEvent::Progress { percentage }).is_ok()
        });

        match result {
            Ok(Some(fingerprint)) => {
                let _ = tx.blocking_send(HashEvent::Done { fingerprint });
            }
            Ok(None) => {
                debug!(path = %path.display(), "fingerprint computation abandoned");
            }
            Err(e) => {
                let _ = tx.blocking_send(HashEvent::Failed {
                    error: e.to_string(),
                });
            }
        }
    });

    rx
}

/// Sequentially digests spans, calling `tick(done_count)` after each one.
///
/// Returns `Ok(None)` when `tick` asks to stop early.
fn digest_spans(
    path: &Path,
    spans: &[ChunkSpan],
    mut tick: impl FnMut(usize) -> bool,
) -> Result<Option<String>, TransferError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = Vec::new();

    for (done, span) in spans.iter().enumerate() {
        file.seek(SeekFrom::Start(span.offset))?;
        buf.resize(span.len as usize, 0);
        file.read_exact(&mut buf)?;
        hasher.update(&buf);

        if !tick(done + 1) {
            return Ok(None);
        }
    }

    Ok(Some(hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split::split_spans;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn fingerprint_deterministic() {
        let dir = TempDir::new().unwrap();
        let data = vec![42u8; 5000];
        let path = create_test_file(dir.path(), "a.bin", &data);

        let spans = split_spans(data.len() as u64, 10);
        let f1 = fingerprint_spans(&path, &spans).unwrap();
        let f2 = fingerprint_spans(&path, &spans).unwrap();
        assert_eq!(f1, f2);
        assert_eq!(f1.len(), 64); // SHA-256 = 64 hex chars.
    }

    #[test]
    fn identical_content_same_fingerprint_across_files() {
        let dir = TempDir::new().unwrap();
        let data = b"same bytes in two differently named files";
        let a = create_test_file(dir.path(), "a.bin", data);
        let b = create_test_file(dir.path(), "b.bin", data);

        let spans = split_spans(data.len() as u64, 4);
        assert_eq!(
            fingerprint_spans(&a, &spans).unwrap(),
            fingerprint_spans(&b, &spans).unwrap()
        );
    }

    #[test]
    fn different_content_different_fingerprint() {
        let dir = TempDir::new().unwrap();
        let a = create_test_file(dir.path(), "a.bin", &[0u8; 1000]);
        let mut data = vec![0u8; 1000];
        data[999] = 1;
        let b = create_test_file(dir.path(), "b.bin", &data);

        let spans = split_spans(1000, 10);
        assert_ne!(
            fingerprint_spans(&a, &spans).unwrap(),
            fingerprint_spans(&b, &spans).unwrap()
        );
    }

    #[tokio::test]
    async fn worker_reports_progress_then_done() {
        let dir = TempDir::new().unwrap();
        let data = vec![7u8; 100];
        let path = create_test_file(dir.path(), "a.bin", &data);
        let spans = split_spans(100, 4);
        let expected = fingerprint_spans(&path, &spans).unwrap();

        let mut rx = spawn_fingerprint(path, spans, CancellationToken::new());

        let mut last_percentage = 0.0;
        let mut fingerprint = None;
        while let Some(event) = rx.recv().await {
            match event {
                HashEvent::Progress { percentage } => {
                    assert!(percentage >= last_percentage, "progress must not regress");
                    last_percentage = percentage;
                }
                HashEvent::Done { fingerprint: f } => fingerprint = Some(f),
                HashEvent::Failed { error } => panic!("unexpected failure: {error}"),
            }
        }
        assert_eq!(last_percentage, 100.0);
        assert_eq!(fingerprint.as_deref(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn cancelled_worker_never_emits_done() {
        let dir = TempDir::new().unwrap();
        let data = vec![7u8; 1000];
        let path = create_test_file(dir.path(), "a.bin", &data);
        let spans = split_spans(1000, 10);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut rx = spawn_fingerprint(path, spans, cancel);

        while let Some(event) = rx.recv().await {
            assert!(
                !matches!(event, HashEvent::Done { .. }),
                "cancelled hash must not resolve"
            );
        }
    }

    #[tokio::test]
    async fn missing_file_reports_failure() {
        let spans = split_spans(10, 2);
        let mut rx = spawn_fingerprint(
            PathBuf::from("/nonexistent/chunklift-test.bin"),
            spans,
            CancellationToken::new(),
        );

        let mut failed = false;
        while let Some(event) = rx.recv().await {
            if matches!(event, HashEvent::Failed { .. }) {
                failed = true;
            }
        }
        assert!(failed);
    }

    #[test]
    fn empty_file_fingerprints() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "empty.bin", b"");
        let spans = split_spans(0, 10);
        let fingerprint = fingerprint_spans(&path, &spans).unwrap();
        // SHA-256 of the empty input.
        assert_eq!(
            fingerprint,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
