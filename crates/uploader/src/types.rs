//! Data types for the upload flow.

/// Coordinator state, as exposed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// No file chosen, or a fresh selection reset all derived state.
    Initial,
    /// Splitter and hasher are running.
    Hashing,
    /// Waiting for the server's verify answer.
    Verifying,
    /// Chunk transmissions are outstanding (or merge is in progress).
    Pending,
    /// Transmissions cancelled by the user; acked chunks stay acked.
    Paused,
    /// The server confirmed assembly of the final file.
    Success,
}

/// Upload state of a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    InFlight,
    Acked,
}

/// Per-chunk progress entry in the read model.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkProgress {
    pub index: usize,
    pub percentage: f64,
}

/// Read model the presentation layer renders from.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSnapshot {
    pub state: UploadState,
    pub hash_percentage: f64,
    pub chunks: Vec<ChunkProgress>,
    /// Mean of all chunk percentages with the merge margin applied,
    /// display-monotonic: never regresses between snapshots.
    pub aggregate_percentage: f64,
}

/// Progress event emitted by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    StateChanged(UploadState),
    HashProgress { percentage: f64 },
    ChunkProgress { index: usize, percentage: f64 },
    ChunkFailed { index: usize, error: String },
    Completed,
    Failed { error: String },
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Number of chunks to split into (the effective count can be lower
    /// for small files).
    pub chunk_count: usize,
    /// Maximum concurrent chunk transmissions.
    pub max_concurrent_chunks: usize,
    /// Points subtracted from the aggregate while the merge is not yet
    /// confirmed, so the display never shows 100% before the server does.
    pub merge_margin: f64,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            chunk_count: chunklift_transfer::DEFAULT_CHUNK_COUNT,
            max_concurrent_chunks: 4,
            merge_margin: 5.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = UploaderConfig::default();
        assert_eq!(config.chunk_count, 10);
        assert!(config.max_concurrent_chunks >= 1);
        assert!(config.merge_margin > 0.0);
    }
}
