use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::paths::{chunk_index, file_extension, validate_store_name};
use crate::StoreError;

/// Everything the server knows about a transfer, derived fresh from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// The final merged file already exists for this fingerprint.
    pub has_final: bool,
    /// Chunk ids currently stored under the fingerprint, sorted by index.
    pub stored_chunk_ids: Vec<String>,
}

/// Durable, content-addressed persistence for chunks and merged files.
///
/// Layout under the root:
/// - `<fingerprint>/<chunk_id>`: one blob per received chunk
/// - `<fingerprint><ext>`: the finished file, named by fingerprint plus
///   the original file name's extension
///
/// Dot-prefixed entries are private temporaries and never visible to
/// readers; publication is always a rename.
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunk_dir(&self, fingerprint: &str) -> PathBuf {
        self.root.join(fingerprint)
    }

    fn final_path(&self, file_name: &str, fingerprint: &str) -> PathBuf {
        self.root
            .join(format!("{fingerprint}{}", file_extension(file_name)))
    }

    /// Derives the current transfer state for `(file_name, fingerprint)`.
    ///
    /// Pure read: computed fresh per request from directory contents, so it
    /// is safe to call repeatedly and concurrently.
    pub fn derive_session_state(
        &self,
        file_name: &str,
        fingerprint: &str,
    ) -> Result<SessionState, StoreError> {
        validate_store_name(file_name)?;
        validate_store_name(fingerprint)?;

        if self.final_path(file_name, fingerprint).is_file() {
            return Ok(SessionState {
                has_final: true,
                stored_chunk_ids: Vec::new(),
            });
        }

        let mut ids: Vec<(u32, String)> = Vec::new();
        let chunk_dir = self.chunk_dir(fingerprint);
        if chunk_dir.is_dir() {
            for entry in fs::read_dir(&chunk_dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue; // unpublished temporary
                }
                if let Some(index) = chunk_index(&name, fingerprint) {
                    ids.push((index, name));
                }
            }
        }

        ids.sort_by_key(|(index, _)| *index);
        Ok(SessionState {
            has_final: false,
            stored_chunk_ids: ids.into_iter().map(|(_, name)| name).collect(),
        })
    }

    /// Persists one chunk under the fingerprint namespace.
    ///
    /// The bytes land in a private temporary file first and become visible
    /// under `chunk_id` only through an atomic rename, so a concurrent
    /// reader never observes a partial blob. Re-publishing an existing id
    /// is not an error: the later write wins.
    pub fn publish_chunk(
        &self,
        fingerprint: &str,
        chunk_id: &str,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        validate_store_name(fingerprint)?;
        validate_store_name(chunk_id)?;
        if chunk_index(chunk_id, fingerprint).is_none() {
            return Err(StoreError::InvalidName(format!(
                "chunk id {chunk_id} does not belong to fingerprint {fingerprint}"
            )));
        }

        let chunk_dir = self.chunk_dir(fingerprint);
        fs::create_dir_all(&chunk_dir)?;

        let tmp = chunk_dir.join(format!(".{chunk_id}.{}", Uuid::new_v4()));
        let result = (|| {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, chunk_dir.join(chunk_id))
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;

        debug!(fingerprint, chunk_id, len = bytes.len(), "chunk published");
        Ok(())
    }

    /// Returns `true` if the final file for this transfer already exists.
    pub fn has_final(&self, file_name: &str, fingerprint: &str) -> Result<bool, StoreError> {
        validate_store_name(file_name)?;
        validate_store_name(fingerprint)?;
        Ok(self.final_path(file_name, fingerprint).is_file())
    }

    /// Assembles all stored chunks, in index order, into the final file.
    ///
    /// Refuses with [`StoreError::ChunksIncomplete`], deleting nothing,
    /// unless every index in `0..chunk_count` is stored. Assembly goes
    /// into a temporary file that is atomically renamed into place; the
    /// chunk directory is removed only after the rename succeeds, so a
    /// crash mid-merge can never leave a truncated final file or destroy
    /// chunks. Merging an already-merged transfer is a no-op success.
    pub fn merge(
        &self,
        file_name: &str,
        fingerprint: &str,
        chunk_count: u32,
    ) -> Result<PathBuf, StoreError> {
        validate_store_name(file_name)?;
        validate_store_name(fingerprint)?;

        let final_path = self.final_path(file_name, fingerprint);
        if final_path.is_file() {
            debug!(fingerprint, "merge skipped: final file already exists");
            return Ok(final_path);
        }

        // Enumerate and order by parsed numeric index; directory listing
        // order has no relation to upload order.
        let chunk_dir = self.chunk_dir(fingerprint);
        let mut chunks: Vec<(u32, PathBuf)> = Vec::new();
        if chunk_dir.is_dir() {
            for entry in fs::read_dir(&chunk_dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                match chunk_index(&name, fingerprint) {
                    Some(index) if index < chunk_count => chunks.push((index, entry.path())),
                    Some(_) | None => return Err(StoreError::UnexpectedChunk(name)),
                }
            }
        }
        chunks.sort_by_key(|(index, _)| *index);

        let mut present = vec![false; chunk_count as usize];
        for (index, _) in &chunks {
            present[*index as usize] = true;
        }
        let missing: Vec<u32> = (0..chunk_count).filter(|i| !present[*i as usize]).collect();
        if !missing.is_empty() {
            return Err(StoreError::ChunksIncomplete { missing });
        }

        let tmp = self
            .root
            .join(format!(".{fingerprint}.merge.{}", Uuid::new_v4()));
        let result = (|| {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for (_, path) in &chunks {
                let mut chunk = File::open(path)?;
                std::io::copy(&mut chunk, &mut writer)?;
            }
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;

        if final_path == chunk_dir {
            // An extensionless file name makes the final path collide with
            // the chunk directory; move the directory aside first.
            let consumed = self
                .root
                .join(format!(".{fingerprint}.consumed.{}", Uuid::new_v4()));
            fs::rename(&chunk_dir, &consumed)?;
            fs::rename(&tmp, &final_path)?;
            let _ = fs::remove_dir_all(&consumed);
        } else {
            fs::rename(&tmp, &final_path)?;
            if let Err(e) = fs::remove_dir_all(&chunk_dir) {
                warn!(fingerprint, "failed to remove merged chunk dir: {e}");
            }
        }

        debug!(fingerprint, chunk_count, final_path = %final_path.display(), "merge complete");
        Ok(final_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FP: &str = "deadbeefcafe";

    fn store(dir: &TempDir) -> ChunkStore {
        ChunkStore::new(dir.path().join("upload")).unwrap()
    }

    fn id(index: u32) -> String {
        format!("{FP}-{index}")
    }

    #[test]
    fn fresh_store_has_no_session_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let state = store.derive_session_state("video.mp4", FP).unwrap();
        assert!(!state.has_final);
        assert!(state.stored_chunk_ids.is_empty());
    }

    #[test]
    fn publish_then_derive_lists_chunks_sorted_by_index() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        // Publish out of order; listing must come back index-ordered.
        for index in [10, 2, 0] {
            store.publish_chunk(FP, &id(index), b"data").unwrap();
        }

        let state = store.derive_session_state("video.mp4", FP).unwrap();
        assert_eq!(state.stored_chunk_ids, vec![id(0), id(2), id(10)]);
    }

    #[test]
    fn publish_is_idempotent_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.publish_chunk(FP, &id(0), b"first").unwrap();
        store.publish_chunk(FP, &id(0), b"second").unwrap();

        let state = store.derive_session_state("video.mp4", FP).unwrap();
        assert_eq!(state.stored_chunk_ids, vec![id(0)]);

        let bytes = fs::read(store.root().join(FP).join(id(0))).unwrap();
        assert_eq!(bytes, b"second");
    }

    #[test]
    fn publish_rejects_foreign_chunk_id() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let result = store.publish_chunk(FP, "otherhash-0", b"data");
        assert!(matches!(result, Err(StoreError::InvalidName(_))));
    }

    #[test]
    fn publish_rejects_traversal_names() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.publish_chunk("../escape", "x-0", b"data").is_err());
        assert!(store.publish_chunk(FP, "../../etc/passwd", b"data").is_err());
    }

    #[test]
    fn derive_skips_unpublished_temporaries() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.publish_chunk(FP, &id(0), b"data").unwrap();

        // Simulate a crashed writer that left a temp file behind.
        fs::write(store.root().join(FP).join(".deadbeefcafe-1.partial"), b"x").unwrap();

        let state = store.derive_session_state("video.mp4", FP).unwrap();
        assert_eq!(state.stored_chunk_ids, vec![id(0)]);
    }

    #[test]
    fn merge_orders_by_index_not_arrival() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        // Arrival order 2, 0, 10, 1, ...; index 10 sorts after 2
        // numerically even though "-10" sorts before "-2" lexically.
        let mut expected = vec![Vec::new(); 11];
        for index in [2u32, 0, 10, 1, 9, 3, 4, 8, 5, 7, 6] {
            let body = format!("chunk-{index}|").into_bytes();
            store.publish_chunk(FP, &id(index), &body).unwrap();
            expected[index as usize] = body;
        }

        let final_path = store.merge("video.mp4", FP, 11).unwrap();
        assert_eq!(final_path, store.root().join(format!("{FP}.mp4")));

        let merged = fs::read(&final_path).unwrap();
        assert_eq!(merged, expected.concat());

        // Chunk directory is gone after a successful merge.
        assert!(!store.root().join(FP).exists());
    }

    #[test]
    fn merge_refuses_when_chunks_missing() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        for index in [0u32, 1, 3] {
            store.publish_chunk(FP, &id(index), b"data").unwrap();
        }

        let result = store.merge("video.mp4", FP, 5);
        match result {
            Err(StoreError::ChunksIncomplete { missing }) => {
                assert_eq!(missing, vec![2, 4]);
            }
            other => panic!("expected ChunksIncomplete, got {other:?}"),
        }

        // Refusal must not create a final file nor delete any chunk.
        assert!(!store.root().join(format!("{FP}.mp4")).exists());
        let state = store.derive_session_state("video.mp4", FP).unwrap();
        assert_eq!(state.stored_chunk_ids.len(), 3);
    }

    #[test]
    fn merge_refuses_with_no_chunks_at_all() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let result = store.merge("video.mp4", FP, 3);
        assert!(matches!(
            result,
            Err(StoreError::ChunksIncomplete { ref missing }) if missing == &[0, 1, 2]
        ));
    }

    #[test]
    fn merge_is_idempotent_after_success() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.publish_chunk(FP, &id(0), b"hello ").unwrap();
        store.publish_chunk(FP, &id(1), b"world").unwrap();

        let first = store.merge("greeting.txt", FP, 2).unwrap();
        let second = store.merge("greeting.txt", FP, 2).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read(&first).unwrap(), b"hello world");
    }

    #[test]
    fn merge_rejects_chunk_beyond_count() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.publish_chunk(FP, &id(0), b"a").unwrap();
        store.publish_chunk(FP, &id(5), b"b").unwrap();

        let result = store.merge("video.mp4", FP, 2);
        assert!(matches!(result, Err(StoreError::UnexpectedChunk(_))));
        // Nothing deleted.
        let state = store.derive_session_state("video.mp4", FP).unwrap();
        assert_eq!(state.stored_chunk_ids.len(), 2);
    }

    #[test]
    fn merge_handles_extensionless_file_name() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.publish_chunk(FP, &id(0), b"raw").unwrap();
        let final_path = store.merge("README", FP, 1).unwrap();

        assert_eq!(final_path, store.root().join(FP));
        assert!(final_path.is_file());
        assert_eq!(fs::read(&final_path).unwrap(), b"raw");
    }

    #[test]
    fn final_file_short_circuits_session_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.publish_chunk(FP, &id(0), b"all of it").unwrap();
        store.merge("video.mp4", FP, 1).unwrap();

        let state = store.derive_session_state("video.mp4", FP).unwrap();
        assert!(state.has_final);
        assert!(state.stored_chunk_ids.is_empty());
        assert!(store.has_final("video.mp4", FP).unwrap());
    }

    #[test]
    fn same_name_different_content_does_not_collide() {
        // Fingerprint-keyed finals: a second file with the same display
        // name but different bytes must still be seen as not uploaded.
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.publish_chunk(FP, &id(0), b"one").unwrap();
        store.merge("video.mp4", FP, 1).unwrap();

        let other = "0123456789ab";
        let state = store.derive_session_state("video.mp4", other).unwrap();
        assert!(!state.has_final);
    }
}
