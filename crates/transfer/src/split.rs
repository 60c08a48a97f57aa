use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::TransferError;

/// One contiguous byte range of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Position of this span in the split order.
    pub index: usize,
    /// Byte offset within the file.
    pub offset: u64,
    /// Length in bytes.
    pub len: u64,
}

/// Returns the storage id for a chunk: `<fingerprint>-<index>`.
///
/// Unique per (fingerprint, index) pair; files with different content get
/// different fingerprints and therefore disjoint id sets.
pub fn chunk_id(fingerprint: &str, index: usize) -> String {
    format!("{fingerprint}-{index}")
}

/// Partitions a file of `total_size` bytes into at most `requested_count`
/// contiguous, non-overlapping spans covering `[0, total_size)`.
///
/// Every span is `ceil(total_size / count)` bytes except a possibly shorter
/// final span. Deterministic: the same `(total_size, requested_count)`
/// always yields the same table. The count is clamped so no span is below
/// one byte; a zero-byte file yields exactly one empty span.
pub fn split_spans(total_size: u64, requested_count: usize) -> Vec<ChunkSpan> {
    if total_size == 0 {
        return vec![ChunkSpan {
            index: 0,
            offset: 0,
            len: 0,
        }];
    }

    let count = (requested_count as u64).clamp(1, total_size);
    let span_size = total_size.div_ceil(count);

    let mut spans = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    while offset < total_size {
        let len = span_size.min(total_size - offset);
        spans.push(ChunkSpan {
            index: spans.len(),
            offset,
            len,
        });
        offset += len;
    }
    spans
}

/// Reads the bytes of one span from `path`.
pub fn read_span(path: &Path, span: &ChunkSpan) -> Result<Vec<u8>, TransferError> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(span.offset))?;
    let mut buf = vec![0u8; span.len as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn spans_cover_file_exactly() {
        for (size, count) in [(10u64, 4usize), (1000, 10), (7, 7), (1, 10), (10, 3)] {
            let spans = split_spans(size, count);
            assert_eq!(spans[0].offset, 0);
            let mut expected_offset = 0;
            for (i, span) in spans.iter().enumerate() {
                assert_eq!(span.index, i);
                assert_eq!(span.offset, expected_offset);
                assert!(span.len >= 1);
                expected_offset += span.len;
            }
            assert_eq!(expected_offset, size, "size {size} count {count}");
        }
    }

    #[test]
    fn spans_use_ceil_sizing() {
        // 10 bytes over 4 requested chunks: ceil(10/4) = 3 → 3,3,3,1.
        let spans = split_spans(10, 4);
        let lens: Vec<u64> = spans.iter().map(|s| s.len).collect();
        assert_eq!(lens, vec![3, 3, 3, 1]);
    }

    #[test]
    fn effective_count_can_be_below_requested() {
        // ceil(10/6) = 2 → five 2-byte spans, not six.
        let spans = split_spans(10, 6);
        assert_eq!(spans.len(), 5);
        assert!(spans.iter().all(|s| s.len == 2));
    }

    #[test]
    fn count_clamped_for_tiny_files() {
        // 3 bytes, 10 requested: no span may be under one byte.
        let spans = split_spans(3, 10);
        assert_eq!(spans.len(), 3);
        assert!(spans.iter().all(|s| s.len == 1));
    }

    #[test]
    fn zero_byte_file_yields_one_empty_span() {
        let spans = split_spans(0, 10);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].len, 0);
    }

    #[test]
    fn deterministic() {
        assert_eq!(split_spans(123_456, 10), split_spans(123_456, 10));
    }

    #[test]
    fn concatenated_spans_reproduce_file() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(1003).collect();
        let path = create_test_file(dir.path(), "data.bin", &data);

        for count in [1, 2, 7, 10, 1003] {
            let spans = split_spans(data.len() as u64, count);
            let mut rebuilt = Vec::new();
            for span in &spans {
                rebuilt.extend(read_span(&path, span).unwrap());
            }
            assert_eq!(rebuilt, data, "count {count}");
        }
    }

    #[test]
    fn chunk_id_format() {
        assert_eq!(chunk_id("deadbeef", 7), "deadbeef-7");
    }
}
