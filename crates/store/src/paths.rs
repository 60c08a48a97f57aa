use std::path::{Component, Path};

use crate::StoreError;

/// Validates a name used as a single node under the store root.
///
/// Rejects empty names, absolute paths, parent-directory traversal, and
/// anything that is more than one path component. Every request-supplied
/// name (file name, fingerprint, chunk id) passes through here before it
/// touches the filesystem.
pub fn validate_store_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::InvalidName("empty name".into()));
    }

    let path = Path::new(name);
    let mut components = path.components();

    match components.next() {
        Some(Component::Normal(_)) => {}
        _ => {
            return Err(StoreError::InvalidName(format!(
                "name is not a plain file name: {name}"
            )));
        }
    }

    if components.next().is_some() {
        return Err(StoreError::InvalidName(format!(
            "name contains a path separator: {name}"
        )));
    }

    Ok(())
}

/// Returns the extension of `file_name` including the leading dot, or an
/// empty string when there is none (`"video.mp4"` → `".mp4"`).
pub fn file_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Parses the numeric index out of a chunk id of the form
/// `<fingerprint>-<index>`. Returns `None` for ids that do not belong to
/// `fingerprint` or whose suffix is not a number.
pub fn chunk_index(chunk_id: &str, fingerprint: &str) -> Option<u32> {
    let suffix = chunk_id.strip_prefix(fingerprint)?.strip_prefix('-')?;
    suffix.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert!(validate_store_name("video.mp4").is_ok());
        assert!(validate_store_name("deadbeef-3").is_ok());
        assert!(validate_store_name(".hidden").is_ok());
    }

    #[test]
    fn rejects_empty_name() {
        assert!(validate_store_name("").is_err());
    }

    #[test]
    fn rejects_traversal() {
        assert!(validate_store_name("..").is_err());
        assert!(validate_store_name("../escape").is_err());
        assert!(validate_store_name("sub/../../escape").is_err());
    }

    #[test]
    fn rejects_absolute_path() {
        assert!(validate_store_name("/etc/passwd").is_err());
    }

    #[test]
    fn rejects_nested_path() {
        assert!(validate_store_name("sub/file.bin").is_err());
    }

    #[test]
    fn extension_with_dot() {
        assert_eq!(file_extension("video.mp4"), ".mp4");
        assert_eq!(file_extension("archive.tar.gz"), ".gz");
        assert_eq!(file_extension("README"), "");
        assert_eq!(file_extension(".bashrc"), "");
    }

    #[test]
    fn chunk_index_parses_own_ids() {
        assert_eq!(chunk_index("cafe-0", "cafe"), Some(0));
        assert_eq!(chunk_index("cafe-17", "cafe"), Some(17));
    }

    #[test]
    fn chunk_index_rejects_foreign_ids() {
        assert_eq!(chunk_index("beef-0", "cafe"), None);
        assert_eq!(chunk_index("cafe-x", "cafe"), None);
        assert_eq!(chunk_index("cafe", "cafe"), None);
        // A fingerprint that merely prefixes another must not match.
        assert_eq!(chunk_index("cafe0-1", "cafe"), None);
    }
}
