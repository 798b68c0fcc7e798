//! Blob store seam consumed by the routing persistence layer.
//!
//! Stores are injected as `Arc<dyn BlobStore>`. A store that can schedule
//! prioritized multi-stream writes advertises it through [`BlobStore::async_writer`].

use crate::core::{Result, RoutingError};
use std::fmt;

pub const PATH_DELIMITER: &str = "/";

/// Hierarchical location inside a blob store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BlobPath {
    segments: Vec<String>,
}

impl BlobPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut path = Self::root();
        for segment in segments {
            path = path.add(segment);
        }
        path
    }

    /// Returns a new path with `segment` appended. Delimiters inside the segment are trimmed.
    pub fn add(&self, segment: impl Into<String>) -> Self {
        let segment = segment.into();
        let mut segments = self.segments.clone();
        for part in segment.split(PATH_DELIMITER).filter(|part| !part.is_empty()) {
            segments.push(part.to_string());
        }
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn build_as_string(&self) -> String {
        self.segments.join(PATH_DELIMITER)
    }

    /// Full key of a blob named `name` directly under this path.
    pub fn blob_key(&self, name: &str) -> String {
        if self.is_root() {
            name.to_string()
        } else {
            format!("{}{}{}", self.build_as_string(), PATH_DELIMITER, name)
        }
    }
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build_as_string())
    }
}

/// Scheduling hint for stores that run several transfers at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WritePriority {
    Normal,
    High,
    Urgent,
}

/// A write submitted to an [`AsyncBlobWriter`].
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub key: String,
    pub data: Vec<u8>,
    pub fail_if_exists: bool,
    /// Expected [`payload_checksum`] of `data`, verified by stores that support it.
    pub checksum: Option<u64>,
    pub priority: WritePriority,
}

/// Completion notification for an asynchronous write. Called at most once.
pub type WriteCompletion = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Durable keyed blob storage.
pub trait BlobStore: Send + Sync {
    /// Blocking single-stream write of the whole payload.
    fn write_blob(&self, key: &str, data: &[u8], fail_if_exists: bool) -> Result<()>;

    fn read_blob(&self, key: &str) -> Result<Vec<u8>>;

    fn blob_exists(&self, key: &str) -> Result<bool>;

    /// Keys of blobs directly under `prefix`, sorted lexicographically.
    fn list_blobs(&self, prefix: &BlobPath) -> Result<Vec<String>>;

    fn delete_blob(&self, key: &str) -> Result<()>;

    /// Prioritized multi-stream writer, when the store has one.
    fn async_writer(&self) -> Option<&dyn AsyncBlobWriter> {
        None
    }
}

pub trait AsyncBlobWriter: Send + Sync {
    /// Submits a write and returns immediately; `on_complete` fires from the store's
    /// own completion path.
    fn async_write_blob(&self, request: WriteRequest, on_complete: WriteCompletion);
}

/// Rejects keys that are empty, absolute, or escape their prefix.
pub fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(RoutingError::BlobStoreError(
            "blob key must not be empty".to_string(),
        ));
    }
    if key.starts_with(PATH_DELIMITER) {
        return Err(RoutingError::BlobStoreError(format!(
            "blob key '{}' must be relative",
            key
        )));
    }
    if key
        .split(PATH_DELIMITER)
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(RoutingError::BlobStoreError(format!(
            "blob key '{}' contains an invalid segment",
            key
        )));
    }
    Ok(())
}

/// FNV-1a 64-bit digest used to detect corrupted payloads.
pub fn payload_checksum(data: &[u8]) -> u64 {
    let mut hash = 14695981039346656037u64;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_path_composes_segments() {
        let base = BlobPath::from_segments(["remote", "cluster-a"]);
        let path = base.add("index-routing").add("uuid-1");
        assert_eq!(path.build_as_string(), "remote/cluster-a/index-routing/uuid-1");
        assert_eq!(path.blob_key("file"), "remote/cluster-a/index-routing/uuid-1/file");
        assert_eq!(BlobPath::root().blob_key("file"), "file");
        assert_eq!(BlobPath::root().add("/a//b/").segments(), ["a", "b"]);
    }

    #[test]
    fn key_validation_rejects_escapes() {
        assert!(validate_key("a/b/c").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("a//b").is_err());
    }

    #[test]
    fn checksum_detects_single_byte_change() {
        let a = payload_checksum(b"routing");
        let b = payload_checksum(b"routinG");
        assert_ne!(a, b);
        assert_eq!(a, payload_checksum(b"routing"));
    }
}
