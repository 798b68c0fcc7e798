use super::blob::{
    AsyncBlobWriter, BlobPath, BlobStore, WriteCompletion, WritePriority, WriteRequest,
    payload_checksum, validate_key,
};
use crate::core::{Result, RoutingError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// In-process blob store.
///
/// Runs either as a plain blocking store or, via [`InMemoryBlobStore::with_async_writes`],
/// as a prioritized multi-stream store whose completions arrive on another task.
/// Failure injection hooks let callers exercise transfer errors.
#[derive(Clone, Default)]
pub struct InMemoryBlobStore {
    inner: Arc<InMemoryBlobs>,
}

#[derive(Default)]
struct InMemoryBlobs {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    async_writes: bool,
    failing_prefixes: RwLock<Vec<String>>,
    drop_completions: AtomicBool,
    write_log: Mutex<Vec<(String, WritePriority)>>,
    sync_writes: AtomicUsize,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that advertises an [`AsyncBlobWriter`].
    pub fn with_async_writes() -> Self {
        Self {
            inner: Arc::new(InMemoryBlobs {
                async_writes: true,
                ..InMemoryBlobs::default()
            }),
        }
    }

    /// Makes every write and read under `prefix` fail.
    pub fn fail_prefix(&self, prefix: impl Into<String>) -> Result<()> {
        self.inner.failing_prefixes.write()?.push(prefix.into());
        Ok(())
    }

    pub fn clear_failures(&self) -> Result<()> {
        self.inner.failing_prefixes.write()?.clear();
        Ok(())
    }

    /// Async writes are applied but their completion callbacks are dropped unfired.
    pub fn drop_completions(&self, enabled: bool) {
        self.inner.drop_completions.store(enabled, Ordering::SeqCst);
    }

    /// Overwrites a stored blob in place, bypassing `fail_if_exists`.
    pub fn corrupt_blob(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let mut blobs = self.inner.blobs.write()?;
        match blobs.get_mut(key) {
            Some(existing) => {
                *existing = data;
                Ok(())
            }
            None => Err(RoutingError::BlobNotFound(key.to_string())),
        }
    }

    /// Keys and priorities of completed asynchronous writes, in completion order.
    pub fn async_write_log(&self) -> Result<Vec<(String, WritePriority)>> {
        Ok(self.inner.write_log.lock()?.clone())
    }

    pub fn sync_write_count(&self) -> usize {
        self.inner.sync_writes.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.blobs.read()?.keys().cloned().collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.blobs.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn check_failure(&self, key: &str) -> Result<()> {
        let prefixes = self.inner.failing_prefixes.read()?;
        if prefixes.iter().any(|prefix| key.starts_with(prefix.as_str())) {
            return Err(RoutingError::BlobStoreError(format!(
                "injected failure for '{}'",
                key
            )));
        }
        Ok(())
    }

    fn store_blob(&self, key: &str, data: Vec<u8>, fail_if_exists: bool) -> Result<()> {
        validate_key(key)?;
        self.check_failure(key)?;
        let mut blobs = self.inner.blobs.write()?;
        if fail_if_exists && blobs.contains_key(key) {
            return Err(RoutingError::BlobAlreadyExists(key.to_string()));
        }
        blobs.insert(key.to_string(), data);
        Ok(())
    }

    fn apply_async_write(&self, request: WriteRequest) -> Result<()> {
        if let Some(expected) = request.checksum {
            let actual = payload_checksum(&request.data);
            if actual != expected {
                return Err(RoutingError::BlobStoreError(format!(
                    "checksum mismatch for '{}': expected {:016x}, got {:016x}",
                    request.key, expected, actual
                )));
            }
        }
        self.store_blob(&request.key, request.data, request.fail_if_exists)?;
        self.inner
            .write_log
            .lock()?
            .push((request.key, request.priority));
        Ok(())
    }
}

impl BlobStore for InMemoryBlobStore {
    fn write_blob(&self, key: &str, data: &[u8], fail_if_exists: bool) -> Result<()> {
        self.store_blob(key, data.to_vec(), fail_if_exists)?;
        self.inner.sync_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_blob(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        self.check_failure(key)?;
        self.inner
            .blobs
            .read()?
            .get(key)
            .cloned()
            .ok_or_else(|| RoutingError::BlobNotFound(key.to_string()))
    }

    fn blob_exists(&self, key: &str) -> Result<bool> {
        Ok(self.inner.blobs.read()?.contains_key(key))
    }

    fn list_blobs(&self, prefix: &BlobPath) -> Result<Vec<String>> {
        let dir = prefix.blob_key("");
        let blobs = self.inner.blobs.read()?;
        Ok(blobs
            .keys()
            .filter(|key| {
                key.strip_prefix(dir.as_str())
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .cloned()
            .collect())
    }

    fn delete_blob(&self, key: &str) -> Result<()> {
        match self.inner.blobs.write()?.remove(key) {
            Some(_) => Ok(()),
            None => Err(RoutingError::BlobNotFound(key.to_string())),
        }
    }

    fn async_writer(&self) -> Option<&dyn AsyncBlobWriter> {
        if self.inner.async_writes {
            Some(self)
        } else {
            None
        }
    }
}

impl AsyncBlobWriter for InMemoryBlobStore {
    fn async_write_blob(&self, request: WriteRequest, on_complete: WriteCompletion) {
        let store = self.clone();
        let transfer = move || {
            let result = store.apply_async_write(request);
            if store.inner.drop_completions.load(Ordering::SeqCst) {
                drop(on_complete);
                return;
            }
            on_complete(result);
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { transfer() });
            }
            Err(_) => {
                std::thread::spawn(transfer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn write_read_and_fail_if_exists() {
        let store = InMemoryBlobStore::new();
        store.write_blob("a/b", b"one", true).unwrap();
        assert_eq!(store.read_blob("a/b").unwrap(), b"one");
        assert!(matches!(
            store.write_blob("a/b", b"two", true),
            Err(RoutingError::BlobAlreadyExists(_))
        ));
        store.write_blob("a/b", b"two", false).unwrap();
        assert_eq!(store.read_blob("a/b").unwrap(), b"two");
        assert_eq!(store.sync_write_count(), 2);
        assert!(store.async_writer().is_none());
    }

    #[test]
    fn list_returns_direct_children_sorted() {
        let store = InMemoryBlobStore::new();
        store.write_blob("p/b", b"", true).unwrap();
        store.write_blob("p/a", b"", true).unwrap();
        store.write_blob("p/nested/c", b"", true).unwrap();
        store.write_blob("q/d", b"", true).unwrap();
        let keys = store.list_blobs(&BlobPath::root().add("p")).unwrap();
        assert_eq!(keys, vec!["p/a".to_string(), "p/b".to_string()]);
    }

    #[test]
    fn injected_failures_cover_reads_and_writes() {
        let store = InMemoryBlobStore::new();
        store.write_blob("bad/x", b"1", true).unwrap();
        store.fail_prefix("bad/").unwrap();
        assert!(store.read_blob("bad/x").is_err());
        assert!(store.write_blob("bad/y", b"1", true).is_err());
        store.clear_failures().unwrap();
        assert!(store.read_blob("bad/x").is_ok());
    }

    #[test]
    fn async_write_completes_off_thread_without_runtime() {
        let store = InMemoryBlobStore::with_async_writes();
        let writer = store.async_writer().unwrap();
        let (tx, rx) = mpsc::channel();
        let data = b"payload".to_vec();
        writer.async_write_blob(
            WriteRequest {
                key: "k/1".to_string(),
                checksum: Some(payload_checksum(&data)),
                data,
                fail_if_exists: true,
                priority: WritePriority::Urgent,
            },
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.recv().unwrap().unwrap();
        assert_eq!(store.read_blob("k/1").unwrap(), b"payload");
        assert_eq!(
            store.async_write_log().unwrap(),
            vec![("k/1".to_string(), WritePriority::Urgent)]
        );
    }

    #[test]
    fn async_write_rejects_checksum_mismatch() {
        let store = InMemoryBlobStore::with_async_writes();
        let (tx, rx) = mpsc::channel();
        store.async_writer().unwrap().async_write_blob(
            WriteRequest {
                key: "k/1".to_string(),
                data: b"payload".to_vec(),
                fail_if_exists: true,
                checksum: Some(1),
                priority: WritePriority::Normal,
            },
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        assert!(rx.recv().unwrap().is_err());
        assert!(!store.blob_exists("k/1").unwrap());
    }
}
