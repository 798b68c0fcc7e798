use super::blob::{BlobPath, BlobStore, PATH_DELIMITER, validate_key};
use crate::core::{Result, RoutingError};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const TEMP_PREFIX: &str = ".tmp-blob-";

/// Blob store backed by a local directory.
///
/// Writes go to a temp file in the target directory and are renamed into place,
/// so readers never observe a partially written blob. Only blocking writes are
/// offered.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            RoutingError::BlobStoreError(format!(
                "Failed to create blob root {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        let mut path = self.root.clone();
        for segment in key.split(PATH_DELIMITER) {
            path.push(segment);
        }
        Ok(path)
    }

    fn dir_for(&self, prefix: &BlobPath) -> PathBuf {
        let mut path = self.root.clone();
        for segment in prefix.segments() {
            path.push(segment);
        }
        path
    }
}

impl BlobStore for FsBlobStore {
    fn write_blob(&self, key: &str, data: &[u8], fail_if_exists: bool) -> Result<()> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| RoutingError::BlobStoreError(format!("Blob '{}' has no parent", key)))?;
        fs::create_dir_all(parent).map_err(|e| {
            RoutingError::BlobStoreError(format!("Failed to create blob directory: {}", e))
        })?;
        if fail_if_exists && path.exists() {
            return Err(RoutingError::BlobAlreadyExists(key.to_string()));
        }

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent)
            .map_err(|e| {
                RoutingError::BlobStoreError(format!("Failed to create temp file: {}", e))
            })?;
        temp.write_all(data)
            .map_err(|e| RoutingError::BlobStoreError(format!("Failed to write blob: {}", e)))?;
        temp.flush()
            .map_err(|e| RoutingError::BlobStoreError(format!("Failed to flush blob: {}", e)))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| RoutingError::BlobStoreError(format!("Failed to sync blob: {}", e)))?;
        persist(temp, &path, key, fail_if_exists)
    }

    fn read_blob(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => RoutingError::BlobNotFound(key.to_string()),
            _ => RoutingError::BlobStoreError(format!("Failed to read blob '{}': {}", key, e)),
        })
    }

    fn blob_exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key)?.is_file())
    }

    fn list_blobs(&self, prefix: &BlobPath) -> Result<Vec<String>> {
        let dir = self.dir_for(prefix);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RoutingError::BlobStoreError(format!(
                    "Failed to list {}: {}",
                    dir.display(),
                    e
                )));
            }
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| RoutingError::BlobStoreError(format!("Failed to list blob: {}", e)))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_file && !name.starts_with(TEMP_PREFIX) {
                keys.push(prefix.blob_key(&name));
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn delete_blob(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        fs::remove_file(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => RoutingError::BlobNotFound(key.to_string()),
            _ => RoutingError::BlobStoreError(format!("Failed to delete blob '{}': {}", key, e)),
        })
    }
}

fn persist(temp: NamedTempFile, path: &Path, key: &str, fail_if_exists: bool) -> Result<()> {
    let persisted = if fail_if_exists {
        temp.persist_noclobber(path)
    } else {
        temp.persist(path)
    };
    match persisted {
        Ok(_file) => sync_parent(path),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
            Err(RoutingError::BlobAlreadyExists(key.to_string()))
        }
        Err(e) => Err(RoutingError::BlobStoreError(format!(
            "Failed to rename blob '{}' into place: {}",
            key, e.error
        ))),
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        File::open(parent)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| RoutingError::BlobStoreError(format!("Failed to sync directory: {}", e)))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> Result<()> {
    Ok(())
}
