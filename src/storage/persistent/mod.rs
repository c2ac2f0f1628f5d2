//! File-backed blob storage.
//!
//! Durable, crash-safe storage for the registry snapshot:
//! - one file per key, framed with a CRC32 checksum
//! - write to a temp file, fsync, then atomically rename over the old file
//! - an exclusive directory lock so only one process owns the registry
//!
//! # Layout
//!
//! ```text
//! <dir>/
//!   .registry.lock          advisory lock, held while the store is open
//!   GEOFENCES_CACHE.blob    framed snapshot JSON
//!   GEOFENCES_CACHE.blob.tmp.<uuid>   transient, only during a write
//! ```

mod codec;
mod dir_lock;

pub use dir_lock::DirectoryLock;

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StorageError;
use crate::storage::traits::BlobStore;

const BLOB_EXTENSION: &str = "blob";

/// Configuration for file-backed storage.
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// Whether to fsync the blob and its directory on every write.
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self { sync_on_write: true }
    }
}

/// A `BlobStore` that keeps each key in its own file under one directory.
#[derive(Debug)]
pub struct FileBlobStore {
    dir: PathBuf,
    config: PersistentConfig,
    _lock: DirectoryLock,
}

impl FileBlobStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    /// - `StorageError::Locked` if another process holds the directory
    /// - `StorageError::Io` if the directory cannot be created or accessed
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)?;
        let lock = DirectoryLock::acquire(dir).map_err(|e| {
            if e.kind() == ErrorKind::WouldBlock {
                StorageError::Locked(dir.display().to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        let store = Self {
            dir: dir.to_path_buf(),
            config,
            _lock: lock,
        };
        store.remove_stale_temp_files();
        Ok(store)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(StorageError::Backend(format!("invalid blob key: {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.{BLOB_EXTENSION}")))
    }

    // Leftovers from a crash mid-write; the renamed blob is authoritative.
    fn remove_stale_temp_files(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.contains(&format!(".{BLOB_EXTENSION}.tmp.")) {
                match fs::remove_file(entry.path()) {
                    Ok(()) => debug!(file = name, "removed stale temp blob"),
                    Err(e) => warn!(file = name, error = %e, "failed to remove stale temp blob"),
                }
            }
        }
    }

    fn sync_dir(&self) -> Result<(), StorageError> {
        #[cfg(unix)]
        {
            File::open(&self.dir)?.sync_all()?;
        }
        Ok(())
    }
}

impl BlobStore for FileBlobStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.blob_path(key)?;
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);
        codec::read_frame(&mut reader).map(Some).map_err(|e| {
            if e.kind() == ErrorKind::InvalidData || e.kind() == ErrorKind::UnexpectedEof {
                StorageError::Serialization(format!("{}: {e}", path.display()))
            } else {
                StorageError::Io(e)
            }
        })
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let final_path = self.blob_path(key)?;
        let temp_path = final_path.with_extension(format!("{BLOB_EXTENSION}.tmp.{}", Uuid::new_v4()));

        let result = (|| -> Result<(), StorageError> {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            let mut writer = BufWriter::new(file);
            codec::write_frame(&mut writer, value)?;
            writer.flush()?;
            if self.config.sync_on_write {
                writer.get_ref().sync_all()?;
            }
            fs::rename(&temp_path, &final_path)?;
            if self.config.sync_on_write {
                self.sync_dir()?;
            }
            Ok(())
        })();

        if result.is_err() && temp_path.exists() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.blob_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Open or create a file-backed blob store at the given path.
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use geofence_bridge::storage::{open_blob_store, SnapshotStore};
///
/// let blobs = open_blob_store("./geofences", None)?;
/// let store = SnapshotStore::with_default_key(Arc::new(blobs));
/// ```
pub fn open_blob_store(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<FileBlobStore, StorageError> {
    FileBlobStore::open(path.as_ref(), config.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let store = open_blob_store(dir.path(), None).unwrap();

        assert!(store.read("GEOFENCES_CACHE").unwrap().is_none());
        store.write("GEOFENCES_CACHE", b"first").unwrap();
        store.write("GEOFENCES_CACHE", b"second").unwrap();
        assert_eq!(store.read("GEOFENCES_CACHE").unwrap().as_deref(), Some(&b"second"[..]));
        assert!(dir.path().join("GEOFENCES_CACHE.blob").exists());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempdir().unwrap();
        let store = open_blob_store(dir.path(), None).unwrap();
        store.write("k", b"v").unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_stale_temp_files_removed_on_open() {
        let dir = tempdir().unwrap();
        let stale = dir.path().join("k.blob.tmp.deadbeef");
        fs::write(&stale, b"partial").unwrap();

        let _store = open_blob_store(dir.path(), None).unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn test_corrupted_blob_is_serialization_error() {
        let dir = tempdir().unwrap();
        let store = open_blob_store(dir.path(), None).unwrap();
        store.write("k", b"payload bytes").unwrap();

        let path = dir.path().join("k.blob");
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(store.read("k"), Err(StorageError::Serialization(_))));
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let dir = tempdir().unwrap();
        let store = open_blob_store(dir.path(), None).unwrap();
        assert!(store.write("../escape", b"x").is_err());
        assert!(store.write(".hidden", b"x").is_err());
        assert!(store.read("").is_err());
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _first = open_blob_store(dir.path(), None).unwrap();
        assert!(matches!(open_blob_store(dir.path(), None), Err(StorageError::Locked(_))));
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let store = open_blob_store(dir.path(), None).unwrap();
        store.write("k", b"v").unwrap();
        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert!(store.read("k").unwrap().is_none());
    }
}
