//! In-memory storage backend.
//!
//! Thread-safe and non-durable. Intended for embedded usage and tests, and as
//! a reference implementation of the `BlobStore` contract.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::StorageError;
use crate::storage::traits::BlobStore;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

/// A `BlobStore` backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for InMemoryBlobStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let blobs = self.blobs.read().map_err(|_| lock_err("blobs.read"))?;
        Ok(blobs.get(key).cloned())
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut blobs = self.blobs.write().map_err(|_| lock_err("blobs.write"))?;
        blobs.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut blobs = self.blobs.write().map_err(|_| lock_err("blobs.remove"))?;
        blobs.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_replaces_value() {
        let store = InMemoryBlobStore::new();
        assert!(store.read("k").unwrap().is_none());

        store.write("k", b"one").unwrap();
        store.write("k", b"two").unwrap();
        assert_eq!(store.read("k").unwrap().as_deref(), Some(&b"two"[..]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_missing_key_is_ok() {
        let store = InMemoryBlobStore::new();
        store.remove("missing").unwrap();
        store.write("k", b"v").unwrap();
        store.remove("k").unwrap();
        assert!(store.is_empty());
    }
}
