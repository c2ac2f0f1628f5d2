//! Abstract storage trait for registry persistence.
//!
//! The registry only needs an atomic "replace the whole value under this key"
//! primitive, which every platform key-value store (shared preferences, user
//! defaults, a file on disk) can provide.

use crate::error::StorageError;

/// Key-value blob storage.
///
/// # Contract
/// - `write` replaces the previous value atomically: a reader observes either
///   the old bytes or the new bytes, never a mix.
/// - A successful `write` is durable before it returns.
pub trait BlobStore: Send + Sync {
    /// Read the value stored under `key`, or `None` if nothing was written.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace the value stored under `key`.
    fn write(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Remove the value stored under `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}
