//! Snapshot persistence for the geofence registry.
//!
//! Backends implement the small `BlobStore` key-value trait; `SnapshotStore`
//! layers the registry snapshot format on top of any backend.

mod memory;
mod snapshot_store;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryBlobStore;
pub use snapshot_store::{SnapshotStore, DEFAULT_SNAPSHOT_KEY};
pub use traits::BlobStore;

pub use crate::error::StorageError;

#[cfg(feature = "persistent")]
pub use persistent::{open_blob_store, FileBlobStore, PersistentConfig};
