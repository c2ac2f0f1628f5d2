//! Registry snapshot load/save on top of a `BlobStore`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::StorageError;
use crate::snapshot::RegistrySnapshot;
use crate::storage::traits::BlobStore;

/// Key used when the caller does not pick one.
pub const DEFAULT_SNAPSHOT_KEY: &str = "GEOFENCES_CACHE";

/// Reads and writes the full `RegistrySnapshot` under a single key.
#[derive(Clone)]
pub struct SnapshotStore {
    blobs: Arc<dyn BlobStore>,
    key: String,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore").field("key", &self.key).finish_non_exhaustive()
    }
}

impl SnapshotStore {
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobStore>, key: impl Into<String>) -> Self {
        Self {
            blobs,
            key: key.into(),
        }
    }

    /// A store using `DEFAULT_SNAPSHOT_KEY`.
    #[must_use]
    pub fn with_default_key(blobs: Arc<dyn BlobStore>) -> Self {
        Self::new(blobs, DEFAULT_SNAPSHOT_KEY)
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Loads the persisted snapshot.
    ///
    /// Missing data yields an empty snapshot. Unreadable or corrupt data is
    /// logged and also yields an empty snapshot rather than failing startup.
    #[must_use]
    pub fn load(&self) -> RegistrySnapshot {
        match self.try_load() {
            Ok(Some(snapshot)) => {
                debug!(
                    key = %self.key,
                    geofences = snapshot.definition_count(),
                    "loaded registry snapshot"
                );
                snapshot
            }
            Ok(None) => {
                debug!(key = %self.key, "no persisted registry snapshot; starting empty");
                RegistrySnapshot::default()
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "registry snapshot unreadable; starting empty");
                RegistrySnapshot::default()
            }
        }
    }

    /// Loads the persisted snapshot, surfacing decode errors.
    pub fn try_load(&self) -> Result<Option<RegistrySnapshot>, StorageError> {
        let Some(bytes) = self.blobs.read(&self.key)? else {
            return Ok(None);
        };
        RegistrySnapshot::from_json(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Replaces the persisted snapshot with `snapshot`.
    pub fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), StorageError> {
        let bytes = snapshot
            .to_json()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.blobs.write(&self.key, &bytes)
    }
}
