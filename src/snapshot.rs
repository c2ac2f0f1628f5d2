//! The durable registry state.
//!
//! `RegistrySnapshot` is the whole persisted state: groups plus the
//! monitoring-started and boot-completed flags. It is always replaced as a
//! unit, never patched field by field.

use serde::{Deserialize, Serialize};

use crate::geofence::{GeofenceDefinition, GeofenceGroup, GeofenceId};

/// Everything the registry persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub groups: Vec<GeofenceGroup>,
    #[serde(default)]
    pub is_started_monitoring: bool,
    #[serde(default = "boot_completed_default")]
    pub boot_completed: bool,
}

const fn boot_completed_default() -> bool {
    true
}

impl Default for RegistrySnapshot {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            is_started_monitoring: false,
            boot_completed: true,
        }
    }
}

impl RegistrySnapshot {
    /// All definitions across all groups, in registry order.
    pub fn definitions(&self) -> impl Iterator<Item = &GeofenceDefinition> {
        self.groups.iter().flat_map(|g| g.definitions.iter())
    }

    #[must_use]
    pub fn definition_count(&self) -> usize {
        self.groups.iter().map(|g| g.definitions.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(GeofenceGroup::is_empty)
    }

    /// Linear scan by id; registries hold at most a few hundred entries.
    #[must_use]
    pub fn find(&self, id: &GeofenceId) -> Option<&GeofenceDefinition> {
        self.definitions().find(|d| &d.id == id)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<GeofenceId> {
        self.definitions().map(|d| d.id.clone()).collect()
    }

    /// Drops groups with no definitions left.
    pub fn prune_empty_groups(&mut self) {
        self.groups.retain(|g| !g.is_empty());
    }

    /// Serializes to the persisted JSON layout.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses the persisted JSON layout.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
