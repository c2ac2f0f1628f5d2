//! Service configuration.

use serde::{Deserialize, Serialize};

use crate::coordinate::DEFAULT_RADIUS_M;
use crate::error::ValidationError;
use crate::storage::DEFAULT_SNAPSHOT_KEY;

/// Tunables for a `GeofenceService`.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use geofence_bridge::GeofenceConfig;
///
/// let cfg: GeofenceConfig = serde_json::from_str(r#"{"restart_on_boot": false}"#).unwrap();
/// assert!(!cfg.restart_on_boot);
/// assert!(cfg.dedup_ignore_radius);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeofenceConfig {
    /// Whether `add_geofences` treats two positions as duplicates regardless
    /// of their radii.
    pub dedup_ignore_radius: bool,
    /// Re-arm monitoring automatically when the device finishes booting.
    pub restart_on_boot: bool,
    /// Radius (meters) for coordinates that omit one.
    pub default_radius_m: u32,
    /// Max queued commands for the registry worker.
    pub inbox_capacity: usize,
    /// Max queued webhook deliveries before new ones are dropped.
    pub webhook_queue_capacity: usize,
    /// Blob key the registry snapshot is stored under.
    pub snapshot_key: String,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            dedup_ignore_radius: true,
            restart_on_boot: true,
            default_radius_m: DEFAULT_RADIUS_M,
            inbox_capacity: 1024,
            webhook_queue_capacity: 256,
            snapshot_key: DEFAULT_SNAPSHOT_KEY.to_string(),
        }
    }
}

impl GeofenceConfig {
    /// Checks the configuration, returning it unchanged when valid.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.default_radius_m == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "default_radius_m must be positive".to_string(),
            });
        }
        if self.inbox_capacity == 0 || self.webhook_queue_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "queue capacities must be positive (inbox={}, webhook={})",
                    self.inbox_capacity, self.webhook_queue_capacity
                ),
            });
        }
        if self.snapshot_key.trim().is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: "snapshot_key cannot be empty".to_string(),
            });
        }
        Ok(self)
    }
}
