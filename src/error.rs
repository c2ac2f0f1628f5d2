//! Error types for the geofence bridge.
//!
//! All errors are strongly typed using thiserror so the embedding app can
//! tell a permission problem (prompt the user) from a transient platform
//! failure (retry) by pattern matching rather than by parsing messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geofence::GeofenceId;

/// Broad classification of a platform-reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformErrorKind {
    /// Location permission is missing or was revoked.
    PermissionDenied,
    /// The device cannot monitor regions at all.
    Unsupported,
    /// Anything else the OS reports.
    Failure,
}

/// An error reported by the platform region-monitoring service.
///
/// Carried verbatim (code + message) as the cause of higher-level errors.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("platform error {code}: {message}")]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub code: i32,
    pub message: String,
}

impl PlatformError {
    /// Creates a generic platform failure.
    #[must_use]
    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self {
            kind: PlatformErrorKind::Failure,
            code,
            message: message.into(),
        }
    }

    /// Creates a permission-denied failure.
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self {
            kind: PlatformErrorKind::PermissionDenied,
            code: 1,
            message: message.into(),
        }
    }

    /// Creates a capability-unavailable failure.
    #[must_use]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self {
            kind: PlatformErrorKind::Unsupported,
            code: 2,
            message: message.into(),
        }
    }
}

/// Errors raised while starting or stopping region monitoring.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MonitoringError {
    #[error("No geofences registered")]
    NoGeofencesRegistered,

    #[error("Location permission denied: {source}")]
    PermissionDenied {
        #[source]
        source: PlatformError,
    },

    #[error("Region monitoring is not supported on this device: {source}")]
    MonitoringUnsupported {
        #[source]
        source: PlatformError,
    },

    #[error("Failed to start monitoring{}: {source}", region_suffix(.region.as_ref()))]
    StartFailed {
        region: Option<GeofenceId>,
        #[source]
        source: PlatformError,
    },

    #[error("Failed to stop monitoring region {region}: {source}")]
    StopFailed {
        region: GeofenceId,
        #[source]
        source: PlatformError,
    },

    #[error("Monitoring start was cancelled by a stop request")]
    Cancelled,

    #[error("A monitoring completion is already pending")]
    CompletionPending,
}

fn region_suffix(region: Option<&GeofenceId>) -> String {
    region.map(|id| format!(" region {id}")).unwrap_or_default()
}

impl MonitoringError {
    /// Maps a failed availability check onto the matching variant.
    #[must_use]
    pub fn from_availability(source: PlatformError) -> Self {
        match source.kind {
            PlatformErrorKind::PermissionDenied => Self::PermissionDenied { source },
            PlatformErrorKind::Unsupported => Self::MonitoringUnsupported { source },
            PlatformErrorKind::Failure => Self::StartFailed { region: None, source },
        }
    }

    /// The platform error underneath this one, if any.
    #[must_use]
    pub const fn platform_cause(&self) -> Option<&PlatformError> {
        match self {
            Self::PermissionDenied { source }
            | Self::MonitoringUnsupported { source }
            | Self::StartFailed { source, .. }
            | Self::StopFailed { source, .. } => Some(source),
            Self::NoGeofencesRegistered | Self::Cancelled | Self::CompletionPending => None,
        }
    }
}

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Registry directory is locked by another process: {0}")]
    Locked(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors in caller-supplied geofence data.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Coordinate ({latitude}, {longitude}) is out of range")]
    InvalidCoordinate {
        latitude: f64,
        longitude: f64,
    },

    #[error("Radius must be positive, got {radius}")]
    InvalidRadius {
        radius: i64,
    },

    #[error("Geofence name cannot be empty")]
    EmptyName,

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors from the service plumbing itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },
}

/// Top-level error type for the bridge.
#[derive(Debug, Error)]
pub enum GeofenceError {
    #[error("Monitoring error: {0}")]
    Monitoring(#[from] MonitoringError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl GeofenceError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub(crate) fn disconnected(path: &str) -> Self {
        Self::Execution(ExecutionError::Disconnected {
            path: path.to_string(),
        })
    }

    /// Returns the monitoring error, if this is one.
    #[must_use]
    pub const fn as_monitoring(&self) -> Option<&MonitoringError> {
        match self {
            Self::Monitoring(e) => Some(e),
            _ => None,
        }
    }

    /// True when the app should ask the user for location permission.
    #[must_use]
    pub const fn is_permission_error(&self) -> bool {
        matches!(self, Self::Monitoring(MonitoringError::PermissionDenied { .. }))
    }

    /// True when the device cannot monitor regions at all.
    #[must_use]
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::Monitoring(MonitoringError::MonitoringUnsupported { .. }))
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Monitoring(e) => matches!(
                e,
                MonitoringError::StartFailed { .. }
                    | MonitoringError::StopFailed { .. }
                    | MonitoringError::Cancelled
            ),
            Self::Storage(e) => matches!(e, StorageError::Io(_) | StorageError::Backend(_)),
            Self::Execution(e) => matches!(e, ExecutionError::Timeout { .. }),
            Self::Validation(_) | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for bridge operations.
pub type GeofenceResult<T> = Result<T, GeofenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_is_distinguishable_from_transient_failure() {
        let denied: GeofenceError =
            MonitoringError::from_availability(PlatformError::permission_denied("no fine location")).into();
        assert!(denied.is_permission_error());
        assert!(!denied.is_retryable());

        let transient: GeofenceError = MonitoringError::StartFailed {
            region: Some(GeofenceId::from("r1")),
            source: PlatformError::failure(1000, "geofence not available"),
        }
        .into();
        assert!(!transient.is_permission_error());
        assert!(transient.is_retryable());
    }

    #[test]
    fn test_unsupported_maps_to_monitoring_unsupported() {
        let err = MonitoringError::from_availability(PlatformError::unsupported("no region monitoring"));
        assert!(matches!(err, MonitoringError::MonitoringUnsupported { .. }));
        let err: GeofenceError = err.into();
        assert!(err.is_unsupported());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_start_failed_message_carries_region_and_cause() {
        let err = MonitoringError::StartFailed {
            region: Some(GeofenceId::from("abc")),
            source: PlatformError::failure(1001, "too many geofences"),
        };
        let msg = err.to_string();
        assert!(msg.contains("region abc"));
        assert!(msg.contains("1001"));
        assert_eq!(err.platform_cause().map(|e| e.code), Some(1001));
    }

    #[test]
    fn test_start_failed_without_region() {
        let err = MonitoringError::StartFailed {
            region: None,
            source: PlatformError::failure(7, "boom"),
        };
        assert_eq!(err.to_string(), "Failed to start monitoring: platform error 7: boom");
    }

    #[test]
    fn test_no_geofences_is_not_retryable() {
        let err: GeofenceError = MonitoringError::NoGeofencesRegistered.into();
        assert!(!err.is_retryable());
        assert!(err.as_monitoring().is_some());
        assert!(err.as_monitoring().and_then(MonitoringError::platform_cause).is_none());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err: GeofenceError = ExecutionError::Timeout { duration_ms: 250 }.into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("250ms"));
    }
}
