//! # geofence-bridge
//!
//! A geofence registry and region-monitoring state machine. It keeps a
//! device's native region monitoring in sync with a persisted set of geofence
//! registrations and turns platform transitions into notifications, script
//! events and webhook calls.
//!
//! ## Core Concepts
//!
//! - **Geofence**: a circular region with per-transition actions
//! - **Group**: the geofences added by one call, sharing initial triggers
//! - **Registry**: every registered group plus the monitoring flags, persisted
//!   as one snapshot
//! - **Region monitor**: the platform's native monitoring, driven through
//!   `RegionMonitor` and reporting back through `PlatformEventSink`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use geofence_bridge::{
//!     Coordinate, GeofenceDraft, GeofenceGroupDraft, GeofenceService, SimulatedRegionMonitor,
//!     TransitionAction, TransitionKind,
//! };
//!
//! let monitor = Arc::new(SimulatedRegionMonitor::new());
//! let service = GeofenceService::builder(monitor).build()?;
//!
//! service.add_geofences(
//!     GeofenceGroupDraft::new()
//!         .geofence(
//!             GeofenceDraft::new("office", Coordinate::new(40.7415, -74.0034).with_radius(200))
//!                 .on(TransitionKind::Enter, TransitionAction::notify("Welcome")),
//!         )
//!         .initial_trigger(TransitionKind::Enter),
//! )?;
//!
//! let started = service.start_monitoring().wait()?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Model
pub mod action;
pub mod coordinate;
pub mod error;
pub mod geofence;
pub mod snapshot;
pub mod transition;

// Registry, storage and configuration
pub mod config;
pub mod registry;
pub mod storage;

// Monitoring and effects
pub mod effects;
pub mod monitor;
pub mod platform;
pub mod service;
pub mod stats;

// Re-export primary types at crate root for convenience
pub use action::{NotificationAction, TransitionAction, TransitionActionSet, WebhookAction};
pub use config::GeofenceConfig;
pub use coordinate::{Coordinate, DEFAULT_RADIUS_M};
pub use effects::{EventEmitter, GeofenceEvent, Notifier, WebhookClient, WebhookRequest};
pub use error::{
    GeofenceError, GeofenceResult, MonitoringError, PlatformError, PlatformErrorKind, StorageError,
    ValidationError,
};
pub use geofence::{GeofenceDefinition, GeofenceDraft, GeofenceGroup, GeofenceGroupDraft, GeofenceId};
pub use platform::{PlatformEvent, PlatformEventSink, RegionMonitor, SessionToken, SimulatedRegionMonitor};
pub use registry::{GeofenceLocation, GeofenceRegistry};
pub use service::{GeofenceService, GeofenceServiceBuilder, Pending};
pub use snapshot::RegistrySnapshot;
pub use stats::ServiceStats;
pub use storage::{BlobStore, InMemoryBlobStore};
pub use transition::TransitionKind;
