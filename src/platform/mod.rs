//! The boundary to the device's native region-monitoring service.
//!
//! The OS is treated as a black box: the service asks it to start and stop
//! circular regions and to resolve the current location once, and the OS
//! answers later through a `PlatformEventSink`. Acknowledgements carry the
//! `SessionToken` of the start request that caused them, so answers that
//! arrive after a newer session has begun can be recognised and ignored.

mod simulated;

pub use simulated::{PlatformCall, SimulatedRegionMonitor};

use std::fmt;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;
use crate::geofence::{GeofenceDefinition, GeofenceId};
use crate::transition::TransitionKind;

/// Identifies one `start_monitoring` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(u64);

impl SessionToken {
    #[must_use]
    pub const fn new(epoch: u64) -> Self {
        Self(epoch)
    }

    #[must_use]
    pub const fn epoch(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// A region as handed to the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredRegion {
    pub id: GeofenceId,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: u32,
    pub notify_on_enter: bool,
    pub notify_on_exit: bool,
    pub notify_on_dwell: bool,
    /// Milliseconds until the OS drops the region; negative means never.
    pub expiration_duration_ms: i64,
}

impl MonitoredRegion {
    /// Builds the platform request for a definition. Notify flags follow the
    /// transitions that have an action attached.
    #[must_use]
    pub fn from_definition(def: &GeofenceDefinition, default_radius_m: u32) -> Self {
        Self {
            id: def.id.clone(),
            latitude: def.position.latitude,
            longitude: def.position.longitude,
            radius_m: def.position.radius_or(default_radius_m),
            notify_on_enter: def.actions.contains(TransitionKind::Enter),
            notify_on_exit: def.actions.contains(TransitionKind::Exit),
            notify_on_dwell: def.actions.contains(TransitionKind::Dwell),
            expiration_duration_ms: def.expiration_duration_ms,
        }
    }

    /// Whether the platform should report `kind` for this region.
    #[must_use]
    pub const fn notifies(&self, kind: TransitionKind) -> bool {
        match kind {
            TransitionKind::Enter => self.notify_on_enter,
            TransitionKind::Exit => self.notify_on_exit,
            TransitionKind::Dwell => self.notify_on_dwell,
            TransitionKind::Unknown => false,
        }
    }
}

/// Everything the platform reports back, asynchronously.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    /// A region requested in `session` is now being monitored.
    MonitoringStarted {
        session: SessionToken,
        id: GeofenceId,
    },
    /// A region requested in `session` could not be monitored.
    MonitoringFailed {
        session: SessionToken,
        id: GeofenceId,
        error: PlatformError,
    },
    /// The device crossed a monitored region.
    Transition {
        id: GeofenceId,
        kind: TransitionKind,
    },
    /// The one-shot location fix requested in `session`.
    LocationResolved {
        session: SessionToken,
        latitude: f64,
        longitude: f64,
    },
    LocationFailed {
        session: SessionToken,
        error: PlatformError,
    },
}

/// Where a `RegionMonitor` delivers its callbacks.
///
/// Cloneable and cheap; delivery never blocks the calling (platform) thread.
#[derive(Debug, Clone)]
pub struct PlatformEventSink {
    tx: Sender<PlatformEvent>,
}

impl PlatformEventSink {
    /// Creates a sink and the receiving end it feeds.
    #[must_use]
    pub fn channel() -> (Self, Receiver<PlatformEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    /// Delivers an event. Returns false once the service has shut down.
    pub fn deliver(&self, event: PlatformEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn monitoring_started(&self, session: SessionToken, id: GeofenceId) -> bool {
        self.deliver(PlatformEvent::MonitoringStarted { session, id })
    }

    pub fn monitoring_failed(&self, session: SessionToken, id: GeofenceId, error: PlatformError) -> bool {
        self.deliver(PlatformEvent::MonitoringFailed { session, id, error })
    }

    pub fn transition(&self, id: GeofenceId, kind: TransitionKind) -> bool {
        self.deliver(PlatformEvent::Transition { id, kind })
    }

    pub fn location_resolved(&self, session: SessionToken, latitude: f64, longitude: f64) -> bool {
        self.deliver(PlatformEvent::LocationResolved {
            session,
            latitude,
            longitude,
        })
    }

    pub fn location_failed(&self, session: SessionToken, error: PlatformError) -> bool {
        self.deliver(PlatformEvent::LocationFailed { session, error })
    }
}

/// The native region-monitoring capability.
///
/// Methods return once the request has been accepted or rejected; outcomes
/// that the OS reports later go through the sink passed to `attach`.
/// Implementations must be callable from the service's worker thread while
/// also delivering events from their own threads.
pub trait RegionMonitor: Send + Sync {
    /// Hands the monitor the sink for all later callbacks. Called once, before
    /// any other method.
    fn attach(&self, sink: PlatformEventSink);

    /// Reports whether region monitoring can be used right now.
    ///
    /// Use `PlatformErrorKind::PermissionDenied` for missing location
    /// permission and `PlatformErrorKind::Unsupported` when the device lacks
    /// the capability.
    fn check_availability(&self) -> Result<(), PlatformError>;

    /// Requests monitoring for one region. The acknowledgement arrives later
    /// as `MonitoringStarted` or `MonitoringFailed` tagged with `session`.
    fn start_monitoring_region(&self, session: SessionToken, region: &MonitoredRegion) -> Result<(), PlatformError>;

    fn stop_monitoring_region(&self, id: &GeofenceId) -> Result<(), PlatformError>;

    /// Regions the OS is monitoring right now, which may include regions
    /// registered by an earlier process.
    fn monitored_region_ids(&self) -> Vec<GeofenceId>;

    /// Asks for a single location fix, answered with `LocationResolved` or
    /// `LocationFailed`.
    fn request_current_location(&self, session: SessionToken) -> Result<(), PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::TransitionAction;
    use crate::coordinate::Coordinate;
    use crate::geofence::GeofenceDraft;

    #[test]
    fn test_region_flags_follow_actions() {
        let def = GeofenceDraft::new("g", Coordinate::new(1.0, 2.0))
            .on(TransitionKind::Exit, TransitionAction::notify("bye"))
            .on(TransitionKind::Dwell, TransitionAction::default())
            .expires_after_ms(60_000)
            .into_definition(GeofenceId::from("g-1"));
        let region = MonitoredRegion::from_definition(&def, 400);

        assert_eq!(region.radius_m, 400);
        assert!(!region.notify_on_enter);
        assert!(region.notify_on_exit);
        assert!(region.notifies(TransitionKind::Dwell));
        assert!(!region.notifies(TransitionKind::Unknown));
        assert_eq!(region.expiration_duration_ms, 60_000);
    }

    #[test]
    fn test_explicit_radius_wins() {
        let def = GeofenceDraft::new("g", Coordinate::new(1.0, 2.0).with_radius(150))
            .into_definition(GeofenceId::from("g-2"));
        assert_eq!(MonitoredRegion::from_definition(&def, 400).radius_m, 150);
    }

    #[test]
    fn test_sink_delivers_in_order_until_receiver_drops() {
        let (sink, rx) = PlatformEventSink::channel();
        let session = SessionToken::new(3);
        assert!(sink.monitoring_started(session, GeofenceId::from("a")));
        assert!(sink.location_resolved(session, 1.0, 2.0));

        assert!(matches!(rx.try_recv(), Ok(PlatformEvent::MonitoringStarted { .. })));
        assert!(matches!(rx.try_recv(), Ok(PlatformEvent::LocationResolved { .. })));

        drop(rx);
        assert!(!sink.transition(GeofenceId::from("a"), TransitionKind::Enter));
    }
}
