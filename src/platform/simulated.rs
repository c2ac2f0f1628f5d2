//! In-process stand-in for the OS region-monitoring service.
//!
//! Used by the test suite and the `geofence-sim` binary. It records every call
//! it receives, acknowledges starts automatically or on demand, can be told
//! to fail individual regions, and turns `move_to` into enter/exit callbacks
//! for the regions it is monitoring.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{MonitoredRegion, PlatformEventSink, RegionMonitor, SessionToken};
use crate::error::PlatformError;
use crate::geofence::GeofenceId;
use crate::transition::TransitionKind;

/// One call made into the simulated platform, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    CheckAvailability,
    StartRegion { session: SessionToken, id: GeofenceId },
    StopRegion { id: GeofenceId },
    RequestLocation { session: SessionToken },
}

#[derive(Debug, Default)]
struct State {
    sink: Option<PlatformEventSink>,
    monitored: Vec<MonitoredRegion>,
    inside: HashSet<GeofenceId>,
    awaiting_ack: Vec<(SessionToken, GeofenceId)>,
    calls: Vec<PlatformCall>,
    availability: Option<PlatformError>,
    reject_start: HashMap<GeofenceId, PlatformError>,
    fail_start: HashMap<GeofenceId, PlatformError>,
    fail_stop: HashMap<GeofenceId, PlatformError>,
    position: Option<(f64, f64)>,
    location_error: Option<PlatformError>,
    manual_ack: bool,
}

impl State {
    fn emit(&self, f: impl FnOnce(&PlatformEventSink) -> bool) {
        match &self.sink {
            Some(sink) => {
                if !f(sink) {
                    debug!("simulated platform event dropped; service is gone");
                }
            }
            None => debug!("simulated platform event dropped; no sink attached"),
        }
    }
}

fn is_inside(region: &MonitoredRegion, latitude: f64, longitude: f64) -> bool {
    crate::coordinate::Coordinate::new(region.latitude, region.longitude)
        .with_radius(region.radius_m)
        .contains(latitude, longitude, region.radius_m)
}

/// A scriptable `RegionMonitor`.
#[derive(Debug, Default)]
pub struct SimulatedRegionMonitor {
    state: Mutex<State>,
}

impl SimulatedRegionMonitor {
    /// A monitor that acknowledges every accepted start immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds start acknowledgements until `acknowledge` / `acknowledge_all`.
    #[must_use]
    pub fn with_manual_ack(self) -> Self {
        self.state().manual_ack = true;
        self
    }

    /// Sets the device position reported by location requests.
    #[must_use]
    pub fn with_position(self, latitude: f64, longitude: f64) -> Self {
        self.state().position = Some((latitude, longitude));
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `check_availability` fail with `error` (or succeed with `None`).
    pub fn set_availability(&self, error: Option<PlatformError>) {
        self.state().availability = error;
    }

    /// Makes `start_monitoring_region` reject `id` synchronously.
    pub fn reject_start(&self, id: &GeofenceId, error: PlatformError) {
        self.state().reject_start.insert(id.clone(), error);
    }

    /// Accepts the start request for `id` but reports `MonitoringFailed` later.
    pub fn fail_start(&self, id: &GeofenceId, error: PlatformError) {
        self.state().fail_start.insert(id.clone(), error);
    }

    /// Makes `stop_monitoring_region` fail for `id`.
    pub fn fail_stop(&self, id: &GeofenceId, error: PlatformError) {
        self.state().fail_stop.insert(id.clone(), error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.reject_start.clear();
        state.fail_start.clear();
        state.fail_stop.clear();
        state.availability = None;
        state.location_error = None;
    }

    pub fn set_location_error(&self, error: Option<PlatformError>) {
        self.state().location_error = error;
    }

    /// Releases the held acknowledgement for `id`. Returns false when none is held.
    pub fn acknowledge(&self, id: &GeofenceId) -> bool {
        let mut state = self.state();
        let Some(pos) = state.awaiting_ack.iter().position(|(_, held)| held == id) else {
            return false;
        };
        let (session, id) = state.awaiting_ack.remove(pos);
        state.emit(|sink| sink.monitoring_started(session, id));
        true
    }

    /// Releases every held acknowledgement, newest first.
    pub fn acknowledge_all(&self) -> usize {
        let mut state = self.state();
        let held = std::mem::take(&mut state.awaiting_ack);
        let count = held.len();
        for (session, id) in held.into_iter().rev() {
            state.emit(|sink| sink.monitoring_started(session, id));
        }
        count
    }

    /// Fails a held acknowledgement for `id` instead of confirming it.
    pub fn fail_pending(&self, id: &GeofenceId, error: PlatformError) -> bool {
        let mut state = self.state();
        let Some(pos) = state.awaiting_ack.iter().position(|(_, held)| held == id) else {
            return false;
        };
        let (session, id) = state.awaiting_ack.remove(pos);
        state.monitored.retain(|r| r.id != id);
        state.emit(|sink| sink.monitoring_failed(session, id, error));
        true
    }

    /// Moves the device and reports the crossings this causes, for regions
    /// that asked for that transition.
    pub fn move_to(&self, latitude: f64, longitude: f64) -> Vec<(GeofenceId, TransitionKind)> {
        let mut state = self.state();
        state.position = Some((latitude, longitude));

        let mut crossings = Vec::new();
        let mut inside = HashSet::new();
        for region in &state.monitored {
            let now_inside = is_inside(region, latitude, longitude);
            let was_inside = state.inside.contains(&region.id);
            if now_inside {
                inside.insert(region.id.clone());
            }
            let kind = match (was_inside, now_inside) {
                (false, true) => TransitionKind::Enter,
                (true, false) => TransitionKind::Exit,
                _ => continue,
            };
            if region.notifies(kind) {
                crossings.push((region.id.clone(), kind));
            }
        }
        state.inside = inside;

        for (id, kind) in &crossings {
            state.emit(|sink| sink.transition(id.clone(), *kind));
        }
        crossings
    }

    /// Delivers an arbitrary transition, e.g. a dwell.
    pub fn trigger(&self, id: &GeofenceId, kind: TransitionKind) {
        self.state().emit(|sink| sink.transition(id.clone(), kind));
    }

    /// Simulates a device reboot: the OS forgets every region.
    pub fn reboot(&self) {
        let mut state = self.state();
        state.monitored.clear();
        state.inside.clear();
        state.awaiting_ack.clear();
    }

    #[must_use]
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Regions currently monitored, in registration order.
    #[must_use]
    pub fn monitored_regions(&self) -> Vec<MonitoredRegion> {
        self.state().monitored.clone()
    }

    #[must_use]
    pub fn pending_acks(&self) -> usize {
        self.state().awaiting_ack.len()
    }
}

impl RegionMonitor for SimulatedRegionMonitor {
    fn attach(&self, sink: PlatformEventSink) {
        self.state().sink = Some(sink);
    }

    fn check_availability(&self) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(PlatformCall::CheckAvailability);
        state.availability.clone().map_or(Ok(()), Err)
    }

    fn start_monitoring_region(&self, session: SessionToken, region: &MonitoredRegion) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(PlatformCall::StartRegion {
            session,
            id: region.id.clone(),
        });

        if let Some(err) = state.reject_start.get(&region.id) {
            return Err(err.clone());
        }
        if let Some(err) = state.fail_start.get(&region.id).cloned() {
            state.emit(|sink| sink.monitoring_failed(session, region.id.clone(), err));
            return Ok(());
        }

        state.monitored.retain(|r| r.id != region.id);
        state.monitored.push(region.clone());
        state.inside.remove(&region.id);
        if let Some((lat, lng)) = state.position {
            if is_inside(region, lat, lng) {
                state.inside.insert(region.id.clone());
            }
        }

        if state.manual_ack {
            state.awaiting_ack.push((session, region.id.clone()));
        } else {
            state.emit(|sink| sink.monitoring_started(session, region.id.clone()));
        }
        Ok(())
    }

    fn stop_monitoring_region(&self, id: &GeofenceId) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(PlatformCall::StopRegion { id: id.clone() });
        if let Some(err) = state.fail_stop.get(id) {
            return Err(err.clone());
        }
        state.monitored.retain(|r| &r.id != id);
        state.inside.remove(id);
        state.awaiting_ack.retain(|(_, held)| held != id);
        Ok(())
    }

    fn monitored_region_ids(&self) -> Vec<GeofenceId> {
        self.state().monitored.iter().map(|r| r.id.clone()).collect()
    }

    fn request_current_location(&self, session: SessionToken) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(PlatformCall::RequestLocation { session });
        match (state.location_error.clone(), state.position) {
            (Some(err), _) => state.emit(|sink| sink.location_failed(session, err)),
            (None, Some((lat, lng))) => state.emit(|sink| sink.location_resolved(session, lat, lng)),
            (None, None) => state.emit(|sink| {
                sink.location_failed(session, PlatformError::failure(-1, "no location fix available"))
            }),
        }
        Ok(())
    }
}
