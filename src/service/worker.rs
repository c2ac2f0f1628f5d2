//! The registry worker: the single owner of registry state.
//!
//! Commands from the service handle and callbacks from the platform are
//! handled one at a time on this thread. Platform callbacks that are already
//! queued when a command arrives are applied before that command.

use std::collections::HashSet;
use std::sync::Arc;

use crossbeam_channel::{never, select, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::config::GeofenceConfig;
use crate::error::{GeofenceResult, MonitoringError};
use crate::geofence::{GeofenceGroup, GeofenceGroupDraft, GeofenceId};
use crate::monitor::{initial_transitions, EventDispatcher, Fired, MonitoringStatus, Outcome, Progress};
use crate::platform::{PlatformEvent, RegionMonitor, SessionToken};
use crate::registry::GeofenceRegistry;
use crate::stats::Counters;
use crate::storage::SnapshotStore;
use crate::transition::TransitionKind;

pub(crate) type Reply<T> = Sender<GeofenceResult<T>>;

type StartReply = Box<dyn FnOnce(GeofenceResult<Vec<GeofenceId>>) + Send>;

pub(crate) enum Command {
    AddGeofences {
        draft: GeofenceGroupDraft,
        reply: Reply<GeofenceGroup>,
    },
    StartMonitoring {
        reply: Reply<Vec<GeofenceId>>,
    },
    StopMonitoring {
        reply: Reply<bool>,
    },
    RemoveGeofences {
        ids: Vec<GeofenceId>,
        reply: Reply<Vec<GeofenceId>>,
    },
    MarkShutdown {
        reply: Reply<()>,
    },
    BootCompleted {
        reply: Reply<Option<Vec<GeofenceId>>>,
    },
    Read(Box<dyn FnOnce(&GeofenceRegistry) + Send>),
    Shutdown,
}

struct PendingStart {
    requested: Vec<GeofenceId>,
    reply: StartReply,
}

/// The location request issued for a start session. A fix that resolves
/// before every region has acknowledged is held until the session starts.
struct InitialFix {
    session: SessionToken,
    resolved: Option<(f64, f64)>,
}

pub(crate) struct Worker {
    config: GeofenceConfig,
    registry: GeofenceRegistry,
    store: SnapshotStore,
    monitor: Arc<dyn RegionMonitor>,
    status: MonitoringStatus<PendingStart>,
    initial_fix: Option<InitialFix>,
    dispatcher: EventDispatcher,
    counters: Arc<Counters>,
}

impl Worker {
    pub fn new(
        config: GeofenceConfig,
        registry: GeofenceRegistry,
        store: SnapshotStore,
        monitor: Arc<dyn RegionMonitor>,
        dispatcher: EventDispatcher,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            monitor,
            status: MonitoringStatus::new(),
            initial_fix: None,
            dispatcher,
            counters,
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::AddGeofences { draft, reply } => {
                let _ = reply.send(self.add_geofences(draft));
            }
            Command::StartMonitoring { reply } => self.start_monitoring(Box::new(move |result| {
                let _ = reply.send(result);
            })),
            Command::StopMonitoring { reply } => {
                let _ = reply.send(self.stop_monitoring());
            }
            Command::RemoveGeofences { ids, reply } => {
                let _ = reply.send(self.remove_geofences(ids));
            }
            Command::MarkShutdown { reply } => {
                let _ = reply.send(self.mark_shutdown());
            }
            Command::BootCompleted { reply } => self.boot_completed(reply),
            Command::Read(read) => read(&self.registry),
            Command::Shutdown => {}
        }
    }

    /// Persists `next` and makes it current. On failure nothing changes.
    fn commit(&mut self, next: GeofenceRegistry) -> GeofenceResult<()> {
        self.store.save(next.snapshot())?;
        self.registry = next;
        Ok(())
    }

    fn add_geofences(&mut self, draft: GeofenceGroupDraft) -> GeofenceResult<GeofenceGroup> {
        let mut next = self.registry.clone();
        let group = next.add_group(draft, self.config.dedup_ignore_radius)?;
        self.commit(next)?;
        info!(
            added = group.definitions.len(),
            total = self.registry.len(),
            initial_triggers = group.initial_triggers.len(),
            "geofences added"
        );
        Ok(group)
    }

    fn start_monitoring(&mut self, reply: StartReply) {
        info!(geofences = self.registry.len(), "start monitoring requested");

        if let Err(e) = self.stop_monitoring() {
            warn!(error = %e, "stop before start failed; starting anyway");
        }

        if self.registry.is_empty() {
            self.clear_monitoring_flag();
            reply(Err(MonitoringError::NoGeofencesRegistered.into()));
            return;
        }

        if let Err(source) = self.monitor.check_availability() {
            let err = MonitoringError::from_availability(source);
            warn!(error = %err, "region monitoring unavailable");
            self.clear_monitoring_flag();
            reply(Err(err.into()));
            return;
        }

        let regions = self.registry.regions(self.config.default_radius_m);
        let requested: Vec<GeofenceId> = regions.iter().map(|r| r.id.clone()).collect();
        let session = match self.status.start(requested.clone(), PendingStart { requested, reply }) {
            Ok(session) => session,
            Err(rejected) => {
                (rejected.reply)(Err(MonitoringError::CompletionPending.into()));
                return;
            }
        };
        debug!(%session, regions = regions.len(), "requesting region monitoring");

        for region in &regions {
            if let Err(source) = self.monitor.start_monitoring_region(session, region) {
                warn!(%session, region = %region.id, error = %source, "platform rejected region");
                let err = MonitoringError::StartFailed {
                    region: Some(region.id.clone()),
                    source,
                };
                if let Some(fired) = self.status.fail(session, err) {
                    self.finish_start(fired);
                }
                return;
            }
        }

        match self.monitor.request_current_location(session) {
            Ok(()) => {
                self.initial_fix = Some(InitialFix {
                    session,
                    resolved: None,
                });
            }
            Err(e) => warn!(%session, error = %e, "initial location fix unavailable; skipping initial triggers"),
        }
    }

    fn finish_start(&mut self, fired: Fired<PendingStart>) {
        let Fired {
            session,
            completion,
            outcome,
        } = fired;

        let result = match outcome {
            Outcome::Started => {
                let mut next = self.registry.clone();
                next.set_monitoring(true);
                next.set_boot_completed(true);
                match self.commit(next) {
                    Ok(()) => {
                        let ids: Vec<GeofenceId> = completion
                            .requested
                            .into_iter()
                            .filter(|id| self.registry.exists_by_id(id))
                            .collect();
                        info!(%session, regions = ids.len(), "monitoring started");
                        self.release_initial_fix(session);
                        Ok(ids)
                    }
                    Err(e) => {
                        warn!(%session, error = %e, "monitoring started but state could not be persisted");
                        self.cancel_initial_fix(session);
                        Err(e)
                    }
                }
            }
            Outcome::Failed(e) => {
                self.cancel_initial_fix(session);
                self.clear_monitoring_flag();
                warn!(%session, error = %e, "monitoring start failed");
                Err(e.into())
            }
            Outcome::Stopped => {
                self.cancel_initial_fix(session);
                self.clear_monitoring_flag();
                info!(%session, "monitoring start cancelled");
                Err(MonitoringError::Cancelled.into())
            }
        };
        (completion.reply)(result);
    }

    fn cancel_initial_fix(&mut self, session: SessionToken) {
        if self.initial_fix.as_ref().is_some_and(|fix| fix.session == session) {
            self.initial_fix = None;
        }
    }

    /// Synthesizes initial triggers from a fix that resolved while `session`
    /// was still waiting for acknowledgements.
    fn release_initial_fix(&mut self, session: SessionToken) {
        match self.initial_fix.take() {
            Some(InitialFix {
                session: fix_session,
                resolved: Some((latitude, longitude)),
            }) if fix_session == session => self.synthesize_initial_triggers(latitude, longitude),
            other => self.initial_fix = other,
        }
    }

    /// A start that did not complete must not leave an earlier session's
    /// `monitoringStarted` flag behind.
    fn clear_monitoring_flag(&mut self) {
        if !self.registry.monitoring_flag() {
            return;
        }
        let mut next = self.registry.clone();
        next.set_monitoring(false);
        match self.commit(next) {
            Ok(()) => debug!("monitoring flag cleared after unfinished start"),
            Err(e) => warn!(error = %e, "failed to clear monitoring flag after unfinished start"),
        }
    }

    fn fix_session_matches(&self, session: SessionToken) -> bool {
        self.initial_fix.as_ref().is_some_and(|fix| fix.session == session)
    }

    /// Cancels any in-flight start, then stops every region the platform
    /// reports as monitored.
    fn stop_monitoring(&mut self) -> GeofenceResult<bool> {
        let was_started = self.registry.monitoring_flag();
        if let Some(fired) = self.status.stop() {
            self.finish_start(fired);
        }
        self.initial_fix = None;

        self.stop_regions(self.monitor.monitored_region_ids())?;

        let mut next = self.registry.clone();
        next.set_monitoring(false);
        self.commit(next)?;
        info!(was_started, "monitoring stopped");
        Ok(was_started)
    }

    fn stop_regions(&self, ids: Vec<GeofenceId>) -> Result<(), MonitoringError> {
        for id in ids {
            if let Err(source) = self.monitor.stop_monitoring_region(&id) {
                warn!(region = %id, error = %source, "platform failed to stop region");
                return Err(MonitoringError::StopFailed { region: id, source });
            }
            debug!(region = %id, "region stopped");
        }
        Ok(())
    }

    fn remove_geofences(&mut self, ids: Vec<GeofenceId>) -> GeofenceResult<Vec<GeofenceId>> {
        if ids.is_empty() {
            if let Some(fired) = self.status.stop() {
                self.finish_start(fired);
            }
            self.initial_fix = None;
            self.stop_regions(self.monitor.monitored_region_ids())?;

            let mut next = self.registry.clone();
            next.clear();
            next.set_monitoring(false);
            self.commit(next)?;
            info!("all geofences removed");
            return Ok(ids);
        }

        let monitored: HashSet<GeofenceId> = self.monitor.monitored_region_ids().into_iter().collect();
        let to_stop: Vec<GeofenceId> = ids.iter().filter(|id| monitored.contains(*id)).cloned().collect();
        self.stop_regions(to_stop)?;

        let mut next = self.registry.clone();
        let removed = next.remove_ids(&ids);
        if next.is_empty() {
            next.set_monitoring(false);
        }
        self.commit(next)?;
        info!(requested = ids.len(), removed, remaining = self.registry.len(), "geofences removed");

        if let Some(fired) = self.status.withdraw(&ids) {
            self.finish_start(fired);
        }
        Ok(ids)
    }

    fn mark_shutdown(&mut self) -> GeofenceResult<()> {
        let mut next = self.registry.clone();
        next.set_boot_completed(false);
        self.commit(next)?;
        info!("device shutdown recorded; monitoring must be re-armed after boot");
        Ok(())
    }

    fn boot_completed(&mut self, reply: Reply<Option<Vec<GeofenceId>>>) {
        if !self.config.restart_on_boot {
            info!("boot completed; automatic re-arm disabled");
            let _ = reply.send(Ok(None));
            return;
        }
        if self.registry.is_empty() {
            info!("boot completed; no geofences to re-arm");
            let _ = reply.send(Ok(None));
            return;
        }
        info!(geofences = self.registry.len(), "boot completed; re-arming monitoring");
        self.start_monitoring(Box::new(move |result| {
            let _ = reply.send(result.map(Some));
        }));
    }

    fn on_platform_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::MonitoringStarted { session, id } => match self.status.acknowledge(session, &id) {
                Progress::Counted { acked, target } => {
                    debug!(%session, region = %id, acked, target, "region monitoring started");
                }
                Progress::Complete(fired) => self.finish_start(fired),
                Progress::Ignored => self.ignore_stale(session, &id, "start acknowledgement"),
            },
            PlatformEvent::MonitoringFailed { session, id, error } => {
                warn!(%session, region = %id, error = %error, "platform reported monitoring failure");
                let err = MonitoringError::StartFailed {
                    region: Some(id.clone()),
                    source: error,
                };
                match self.status.fail(session, err) {
                    Some(fired) => self.finish_start(fired),
                    None => self.ignore_stale(session, &id, "monitoring failure"),
                }
            }
            PlatformEvent::Transition { id, kind } => self.on_transition(&id, kind),
            PlatformEvent::LocationResolved {
                session,
                latitude,
                longitude,
            } => {
                if !self.fix_session_matches(session) {
                    Counters::bump(&self.counters.stale_callbacks_ignored);
                    debug!(%session, "ignoring location fix from superseded session");
                    return;
                }
                if self.status.session() == Some(session) {
                    if let Some(fix) = self.initial_fix.as_mut() {
                        fix.resolved = Some((latitude, longitude));
                    }
                    debug!(%session, "holding initial fix until every region acknowledges");
                    return;
                }
                self.initial_fix = None;
                self.synthesize_initial_triggers(latitude, longitude);
            }
            PlatformEvent::LocationFailed { session, error } => {
                if !self.fix_session_matches(session) {
                    Counters::bump(&self.counters.stale_callbacks_ignored);
                    debug!(%session, "ignoring location failure from superseded session");
                    return;
                }
                self.initial_fix = None;
                warn!(%session, error = %error, "initial location fix failed; no initial triggers");
            }
        }
    }

    fn ignore_stale(&self, session: SessionToken, id: &GeofenceId, what: &str) {
        Counters::bump(&self.counters.stale_callbacks_ignored);
        debug!(%session, region = %id, what, "ignoring stale platform callback");
    }

    fn on_transition(&self, id: &GeofenceId, kind: TransitionKind) {
        if kind.is_unknown() {
            debug!(region = %id, "ignoring transition of unknown kind");
            return;
        }
        let Some(def) = self.registry.find(id) else {
            Counters::bump(&self.counters.stale_callbacks_ignored);
            debug!(region = %id, kind = %kind, "transition for unregistered region");
            return;
        };
        self.dispatcher.dispatch(def, kind, false);
    }

    fn synthesize_initial_triggers(&self, latitude: f64, longitude: f64) {
        let transitions = initial_transitions(self.registry.groups(), latitude, longitude, self.config.default_radius_m);
        debug!(latitude, longitude, count = transitions.len(), "synthesizing initial triggers");
        for (def, kind) in transitions {
            self.dispatcher.dispatch(def, kind, true);
        }
    }

    fn shutdown(&mut self) {
        if let Some(fired) = self.status.stop() {
            self.finish_start(fired);
        }
        debug!("registry worker stopped");
    }
}

/// Runs the worker until `Shutdown` arrives or every handle is gone.
pub(crate) fn run(mut worker: Worker, commands: &Receiver<Command>, events: &Receiver<PlatformEvent>) {
    let closed = never();
    let mut events_open = true;

    loop {
        let event_rx = if events_open { events } else { &closed };
        select! {
            recv(event_rx) -> event => match event {
                Ok(event) => worker.on_platform_event(event),
                Err(_) => {
                    debug!("platform event channel closed");
                    events_open = false;
                }
            },
            recv(commands) -> command => match command {
                Ok(Command::Shutdown) | Err(_) => break,
                Ok(command) => {
                    if events_open {
                        while let Ok(event) = events.try_recv() {
                            worker.on_platform_event(event);
                        }
                    }
                    worker.handle(command);
                }
            },
        }
    }

    worker.shutdown();
}
