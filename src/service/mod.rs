//! The geofence service: the public handle to the registry worker.
//!
//! `GeofenceService` is constructed once per process and passed to whoever
//! needs it. It owns one worker thread that holds the registry; every
//! operation is a message to that thread, so registry reads, mutations and
//! persistence never race with each other or with platform callbacks.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use geofence_bridge::{GeofenceService, SimulatedRegionMonitor};
//!
//! let monitor = Arc::new(SimulatedRegionMonitor::new());
//! let service = GeofenceService::builder(monitor).build()?;
//! let group = service.add_geofences(draft)?;
//! let started = service.start_monitoring().wait()?;
//! ```

mod pending;
mod worker;

pub use pending::Pending;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};
use tracing::{error, info};

use crate::config::GeofenceConfig;
use crate::coordinate::Coordinate;
use crate::effects::{EventEmitter, LogEmitter, LogNotifier, NoopWebhookClient, Notifier, WebhookClient};
use crate::error::{GeofenceError, GeofenceResult};
use crate::geofence::{GeofenceDefinition, GeofenceGroup, GeofenceGroupDraft, GeofenceId};
use crate::monitor::EventDispatcher;
use crate::platform::{PlatformEventSink, RegionMonitor};
use crate::registry::{GeofenceLocation, GeofenceRegistry};
use crate::snapshot::RegistrySnapshot;
use crate::stats::{Counters, ServiceStats};
use crate::storage::{BlobStore, InMemoryBlobStore, SnapshotStore};

use worker::{Command, Reply, Worker};

const WORKER_PATH: &str = "registry_worker";

/// Configures and starts a `GeofenceService`.
pub struct GeofenceServiceBuilder {
    monitor: Arc<dyn RegionMonitor>,
    config: GeofenceConfig,
    blobs: Option<Arc<dyn BlobStore>>,
    notifier: Arc<dyn Notifier>,
    emitter: Arc<dyn EventEmitter>,
    webhook_client: Arc<dyn WebhookClient>,
}

impl GeofenceServiceBuilder {
    #[must_use]
    pub fn config(mut self, config: GeofenceConfig) -> Self {
        self.config = config;
        self
    }

    /// Where the registry snapshot lives. Defaults to an in-memory store.
    #[must_use]
    pub fn blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn event_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    #[must_use]
    pub fn webhook_client(mut self, client: Arc<dyn WebhookClient>) -> Self {
        self.webhook_client = client;
        self
    }

    /// Loads the persisted registry, attaches the platform monitor and starts
    /// the worker threads.
    ///
    /// An unreadable snapshot is logged and replaced by an empty registry.
    ///
    /// # Errors
    /// - `ValidationError::InvalidConfig` for a bad configuration
    /// - `GeofenceError::Internal` if a worker thread cannot be spawned
    pub fn build(self) -> GeofenceResult<GeofenceService> {
        let config = self.config.validate()?;
        let blobs = self.blobs.unwrap_or_else(|| Arc::new(InMemoryBlobStore::new()));
        let store = SnapshotStore::new(blobs, config.snapshot_key.clone());
        let registry = GeofenceRegistry::from_snapshot(store.load());
        let counters = Arc::new(Counters::default());

        let dispatcher = EventDispatcher::new(
            self.notifier,
            self.emitter,
            self.webhook_client,
            config.webhook_queue_capacity,
            Arc::clone(&counters),
        )
        .map_err(|e| GeofenceError::internal(format!("failed to spawn webhook worker: {e}")))?;

        let (sink, events_rx) = PlatformEventSink::channel();
        self.monitor.attach(sink);

        let (commands_tx, commands_rx) = bounded::<Command>(config.inbox_capacity);
        info!(
            geofences = registry.len(),
            monitoring = registry.is_started_monitoring(),
            "geofence service starting"
        );
        let worker = Worker::new(config, registry, store, self.monitor, dispatcher, Arc::clone(&counters));
        let join = thread::Builder::new()
            .name("geofence-registry".to_string())
            .spawn(move || worker::run(worker, &commands_rx, &events_rx))
            .map_err(|e| GeofenceError::internal(format!("failed to spawn registry worker: {e}")))?;

        Ok(GeofenceService {
            commands: commands_tx,
            counters,
            join: Some(join),
        })
    }
}

/// Handle to the running geofence registry.
///
/// Dropping the handle cancels any in-flight start, finishes queued webhook
/// deliveries and joins the worker threads.
pub struct GeofenceService {
    commands: Sender<Command>,
    counters: Arc<Counters>,
    join: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for GeofenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeofenceService")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl GeofenceService {
    /// Starts configuring a service around a platform monitor.
    #[must_use]
    pub fn builder(monitor: Arc<dyn RegionMonitor>) -> GeofenceServiceBuilder {
        GeofenceServiceBuilder {
            monitor,
            config: GeofenceConfig::default(),
            blobs: None,
            notifier: Arc::new(LogNotifier),
            emitter: Arc::new(LogEmitter),
            webhook_client: Arc::new(NoopWebhookClient),
        }
    }

    fn send(&self, command: Command) -> GeofenceResult<()> {
        self.commands
            .send(command)
            .map_err(|_| GeofenceError::disconnected(WORKER_PATH))
    }

    fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> GeofenceResult<T> {
        let (reply, pending) = Pending::channel(WORKER_PATH);
        self.send(make(reply))?;
        pending.wait()
    }

    fn submit<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Pending<T> {
        let (reply, pending) = Pending::channel(WORKER_PATH);
        match self.send(make(reply)) {
            Ok(()) => pending,
            Err(e) => Pending::ready(WORKER_PATH, Err(e)),
        }
    }

    fn read<T: Send + 'static>(&self, f: impl FnOnce(&GeofenceRegistry) -> T + Send + 'static) -> GeofenceResult<T> {
        self.call(|reply| {
            Command::Read(Box::new(move |registry: &GeofenceRegistry| {
                let _ = reply.send(Ok(f(registry)));
            }))
        })
    }

    /// Registers a batch of geofences as one group and persists the registry.
    ///
    /// Ids are assigned here. A new geofence at the same position as an
    /// existing one replaces it. Monitoring is not started.
    pub fn add_geofences(&self, draft: GeofenceGroupDraft) -> GeofenceResult<GeofenceGroup> {
        self.call(|reply| Command::AddGeofences { draft, reply })
    }

    /// (Re)starts monitoring every registered geofence.
    ///
    /// Any previous monitoring is stopped first. Resolves with the ids whose
    /// monitoring was requested once the platform has acknowledged all of
    /// them, or with the first failure.
    pub fn start_monitoring(&self) -> Pending<Vec<GeofenceId>> {
        self.submit(|reply| Command::StartMonitoring { reply })
    }

    /// Stops every region the platform is monitoring. Resolves with whether
    /// monitoring was marked as started before the call.
    pub fn stop_monitoring(&self) -> Pending<bool> {
        self.submit(|reply| Command::StopMonitoring { reply })
    }

    /// Removes the listed geofences, or every geofence when `ids` is empty.
    /// Resolves with `ids`; unknown ids are not an error.
    pub fn remove_geofences(&self, ids: impl IntoIterator<Item = GeofenceId>) -> Pending<Vec<GeofenceId>> {
        let ids: Vec<GeofenceId> = ids.into_iter().collect();
        self.submit(|reply| Command::RemoveGeofences { ids, reply })
    }

    pub fn exists_by_id(&self, id: &GeofenceId) -> GeofenceResult<bool> {
        let id = id.clone();
        self.read(move |registry| registry.exists_by_id(&id))
    }

    /// True if at least one of `ids` is registered.
    pub fn exists_by_ids(&self, ids: &[GeofenceId]) -> GeofenceResult<bool> {
        let ids = ids.to_vec();
        self.read(move |registry| registry.exists_by_ids(&ids))
    }

    pub fn find_by_ids(&self, ids: &[GeofenceId]) -> GeofenceResult<Vec<GeofenceDefinition>> {
        let ids = ids.to_vec();
        self.read(move |registry| registry.find_by_ids(&ids))
    }

    pub fn exists_by_coordinate(
        &self,
        coordinate: Coordinate,
        ignore_radius: bool,
    ) -> GeofenceResult<Option<GeofenceLocation>> {
        self.read(move |registry| registry.exists_by_coordinate(&coordinate, ignore_radius))
    }

    /// True if any of `coordinates` matches a registered geofence.
    pub fn exists_by_coordinates(&self, coordinates: &[Coordinate], ignore_radius: bool) -> GeofenceResult<bool> {
        let coordinates = coordinates.to_vec();
        self.read(move |registry| registry.exists_by_coordinates(&coordinates, ignore_radius))
    }

    /// Whether monitoring is started and has been re-armed since the last boot.
    pub fn is_started_monitoring(&self) -> GeofenceResult<bool> {
        self.read(GeofenceRegistry::is_started_monitoring)
    }

    pub fn geofences(&self) -> GeofenceResult<Vec<GeofenceGroup>> {
        self.read(|registry| registry.groups().to_vec())
    }

    /// A copy of the current registry state.
    pub fn snapshot(&self) -> GeofenceResult<RegistrySnapshot> {
        self.read(|registry| registry.snapshot().clone())
    }

    /// Records that the device is shutting down. Until the next successful
    /// start, `is_started_monitoring` reports false.
    pub fn mark_shutdown(&self) -> GeofenceResult<()> {
        self.call(|reply| Command::MarkShutdown { reply })
    }

    /// Re-arms monitoring after a device boot.
    ///
    /// Resolves with `None` when nothing was started (re-arm disabled by
    /// `restart_on_boot`, or no geofences registered), otherwise behaves like
    /// `start_monitoring`.
    pub fn handle_boot_completed(&self) -> Pending<Option<Vec<GeofenceId>>> {
        self.submit(|reply| Command::BootCompleted { reply })
    }

    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        self.counters.snapshot()
    }
}

impl Drop for GeofenceService {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.join.take() {
            if handle.join().is_err() {
                error!("registry worker panicked");
            }
        }
    }
}
