//! Geofence trace simulator
//!
//! Replays a JSON trace of registry operations and device movements against a
//! `GeofenceService` backed by the simulated platform and on-disk storage.
//! Every operation result and every emitted geofence event is printed to
//! stdout as one JSON line.
//!
//! Trace format:
//!
//! ```json
//! {
//!   "position": [40.7415, -74.0034],
//!   "steps": [
//!     {"op": "add", "group": {"geofences": [...], "initialTriggers": [1]}},
//!     {"op": "start"},
//!     {"op": "move", "latitude": 50.0, "longitude": 50.0},
//!     {"op": "remove", "names": ["office"]},
//!     {"op": "shutdown"}, {"op": "reboot"}, {"op": "boot_completed"},
//!     {"op": "stop"}
//!   ]
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::info;
use tracing_subscriber::EnvFilter;

use geofence_bridge::effects::GeofenceEvent;
use geofence_bridge::storage::open_blob_store;
use geofence_bridge::{
    EventEmitter, GeofenceConfig, GeofenceError, GeofenceGroupDraft, GeofenceId, GeofenceService,
    SimulatedRegionMonitor,
};

/// Simulator configuration
struct Config {
    /// Trace file to replay
    trace: PathBuf,
    /// Data directory for the registry snapshot
    data_dir: PathBuf,
    /// Optional service configuration (JSON)
    service_config: Option<PathBuf>,
}

fn usage() {
    println!("geofence-sim - replay a geofence trace");
    println!();
    println!("USAGE:");
    println!("    geofence-sim --trace <FILE> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -t, --trace <FILE>        Trace to replay");
    println!("    -d, --data-dir <DIR>      Data directory [default: ./geofences.db]");
    println!("    -c, --config <FILE>       Service configuration (JSON)");
    println!("    -h, --help                Print help information");
}

fn value_of(args: &[String], i: usize, flag: &str) -> PathBuf {
    args.get(i + 1).map_or_else(
        || {
            eprintln!("error: {flag} requires a value");
            std::process::exit(1);
        },
        PathBuf::from,
    )
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut trace = None;
    let mut data_dir = PathBuf::from("./geofences.db");
    let mut service_config = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--trace" | "-t" => {
                trace = Some(value_of(&args, i, "--trace"));
                i += 2;
            }
            "--data-dir" | "-d" => {
                data_dir = value_of(&args, i, "--data-dir");
                i += 2;
            }
            "--config" | "-c" => {
                service_config = Some(value_of(&args, i, "--config"));
                i += 2;
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    let Some(trace) = trace else {
        eprintln!("error: --trace is required");
        std::process::exit(1);
    };
    Config {
        trace,
        data_dir,
        service_config,
    }
}

#[derive(Debug, Deserialize)]
struct Trace {
    #[serde(default)]
    position: Option<(f64, f64)>,
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    Add { group: GeofenceGroupDraft },
    Start,
    Stop,
    /// Removes geofences by name; no names removes everything.
    Remove {
        #[serde(default)]
        names: Vec<String>,
    },
    Move { latitude: f64, longitude: f64 },
    Shutdown,
    Reboot,
    BootCompleted,
}

/// Prints every emitted geofence event as a JSON line.
struct StdoutEmitter;

impl EventEmitter for StdoutEmitter {
    fn emit(&self, name: &str, event: &GeofenceEvent) {
        println!("{}", json!({"event": name, "payload": event}));
    }
}

fn outcome<T: serde::Serialize>(op: &str, result: Result<T, GeofenceError>) {
    let line = match result {
        Ok(value) => json!({"op": op, "ok": value}),
        Err(e) => json!({"op": op, "error": e.to_string()}),
    };
    println!("{line}");
}

fn ids_for_names(service: &GeofenceService, names: &[String]) -> Result<Vec<GeofenceId>, GeofenceError> {
    let groups = service.geofences()?;
    Ok(groups
        .iter()
        .flat_map(|g| g.definitions.iter())
        .filter(|d| names.contains(&d.name))
        .map(|d| d.id.clone())
        .collect())
}

fn replay(service: &GeofenceService, monitor: &SimulatedRegionMonitor, steps: Vec<Step>) -> Result<(), GeofenceError> {
    for step in steps {
        match step {
            Step::Add { group } => outcome("add", service.add_geofences(group).map(|g| g.ids())),
            Step::Start => outcome("start", service.start_monitoring().wait()),
            Step::Stop => outcome("stop", service.stop_monitoring().wait()),
            Step::Remove { names } => {
                let ids = if names.is_empty() {
                    Vec::new()
                } else {
                    ids_for_names(service, &names)?
                };
                outcome("remove", service.remove_geofences(ids).wait());
            }
            Step::Move { latitude, longitude } => {
                let crossings = monitor.move_to(latitude, longitude);
                let crossings: Vec<JsonValue> = crossings
                    .into_iter()
                    .map(|(id, kind)| json!({"id": id, "kind": kind}))
                    .collect();
                outcome("move", Ok::<_, GeofenceError>(crossings));
            }
            Step::Shutdown => outcome("shutdown", service.mark_shutdown()),
            Step::Reboot => {
                monitor.reboot();
                outcome("reboot", Ok::<_, GeofenceError>(()));
            }
            Step::BootCompleted => outcome("boot_completed", service.handle_boot_completed().wait()),
        }
        // Lets queued platform callbacks drain before the next step.
        service.is_started_monitoring()?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = parse_args();
    let trace: Trace = serde_json::from_slice(&std::fs::read(&config.trace)?)?;
    let service_config: GeofenceConfig = match &config.service_config {
        Some(path) => serde_json::from_slice(&std::fs::read(path)?)?,
        None => GeofenceConfig::default(),
    };

    let mut monitor = SimulatedRegionMonitor::new();
    if let Some((latitude, longitude)) = trace.position {
        monitor = monitor.with_position(latitude, longitude);
    }
    let monitor = Arc::new(monitor);

    let blobs = open_blob_store(&config.data_dir, None)?;
    info!(data_dir = %config.data_dir.display(), steps = trace.steps.len(), "replaying trace");

    let service = GeofenceService::builder(monitor.clone())
        .config(service_config)
        .blob_store(Arc::new(blobs))
        .event_emitter(Arc::new(StdoutEmitter))
        .build()?;

    replay(&service, &monitor, trace.steps)?;
    println!("{}", json!({"stats": service.stats()}));
    Ok(())
}
