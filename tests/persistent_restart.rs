//! Restart tests for the file-backed registry store.
//!
//! These tests verify that:
//! - The registry and monitoring flags survive a process restart
//! - A shutdown recorded before a reboot is visible after it
//! - A corrupted snapshot starts an empty registry instead of failing

#![cfg(feature = "persistent")]

use std::fs;
use std::sync::Arc;

use tempfile::tempdir;

use geofence_bridge::storage::{open_blob_store, StorageError};
use geofence_bridge::{
    Coordinate, GeofenceDraft, GeofenceGroupDraft, GeofenceService, SimulatedRegionMonitor, TransitionAction,
    TransitionKind,
};

fn service_at(dir: &std::path::Path, monitor: Arc<SimulatedRegionMonitor>) -> GeofenceService {
    let blobs = open_blob_store(dir, None).unwrap();
    GeofenceService::builder(monitor)
        .blob_store(Arc::new(blobs))
        .build()
        .unwrap()
}

fn draft() -> GeofenceGroupDraft {
    GeofenceGroupDraft::new()
        .geofence(
            GeofenceDraft::new("home", Coordinate::new(52.52, 13.405).with_radius(150))
                .on(TransitionKind::Enter, TransitionAction::notify("Home")),
        )
        .initial_trigger(TransitionKind::Enter)
}

#[test]
fn test_registry_survives_restart() {
    let dir = tempdir().unwrap();

    let ids = {
        let service = service_at(dir.path(), Arc::new(SimulatedRegionMonitor::new()));
        let ids = service.add_geofences(draft()).unwrap().ids();
        service.start_monitoring().wait().unwrap();
        ids
    };

    let service = service_at(dir.path(), Arc::new(SimulatedRegionMonitor::new()));
    assert!(service.is_started_monitoring().unwrap());
    let groups = service.geofences().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].ids(), ids);
    assert!(groups[0].initial_triggers.contains(&TransitionKind::Enter));
}

#[test]
fn test_shutdown_then_boot_rearms() {
    let dir = tempdir().unwrap();

    {
        let service = service_at(dir.path(), Arc::new(SimulatedRegionMonitor::new()));
        service.add_geofences(draft()).unwrap();
        service.start_monitoring().wait().unwrap();
        service.mark_shutdown().unwrap();
    }

    // A fresh platform after reboot monitors nothing.
    let monitor = Arc::new(SimulatedRegionMonitor::new());
    let service = service_at(dir.path(), monitor.clone());
    assert!(!service.is_started_monitoring().unwrap());

    let rearmed = service.handle_boot_completed().wait().unwrap();
    assert_eq!(rearmed.map(|ids| ids.len()), Some(1));
    assert!(service.is_started_monitoring().unwrap());
    assert_eq!(monitor.monitored_regions().len(), 1);
}

#[test]
fn test_corrupt_snapshot_starts_empty() {
    let dir = tempdir().unwrap();

    {
        let service = service_at(dir.path(), Arc::new(SimulatedRegionMonitor::new()));
        service.add_geofences(draft()).unwrap();
    }

    for entry in fs::read_dir(dir.path()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|e| e == "blob") {
            let mut bytes = fs::read(&path).unwrap();
            let last = bytes.len() - 1;
            bytes[last] ^= 0xFF;
            fs::write(&path, bytes).unwrap();
        }
    }

    let service = service_at(dir.path(), Arc::new(SimulatedRegionMonitor::new()));
    assert!(service.geofences().unwrap().is_empty());
    assert!(!service.is_started_monitoring().unwrap());
}

#[test]
fn test_second_service_on_same_dir_is_locked() {
    let dir = tempdir().unwrap();
    let _first = open_blob_store(dir.path(), None).unwrap();
    assert!(matches!(open_blob_store(dir.path(), None), Err(StorageError::Locked(_))));
}
