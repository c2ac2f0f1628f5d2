//! The in-memory geofence registry.
//!
//! `GeofenceRegistry` holds the groups and flags of a `RegistrySnapshot` and
//! implements the registration rules: id assignment, replace-by-position
//! deduplication, group pruning and the lookup queries. It has no platform or
//! storage access; the service worker clones it, mutates the clone, persists
//! the result and only then swaps it in.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coordinate::Coordinate;
use crate::error::ValidationError;
use crate::geofence::{GeofenceDefinition, GeofenceGroup, GeofenceGroupDraft, GeofenceId};
use crate::platform::MonitoredRegion;
use crate::snapshot::RegistrySnapshot;

/// Position of a definition: `(group index, index within group)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeofenceLocation {
    pub group: usize,
    pub index: usize,
}

/// Registered geofence groups plus the monitoring flags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeofenceRegistry {
    snapshot: RegistrySnapshot,
}

impl GeofenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a loaded snapshot, dropping any empty groups it contains.
    #[must_use]
    pub fn from_snapshot(mut snapshot: RegistrySnapshot) -> Self {
        snapshot.prune_empty_groups();
        Self { snapshot }
    }

    #[must_use]
    pub const fn snapshot(&self) -> &RegistrySnapshot {
        &self.snapshot
    }

    #[must_use]
    pub fn into_snapshot(self) -> RegistrySnapshot {
        self.snapshot
    }

    #[must_use]
    pub fn groups(&self) -> &[GeofenceGroup] {
        &self.snapshot.groups
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.definition_count()
    }

    /// Registers a batch as one new group and returns it with ids assigned.
    ///
    /// Each new definition replaces any existing definition at the same
    /// position (radius compared unless `ignore_radius`), including earlier
    /// definitions of the same batch. Groups left empty are dropped; a batch
    /// with no geofences adds nothing.
    pub fn add_group(&mut self, draft: GeofenceGroupDraft, ignore_radius: bool) -> Result<GeofenceGroup, ValidationError> {
        for geofence in &draft.geofences {
            geofence.validate()?;
        }

        let mut taken: HashSet<GeofenceId> = self.snapshot.definitions().map(|d| d.id.clone()).collect();
        let mut group = GeofenceGroup {
            definitions: Vec::with_capacity(draft.geofences.len()),
            initial_triggers: draft.initial_triggers.into_iter().filter(|k| !k.is_unknown()).collect(),
        };

        for geofence in draft.geofences {
            let id = fresh_id(&taken);
            taken.insert(id.clone());
            let def = geofence.into_definition(id);

            let replaced = self.remove_at_position(&def.position, ignore_radius);
            for old in &replaced {
                debug!(replaced = %old, by = %def.id, position = %def.position, "geofence replaced by position");
            }
            group.definitions.retain(|existing| {
                let same = existing.position.matches(&def.position, ignore_radius);
                if same {
                    debug!(replaced = %existing.id, by = %def.id, "duplicate position within batch");
                }
                !same
            });
            group.definitions.push(def);
        }

        self.snapshot.prune_empty_groups();
        if !group.is_empty() {
            self.snapshot.groups.push(group.clone());
        }
        Ok(group)
    }

    fn remove_at_position(&mut self, position: &Coordinate, ignore_radius: bool) -> Vec<GeofenceId> {
        let mut removed = Vec::new();
        for group in &mut self.snapshot.groups {
            group.definitions.retain(|d| {
                let same = d.position.matches(position, ignore_radius);
                if same {
                    removed.push(d.id.clone());
                }
                !same
            });
        }
        removed
    }

    /// Removes the listed ids from every group and prunes empty groups.
    /// Returns how many definitions were removed; unknown ids are ignored.
    pub fn remove_ids(&mut self, ids: &[GeofenceId]) -> usize {
        let wanted: HashSet<&GeofenceId> = ids.iter().collect();
        let before = self.len();
        for group in &mut self.snapshot.groups {
            group.definitions.retain(|d| !wanted.contains(&d.id));
        }
        self.snapshot.prune_empty_groups();
        before - self.len()
    }

    /// Drops every group.
    pub fn clear(&mut self) {
        self.snapshot.groups.clear();
    }

    #[must_use]
    pub fn find(&self, id: &GeofenceId) -> Option<&GeofenceDefinition> {
        self.snapshot.find(id)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<GeofenceId> {
        self.snapshot.ids()
    }

    #[must_use]
    pub fn exists_by_id(&self, id: &GeofenceId) -> bool {
        self.find(id).is_some()
    }

    /// True if at least one of `ids` is registered.
    #[must_use]
    pub fn exists_by_ids(&self, ids: &[GeofenceId]) -> bool {
        ids.iter().any(|id| self.exists_by_id(id))
    }

    /// Definitions whose id is listed, in registry order.
    #[must_use]
    pub fn find_by_ids(&self, ids: &[GeofenceId]) -> Vec<GeofenceDefinition> {
        let wanted: HashSet<&GeofenceId> = ids.iter().collect();
        self.snapshot
            .definitions()
            .filter(|d| wanted.contains(&d.id))
            .cloned()
            .collect()
    }

    /// Where the first definition at `coordinate` lives.
    #[must_use]
    pub fn exists_by_coordinate(&self, coordinate: &Coordinate, ignore_radius: bool) -> Option<GeofenceLocation> {
        self.snapshot.groups.iter().enumerate().find_map(|(group, g)| {
            g.definitions
                .iter()
                .position(|d| d.position.matches(coordinate, ignore_radius))
                .map(|index| GeofenceLocation { group, index })
        })
    }

    /// True if any of `coordinates` matches a registered definition.
    #[must_use]
    pub fn exists_by_coordinates(&self, coordinates: &[Coordinate], ignore_radius: bool) -> bool {
        coordinates
            .iter()
            .any(|c| self.exists_by_coordinate(c, ignore_radius).is_some())
    }

    /// Platform requests for every registered definition, in registry order.
    #[must_use]
    pub fn regions(&self, default_radius_m: u32) -> Vec<MonitoredRegion> {
        self.snapshot
            .definitions()
            .map(|d| MonitoredRegion::from_definition(d, default_radius_m))
            .collect()
    }

    /// The persisted monitoring flag, regardless of boot state.
    #[must_use]
    pub const fn monitoring_flag(&self) -> bool {
        self.snapshot.is_started_monitoring
    }

    #[must_use]
    pub const fn boot_completed(&self) -> bool {
        self.snapshot.boot_completed
    }

    /// Monitoring counts as started only once the regions have been re-armed
    /// since the last boot.
    #[must_use]
    pub const fn is_started_monitoring(&self) -> bool {
        self.snapshot.is_started_monitoring && self.snapshot.boot_completed
    }

    pub fn set_monitoring(&mut self, started: bool) {
        self.snapshot.is_started_monitoring = started;
    }

    pub fn set_boot_completed(&mut self, completed: bool) {
        self.snapshot.boot_completed = completed;
    }
}

fn fresh_id(taken: &HashSet<GeofenceId>) -> GeofenceId {
    loop {
        let id = GeofenceId::generate();
        if !taken.contains(&id) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::TransitionAction;
    use crate::geofence::GeofenceDraft;
    use crate::transition::TransitionKind;

    fn draft(name: &str, lat: f64, lng: f64, radius: u32) -> GeofenceDraft {
        GeofenceDraft::new(name, Coordinate::new(lat, lng).with_radius(radius))
    }

    fn batch(drafts: Vec<GeofenceDraft>) -> GeofenceGroupDraft {
        drafts.into_iter().fold(GeofenceGroupDraft::new(), GeofenceGroupDraft::geofence)
    }

    #[test]
    fn test_add_assigns_fresh_ids() {
        let mut registry = GeofenceRegistry::new();
        let group = registry
            .add_group(batch(vec![draft("a", 1.0, 1.0, 100), draft("b", 2.0, 2.0, 100)]), true)
            .unwrap();

        assert_eq!(group.definitions.len(), 2);
        assert_ne!(group.definitions[0].id, group.definitions[1].id);
        assert_eq!(registry.groups().len(), 1);
        assert_eq!(registry.ids(), group.ids());
    }

    #[test]
    fn test_same_position_replaces_and_prunes_group() {
        let mut registry = GeofenceRegistry::new();
        let first = registry.add_group(batch(vec![draft("old", 50.0, 50.0, 300)]), true).unwrap();
        let second = registry.add_group(batch(vec![draft("new", 50.0, 50.0, 10)]), true).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.groups().len(), 1);
        assert!(!registry.exists_by_id(&first.definitions[0].id));
        assert!(registry.exists_by_id(&second.definitions[0].id));
        assert_ne!(first.definitions[0].id, second.definitions[0].id);
    }

    #[test]
    fn test_radius_sensitive_dedup_keeps_both() {
        let mut registry = GeofenceRegistry::new();
        registry.add_group(batch(vec![draft("a", 50.0, 50.0, 300)]), false).unwrap();
        registry.add_group(batch(vec![draft("b", 50.0, 50.0, 100)]), false).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicates_within_one_batch_keep_last() {
        let mut registry = GeofenceRegistry::new();
        let group = registry
            .add_group(batch(vec![draft("first", 1.0, 1.0, 100), draft("second", 1.0, 1.0, 100)]), true)
            .unwrap();
        assert_eq!(group.definitions.len(), 1);
        assert_eq!(group.definitions[0].name, "second");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_no_duplicate_positions_after_many_adds() {
        let mut registry = GeofenceRegistry::new();
        for round in 0..5 {
            let drafts = (0..4)
                .map(|i| draft(&format!("r{round}-{i}"), f64::from(i), f64::from((i + round) % 3), 100))
                .collect();
            registry.add_group(batch(drafts), true).unwrap();
        }

        let positions: Vec<(u64, u64)> = registry
            .snapshot()
            .definitions()
            .map(|d| (d.position.latitude.to_bits(), d.position.longitude.to_bits()))
            .collect();
        let unique: HashSet<_> = positions.iter().collect();
        assert_eq!(unique.len(), positions.len());
        assert!(registry.groups().iter().all(|g| !g.is_empty()));
    }

    #[test]
    fn test_empty_batch_adds_no_group() {
        let mut registry = GeofenceRegistry::new();
        let group = registry
            .add_group(GeofenceGroupDraft::new().initial_trigger(TransitionKind::Enter), true)
            .unwrap();
        assert!(group.is_empty());
        assert!(registry.groups().is_empty());
    }

    #[test]
    fn test_invalid_draft_leaves_registry_untouched() {
        let mut registry = GeofenceRegistry::new();
        registry.add_group(batch(vec![draft("keep", 1.0, 1.0, 100)]), true).unwrap();
        let before = registry.clone();

        let err = registry
            .add_group(batch(vec![draft("ok", 1.0, 1.0, 100), draft("bad", 91.0, 0.0, 100)]), true)
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidCoordinate { .. }));
        assert_eq!(registry, before);
    }

    #[test]
    fn test_remove_ids_prunes() {
        let mut registry = GeofenceRegistry::new();
        let g1 = registry.add_group(batch(vec![draft("a", 1.0, 1.0, 100)]), true).unwrap();
        let g2 = registry
            .add_group(batch(vec![draft("b", 2.0, 2.0, 100), draft("c", 3.0, 3.0, 100)]), true)
            .unwrap();

        let removed = registry.remove_ids(&[g1.definitions[0].id.clone(), GeofenceId::from("bad-id")]);
        assert_eq!(removed, 1);
        assert_eq!(registry.groups().len(), 1);
        assert_eq!(registry.ids(), g2.ids());
    }

    #[test]
    fn test_queries() {
        let mut registry = GeofenceRegistry::new();
        let g1 = registry.add_group(batch(vec![draft("a", 1.0, 1.0, 100)]), true).unwrap();
        let g2 = registry
            .add_group(batch(vec![draft("b", 2.0, 2.0, 100), draft("c", 3.0, 3.0, 250)]), true)
            .unwrap();
        let a = g1.definitions[0].id.clone();
        let c = g2.definitions[1].id.clone();

        assert!(registry.exists_by_ids(&[GeofenceId::from("nope"), a.clone()]));
        assert!(!registry.exists_by_ids(&[GeofenceId::from("nope")]));
        assert!(!registry.exists_by_ids(&[]));

        let found: Vec<_> = registry.find_by_ids(&[c.clone(), a.clone()]).into_iter().map(|d| d.id).collect();
        assert_eq!(found, vec![a, c]);

        assert_eq!(
            registry.exists_by_coordinate(&Coordinate::new(3.0, 3.0), false),
            Some(GeofenceLocation { group: 1, index: 1 })
        );
        assert_eq!(
            registry.exists_by_coordinate(&Coordinate::new(3.0, 3.0).with_radius(1), false),
            None
        );
        assert!(registry.exists_by_coordinate(&Coordinate::new(3.0, 3.0).with_radius(1), true).is_some());
        assert!(registry.exists_by_coordinates(&[Coordinate::new(9.0, 9.0), Coordinate::new(2.0, 2.0)], true));
        assert!(!registry.exists_by_coordinates(&[Coordinate::new(9.0, 9.0)], true));
    }

    #[test]
    fn test_started_flag_requires_boot_completed() {
        let mut registry = GeofenceRegistry::new();
        registry.set_monitoring(true);
        assert!(registry.is_started_monitoring());
        registry.set_boot_completed(false);
        assert!(registry.monitoring_flag());
        assert!(!registry.is_started_monitoring());
    }

    #[test]
    fn test_regions_follow_registry_order() {
        let mut registry = GeofenceRegistry::new();
        registry
            .add_group(
                batch(vec![
                    draft("a", 1.0, 1.0, 100).on(TransitionKind::Enter, TransitionAction::notify("in")),
                    GeofenceDraft::new("b", Coordinate::new(2.0, 2.0)),
                ]),
                true,
            )
            .unwrap();
        let regions = registry.regions(400);
        assert_eq!(regions.len(), 2);
        assert!(regions[0].notify_on_enter);
        assert_eq!(regions[1].radius_m, 400);
    }

    #[test]
    fn test_from_snapshot_prunes_empty_groups() {
        let snapshot = RegistrySnapshot {
            groups: vec![GeofenceGroup::default()],
            ..RegistrySnapshot::default()
        };
        assert!(GeofenceRegistry::from_snapshot(snapshot).groups().is_empty());
    }
}
