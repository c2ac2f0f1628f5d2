//! Geofence definitions and groups.
//!
//! A `GeofenceDefinition` is immutable once the registry has assigned its id.
//! A `GeofenceGroup` is the unit of batch registration and of initial-trigger
//! policy: one `add_geofences` call creates exactly one group.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::action::{NotificationAction, TransitionAction, TransitionActionSet};
use crate::coordinate::Coordinate;
use crate::error::ValidationError;
use crate::transition::TransitionKind;

/// Expiration value meaning "never expires".
pub const NEVER_EXPIRE: i64 = -1;

/// Region identifier shared with the platform.
///
/// Generated ids are UUID v4 strings, but any string the platform reports is
/// accepted so foreign ids can still be filtered and stopped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeofenceId(String);

impl GeofenceId {
    /// Creates a new random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GeofenceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for GeofenceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for GeofenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered circular geofence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceDefinition {
    pub position: Coordinate,
    pub name: String,
    pub id: GeofenceId,
    #[serde(rename = "typeTransactions", default)]
    pub actions: TransitionActionSet,
    #[serde(rename = "expiredDuration", default = "never_expire", deserialize_with = "de_duration")]
    pub expiration_duration_ms: i64,
}

const fn never_expire() -> i64 {
    NEVER_EXPIRE
}

#[allow(clippy::cast_possible_truncation)]
fn de_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(raw.filter(|d| d.is_finite()).map_or(NEVER_EXPIRE, |d| d as i64))
}

impl GeofenceDefinition {
    #[must_use]
    pub fn action(&self, kind: TransitionKind) -> Option<&TransitionAction> {
        self.actions.get(kind)
    }
}

/// A batch of definitions sharing an initial-trigger policy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeofenceGroup {
    #[serde(rename = "geofenceModels", default)]
    pub definitions: Vec<GeofenceDefinition>,
    #[serde(rename = "initialTriggers", default)]
    pub initial_triggers: BTreeSet<TransitionKind>,
}

impl GeofenceGroup {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<GeofenceId> {
        self.definitions.iter().map(|d| d.id.clone()).collect()
    }
}

/// One transition entry in the bridge input format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionSpec {
    #[serde(rename = "type")]
    pub kind: TransitionKind,
    #[serde(default)]
    pub notification: Option<NotificationAction>,
    #[serde(default)]
    pub extra_data: Option<JsonValue>,
}

/// A geofence as supplied by the caller: everything except the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceDraft {
    pub name: String,
    pub position: Coordinate,
    #[serde(rename = "expiredDuration", default = "never_expire", deserialize_with = "de_duration")]
    pub expiration_duration_ms: i64,
    #[serde(rename = "typeTransactions", default)]
    pub transitions: Vec<TransitionSpec>,
}

impl GeofenceDraft {
    #[must_use]
    pub fn new(name: impl Into<String>, position: Coordinate) -> Self {
        Self {
            name: name.into(),
            position,
            expiration_duration_ms: NEVER_EXPIRE,
            transitions: Vec::new(),
        }
    }

    #[must_use]
    pub const fn expires_after_ms(mut self, ms: i64) -> Self {
        self.expiration_duration_ms = ms;
        self
    }

    /// Attaches an action to a transition kind.
    #[must_use]
    pub fn on(mut self, kind: TransitionKind, action: TransitionAction) -> Self {
        self.transitions.push(TransitionSpec {
            kind,
            notification: action.notification,
            extra_data: action.extra_data,
        });
        self
    }

    /// Collapses the transition list into an action set; later entries win.
    /// `Unknown` entries are dropped.
    #[must_use]
    pub fn action_set(&self) -> TransitionActionSet {
        self.transitions
            .iter()
            .filter(|t| !t.kind.is_unknown())
            .map(|t| {
                (
                    t.kind,
                    TransitionAction {
                        notification: t.notification.clone(),
                        extra_data: t.extra_data.clone(),
                    },
                )
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        self.position.validate()
    }

    /// Materialises the definition under a registry-assigned id.
    #[must_use]
    pub fn into_definition(self, id: GeofenceId) -> GeofenceDefinition {
        let actions = self.action_set();
        GeofenceDefinition {
            position: self.position,
            name: self.name,
            id,
            actions,
            expiration_duration_ms: self.expiration_duration_ms,
        }
    }
}

/// The input to `add_geofences`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeofenceGroupDraft {
    #[serde(default)]
    pub geofences: Vec<GeofenceDraft>,
    #[serde(rename = "initialTriggers", default)]
    pub initial_triggers: BTreeSet<TransitionKind>,
}

impl GeofenceGroupDraft {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn geofence(mut self, draft: GeofenceDraft) -> Self {
        self.geofences.push(draft);
        self
    }

    #[must_use]
    pub fn initial_trigger(mut self, kind: TransitionKind) -> Self {
        if !kind.is_unknown() {
            self.initial_triggers.insert(kind);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = GeofenceId::generate();
        let b = GeofenceId::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_draft_from_bridge_payload() {
        let payload = json!({
            "initialTriggers": [1.0, 2.0],
            "geofences": [{
                "name": "office",
                "expiredDuration": 86400000.0,
                "position": {"latitude": 40.7415, "longitude": -74.0034, "radius": 200},
                "typeTransactions": [
                    {"type": 1, "notification": {"message": "hello"}, "extraData": {"url": "https://x"}},
                    {"type": 2, "notification": {"message": "bye", "actionUri": "app://shift"}}
                ]
            }]
        });
        let draft: GeofenceGroupDraft = serde_json::from_value(payload).unwrap();
        assert_eq!(draft.initial_triggers.len(), 2);
        let g = &draft.geofences[0];
        assert_eq!(g.expiration_duration_ms, 86_400_000);
        let actions = g.action_set();
        assert_eq!(actions.len(), 2);
        assert!(actions.get(TransitionKind::Enter).and_then(TransitionAction::webhook).is_some());
        assert_eq!(
            actions
                .get(TransitionKind::Exit)
                .and_then(|a| a.notification.as_ref())
                .and_then(|n| n.action_uri.as_deref()),
            Some("app://shift")
        );
    }

    #[test]
    fn test_action_set_last_entry_wins_and_drops_unknown() {
        let draft = GeofenceDraft::new("g", Coordinate::new(1.0, 1.0))
            .on(TransitionKind::Enter, TransitionAction::notify("first"))
            .on(TransitionKind::Enter, TransitionAction::notify("second"))
            .on(TransitionKind::Unknown, TransitionAction::notify("ignored"));
        let set = draft.action_set();
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get(TransitionKind::Enter)
                .and_then(|a| a.notification.as_ref())
                .and_then(NotificationAction::display_message),
            Some("second")
        );
    }

    #[test]
    fn test_definition_layout() {
        let def = GeofenceDraft::new("home", Coordinate::new(1.0, 2.0).with_radius(50))
            .on(TransitionKind::Enter, TransitionAction::notify("in"))
            .into_definition(GeofenceId::from("id-1"));
        let v = serde_json::to_value(&def).unwrap();
        assert_eq!(v["id"], "id-1");
        assert_eq!(v["expiredDuration"], -1);
        assert_eq!(v["position"]["radius"], 50);
        assert_eq!(v["typeTransactions"]["1"]["notification"]["message"], "in");
    }

    #[test]
    fn test_draft_validation() {
        assert_eq!(
            GeofenceDraft::new("  ", Coordinate::new(0.0, 0.0)).validate(),
            Err(ValidationError::EmptyName)
        );
        assert!(GeofenceDraft::new("x", Coordinate::new(100.0, 0.0)).validate().is_err());
    }
}
