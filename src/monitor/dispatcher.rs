//! Transition dispatch.
//!
//! Matches a transition (reported by the platform or synthesized from the
//! initial location fix) to its geofence action and fires the side effects:
//! the application event always, the local notification when a message is
//! set, and the webhook when `extraData` names a url. Webhooks are handed to
//! the `WebhookWorker` and never block dispatch.

use std::sync::Arc;

use tracing::{debug, info};

use crate::effects::{EventEmitter, GeofenceEvent, Notifier, WebhookClient, WebhookRequest, GEOFENCE_EVENT_NAME};
use crate::geofence::{GeofenceDefinition, GeofenceGroup};
use crate::stats::Counters;
use crate::transition::TransitionKind;

use super::webhook::WebhookWorker;

/// What one dispatch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dispatched {
    pub notified: bool,
    pub webhook_queued: bool,
}

/// Fires the side effects for matched transitions.
pub(crate) struct EventDispatcher {
    notifier: Arc<dyn Notifier>,
    emitter: Arc<dyn EventEmitter>,
    webhooks: WebhookWorker,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("webhooks", &self.webhooks)
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        emitter: Arc<dyn EventEmitter>,
        webhook_client: Arc<dyn WebhookClient>,
        webhook_queue_capacity: usize,
        counters: Arc<Counters>,
    ) -> std::io::Result<Self> {
        let webhooks = WebhookWorker::spawn(webhook_client, webhook_queue_capacity, Arc::clone(&counters))?;
        Ok(Self {
            notifier,
            emitter,
            webhooks,
            counters,
        })
    }

    /// Fires the action attached to `kind` on `def`.
    ///
    /// Returns `None` when the definition has no action for `kind`; nothing
    /// fires in that case.
    pub fn dispatch(&self, def: &GeofenceDefinition, kind: TransitionKind, synthesized: bool) -> Option<Dispatched> {
        let Some(action) = def.action(kind) else {
            debug!(region = %def.id, kind = %kind, "no action for transition");
            return None;
        };

        Counters::bump(&self.counters.transitions_dispatched);
        if synthesized {
            Counters::bump(&self.counters.transitions_synthesized);
        }
        info!(region = %def.id, name = %def.name, kind = %kind, synthesized, "dispatching geofence transition");

        let event = GeofenceEvent::new(def, kind, action.extra_data.clone(), synthesized);
        self.emitter.emit(GEOFENCE_EVENT_NAME, &event);

        let mut outcome = Dispatched::default();
        if let Some(notification) = &action.notification {
            if let Some(message) = notification.display_message() {
                self.notifier
                    .show_local_notification(message, notification.action_uri.as_deref());
                outcome.notified = true;
            }
        }
        if let Some(hook) = action.webhook() {
            outcome.webhook_queued = self.webhooks.enqueue(WebhookRequest::new(hook, def.id.clone(), kind));
        }
        Some(outcome)
    }
}

/// Transitions implied by a single location fix.
///
/// For each group with initial triggers, a definition whose circle contains
/// the fix yields `Enter` if the group asks for it; one that does not yields
/// `Exit` if the group asks for that. `Dwell` is never produced.
pub fn initial_transitions(
    groups: &[GeofenceGroup],
    latitude: f64,
    longitude: f64,
    default_radius_m: u32,
) -> Vec<(&GeofenceDefinition, TransitionKind)> {
    let mut out = Vec::new();
    for group in groups.iter().filter(|g| !g.initial_triggers.is_empty()) {
        let wants_enter = group.initial_triggers.contains(&TransitionKind::Enter);
        let wants_exit = group.initial_triggers.contains(&TransitionKind::Exit);
        for def in &group.definitions {
            let inside = def.position.contains(latitude, longitude, default_radius_m);
            if inside && wants_enter {
                out.push((def, TransitionKind::Enter));
            } else if !inside && wants_exit {
                out.push((def, TransitionKind::Exit));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::action::{NotificationAction, TransitionAction};
    use crate::coordinate::Coordinate;
    use crate::effects::{RecordingEmitter, RecordingNotifier, RecordingWebhookClient};
    use crate::geofence::{GeofenceDraft, GeofenceId};

    struct Harness {
        dispatcher: EventDispatcher,
        notifier: Arc<RecordingNotifier>,
        emitter: Arc<RecordingEmitter>,
        webhooks: Arc<RecordingWebhookClient>,
    }

    fn harness() -> Harness {
        let notifier = Arc::new(RecordingNotifier::new());
        let emitter = Arc::new(RecordingEmitter::new());
        let webhooks = Arc::new(RecordingWebhookClient::new());
        let dispatcher = EventDispatcher::new(
            notifier.clone(),
            emitter.clone(),
            webhooks.clone(),
            16,
            Arc::new(Counters::default()),
        )
        .unwrap();
        Harness {
            dispatcher,
            notifier,
            emitter,
            webhooks,
        }
    }

    fn office() -> GeofenceDefinition {
        GeofenceDraft::new("office", Coordinate::new(40.7415, -74.0034).with_radius(200))
            .on(
                TransitionKind::Enter,
                TransitionAction::notify("m").with_extra(json!({"url": "https://x", "body": {"n": 1}})),
            )
            .into_definition(GeofenceId::from("office"))
    }

    #[test]
    fn test_enter_fires_all_three_effects_once() {
        let h = harness();
        let outcome = h.dispatcher.dispatch(&office(), TransitionKind::Enter, false).unwrap();
        assert!(outcome.notified);
        assert!(outcome.webhook_queued);

        assert_eq!(h.notifier.shown.entries()[0].body, "m");
        let events = h.emitter.events.entries();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, GEOFENCE_EVENT_NAME);
        assert_eq!(events[0].1.extra_data.as_ref().map(|e| e["url"].clone()), Some(json!("https://x")));

        assert!(h.webhooks.requests.wait_for_len(1, Duration::from_secs(5)));
        drop(h.dispatcher);
        let requests = h.webhooks.requests.entries();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://x");
    }

    #[test]
    fn test_missing_action_fires_nothing() {
        let h = harness();
        assert!(h.dispatcher.dispatch(&office(), TransitionKind::Exit, false).is_none());
        drop(h.dispatcher);
        assert!(h.notifier.shown.is_empty());
        assert!(h.emitter.events.is_empty());
        assert!(h.webhooks.requests.is_empty());
    }

    #[test]
    fn test_empty_message_still_emits_event() {
        let h = harness();
        let def = GeofenceDraft::new("quiet", Coordinate::new(1.0, 1.0))
            .on(
                TransitionKind::Exit,
                TransitionAction::default().with_notification(NotificationAction {
                    message: Some(String::new()),
                    action_uri: Some("app://x".to_string()),
                }),
            )
            .into_definition(GeofenceId::from("quiet"));

        let outcome = h.dispatcher.dispatch(&def, TransitionKind::Exit, false).unwrap();
        assert!(!outcome.notified);
        assert!(!outcome.webhook_queued);
        assert_eq!(h.emitter.events.len(), 1);
        assert!(h.notifier.shown.is_empty());
    }

    #[test]
    fn test_notification_carries_action_uri() {
        let h = harness();
        let def = GeofenceDraft::new("shop", Coordinate::new(1.0, 1.0))
            .on(
                TransitionKind::Dwell,
                TransitionAction::default().with_notification(NotificationAction::new("still here").with_action_uri("app://shop")),
            )
            .into_definition(GeofenceId::from("shop"));

        h.dispatcher.dispatch(&def, TransitionKind::Dwell, false).unwrap();
        assert_eq!(h.notifier.shown.entries()[0].action_uri.as_deref(), Some("app://shop"));
    }

    fn group(defs: Vec<GeofenceDefinition>, triggers: &[TransitionKind]) -> GeofenceGroup {
        GeofenceGroup {
            definitions: defs,
            initial_triggers: triggers.iter().copied().collect(),
        }
    }

    #[test]
    fn test_initial_transitions_inside_and_outside() {
        let near = GeofenceDraft::new("near", Coordinate::new(40.7415, -74.0034).with_radius(200))
            .into_definition(GeofenceId::from("near"));
        let far = GeofenceDraft::new("far", Coordinate::new(50.0, 50.0).with_radius(300))
            .into_definition(GeofenceId::from("far"));
        let groups = vec![group(vec![near, far], &[TransitionKind::Enter, TransitionKind::Exit])];

        let out: Vec<_> = initial_transitions(&groups, 40.7415, -74.0034, 400)
            .into_iter()
            .map(|(d, k)| (d.id.as_str().to_string(), k))
            .collect();
        assert_eq!(
            out,
            vec![
                ("near".to_string(), TransitionKind::Enter),
                ("far".to_string(), TransitionKind::Exit)
            ]
        );
    }

    #[test]
    fn test_initial_transitions_respect_group_policy() {
        let a = GeofenceDraft::new("a", Coordinate::new(0.0, 0.0)).into_definition(GeofenceId::from("a"));
        let b = GeofenceDraft::new("b", Coordinate::new(10.0, 10.0)).into_definition(GeofenceId::from("b"));
        let c = GeofenceDraft::new("c", Coordinate::new(0.0, 0.0)).into_definition(GeofenceId::from("c"));
        let groups = vec![
            group(vec![a, b], &[TransitionKind::Enter, TransitionKind::Dwell]),
            group(vec![c], &[]),
        ];

        // The default radius applies when the coordinate has none.
        let out = initial_transitions(&groups, 0.0, 0.003, 400);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0.id.as_str(), "a");
        assert_eq!(out[0].1, TransitionKind::Enter);
    }
}
