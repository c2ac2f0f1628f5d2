//! Per-transition actions attached to a geofence.
//!
//! A transition entry may carry a local notification and an arbitrary JSON
//! `extraData` payload. When that payload is an object with a `url`, it also
//! describes a webhook to fire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::transition::TransitionKind;

/// A local notification shown when a transition fires.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationAction {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub action_uri: Option<String>,
}

impl NotificationAction {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            action_uri: None,
        }
    }

    #[must_use]
    pub fn with_action_uri(mut self, uri: impl Into<String>) -> Self {
        self.action_uri = Some(uri.into());
        self
    }

    /// The message to display, if it is present and non-empty.
    #[must_use]
    pub fn display_message(&self) -> Option<&str> {
        self.message.as_deref().filter(|m| !m.is_empty())
    }
}

/// An outbound HTTP call described by a transition's `extraData`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookAction {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: JsonValue,
}

impl WebhookAction {
    /// Reads `{url, headers, body}` out of an `extraData` payload.
    ///
    /// Returns `None` when there is no non-empty string `url`. Header values
    /// that are not strings are rendered as JSON text; `null` becomes empty.
    #[must_use]
    pub fn from_extra(extra: &JsonValue) -> Option<Self> {
        let obj = extra.as_object()?;
        let url = obj.get("url")?.as_str()?.trim();
        if url.is_empty() {
            return None;
        }

        let headers = obj
            .get("headers")
            .and_then(JsonValue::as_object)
            .map(|h| {
                h.iter()
                    .map(|(k, v)| {
                        let v = match v {
                            JsonValue::String(s) => s.clone(),
                            JsonValue::Null => String::new(),
                            other => other.to_string(),
                        };
                        (k.clone(), v)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            url: url.to_string(),
            headers,
            body: obj.get("body").cloned().unwrap_or(JsonValue::Null),
        })
    }
}

/// What happens when one transition fires.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionAction {
    #[serde(default)]
    pub notification: Option<NotificationAction>,
    /// Written as `null` when unset; an absent field reads as `null`.
    #[serde(default)]
    pub extra_data: Option<JsonValue>,
}

impl TransitionAction {
    /// An action that only shows a notification.
    #[must_use]
    pub fn notify(message: impl Into<String>) -> Self {
        Self {
            notification: Some(NotificationAction::new(message)),
            extra_data: None,
        }
    }

    #[must_use]
    pub fn with_notification(mut self, notification: NotificationAction) -> Self {
        self.notification = Some(notification);
        self
    }

    #[must_use]
    pub fn with_extra(mut self, extra: JsonValue) -> Self {
        self.extra_data = Some(extra);
        self
    }

    /// The webhook described by `extraData`, if any.
    #[must_use]
    pub fn webhook(&self) -> Option<WebhookAction> {
        self.extra_data.as_ref().and_then(WebhookAction::from_extra)
    }
}

/// Actions keyed by transition kind. At most one entry per kind.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransitionActionSet(BTreeMap<TransitionKind, TransitionAction>);

impl TransitionActionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the action for `kind`.
    #[must_use]
    pub fn on(mut self, kind: TransitionKind, action: TransitionAction) -> Self {
        self.insert(kind, action);
        self
    }

    pub fn insert(&mut self, kind: TransitionKind, action: TransitionAction) -> Option<TransitionAction> {
        self.0.insert(kind, action)
    }

    #[must_use]
    pub fn get(&self, kind: TransitionKind) -> Option<&TransitionAction> {
        self.0.get(&kind)
    }

    #[must_use]
    pub fn contains(&self, kind: TransitionKind) -> bool {
        self.0.contains_key(&kind)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TransitionKind, &TransitionAction)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }
}

impl FromIterator<(TransitionKind, TransitionAction)> for TransitionActionSet {
    fn from_iter<I: IntoIterator<Item = (TransitionKind, TransitionAction)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_webhook_from_extra() {
        let extra = json!({
            "url": "https://example.test/hook",
            "headers": {"Authorization": "Bearer t", "X-Retry": 3, "X-Null": null},
            "body": {"shift": {"id": 7, "tags": ["a", "b"]}}
        });
        let hook = WebhookAction::from_extra(&extra).unwrap();
        assert_eq!(hook.url, "https://example.test/hook");
        assert_eq!(hook.headers.get("Authorization").map(String::as_str), Some("Bearer t"));
        assert_eq!(hook.headers.get("X-Retry").map(String::as_str), Some("3"));
        assert_eq!(hook.headers.get("X-Null").map(String::as_str), Some(""));
        assert_eq!(hook.body["shift"]["tags"][1], "b");
    }

    #[test]
    fn test_webhook_requires_url() {
        assert!(WebhookAction::from_extra(&json!({"body": {}})).is_none());
        assert!(WebhookAction::from_extra(&json!({"url": "  "})).is_none());
        assert!(WebhookAction::from_extra(&json!({"url": 5})).is_none());
        assert!(WebhookAction::from_extra(&json!("https://x")).is_none());
    }

    #[test]
    fn test_display_message_skips_empty() {
        assert_eq!(NotificationAction::new("").display_message(), None);
        assert_eq!(NotificationAction::default().display_message(), None);
        assert_eq!(NotificationAction::new("hi").display_message(), Some("hi"));
    }

    #[test]
    fn test_action_set_layout() {
        let set = TransitionActionSet::new()
            .on(TransitionKind::Exit, TransitionAction::notify("bye"))
            .on(
                TransitionKind::Enter,
                TransitionAction::default().with_extra(json!({"url": "https://x"})),
            );
        let value = serde_json::to_value(&set).unwrap();
        assert_eq!(value["2"]["notification"]["message"], "bye");
        assert_eq!(value["1"]["notification"], JsonValue::Null);
        assert_eq!(value["1"]["extraData"]["url"], "https://x");
        assert!(set.contains(TransitionKind::Enter));
        assert!(!set.contains(TransitionKind::Dwell));
    }

    #[test]
    fn test_null_fields_survive_reserialization() {
        let stored = json!({"notification": null, "extraData": null});
        let action: TransitionAction = serde_json::from_value(stored.clone()).unwrap();
        assert_eq!(action, TransitionAction::default());
        assert_eq!(serde_json::to_value(&action).unwrap(), stored);

        let absent: TransitionAction = serde_json::from_value(json!({})).unwrap();
        assert_eq!(serde_json::to_value(&absent).unwrap(), stored);
    }
}
