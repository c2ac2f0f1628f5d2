//! Side effects fired when a geofence transition is dispatched.
//!
//! The core never talks to a notification center, an app runtime or the
//! network directly. It goes through these three traits, which the embedding
//! application implements (or picks from `memory` / `http`).

pub mod memory;

#[cfg(feature = "http")]
pub mod http;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::action::WebhookAction;
use crate::geofence::{GeofenceDefinition, GeofenceId};
use crate::transition::TransitionKind;

pub use memory::{Recorder, RecordingEmitter, RecordingNotifier, RecordingWebhookClient, ShownNotification};

#[cfg(feature = "http")]
pub use http::HttpWebhookClient;

/// Name of the application event emitted for every dispatched transition.
pub const GEOFENCE_EVENT_NAME: &str = "onGeofenceEvent";

/// Payload of the application-level geofence event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceEvent {
    pub event_id: Uuid,
    pub geofence_id: GeofenceId,
    pub name: String,
    pub kind: TransitionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<JsonValue>,
    /// True when derived from the initial location fix rather than reported
    /// by the platform.
    pub synthesized: bool,
    pub occurred_at: DateTime<Utc>,
}

impl GeofenceEvent {
    #[must_use]
    pub fn new(def: &GeofenceDefinition, kind: TransitionKind, extra_data: Option<JsonValue>, synthesized: bool) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            geofence_id: def.id.clone(),
            name: def.name.clone(),
            kind,
            extra_data,
            synthesized,
            occurred_at: Utc::now(),
        }
    }
}

/// One outbound webhook call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: JsonValue,
    pub geofence_id: GeofenceId,
    pub kind: TransitionKind,
}

impl WebhookRequest {
    #[must_use]
    pub fn new(action: WebhookAction, geofence_id: GeofenceId, kind: TransitionKind) -> Self {
        Self {
            url: action.url,
            headers: action.headers,
            body: action.body,
            geofence_id,
            kind,
        }
    }
}

/// Webhook delivery failures. Logged, never surfaced to callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Invalid webhook request: {0}")]
    InvalidRequest(String),

    #[error("Webhook transport error: {0}")]
    Transport(String),

    #[error("Webhook returned HTTP {status}")]
    Status { status: u16 },
}

/// Shows a local notification.
pub trait Notifier: Send + Sync {
    fn show_local_notification(&self, body: &str, action_uri: Option<&str>);
}

/// Emits an event to the embedding application.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, name: &str, event: &GeofenceEvent);
}

/// Performs one webhook POST, returning the HTTP status on success.
pub trait WebhookClient: Send + Sync {
    fn post(&self, request: &WebhookRequest) -> Result<u16, WebhookError>;
}

/// Default `Notifier` that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show_local_notification(&self, body: &str, action_uri: Option<&str>) {
        info!(body, action_uri, "local notification");
    }
}

/// Default `EventEmitter` that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmitter;

impl EventEmitter for LogEmitter {
    fn emit(&self, name: &str, event: &GeofenceEvent) {
        info!(
            event = name,
            region = %event.geofence_id,
            kind = %event.kind,
            synthesized = event.synthesized,
            "application event"
        );
    }
}

/// Default `WebhookClient` that drops every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWebhookClient;

impl WebhookClient for NoopWebhookClient {
    fn post(&self, request: &WebhookRequest) -> Result<u16, WebhookError> {
        debug!(url = %request.url, region = %request.geofence_id, "webhook client not configured; skipping");
        Ok(204)
    }
}
