//! Recording effect implementations.
//!
//! Each recorder keeps what it was asked to do and lets another thread wait
//! until a given number of entries has arrived, which is how tests observe the
//! worker threads without sleeping.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{EventEmitter, GeofenceEvent, Notifier, WebhookClient, WebhookError, WebhookRequest};

/// A thread-safe, append-only log with a blocking wait.
#[derive(Debug)]
pub struct Recorder<T> {
    entries: Mutex<Vec<T>>,
    changed: Condvar,
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            changed: Condvar::new(),
        }
    }
}

impl<T: Clone> Recorder<T> {
    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, entry: T) {
        self.lock().push(entry);
        self.changed.notify_all();
    }

    #[must_use]
    pub fn entries(&self) -> Vec<T> {
        self.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks until at least `n` entries exist or `timeout` passes.
    /// Returns whether the count was reached.
    pub fn wait_for_len(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut entries = self.lock();
        while entries.len() < n {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            entries = match self.changed.wait_timeout(entries, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

/// A notification as it would have been shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShownNotification {
    pub body: String,
    pub action_uri: Option<String>,
}

/// Records every notification instead of showing it.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub shown: Recorder<ShownNotification>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Notifier for RecordingNotifier {
    fn show_local_notification(&self, body: &str, action_uri: Option<&str>) {
        self.shown.push(ShownNotification {
            body: body.to_string(),
            action_uri: action_uri.map(str::to_string),
        });
    }
}

/// Records every emitted application event.
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    pub events: Recorder<(String, GeofenceEvent)>,
}

impl RecordingEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit(&self, name: &str, event: &GeofenceEvent) {
        self.events.push((name.to_string(), event.clone()));
    }
}

/// Records webhook requests and answers with a scripted response per URL.
#[derive(Debug, Default)]
pub struct RecordingWebhookClient {
    pub requests: Recorder<WebhookRequest>,
    responses: Mutex<HashMap<String, Result<u16, WebhookError>>>,
}

impl RecordingWebhookClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers requests to `url` with `response` (default `Ok(200)`).
    pub fn respond(&self, url: impl Into<String>, response: Result<u16, WebhookError>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), response);
    }
}

impl WebhookClient for RecordingWebhookClient {
    fn post(&self, request: &WebhookRequest) -> Result<u16, WebhookError> {
        self.requests.push(request.clone());
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&request.url)
            .cloned()
            .unwrap_or(Ok(200))
    }
}
