//! Service counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time copy of the service counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    /// Transitions matched to a geofence action, real or synthesized.
    pub transitions_dispatched: u64,
    /// Initial-trigger transitions synthesized from a location fix.
    pub transitions_synthesized: u64,
    pub webhooks_enqueued: u64,
    /// Webhooks dropped because the delivery queue was full.
    pub webhooks_dropped: u64,
    pub webhooks_failed: u64,
    /// Platform callbacks that belonged to a superseded session or an
    /// unknown region.
    pub stale_callbacks_ignored: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub transitions_dispatched: AtomicU64,
    pub transitions_synthesized: AtomicU64,
    pub webhooks_enqueued: AtomicU64,
    pub webhooks_dropped: AtomicU64,
    pub webhooks_failed: AtomicU64,
    pub stale_callbacks_ignored: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServiceStats {
        ServiceStats {
            transitions_dispatched: self.transitions_dispatched.load(Ordering::Relaxed),
            transitions_synthesized: self.transitions_synthesized.load(Ordering::Relaxed),
            webhooks_enqueued: self.webhooks_enqueued.load(Ordering::Relaxed),
            webhooks_dropped: self.webhooks_dropped.load(Ordering::Relaxed),
            webhooks_failed: self.webhooks_failed.load(Ordering::Relaxed),
            stale_callbacks_ignored: self.stale_callbacks_ignored.load(Ordering::Relaxed),
        }
    }
}
