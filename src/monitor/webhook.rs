//! Fire-and-forget webhook delivery worker.
//!
//! Dispatch enqueues requests with a non-blocking `try_send`; a dedicated
//! thread posts them one at a time. Failures are logged and counted, never
//! retried, and never fed back into the registry.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::effects::{WebhookClient, WebhookRequest};
use crate::stats::Counters;

/// Owns the webhook thread. Dropping it drains queued requests and joins.
pub(crate) struct WebhookWorker {
    tx: Option<Sender<WebhookRequest>>,
    counters: Arc<Counters>,
    join: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WebhookWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookWorker").finish_non_exhaustive()
    }
}

impl WebhookWorker {
    pub fn spawn(client: Arc<dyn WebhookClient>, capacity: usize, counters: Arc<Counters>) -> io::Result<Self> {
        let (tx, rx) = bounded::<WebhookRequest>(capacity.max(1));
        let thread_counters = Arc::clone(&counters);
        let join = thread::Builder::new()
            .name("geofence-webhooks".to_string())
            .spawn(move || deliver_loop(client.as_ref(), &thread_counters, &rx))?;

        Ok(Self {
            tx: Some(tx),
            counters,
            join: Some(join),
        })
    }

    /// Queues a request. Returns false if it was dropped.
    pub fn enqueue(&self, request: WebhookRequest) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(request) {
            Ok(()) => {
                Counters::bump(&self.counters.webhooks_enqueued);
                true
            }
            Err(TrySendError::Full(req) | TrySendError::Disconnected(req)) => {
                Counters::bump(&self.counters.webhooks_dropped);
                warn!(url = %req.url, region = %req.geofence_id, "webhook queue full; request dropped");
                false
            }
        }
    }
}

impl Drop for WebhookWorker {
    fn drop(&mut self) {
        // Closing the channel lets the thread finish the backlog and exit.
        drop(self.tx.take());
        if let Some(handle) = self.join.take() {
            if handle.join().is_err() {
                warn!("webhook worker panicked");
            }
        }
    }
}

fn deliver_loop(client: &dyn WebhookClient, counters: &Counters, rx: &Receiver<WebhookRequest>) {
    for request in rx {
        match client.post(&request) {
            Ok(status) => debug!(
                url = %request.url,
                region = %request.geofence_id,
                kind = %request.kind,
                status,
                "webhook delivered"
            ),
            Err(e) => {
                Counters::bump(&counters.webhooks_failed);
                warn!(
                    url = %request.url,
                    region = %request.geofence_id,
                    kind = %request.kind,
                    error = %e,
                    "webhook delivery failed"
                );
            }
        }
    }
}
