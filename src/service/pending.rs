use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::{ExecutionError, GeofenceError, GeofenceResult};

/// The eventual result of an asynchronous registry operation.
///
/// The operation runs on the service worker whether or not this handle is
/// kept; dropping it only discards the result. There is no built-in deadline,
/// use `wait_timeout` to impose one.
#[derive(Debug)]
#[must_use = "a Pending result does nothing unless waited on"]
pub struct Pending<T> {
    rx: Receiver<GeofenceResult<T>>,
    path: &'static str,
}

impl<T> Pending<T> {
    pub(crate) fn channel(path: &'static str) -> (Sender<GeofenceResult<T>>, Self) {
        let (tx, rx) = bounded(1);
        (tx, Self { rx, path })
    }

    /// A handle that is already resolved.
    pub(crate) fn ready(path: &'static str, result: GeofenceResult<T>) -> Self {
        let (tx, pending) = Self::channel(path);
        let _ = tx.send(result);
        pending
    }

    /// Blocks until the operation finishes.
    pub fn wait(self) -> GeofenceResult<T> {
        self.rx.recv().map_err(|_| GeofenceError::disconnected(self.path))?
    }

    /// Blocks for at most `timeout`.
    ///
    /// On timeout the operation keeps running; the handle can be waited on
    /// again.
    pub fn wait_timeout(&self, timeout: Duration) -> GeofenceResult<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
            .into()),
            Err(RecvTimeoutError::Disconnected) => Err(GeofenceError::disconnected(self.path)),
        }
    }

    /// Returns the result if it is already available.
    pub fn try_wait(&self) -> Option<GeofenceResult<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(GeofenceError::disconnected(self.path))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitoringError;

    #[test]
    fn test_ready_resolves_immediately() {
        let pending: Pending<u32> = Pending::ready("test", Ok(7));
        assert_eq!(pending.wait().unwrap(), 7);
    }

    #[test]
    fn test_timeout_then_result() {
        let (tx, pending) = Pending::<bool>::channel("test");
        let err = pending.wait_timeout(Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, GeofenceError::Execution(ExecutionError::Timeout { duration_ms: 5 })));
        assert!(pending.try_wait().is_none());

        tx.send(Err(MonitoringError::Cancelled.into())).unwrap();
        assert!(matches!(
            pending.wait(),
            Err(GeofenceError::Monitoring(MonitoringError::Cancelled))
        ));
    }

    #[test]
    fn test_dropped_sender_is_disconnected() {
        let (tx, pending) = Pending::<()>::channel("service_worker");
        drop(tx);
        match pending.wait() {
            Err(GeofenceError::Execution(ExecutionError::Disconnected { path })) => assert_eq!(path, "service_worker"),
            other => panic!("expected disconnect, got {other:?}"),
        }
    }
}
