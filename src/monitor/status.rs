//! Monitoring status tracker.
//!
//! Counts region-start acknowledgements against the set of regions a
//! `start_monitoring` call asked for, and hands back the single pending
//! completion once the outcome is known:
//!
//! ```text
//! Idle --start(expected)--> Counting --all acked----> Idle  (Started)
//!                              |      --fail--------> Idle  (Failed)
//!                              |      --stop--------> Idle  (Stopped)
//! ```
//!
//! Every `start` opens a new session. Acknowledgements and failures tagged
//! with an older session are reported as ignored, never counted.
//!
//! The tracker does not call anything itself: transitions that finish a
//! session return a `Fired` value and the owner decides what to do with it.

use std::collections::HashSet;

use crate::error::MonitoringError;
use crate::geofence::GeofenceId;
use crate::platform::SessionToken;

/// How a counting session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every expected region acknowledged.
    Started,
    /// A region (or the session as a whole) failed.
    Failed(MonitoringError),
    /// The session was stopped before it finished.
    Stopped,
}

/// A finished session: the stored completion plus how it ended.
#[derive(Debug)]
pub struct Fired<C> {
    pub session: SessionToken,
    pub completion: C,
    pub outcome: Outcome,
}

/// Result of feeding one acknowledgement to the tracker.
#[derive(Debug)]
pub enum Progress<C> {
    /// Counted; the session is still waiting for more.
    Counted { acked: usize, target: usize },
    /// This acknowledgement finished the session.
    Complete(Fired<C>),
    /// Stale session, unexpected region, or a repeat acknowledgement.
    Ignored,
}

#[derive(Debug)]
enum State<C> {
    Idle,
    Counting {
        session: SessionToken,
        expected: HashSet<GeofenceId>,
        acked: HashSet<GeofenceId>,
        completion: C,
    },
}

/// Tracks one in-flight `start_monitoring` at a time.
#[derive(Debug)]
pub struct MonitoringStatus<C> {
    state: State<C>,
    epoch: u64,
}

impl<C> Default for MonitoringStatus<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> MonitoringStatus<C> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: State::Idle,
            epoch: 0,
        }
    }

    /// Begins counting acknowledgements for `expected` regions.
    ///
    /// Only one completion may be pending. If one is, or if `expected` is
    /// empty, the completion is handed back unchanged.
    pub fn start(&mut self, expected: impl IntoIterator<Item = GeofenceId>, completion: C) -> Result<SessionToken, C> {
        if self.is_counting() {
            return Err(completion);
        }
        let expected: HashSet<GeofenceId> = expected.into_iter().collect();
        if expected.is_empty() {
            return Err(completion);
        }

        self.epoch += 1;
        let session = SessionToken::new(self.epoch);
        self.state = State::Counting {
            session,
            expected,
            acked: HashSet::new(),
            completion,
        };
        Ok(session)
    }

    /// Records that `id` started monitoring in `session`.
    pub fn acknowledge(&mut self, session: SessionToken, id: &GeofenceId) -> Progress<C> {
        let State::Counting {
            session: current,
            expected,
            acked,
            ..
        } = &mut self.state
        else {
            return Progress::Ignored;
        };
        if *current != session || !expected.contains(id) || !acked.insert(id.clone()) {
            return Progress::Ignored;
        }

        if acked.len() < expected.len() {
            return Progress::Counted {
                acked: acked.len(),
                target: expected.len(),
            };
        }
        self.finish(Outcome::Started).map_or(Progress::Ignored, Progress::Complete)
    }

    /// Fails the session `session`. Stale sessions are ignored (`None`).
    pub fn fail(&mut self, session: SessionToken, error: MonitoringError) -> Option<Fired<C>> {
        if self.session() != Some(session) {
            return None;
        }
        self.finish(Outcome::Failed(error))
    }

    /// Ends whatever session is in flight, handing back its completion.
    pub fn stop(&mut self) -> Option<Fired<C>> {
        self.finish(Outcome::Stopped)
    }

    /// Removes regions from the current session's expectations.
    ///
    /// If every remaining region has already acknowledged the session
    /// completes as started; if none remain it ends as stopped.
    pub fn withdraw(&mut self, ids: &[GeofenceId]) -> Option<Fired<C>> {
        let State::Counting { expected, acked, .. } = &mut self.state else {
            return None;
        };
        for id in ids {
            expected.remove(id);
            acked.remove(id);
        }
        if expected.is_empty() {
            self.finish(Outcome::Stopped)
        } else if acked.len() >= expected.len() {
            self.finish(Outcome::Started)
        } else {
            None
        }
    }

    /// Drops the pending completion without an outcome.
    pub fn reset(&mut self) {
        self.state = State::Idle;
    }

    #[must_use]
    pub const fn is_counting(&self) -> bool {
        matches!(self.state, State::Counting { .. })
    }

    /// The session currently being counted.
    #[must_use]
    pub const fn session(&self) -> Option<SessionToken> {
        match &self.state {
            State::Counting { session, .. } => Some(*session),
            State::Idle => None,
        }
    }

    /// `(acked, target)`; `(0, 0)` when idle.
    #[must_use]
    pub fn progress(&self) -> (usize, usize) {
        match &self.state {
            State::Counting { expected, acked, .. } => (acked.len(), expected.len()),
            State::Idle => (0, 0),
        }
    }

    fn finish(&mut self, outcome: Outcome) -> Option<Fired<C>> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Counting {
                session, completion, ..
            } => Some(Fired {
                session,
                completion,
                outcome,
            }),
            State::Idle => None,
        }
    }
}
