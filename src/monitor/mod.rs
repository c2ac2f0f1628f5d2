//! MONITOR subsystem: start-acknowledgement tracking and transition dispatch.

/// Transition matching and side-effect dispatch.
pub mod dispatcher;
/// Start-acknowledgement state machine.
pub mod status;
mod webhook;

pub use dispatcher::{initial_transitions, Dispatched};
pub(crate) use dispatcher::EventDispatcher;
pub use status::{Fired, MonitoringStatus, Outcome, Progress};
