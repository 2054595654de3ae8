//! Outbound application events.
//!
//! The [`MeasurementService`](super::service::MeasurementService) emits
//! these through the [`EventSink`](super::ports::EventSink) port.  Adapters
//! on the other side decide what to do with them: log to serial, forward
//! to the UI task, hand off to the sync layer.

use crate::error::AbortReason;
use crate::fsm::StateId;
use crate::result::MeasurementResult;
use crate::session::{SessionHandle, SessionStatus};

/// Structured events emitted by the measurement core.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A session was accepted and the worker started.
    SessionStarted {
        session: SessionHandle,
        target_mmhg: f64,
        rate_mmhg_per_s: f64,
    },

    /// Periodic progress snapshot.
    Progress(SessionStatus),

    /// The FSM transitioned between states.
    StateChanged { from: StateId, to: StateId },

    /// One or more safety faults were raised.
    FaultDetected(u8),

    /// Terminal success.
    Completed(MeasurementResult),

    /// Terminal failure.
    Aborted(AbortReason),
}
