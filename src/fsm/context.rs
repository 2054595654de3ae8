//! Shared mutable context threaded through every FSM handler.
//!
//! `FsmContext` is the single struct that state handlers read from and
//! write to.  It contains the latest pressure sample, actuator command
//! outputs, timing information, configuration, the session being measured
//! and accumulated safety faults.  Think of it as the "blackboard" in a
//! blackboard architecture.

use crate::config::MeasurementConfig;
use crate::error::AbortReason;
use crate::result::MeasurementResult;
use crate::sensors::PressureSample;
use crate::session::MeasurementSession;

use super::StateId;

// ---------------------------------------------------------------------------
// Actuator commands (written by state handlers; consumed by the service)
// ---------------------------------------------------------------------------

/// Requested valve behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveCommand {
    /// Hold pressure (inflating).
    Closed,
    /// Controlled bleed at the given open percentage.  The service's rate
    /// loop may trim the duty each tick.
    Deflate(u8),
    /// Fully open, pump off.  Normal end of a session.
    Vent,
    /// `emergency_release()`: pump off and valve forced open.
    Release,
}

/// Commands that state handlers write to request actuator actions.
/// The service applies these to the actuator port each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorCommands {
    pub pump_on: bool,
    pub valve: ValveCommand,
}

impl Default for ActuatorCommands {
    fn default() -> Self {
        Self::vented()
    }
}

impl ActuatorCommands {
    /// Pump off, valve open.  Safe default.
    pub const fn vented() -> Self {
        Self {
            pump_on: false,
            valve: ValveCommand::Vent,
        }
    }
}

// ---------------------------------------------------------------------------
// FsmContext
// ---------------------------------------------------------------------------

/// The shared context passed to every state handler function.
pub struct FsmContext {
    // -- Timing --
    /// Monotonic time of the current tick (µs).
    pub now_us: u64,
    /// Monotonic time the current state was entered (µs).
    pub state_entered_us: u64,

    // -- Sensor data --
    /// Latest calibrated pressure.  Updated before each FSM tick.
    pub pressure: PressureSample,

    // -- Actuator outputs --
    pub commands: ActuatorCommands,

    // -- Configuration --
    pub config: MeasurementConfig,

    // -- Session --
    pub session: MeasurementSession,
    /// Set once the deflate phase was cut short by its deadline.
    pub deflate_deadline_hit: bool,
    /// First abort cause; later ones are ignored.
    pub abort_reason: Option<AbortReason>,
    pub result: Option<MeasurementResult>,

    // -- Safety --
    /// Accumulated safety fault bitmask (see `SafetyFault::mask()`).
    /// Set by the safety supervisor, read by the service.
    pub fault_flags: u8,
}

impl FsmContext {
    pub fn new(config: MeasurementConfig, session: MeasurementSession) -> Self {
        Self {
            now_us: session.started_at_us,
            state_entered_us: session.started_at_us,
            pressure: PressureSample::default(),
            commands: ActuatorCommands::vented(),
            config,
            session,
            deflate_deadline_hit: false,
            abort_reason: None,
            result: None,
            fault_flags: 0,
        }
    }

    /// Seconds elapsed since the current state was entered.
    pub fn secs_in_state(&self) -> f64 {
        self.now_us.saturating_sub(self.state_entered_us) as f64 / 1e6
    }

    /// Seconds left before the session deadline; negative once past it.
    /// `None` outside the timed phases.
    pub fn secs_to_deadline(&self) -> Option<f64> {
        self.session.secs_to_deadline(self.now_us)
    }

    /// Record `reason` unless one is already set and request `Aborted`.
    pub fn abort(&mut self, reason: AbortReason) -> Option<StateId> {
        self.abort_reason.get_or_insert(reason);
        Some(StateId::Aborted)
    }
}
