//! Oscillometric NIBP measurement engine.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.
//!
//! ```text
//!  BridgeAdc ──▶ AdcPort ──▶ ┌──────────────────────────┐ ──▶ on_complete
//!                            │  MeasurementEngine        │
//!  Pump/Valve ◀─ ActuatorPort│   └─ worker: Service      │ ──▶ EventSink
//!                            │       FSM · Safety · PID  │
//!  EmergencyStop ──▶ vent    │       signal · estimator  │
//!                            └──────────────────────────┘
//! ```

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod error;
pub mod estimator;
pub mod fsm;
pub mod result;
pub mod safety;
pub mod session;
pub mod signal;

pub mod pins;

// Hardware-facing modules; the ESP-IDF paths are guarded by cfg attributes
// inside, the simulation fallbacks build on the host.
pub mod adapters;
pub mod control;
pub mod drivers;
pub mod sensors;

pub use app::engine::{EmergencyStop, MeasurementEngine};
pub use config::MeasurementConfig;
pub use error::{AbortReason, AdcError, EngineError, EstimationError, ValidationError};
pub use result::{MeasurementResult, Quality};
pub use sensors::{CalibrationProfile, PressureSample, RawSample};
pub use session::{SessionHandle, SessionOutcome, SessionStatus};
