//! Port traits — the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ MeasurementService (domain)
//! ```
//!
//! Driven adapters (bridge ADC, pump/valve, clock, event sinks) implement
//! these traits.  The [`MeasurementService`](super::service::MeasurementService)
//! consumes them via generics, so the domain core never touches hardware
//! directly and tests can inject a simulated cuff.
//!
//! ## Safety notes
//!
//! - **ActuatorPort** has a single owner: the measurement worker.
//! - **EmergencyPort** is the only path allowed to touch actuators from
//!   another thread; it must be callable concurrently with the worker.

use crate::error::AdcError;
use crate::sensors::{CalibrationProfile, PressureSample, RawSample};

use super::events::AppEvent;

// ───────────────────────────────────────────────────────────────
// ADC port (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port: pressure acquisition.
pub trait AdcPort {
    /// Block until one conversion is available or `timeout_ms` elapses.
    fn read_raw(&mut self, timeout_ms: u32) -> Result<RawSample, AdcError>;

    /// Calibration applied by [`read_pressure`](Self::read_pressure).
    fn calibration(&self) -> &CalibrationProfile;

    /// Replace the calibration.  Callers enforce the Idle-only rule.
    fn calibrate(&mut self, profile: CalibrationProfile);

    fn counts_to_mmhg(&self, counts: i32) -> f64 {
        self.calibration().counts_to_mmhg(counts)
    }

    /// Read one calibrated sample.
    fn read_pressure(&mut self, timeout_ms: u32) -> Result<PressureSample, AdcError> {
        let raw = self.read_raw(timeout_ms)?;
        Ok(PressureSample::from_raw(raw, self.calibration()))
    }
}

// ───────────────────────────────────────────────────────────────
// Actuator port (driven adapter: domain → hardware)
// ───────────────────────────────────────────────────────────────

/// Write-side port: pump and deflate valve.
pub trait ActuatorPort {
    /// Run the inflation pump.
    fn pump_on(&mut self);

    /// Stop the inflation pump.
    fn pump_off(&mut self);

    /// Open the deflate valve to `percent` (0 = sealed, 100 = fully open).
    fn valve_open(&mut self, percent: u8);

    /// Seal the cuff.
    fn valve_close(&mut self);

    /// Pump off and valve fully open, regardless of current state.
    fn emergency_release(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Emergency port (any thread → hardware)
// ───────────────────────────────────────────────────────────────

/// Out-of-band vent path.  Actuates hardware directly without the
/// worker's cooperation.
pub trait EmergencyPort: Send + Sync {
    /// Pump off, valve fully open.
    fn vent(&self);
}

// ───────────────────────────────────────────────────────────────
// Time port
// ───────────────────────────────────────────────────────────────

/// Monotonic clock.
pub trait TimePort {
    /// Microseconds since an arbitrary fixed origin.
    fn uptime_us(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Event sink (domain → outside world)
// ───────────────────────────────────────────────────────────────

/// Outbound port for structured domain events.
pub trait EventSink {
    fn emit(&mut self, event: &AppEvent);
}
