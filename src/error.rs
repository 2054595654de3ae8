//! Unified error types for the NIBP measurement engine.
//!
//! Every variant is `Copy` so faults can be latched by the safety
//! supervisor, stored in the FSM context and handed across the worker
//! boundary without allocation.  Each type carries a stable `code()`
//! string: the presentation layer receives that, never a Debug dump.

use core::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ADC errors
// ---------------------------------------------------------------------------

/// Failure of a single bridge-ADC conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcError {
    /// No conversion became ready before the read deadline.
    Timeout,
    /// Pin access failed, the code railed, or the data line misbehaved
    /// during the pulse train.
    ProtocolFault,
}

impl AdcError {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Timeout => "adc_timeout",
            Self::ProtocolFault => "adc_protocol_fault",
        }
    }
}

impl fmt::Display for AdcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "ADC conversion timed out"),
            Self::ProtocolFault => write!(f, "ADC protocol fault"),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation errors (recorded on results, or fatal when physiological)
// ---------------------------------------------------------------------------

/// A single failed plausibility check on a SYS/DIA/MAP triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationError {
    /// SYS was not strictly above DIA.
    SystolicNotAboveDiastolic,
    /// DIA below the physiological floor.
    DiastolicBelowFloor,
    /// SYS above the physiological ceiling.
    SystolicAboveCeiling,
    /// Pulse pressure outside the expected band (warning).
    PulsePressureOutOfRange,
    /// MAP disagrees with DIA + PP/3 (warning, quality forced to Poor).
    MapMismatch,
    /// Heart rate outside 30–300 bpm (warning).
    HeartRateOutOfRange,
}

impl ValidationError {
    /// Hard failures reject the result outright.
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::SystolicNotAboveDiastolic | Self::DiastolicBelowFloor | Self::SystolicAboveCeiling
        )
    }

    pub const fn code(self) -> &'static str {
        match self {
            Self::SystolicNotAboveDiastolic => "sys_not_above_dia",
            Self::DiastolicBelowFloor => "dia_below_floor",
            Self::SystolicAboveCeiling => "sys_above_ceiling",
            Self::PulsePressureOutOfRange => "pulse_pressure_out_of_range",
            Self::MapMismatch => "map_mismatch",
            Self::HeartRateOutOfRange => "heart_rate_out_of_range",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SystolicNotAboveDiastolic => write!(f, "systolic not above diastolic"),
            Self::DiastolicBelowFloor => write!(f, "diastolic below 40 mmHg"),
            Self::SystolicAboveCeiling => write!(f, "systolic above 260 mmHg"),
            Self::PulsePressureOutOfRange => write!(f, "pulse pressure outside 20-100 mmHg"),
            Self::MapMismatch => write!(f, "MAP inconsistent with DIA + PP/3"),
            Self::HeartRateOutOfRange => write!(f, "heart rate outside 30-300 bpm"),
        }
    }
}

// ---------------------------------------------------------------------------
// Estimation errors
// ---------------------------------------------------------------------------

/// Why the estimator refused to produce numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimationError {
    /// SNR below the configured floor.
    LowSignalQuality,
    /// Too few envelope points, or the envelope does not bracket the
    /// systolic/diastolic crossings.
    EnvelopeTooShort,
    /// A hard validation rule failed.
    PhysiologicallyImplausible(ValidationError),
}

impl EstimationError {
    pub const fn code(self) -> &'static str {
        match self {
            Self::LowSignalQuality => "low_signal_quality",
            Self::EnvelopeTooShort => "envelope_too_short",
            Self::PhysiologicallyImplausible(_) => "physiologically_implausible",
        }
    }
}

impl fmt::Display for EstimationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowSignalQuality => write!(f, "signal quality too low"),
            Self::EnvelopeTooShort => write!(f, "oscillation envelope too short"),
            Self::PhysiologicallyImplausible(v) => write!(f, "physiologically implausible: {v}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Abort reasons
// ---------------------------------------------------------------------------

/// Terminal failure of a measurement session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Cuff pressure crossed the soft ceiling.
    OverPressure,
    /// Target pressure not reached within the inflate timeout.
    InflateTimeout,
    /// Pressure stopped falling during controlled deflation.
    DeflationStalled,
    /// Deflation did not complete within its window.
    DeflateTimeout,
    /// `cancel()` was called.
    UserCancelled,
    /// `emergency_release()` was invoked out-of-band.
    EmergencyReleased,
    /// The ADC failed mid-session; never retried on a pressurised cuff.
    HardwareFault(AdcError),
    /// Acquisition completed but the estimator rejected the data.
    Estimation(EstimationError),
}

impl AbortReason {
    /// Machine-readable reason surfaced to the presentation layer.
    pub const fn code(self) -> &'static str {
        match self {
            Self::OverPressure => "over_pressure",
            Self::InflateTimeout => "inflate_timeout",
            Self::DeflationStalled => "deflation_stalled",
            Self::DeflateTimeout => "deflate_timeout",
            Self::UserCancelled => "user_cancelled",
            Self::EmergencyReleased => "emergency_released",
            Self::HardwareFault(e) => e.code(),
            Self::Estimation(e) => e.code(),
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OverPressure => write!(f, "cuff over pressure"),
            Self::InflateTimeout => write!(f, "inflate timeout"),
            Self::DeflationStalled => write!(f, "deflation stalled"),
            Self::DeflateTimeout => write!(f, "deflate timeout"),
            Self::UserCancelled => write!(f, "cancelled by user"),
            Self::EmergencyReleased => write!(f, "emergency release"),
            Self::HardwareFault(e) => write!(f, "hardware fault: {e}"),
            Self::Estimation(e) => write!(f, "estimation failed: {e}"),
        }
    }
}

impl From<AdcError> for AbortReason {
    fn from(e: AdcError) -> Self {
        Self::HardwareFault(e)
    }
}

impl From<EstimationError> for AbortReason {
    fn from(e: EstimationError) -> Self {
        Self::Estimation(e)
    }
}

// ---------------------------------------------------------------------------
// Safety faults
// ---------------------------------------------------------------------------

/// Faults latched by the safety supervisor.  Any set bit sends the FSM to
/// `Aborted` on the same tick, before any other actuator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SafetyFault {
    /// Out-of-band emergency release.
    EmergencyReleased = 0b0000_0001,
    /// Pressure above the soft ceiling.
    OverPressure = 0b0000_0010,
    /// ADC read failed.
    AdcFault = 0b0000_0100,
    /// Pressure flat during deflation.
    DeflationStalled = 0b0000_1000,
    /// Caller cancelled the session.
    UserCancelled = 0b0001_0000,
}

impl SafetyFault {
    /// Priority order used to pick a single abort reason from the mask.
    pub const PRIORITY: [SafetyFault; 5] = [
        Self::EmergencyReleased,
        Self::OverPressure,
        Self::AdcFault,
        Self::DeflationStalled,
        Self::UserCancelled,
    ];

    /// Return the bitmask for this fault.
    pub const fn mask(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for SafetyFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmergencyReleased => write!(f, "emergency release"),
            Self::OverPressure => write!(f, "over pressure"),
            Self::AdcFault => write!(f, "ADC fault"),
            Self::DeflationStalled => write!(f, "deflation stalled"),
            Self::UserCancelled => write!(f, "user cancelled"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// A configuration value failed range validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The `&'static str` names the field and the rule it broke.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine API errors
// ---------------------------------------------------------------------------

/// Errors returned by the public [`MeasurementEngine`](crate::app::engine::MeasurementEngine) API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// A session is already running on the cuff.
    Busy,
    /// Per-session overrides or a calibration profile failed validation.
    InvalidConfig(ConfigError),
    /// The handle does not name the current or most recent session.
    StaleHandle,
    /// The measurement worker thread could not be created.
    WorkerSpawn,
    /// The measurement worker panicked before reporting an outcome.
    WorkerPanicked,
    /// ADC failure during an Idle-only operation (tare).
    Adc(AdcError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "a measurement is already in progress"),
            Self::InvalidConfig(e) => write!(f, "invalid configuration: {e}"),
            Self::StaleHandle => write!(f, "unknown session handle"),
            Self::WorkerSpawn => write!(f, "failed to spawn measurement worker"),
            Self::WorkerPanicked => write!(f, "measurement worker panicked"),
            Self::Adc(e) => write!(f, "ADC: {e}"),
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        Self::InvalidConfig(e)
    }
}

impl From<AdcError> for EngineError {
    fn from(e: AdcError) -> Self {
        Self::Adc(e)
    }
}

impl std::error::Error for EngineError {}
impl std::error::Error for AbortReason {}
impl std::error::Error for ConfigError {}
