//! Pressure sensing: sample types and transducer calibration.
//!
//! The bridge ADC driver produces [`RawSample`]s; the calibration turns
//! them into [`PressureSample`]s, which is the only form the rest of the
//! engine ever sees.

pub mod calibration;

pub use calibration::CalibrationProfile;

/// One successful ADC conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    /// Sign-extended 24-bit code.
    pub counts: i32,
    /// Monotonic microseconds at the end of the conversion read.
    pub timestamp_us: u64,
}

/// A calibrated cuff-pressure reading.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PressureSample {
    pub pressure_mmhg: f64,
    pub timestamp_us: u64,
}

impl PressureSample {
    pub fn from_raw(raw: RawSample, calibration: &CalibrationProfile) -> Self {
        Self {
            pressure_mmhg: calibration.counts_to_mmhg(raw.counts),
            timestamp_us: raw.timestamp_us,
        }
    }
}
