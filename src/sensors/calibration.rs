//! Zero/slope calibration for the cuff pressure transducer.
//!
//! The bridge sensor's output is linear in pressure over its working range,
//! so a calibration is an offset (counts at 0 mmHg) and a slope
//! (mmHg per count).  A reversed bridge is handled with the `inverted`
//! flag rather than a negative slope, keeping `slope > 0` as an invariant.
//!
//! ```text
//!   mmHg = (adjust(counts) - offset_counts) * slope
//!   adjust(c) = if inverted { -c } else { c }
//! ```

use serde::{Deserialize, Serialize};

use crate::drivers::bridge_adc::Gain;
use crate::error::ConfigError;

/// Full-scale span of the 24-bit two's-complement code, in counts per
/// (differential volts / excitation volts) at unity gain.
const CODE_SPAN: f64 = (1u32 << 24) as f64;

/// Nominal transducer used until a real calibration is loaded:
/// 40 kPa (300 mmHg) full scale, 2.5 mV/V, channel A at gain 128.
const NOMINAL_FULL_SCALE_MMHG: f64 = 300.0;
const NOMINAL_SENSITIVITY_MV_PER_V: f64 = 2.5;

/// Linear counts→mmHg mapping.  Immutable for the life of a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub offset_counts: i64,
    pub slope_mmhg_per_count: f64,
    pub inverted: bool,
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        let code_fs = NOMINAL_SENSITIVITY_MV_PER_V * 1e-3 * Gain::A128.factor() * CODE_SPAN;
        Self {
            offset_counts: 0,
            slope_mmhg_per_count: NOMINAL_FULL_SCALE_MMHG / code_fs,
            inverted: false,
        }
    }
}

impl CalibrationProfile {
    /// Build a profile, rejecting non-positive or non-finite slopes.
    pub fn new(
        offset_counts: i64,
        slope_mmhg_per_count: f64,
        inverted: bool,
    ) -> Result<Self, ConfigError> {
        let profile = Self {
            offset_counts,
            slope_mmhg_per_count,
            inverted,
        };
        profile.validate()?;
        Ok(profile)
    }

    /// Two-point calibration: raw counts with the cuff vented, and raw
    /// counts at a known reference pressure.  Polarity is inferred from the
    /// direction of the change.
    pub fn from_two_point(
        zero_counts: i32,
        reference_counts: i32,
        reference_mmhg: f64,
    ) -> Result<Self, ConfigError> {
        if !(reference_mmhg > 0.0 && reference_mmhg.is_finite()) {
            return Err(ConfigError::ValidationFailed(
                "reference pressure must be positive",
            ));
        }
        let delta = i64::from(reference_counts) - i64::from(zero_counts);
        if delta == 0 {
            return Err(ConfigError::ValidationFailed(
                "reference reading equals zero reading",
            ));
        }
        let inverted = delta < 0;
        let zero = if inverted {
            -i64::from(zero_counts)
        } else {
            i64::from(zero_counts)
        };
        Self::new(zero, reference_mmhg / delta.unsigned_abs() as f64, inverted)
    }

    /// Datasheet calibration from the transducer's ratiometric sensitivity
    /// (mV per V of excitation at full scale) and the ADC gain in use.
    /// `zero_counts` is the vented reading (see tare).
    pub fn from_sensitivity(
        zero_counts: i32,
        sensitivity_mv_per_v: f64,
        full_scale_mmhg: f64,
        gain: Gain,
        inverted: bool,
    ) -> Result<Self, ConfigError> {
        if !(sensitivity_mv_per_v > 0.0 && full_scale_mmhg > 0.0) {
            return Err(ConfigError::ValidationFailed(
                "sensitivity and full scale must be positive",
            ));
        }
        let code_fs = sensitivity_mv_per_v * 1e-3 * gain.factor() * CODE_SPAN;
        let zero = if inverted {
            -i64::from(zero_counts)
        } else {
            i64::from(zero_counts)
        };
        Self::new(zero, full_scale_mmhg / code_fs, inverted)
    }

    /// Same slope and polarity, new zero point taken from a vented reading.
    pub fn with_zero(self, zero_counts: i32) -> Self {
        Self {
            offset_counts: self.adjust(zero_counts),
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.slope_mmhg_per_count > 0.0 && self.slope_mmhg_per_count.is_finite()) {
            return Err(ConfigError::ValidationFailed(
                "calibration slope must be positive and finite",
            ));
        }
        Ok(())
    }

    #[inline]
    fn adjust(&self, counts: i32) -> i64 {
        if self.inverted {
            -i64::from(counts)
        } else {
            i64::from(counts)
        }
    }

    /// Convert a raw ADC code to cuff pressure.
    pub fn counts_to_mmhg(&self, counts: i32) -> f64 {
        (self.adjust(counts) - self.offset_counts) as f64 * self.slope_mmhg_per_count
    }

    /// Inverse of [`counts_to_mmhg`](Self::counts_to_mmhg), rounded to the
    /// nearest code and clamped to the 24-bit range.
    pub fn mmhg_to_counts(&self, mmhg: f64) -> i32 {
        let adjusted = (mmhg / self.slope_mmhg_per_count).round() + self.offset_counts as f64;
        let counts = if self.inverted { -adjusted } else { adjusted };
        counts.clamp(-8_388_608.0, 8_388_607.0) as i32
    }
}
