//! Measurement configuration.
//!
//! Every tunable the engine recognises, with explicit defaults.  An
//! external loader supplies the values at startup; [`MeasurementConfig::validate`]
//! runs once at load time and again for per-session overrides.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::sensors::CalibrationProfile;

/// Core measurement configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    // --- Pressure targets ---
    /// Default inflate target (mmHg).
    pub inflate_target_mmhg: f64,
    /// Default controlled deflation rate (mmHg/s).
    pub deflate_rate_mmhg_per_s: f64,
    /// Deflation ends and analysis begins below this pressure (mmHg).
    pub deflate_floor_mmhg: f64,

    // --- Safety ---
    /// Soft over-pressure ceiling (mmHg), independent of the mechanical relief valve.
    pub soft_ceiling_mmhg: f64,
    /// Inflation must reach target within this many seconds.
    pub inflate_timeout_secs: f64,
    /// Deflation must finish within this many seconds.
    pub deflate_timeout_secs: f64,
    /// Analysis starts this long before the deflate timeout.
    pub deflate_timeout_margin_secs: f64,
    /// Rolling stall-detection window (s).
    pub stall_window_secs: f64,
    /// Minimum pressure change over the stall window (mmHg).
    pub stall_threshold_mmhg: f64,

    // --- Acquisition ---
    /// Per-read ADC deadline (ms).
    pub adc_timeout_ms: u32,
    /// Minimum acceptable acquisition rate (Hz).
    pub min_sample_rate_hz: f64,

    // --- Signal pipeline ---
    pub band_low_hz: f64,
    pub band_high_hz: f64,
    /// Peaks below this fraction of the strongest oscillation are ignored.
    pub peak_threshold_ratio: f64,
    /// Oscillations smaller than this, peak to trough, are noise (mmHg).
    pub min_oscillation_mmhg: f64,
    /// Moving-average width applied to envelope amplitudes (points).
    pub envelope_smoothing: usize,

    // --- Estimator ---
    /// Fraction of A_max marking systolic on the high-pressure side.
    pub systolic_ratio: f64,
    /// Fraction of A_max marking diastolic on the low-pressure side.
    pub diastolic_ratio: f64,
    /// Below this SNR (dB) no numbers are produced.
    pub snr_floor_db: f64,
    /// At or above this SNR (dB) a clean result is rated Good.
    pub snr_good_db: f64,
    pub min_envelope_points: usize,

    // --- Actuators ---
    /// Pump PWM duty while inflating (0-100%).
    pub pump_duty_percent: u8,
    /// Open-loop valve opening at the nominal deflate rate (0-100%).
    pub deflate_feedforward_percent: u8,
    /// Smallest valve opening the rate controller may command (0-100%).
    pub deflate_min_percent: u8,
    /// Deflate-rate PID gains (percent per mmHg/s).
    pub deflate_kp: f32,
    pub deflate_ki: f32,
    pub deflate_kd: f32,

    // --- Transducer ---
    pub calibration: CalibrationProfile,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            // Pressure targets
            inflate_target_mmhg: 180.0,
            deflate_rate_mmhg_per_s: 3.0,
            deflate_floor_mmhg: 40.0,

            // Safety
            soft_ceiling_mmhg: 200.0,
            inflate_timeout_secs: 30.0,
            deflate_timeout_secs: 90.0,
            deflate_timeout_margin_secs: 2.0,
            stall_window_secs: 5.0,
            stall_threshold_mmhg: 0.5,

            // Acquisition
            adc_timeout_ms: 1000,
            min_sample_rate_hz: 10.0,

            // Signal pipeline
            band_low_hz: 0.5,
            band_high_hz: 5.0,
            peak_threshold_ratio: 0.10,
            min_oscillation_mmhg: 0.05,
            envelope_smoothing: 3,

            // Estimator
            systolic_ratio: 0.55,
            diastolic_ratio: 0.80,
            snr_floor_db: 6.0,
            snr_good_db: 10.0,
            min_envelope_points: 6,

            // Actuators
            pump_duty_percent: 100,
            deflate_feedforward_percent: 30,
            deflate_min_percent: 5,
            deflate_kp: 2.0,
            deflate_ki: 1.0,
            deflate_kd: 0.0,

            calibration: CalibrationProfile::default(),
        }
    }
}

fn check(ok: bool, msg: &'static str) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::ValidationFailed(msg))
    }
}

impl MeasurementConfig {
    /// Reject inconsistent values.  NaN fails every comparison, so it is
    /// rejected too.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check(
            self.deflate_floor_mmhg > 0.0,
            "deflate_floor_mmhg must be positive",
        )?;
        check(
            self.soft_ceiling_mmhg > self.deflate_floor_mmhg,
            "soft_ceiling_mmhg must exceed deflate_floor_mmhg",
        )?;
        self.validate_session(self.inflate_target_mmhg, self.deflate_rate_mmhg_per_s)?;
        check(
            self.inflate_timeout_secs > 0.0,
            "inflate_timeout_secs must be positive",
        )?;
        check(
            self.deflate_timeout_margin_secs >= 0.0
                && self.deflate_timeout_secs > self.deflate_timeout_margin_secs,
            "deflate_timeout_secs must exceed its margin",
        )?;
        check(
            self.stall_window_secs > 0.0 && self.stall_threshold_mmhg > 0.0,
            "stall window and threshold must be positive",
        )?;
        check(self.adc_timeout_ms > 0, "adc_timeout_ms must be positive")?;
        check(
            self.min_sample_rate_hz > 0.0,
            "min_sample_rate_hz must be positive",
        )?;
        check(
            self.band_low_hz > 0.0 && self.band_high_hz > self.band_low_hz,
            "band edges must satisfy 0 < low < high",
        )?;
        check(
            self.band_high_hz <= self.min_sample_rate_hz / 2.0,
            "band_high_hz must not exceed the Nyquist rate of min_sample_rate_hz",
        )?;
        check(
            self.peak_threshold_ratio >= 0.0 && self.peak_threshold_ratio < 1.0,
            "peak_threshold_ratio must be in [0, 1)",
        )?;
        check(
            self.min_oscillation_mmhg >= 0.0 && self.min_oscillation_mmhg.is_finite(),
            "min_oscillation_mmhg must be non-negative",
        )?;
        check(
            self.systolic_ratio > 0.0 && self.systolic_ratio < 1.0,
            "systolic_ratio must be in (0, 1)",
        )?;
        check(
            self.diastolic_ratio > 0.0 && self.diastolic_ratio < 1.0,
            "diastolic_ratio must be in (0, 1)",
        )?;
        check(
            self.snr_good_db >= self.snr_floor_db,
            "snr_good_db must not be below snr_floor_db",
        )?;
        check(
            self.min_envelope_points >= 3,
            "min_envelope_points must be at least 3",
        )?;
        check(
            self.pump_duty_percent > 0 && self.pump_duty_percent <= 100,
            "pump_duty_percent must be in 1..=100",
        )?;
        check(
            self.deflate_min_percent <= self.deflate_feedforward_percent
                && self.deflate_feedforward_percent <= 100,
            "valve duties must satisfy min <= feedforward <= 100",
        )?;
        self.calibration.validate()
    }

    /// Validate per-session overrides against this configuration.
    pub fn validate_session(
        &self,
        target_inflate_mmhg: f64,
        deflate_rate_mmhg_per_s: f64,
    ) -> Result<(), ConfigError> {
        check(
            target_inflate_mmhg > self.deflate_floor_mmhg,
            "inflate target must be above the deflate floor",
        )?;
        check(
            target_inflate_mmhg < self.soft_ceiling_mmhg,
            "inflate target must be below the soft ceiling",
        )?;
        check(
            deflate_rate_mmhg_per_s > 0.0 && deflate_rate_mmhg_per_s.is_finite(),
            "deflate rate must be positive",
        )
    }

    /// Copy of this configuration with the session overrides applied.
    pub fn for_session(
        &self,
        target_inflate_mmhg: f64,
        deflate_rate_mmhg_per_s: f64,
    ) -> Result<Self, ConfigError> {
        self.validate_session(target_inflate_mmhg, deflate_rate_mmhg_per_s)?;
        Ok(Self {
            inflate_target_mmhg: target_inflate_mmhg,
            deflate_rate_mmhg_per_s,
            ..self.clone()
        })
    }

    /// Compact binary form for the external configuration store.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Decode and validate a configuration produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes)
            .map_err(|_| ConfigError::ValidationFailed("undecodable configuration record"))?;
        config.validate()?;
        Ok(config)
    }
}
