//! Deflation-phase signal pipeline.
//!
//! ```text
//!   samples ─▶ detrend ─▶ band-pass (filtfilt) ─▶ peaks ─▶ envelope ─▶ smooth
//!                                 │
//!                                 └─▶ HR resonator reconstruction ─▶ SNR
//! ```
//!
//! The pipeline never fails on bad data with a panic: too few samples or a
//! sample rate below the configured minimum surface as [`EstimationError`]s.

pub mod envelope;
pub mod filter;

use log::debug;

use crate::config::MeasurementConfig;
use crate::error::EstimationError;
use crate::sensors::PressureSample;

use envelope::{EnvelopePoint, OscillationEnvelope, PeakParams, detect_peaks};
use filter::{Biquad, detrend, filtfilt};

/// SNR reported when the residual noise is numerically zero.
pub const SNR_CAP_DB: f64 = 60.0;

/// Upper band edge never exceeds this fraction of the sample rate.
const MAX_BAND_FRACTION: f64 = 0.45;

/// Quality factor of the heart-rate reconstruction resonators.
const HR_RESONATOR_Q: f64 = 2.0;

/// Output of [`process`]: what the estimator needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalAnalysis {
    pub envelope: OscillationEnvelope,
    pub snr_db: f64,
    pub sample_rate_hz: f64,
}

/// Run the full pipeline over the samples captured during deflation.
pub fn process(
    samples: &[PressureSample],
    config: &MeasurementConfig,
) -> Result<SignalAnalysis, EstimationError> {
    let n = samples.len();
    if n < 2 {
        return Err(EstimationError::EnvelopeTooShort);
    }
    let t0 = samples[0].timestamp_us;
    let span_us = samples[n - 1].timestamp_us.saturating_sub(t0);
    if span_us == 0 {
        return Err(EstimationError::EnvelopeTooShort);
    }
    let fs = (n - 1) as f64 * 1e6 / span_us as f64;
    if fs < config.min_sample_rate_hz {
        debug!("signal: sample rate {fs:.1} Hz below minimum");
        return Err(EstimationError::LowSignalQuality);
    }

    let edge_guard = secs_to_samples(0.5, fs);
    // Needs room for a handful of pulses between the guarded edges.
    if n < 2 * edge_guard + config.min_envelope_points {
        return Err(EstimationError::EnvelopeTooShort);
    }

    let pressures: Vec<f64> = samples.iter().map(|s| s.pressure_mmhg).collect();
    let residual = detrend(&pressures);
    let high = config.band_high_hz.min(MAX_BAND_FRACTION * fs);
    let bandpass =
        Biquad::bandpass(config.band_low_hz, high, fs).ok_or(EstimationError::LowSignalQuality)?;
    let pad = secs_to_samples(2.0, fs);
    let filtered = filtfilt(&bandpass, &residual, pad);

    let params = PeakParams {
        edge_guard,
        min_distance: secs_to_samples(0.2, fs).max(1),
        max_lookback: secs_to_samples(2.0, fs),
        threshold_ratio: config.peak_threshold_ratio,
        min_amplitude: config.min_oscillation_mmhg,
    };
    let peaks = detect_peaks(&filtered, &params);

    let points: Vec<EnvelopePoint> = peaks
        .iter()
        .map(|p| EnvelopePoint {
            cuff_mmhg: pressures[p.index],
            amplitude: p.amplitude,
            at_s: samples[p.index].timestamp_us.saturating_sub(t0) as f64 / 1e6,
        })
        .collect();
    let envelope = OscillationEnvelope::new(points).smoothed(config.envelope_smoothing);

    let snr_db = snr(&filtered, &envelope, fs, pad, edge_guard);
    debug!(
        "signal: {n} samples @ {fs:.1} Hz, {} pulses, SNR {snr_db:.1} dB",
        envelope.len()
    );

    Ok(SignalAnalysis {
        envelope,
        snr_db,
        sample_rate_hz: fs,
    })
}

fn secs_to_samples(secs: f64, fs: f64) -> usize {
    (secs * fs).round() as usize
}

/// Oscillation power over residual-noise power, in dB.
///
/// The oscillation is reconstructed by passing the filtered signal through
/// narrow resonators at the detected heart rate and its first harmonic;
/// whatever the resonators reject is treated as noise.
fn snr(filtered: &[f64], envelope: &OscillationEnvelope, fs: f64, pad: usize, guard: usize) -> f64 {
    let Some(f_hr) = median_pulse_hz(envelope) else {
        return f64::NEG_INFINITY;
    };
    let Some(fundamental) = Biquad::resonator(f_hr, HR_RESONATOR_Q, fs) else {
        return f64::NEG_INFINITY;
    };

    let mut recon = filtfilt(&fundamental, filtered, pad);
    let harmonic = (2.0 * f_hr < MAX_BAND_FRACTION * fs)
        .then(|| Biquad::resonator(2.0 * f_hr, HR_RESONATOR_Q, fs))
        .flatten();
    if let Some(harmonic) = harmonic {
        let second = filtfilt(&harmonic, filtered, pad);
        for (r, h) in recon.iter_mut().zip(second) {
            *r += h;
        }
    }

    let end = filtered.len().saturating_sub(guard);
    if end <= guard {
        return f64::NEG_INFINITY;
    }
    let (mut signal, mut noise) = (0.0, 0.0);
    for i in guard..end {
        signal += recon[i] * recon[i];
        let e = filtered[i] - recon[i];
        noise += e * e;
    }
    if signal <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if noise <= 0.0 {
        return SNR_CAP_DB;
    }
    (10.0 * (signal / noise).log10()).min(SNR_CAP_DB)
}

/// Pulse frequency from the median inter-peak interval.
fn median_pulse_hz(envelope: &OscillationEnvelope) -> Option<f64> {
    let mut intervals: Vec<f64> = envelope
        .points()
        .windows(2)
        .map(|w| w[1].at_s - w[0].at_s)
        .filter(|dt| *dt > 0.0)
        .collect();
    if intervals.is_empty() {
        return None;
    }
    intervals.sort_by(f64::total_cmp);
    let median = intervals[intervals.len() / 2];
    Some(1.0 / median)
}
