//! Ratio-method SYS/DIA/MAP estimation with physiological validation.
//!
//! ```text
//!   amplitude
//!       │            A_max
//!       │          ╱‾‾‾‾╲
//!  0.80 ┼ ─ ─ ─ ─ ╱ ─ ─ ─╲─ ─ DIA (walk up from low pressure)
//!  0.55 ┼ ─ ─ ─ ─╱─ ─ ─ ─ ─╲   SYS (walk down from high pressure)
//!       └────────┴────┴─────┴────▶ cuff pressure (decreasing in time)
//!              SYS   MAP   DIA
//! ```
//!
//! Fatal rules reject the reading outright; the rest are recorded on the
//! result as warnings and lower `quality`/`confidence`.

use log::{info, warn};

use crate::config::MeasurementConfig;
use crate::error::{EstimationError, ValidationError};
use crate::result::{BpCategory, MeasurementResult, Quality};
use crate::signal::envelope::{EnvelopePoint, OscillationEnvelope};

pub const DIASTOLIC_FLOOR_MMHG: f64 = 40.0;
pub const SYSTOLIC_CEILING_MMHG: f64 = 260.0;
pub const PULSE_PRESSURE_RANGE: (f64, f64) = (20.0, 100.0);
pub const MAP_TOLERANCE_MMHG: f64 = 10.0;
pub const HEART_RATE_RANGE: (f64, f64) = (30.0, 300.0);

/// SNR span above the floor over which confidence ramps from 0.5 to 1.0.
const CONFIDENCE_SNR_SPAN_DB: f64 = 14.0;

const PULSE_PRESSURE_PENALTY: f64 = 0.8;
const MAP_MISMATCH_PENALTY: f64 = 0.5;
const HEART_RATE_PENALTY: f64 = 0.8;

/// Turn an envelope and its SNR into a validated reading.
pub fn estimate(
    envelope: &OscillationEnvelope,
    snr_db: f64,
    config: &MeasurementConfig,
) -> Result<MeasurementResult, EstimationError> {
    if snr_db.is_nan() || snr_db < config.snr_floor_db {
        return Err(EstimationError::LowSignalQuality);
    }
    if envelope.len() < config.min_envelope_points {
        return Err(EstimationError::EnvelopeTooShort);
    }

    let points = envelope.points();
    let (map_idx, peak) = envelope
        .max_point()
        .ok_or(EstimationError::EnvelopeTooShort)?;
    if peak.amplitude.is_nan() || peak.amplitude <= 0.0 {
        return Err(EstimationError::EnvelopeTooShort);
    }
    let map = peak.cuff_mmhg;

    let sys_level = config.systolic_ratio * peak.amplitude;
    let sys_idx = (0..=map_idx)
        .find(|&i| points[i].amplitude >= sys_level)
        .ok_or(EstimationError::EnvelopeTooShort)?;
    if sys_idx == 0 {
        // Inflation never got above the systolic crossing.
        return Err(EstimationError::EnvelopeTooShort);
    }
    let systolic = crossing(&points[sys_idx - 1], &points[sys_idx], sys_level);

    let dia_level = config.diastolic_ratio * peak.amplitude;
    let last = points.len() - 1;
    let dia_idx = (map_idx..=last)
        .rev()
        .find(|&i| points[i].amplitude >= dia_level)
        .ok_or(EstimationError::EnvelopeTooShort)?;
    if dia_idx == last {
        // Deflation stopped before the diastolic crossing.
        return Err(EstimationError::EnvelopeTooShort);
    }
    let diastolic = crossing(&points[dia_idx + 1], &points[dia_idx], dia_level);

    let pulse_pressure = systolic - diastolic;
    let heart_rate_bpm = envelope.heart_rate_bpm().unwrap_or(0.0);

    // Fatal rules.
    let fatal = [
        (systolic <= diastolic, ValidationError::SystolicNotAboveDiastolic),
        (diastolic < DIASTOLIC_FLOOR_MMHG, ValidationError::DiastolicBelowFloor),
        (systolic > SYSTOLIC_CEILING_MMHG, ValidationError::SystolicAboveCeiling),
    ];
    if let Some(&(_, e)) = fatal.iter().find(|(failed, _)| *failed) {
        warn!("estimator: rejected {systolic:.1}/{diastolic:.1}: {e}");
        return Err(EstimationError::PhysiologicallyImplausible(e));
    }

    let mut quality = if snr_db >= config.snr_good_db {
        Quality::Good
    } else {
        Quality::Fair
    };
    let mut confidence = 0.5
        + 0.5 * ((snr_db - config.snr_floor_db) / CONFIDENCE_SNR_SPAN_DB).clamp(0.0, 1.0);
    let mut warnings = heapless::Vec::new();

    if !(PULSE_PRESSURE_RANGE.0..=PULSE_PRESSURE_RANGE.1).contains(&pulse_pressure) {
        let _ = warnings.push(ValidationError::PulsePressureOutOfRange);
        quality = quality.downgrade();
        confidence *= PULSE_PRESSURE_PENALTY;
    }
    if !(HEART_RATE_RANGE.0..=HEART_RATE_RANGE.1).contains(&heart_rate_bpm) {
        let _ = warnings.push(ValidationError::HeartRateOutOfRange);
        quality = quality.downgrade();
        confidence *= HEART_RATE_PENALTY;
    }
    if (map - (diastolic + pulse_pressure / 3.0)).abs() > MAP_TOLERANCE_MMHG {
        let _ = warnings.push(ValidationError::MapMismatch);
        quality = Quality::Poor;
        confidence *= MAP_MISMATCH_PENALTY;
    }

    info!(
        "estimator: {systolic:.0}/{diastolic:.0} (MAP {map:.0}) HR {heart_rate_bpm:.0} SNR {snr_db:.1} dB {quality:?}"
    );

    Ok(MeasurementResult {
        systolic,
        diastolic,
        map,
        pulse_pressure,
        heart_rate_bpm,
        snr_db,
        confidence: confidence.clamp(0.0, 1.0),
        quality,
        category: BpCategory::classify(systolic, diastolic),
        validation_errors: warnings,
    })
}

/// Cuff pressure where the amplitude crosses `level` between `below`
/// (amplitude under the level) and `at` (amplitude at or above it).
fn crossing(below: &EnvelopePoint, at: &EnvelopePoint, level: f64) -> f64 {
    let rise = at.amplitude - below.amplitude;
    if rise <= 0.0 {
        return at.cuff_mmhg;
    }
    let frac = ((level - below.amplitude) / rise).clamp(0.0, 1.0);
    below.cuff_mmhg + frac * (at.cuff_mmhg - below.cuff_mmhg)
}
