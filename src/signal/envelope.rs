//! Peak detection and the oscillation envelope.
//!
//! Each detected pulse contributes one [`EnvelopePoint`]: its peak-to-trough
//! amplitude in the band-limited residual, paired with the unfiltered cuff
//! pressure at the same instant.

/// One pulse: cuff pressure, oscillation amplitude, time since acquisition start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopePoint {
    pub cuff_mmhg: f64,
    pub amplitude: f64,
    pub at_s: f64,
}

/// Envelope ordered by time.  Cuff pressure is non-increasing across the
/// sequence; [`OscillationEnvelope::new`] enforces it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OscillationEnvelope {
    points: Vec<EnvelopePoint>,
}

impl OscillationEnvelope {
    /// Build from time-ordered points.  Pressures are clamped to the running
    /// minimum so a pulse riding on the deflation ramp cannot push the
    /// sequence back up.
    pub fn new(mut points: Vec<EnvelopePoint>) -> Self {
        let mut floor = f64::INFINITY;
        for p in &mut points {
            floor = floor.min(p.cuff_mmhg);
            p.cuff_mmhg = floor;
        }
        Self { points }
    }

    pub fn points(&self) -> &[EnvelopePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Index and value of the largest amplitude (first one on ties).
    pub fn max_point(&self) -> Option<(usize, EnvelopePoint)> {
        let mut best: Option<(usize, EnvelopePoint)> = None;
        for (i, p) in self.points.iter().enumerate() {
            if best.is_none_or(|(_, b)| p.amplitude > b.amplitude) {
                best = Some((i, *p));
            }
        }
        best
    }

    pub fn is_non_increasing(&self) -> bool {
        self.points
            .windows(2)
            .all(|w| w[1].cuff_mmhg <= w[0].cuff_mmhg)
    }

    /// Centred moving average of the amplitudes over `width` points,
    /// shrinking at the ends.  Width 0 or 1 is a no-op.
    pub fn smoothed(&self, width: usize) -> Self {
        if width < 2 {
            return self.clone();
        }
        let half = width / 2;
        let n = self.points.len();
        let points = (0..n)
            .map(|i| {
                let lo = i.saturating_sub(half);
                let hi = (i + half + 1).min(n);
                let window = &self.points[lo..hi];
                let mean = window.iter().map(|p| p.amplitude).sum::<f64>() / window.len() as f64;
                EnvelopePoint {
                    amplitude: mean,
                    ..self.points[i]
                }
            })
            .collect();
        Self { points }
    }

    /// Heart rate from the mean inter-pulse interval, ignoring intervals
    /// outside 0.2–2 s (missed or doubled detections).
    pub fn heart_rate_bpm(&self) -> Option<f64> {
        let intervals: Vec<f64> = self
            .points
            .windows(2)
            .map(|w| w[1].at_s - w[0].at_s)
            .filter(|dt| (0.2..=2.0).contains(dt))
            .collect();
        if intervals.is_empty() {
            return None;
        }
        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        Some(60.0 / mean)
    }
}

/// A detected pulse in the filtered residual.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub index: usize,
    /// Peak minus the preceding trough.
    pub amplitude: f64,
}

/// Peak-picking parameters, in samples.
#[derive(Debug, Clone, Copy)]
pub struct PeakParams {
    /// Samples ignored at each end (filter edge effects).
    pub edge_guard: usize,
    /// Minimum spacing between accepted peaks.
    pub min_distance: usize,
    /// Longest look-back for the trough preceding a peak.
    pub max_lookback: usize,
    /// Peaks below this fraction of the largest excursion are dropped.
    pub threshold_ratio: f64,
    /// Peak-to-trough excursions below this are noise (same unit as `x`).
    pub min_amplitude: f64,
}

/// Local maxima of `x` above the threshold, at least `min_distance` apart.
/// Within a clash the larger peak wins.
pub fn detect_peaks(x: &[f64], params: &PeakParams) -> Vec<Peak> {
    let n = x.len();
    let start = params.edge_guard.max(1);
    let end = n.saturating_sub(params.edge_guard.max(1));
    if end <= start + 1 {
        return Vec::new();
    }

    let max = x[start..end].iter().copied().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return Vec::new();
    }
    let threshold = params.threshold_ratio * max;

    let mut peaks: Vec<Peak> = Vec::new();
    let mut last_index: Option<usize> = None;
    for i in start..end {
        if !(x[i] > x[i - 1] && x[i] >= x[i + 1] && x[i] > threshold) {
            continue;
        }
        let lookback_from = last_index
            .unwrap_or(start)
            .max(i.saturating_sub(params.max_lookback))
            .max(start);
        let trough = x[lookback_from..=i]
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        let peak = Peak {
            index: i,
            amplitude: x[i] - trough,
        };
        if peak.amplitude < params.min_amplitude {
            continue;
        }

        match peaks.last_mut() {
            Some(prev) if i - prev.index < params.min_distance => {
                if x[i] > x[prev.index] {
                    *prev = peak;
                    last_index = Some(i);
                }
            }
            _ => {
                peaks.push(peak);
                last_index = Some(i);
            }
        }
    }
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f64::consts::PI;

    fn params() -> PeakParams {
        PeakParams {
            edge_guard: 10,
            min_distance: 4,
            max_lookback: 40,
            threshold_ratio: 0.1,
            min_amplitude: 0.0,
        }
    }

    fn point(cuff: f64, amp: f64, at: f64) -> EnvelopePoint {
        EnvelopePoint {
            cuff_mmhg: cuff,
            amplitude: amp,
            at_s: at,
        }
    }

    #[test]
    fn finds_every_cycle_of_a_sine() {
        let fs = 20.0;
        let x: Vec<f64> = (0..400)
            .map(|i| (2.0 * PI * 1.25 * i as f64 / fs).sin())
            .collect();
        let peaks = detect_peaks(&x, &params());
        // 20 s at 1.25 Hz = 25 cycles, minus the guarded ends.
        assert!((22..=25).contains(&peaks.len()), "got {}", peaks.len());
        for w in peaks.windows(2) {
            assert_eq!(w[1].index - w[0].index, 16);
        }
        for p in &peaks[1..] {
            assert!((p.amplitude - 2.0).abs() < 0.05);
        }
    }

    #[test]
    fn flat_signal_has_no_peaks() {
        assert!(detect_peaks(&[0.0; 100], &params()).is_empty());
        assert!(detect_peaks(&[1.0; 5], &params()).is_empty());
    }

    #[test]
    fn ripple_below_noise_floor_is_ignored() {
        let x: Vec<f64> = (0..400)
            .map(|i| 0.01 * (2.0 * PI * 1.25 * i as f64 / 20.0).sin())
            .collect();
        assert!(!detect_peaks(&x, &params()).is_empty());
        let floor = PeakParams {
            min_amplitude: 0.05,
            ..params()
        };
        assert!(detect_peaks(&x, &floor).is_empty());
    }

    #[test]
    fn close_peaks_keep_the_larger() {
        let mut x = vec![0.0; 60];
        x[20] = 1.0;
        x[22] = 3.0;
        let peaks = detect_peaks(&x, &params());
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 22);
    }

    #[test]
    fn new_clamps_pressure_to_running_min() {
        let env = OscillationEnvelope::new(vec![
            point(150.0, 1.0, 0.0),
            point(150.6, 1.0, 0.8),
            point(148.0, 1.0, 1.6),
        ]);
        assert!(env.is_non_increasing());
        assert_eq!(env.points()[1].cuff_mmhg, 150.0);
    }

    #[test]
    fn smoothing_averages_neighbours() {
        let env = OscillationEnvelope::new(vec![
            point(150.0, 0.0, 0.0),
            point(149.0, 3.0, 0.8),
            point(148.0, 0.0, 1.6),
        ]);
        let s = env.smoothed(3);
        assert!((s.points()[1].amplitude - 1.0).abs() < 1e-12);
        assert!((s.points()[0].amplitude - 1.5).abs() < 1e-12);
    }

    #[test]
    fn heart_rate_ignores_outlier_intervals() {
        let env = OscillationEnvelope::new(vec![
            point(150.0, 1.0, 0.0),
            point(149.0, 1.0, 1.0),
            point(148.0, 1.0, 2.0),
            point(140.0, 1.0, 6.0),
        ]);
        assert!((env.heart_rate_bpm().unwrap() - 60.0).abs() < 1e-9);
        assert_eq!(OscillationEnvelope::default().heart_rate_bpm(), None);
    }

    #[test]
    fn max_point_takes_first_on_tie() {
        let env = OscillationEnvelope::new(vec![
            point(150.0, 1.0, 0.0),
            point(149.0, 2.0, 0.8),
            point(148.0, 2.0, 1.6),
        ]);
        assert_eq!(env.max_point().map(|(i, _)| i), Some(1));
    }
}
