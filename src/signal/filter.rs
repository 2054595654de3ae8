//! Detrending and zero-phase biquad band-pass filtering.
//!
//! The band-pass is the RBJ constant-0-dB-peak design:
//!
//! ```text
//!   f0 = sqrt(f_lo * f_hi)      Q = f0 / (f_hi - f_lo)
//!   w0 = 2π f0 / fs             α = sin(w0) / 2Q
//!   b = [α, 0, -α] / (1 + α)    a = [1, -2cos(w0), 1 - α] / (1 + α)
//! ```
//!
//! Run forward and backward ([`filtfilt`]) it has zero phase, so each
//! filtered peak lines up in time with the cuff pressure it came from.

use core::f64::consts::PI;

/// Remove the least-squares straight line from `x`.
pub fn detrend(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let nf = n as f64;
    let mean_i = (nf - 1.0) / 2.0;
    let mean_x = x.iter().sum::<f64>() / nf;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, &v) in x.iter().enumerate() {
        let di = i as f64 - mean_i;
        sxy += di * (v - mean_x);
        sxx += di * di;
    }
    let slope = sxy / sxx;
    x.iter()
        .enumerate()
        .map(|(i, &v)| v - (mean_x + slope * (i as f64 - mean_i)))
        .collect()
}

/// Second-order IIR section, transposed direct form II, `a0` normalised to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    /// Band-pass between `low_hz` and `high_hz`.  `None` when the band does
    /// not fit below Nyquist.
    pub fn bandpass(low_hz: f64, high_hz: f64, fs: f64) -> Option<Self> {
        if !(low_hz > 0.0 && high_hz > low_hz) {
            return None;
        }
        let f0 = (low_hz * high_hz).sqrt();
        Self::resonator(f0, f0 / (high_hz - low_hz), fs)
    }

    /// Band-pass centred on `f0` with quality factor `q`.
    pub fn resonator(f0: f64, q: f64, fs: f64) -> Option<Self> {
        if !(fs > 0.0 && f0 > 0.0 && f0 < fs / 2.0 && q > 0.0) {
            return None;
        }
        let w0 = 2.0 * PI * f0 / fs;
        let alpha = w0.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;
        Some(Self {
            b0: alpha / a0,
            b1: 0.0,
            b2: -alpha / a0,
            a1: -2.0 * w0.cos() / a0,
            a2: (1.0 - alpha) / a0,
        })
    }

    /// Initial state that makes the filter look as if `x0` had been
    /// applied forever.
    fn steady_state(&self, x0: f64) -> (f64, f64) {
        let g = (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2);
        let z2 = (self.b2 - self.a2 * g) * x0;
        let z1 = (self.b1 - self.a1 * g) * x0 + z2;
        (z1, z2)
    }

    /// Single forward pass starting from state `(z1, z2)`.
    pub fn run(&self, x: &[f64], (mut z1, mut z2): (f64, f64)) -> Vec<f64> {
        let mut y = Vec::with_capacity(x.len());
        for &v in x {
            let out = self.b0 * v + z1;
            z1 = self.b1 * v - self.a1 * out + z2;
            z2 = self.b2 * v - self.a2 * out;
            y.push(out);
        }
        y
    }

    /// Magnitude response at `f` Hz (single pass).
    pub fn gain_at(&self, f: f64, fs: f64) -> f64 {
        let w = 2.0 * PI * f / fs;
        let (c1, s1, c2, s2) = (w.cos(), w.sin(), (2.0 * w).cos(), (2.0 * w).sin());
        let (nr, ni) = (
            self.b0 + self.b1 * c1 + self.b2 * c2,
            -(self.b1 * s1 + self.b2 * s2),
        );
        let (dr, di) = (1.0 + self.a1 * c1 + self.a2 * c2, -(self.a1 * s1 + self.a2 * s2));
        ((nr * nr + ni * ni) / (dr * dr + di * di)).sqrt()
    }
}

/// Zero-phase filtering: odd-reflection padding of `pad` samples at each
/// end, steady-state initial conditions, forward pass, backward pass.
pub fn filtfilt(filter: &Biquad, x: &[f64], pad: usize) -> Vec<f64> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }
    let pad = pad.min(n - 1);
    let (first, last) = (x[0], x[n - 1]);

    let mut ext = Vec::with_capacity(n + 2 * pad);
    ext.extend((1..=pad).rev().map(|i| 2.0 * first - x[i]));
    ext.extend_from_slice(x);
    ext.extend((1..=pad).map(|i| 2.0 * last - x[n - 1 - i]));

    let mut y = filter.run(&ext, filter.steady_state(ext[0]));
    y.reverse();
    let mut y = filter.run(&y, filter.steady_state(y[0]));
    y.reverse();

    y.drain(..pad);
    y.truncate(n);
    y
}
