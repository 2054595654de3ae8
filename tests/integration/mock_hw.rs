//! Simulated cuff for integration tests.
//!
//! [`SimCuff`] stands in for the whole pneumatic loop: a pump that raises
//! pressure at a fixed rate, a valve whose flow scales with percent open,
//! a normally-open release path, and a patient whose arterial pulses ride
//! on the cuff pressure.  Every port call is recorded so tests can assert
//! on the full command history.
//!
//! Time is virtual: each ADC read advances the clock by one sample period
//! (20 SPS), so a full session runs in milliseconds.
//!
//! [`Monitor`] shares the same state and is handed to the engine as its
//! emergency vent and clock, and to the test for inspection.

#![allow(dead_code)]

use std::f64::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use nibp::app::events::AppEvent;
use nibp::app::ports::{ActuatorPort, AdcPort, EmergencyPort, EventSink, TimePort};
use nibp::error::AdcError;
use nibp::sensors::{CalibrationProfile, RawSample};

/// One conversion every 50 ms.
pub const SAMPLE_PERIOD_US: u64 = 50_000;
/// Pump inflation rate against a sealed valve (mmHg/s).
pub const PUMP_RATE_MMHG_PER_S: f64 = 20.0;
/// Valve flow per percent open (mmHg/s).
pub const VALVE_RATE_PER_PERCENT: f64 = 0.1;
/// Venting time constant with the coil released (s).
const RELEASE_TAU_S: f64 = 0.5;

// ── Call record ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Call {
    /// Pressure reported by the ADC (mmHg, including pulses).
    Read(f64),
    PumpOn,
    PumpOff,
    ValveOpen(u8),
    ValveClose,
    EmergencyRelease,
    /// Out-of-band vent through the emergency port.
    Vent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Valve {
    Closed,
    Open(u8),
    Released,
}

// ── Patient ───────────────────────────────────────────────────

/// Oscillation envelope of a synthetic patient: two half-Gaussians around
/// MAP, shaped so the amplitude is 55 % of peak at SYS and 80 % at DIA.
#[derive(Debug, Clone, Copy)]
pub struct Patient {
    pub systolic: f64,
    pub diastolic: f64,
    pub map: f64,
    pub heart_rate_hz: f64,
    /// Peak oscillation amplitude (mmHg, zero to peak).
    pub amplitude_mmhg: f64,
}

impl Patient {
    /// 120/80, HR 72.
    pub fn normal() -> Self {
        Self {
            systolic: 120.0,
            diastolic: 80.0,
            map: 93.0,
            heart_rate_hz: 1.2,
            amplitude_mmhg: 1.0,
        }
    }

    /// No detectable pulse (e.g. a cuff left off the arm).
    pub fn pulseless() -> Self {
        Self {
            amplitude_mmhg: 0.0,
            ..Self::normal()
        }
    }

    pub fn amplitude_at(&self, cuff_mmhg: f64) -> f64 {
        let (edge, level) = if cuff_mmhg >= self.map {
            (self.systolic, 0.55_f64)
        } else {
            (self.diastolic, 0.80_f64)
        };
        let sigma = (edge - self.map).abs() / (-2.0 * level.ln()).sqrt();
        self.amplitude_mmhg * (-0.5 * ((cuff_mmhg - self.map) / sigma).powi(2)).exp()
    }
}

// ── Scripted faults ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fault {
    None,
    /// Pressure jumps to `to_mmhg` once inflation passes `at_mmhg`.
    Spike { at_mmhg: f64, to_mmhg: f64 },
    /// Valve sticks `after_s` into deflation for `for_s` seconds.
    StuckValve { after_s: f64, for_s: f64 },
    /// Every read after the first `after_reads` times out.
    AdcDead { after_reads: usize },
    /// Pump too weak to reach target in time (mmHg/s).
    WeakPump { rate: f64 },
    /// Valve flow scaled by `factor`.
    SlowValve { factor: f64 },
}

// ── Shared state ──────────────────────────────────────────────

struct Sim {
    patient: Patient,
    fault: Fault,
    /// Transducer truth: how pressure maps to counts.
    truth: CalibrationProfile,
    t_us: u64,
    pressure: f64,
    pump_on: bool,
    valve: Valve,
    deflate_started_us: Option<u64>,
    spiked: bool,
    reads: usize,
    calls: Vec<Call>,
    hold_at: Option<usize>,
    held: bool,
}

impl Sim {
    fn step(&mut self) {
        let dt = SAMPLE_PERIOD_US as f64 / 1e6;
        self.t_us += SAMPLE_PERIOD_US;

        let stuck = match (self.fault, self.deflate_started_us) {
            (Fault::StuckValve { after_s, for_s }, Some(t0)) => {
                let into = (self.t_us - t0) as f64 / 1e6;
                into >= after_s && into < after_s + for_s
            }
            _ => false,
        };
        let flow = match self.fault {
            Fault::SlowValve { factor } => factor,
            _ => 1.0,
        };
        match self.valve {
            Valve::Closed => {}
            Valve::Open(_) if stuck => {}
            Valve::Open(pct) => {
                self.pressure -= VALVE_RATE_PER_PERCENT * flow * f64::from(pct) * dt;
            }
            Valve::Released => self.pressure *= (-dt / RELEASE_TAU_S).exp(),
        }
        if self.pump_on {
            let rate = match self.fault {
                Fault::WeakPump { rate } => rate,
                _ => PUMP_RATE_MMHG_PER_S,
            };
            self.pressure += rate * dt;
        }
        self.pressure = self.pressure.max(0.0);

        if let Fault::Spike { at_mmhg, to_mmhg } = self.fault {
            if !self.spiked && self.pump_on && self.pressure >= at_mmhg {
                self.pressure = to_mmhg;
                self.spiked = true;
            }
        }
    }

    fn measured(&self) -> f64 {
        let t = self.t_us as f64 / 1e6;
        let pulse = self.patient.amplitude_at(self.pressure)
            * (2.0 * PI * self.patient.heart_rate_hz * t).sin();
        self.pressure + pulse
    }
}

fn lock(sim: &Mutex<Sim>) -> MutexGuard<'_, Sim> {
    sim.lock().unwrap()
}

// ── SimCuff (AdcPort + ActuatorPort) ──────────────────────────

pub struct SimCuff {
    sim: Arc<Mutex<Sim>>,
    /// Calibration the engine believes in.
    cal: CalibrationProfile,
}

impl SimCuff {
    pub fn new(patient: Patient) -> Self {
        Self::with_fault(patient, Fault::None)
    }

    pub fn with_fault(patient: Patient, fault: Fault) -> Self {
        let sim = Sim {
            patient,
            fault,
            truth: CalibrationProfile::default(),
            t_us: 0,
            pressure: 0.0,
            pump_on: false,
            valve: Valve::Released,
            deflate_started_us: None,
            spiked: false,
            reads: 0,
            calls: Vec::new(),
            hold_at: None,
            held: false,
        };
        Self {
            sim: Arc::new(Mutex::new(sim)),
            cal: CalibrationProfile::default(),
        }
    }

    /// Shift the transducer zero: a vented cuff reads `counts`.
    pub fn with_zero_counts(self, counts: i32) -> Self {
        {
            let mut s = lock(&self.sim);
            s.truth = s.truth.with_zero(counts);
        }
        self
    }

    pub fn monitor(&self) -> Monitor {
        Monitor {
            sim: self.sim.clone(),
        }
    }

    fn wait_if_held(&self) {
        loop {
            {
                let mut s = lock(&self.sim);
                if s.hold_at != Some(s.reads) {
                    s.held = false;
                    return;
                }
                s.held = true;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl AdcPort for SimCuff {
    fn read_raw(&mut self, _timeout_ms: u32) -> Result<RawSample, AdcError> {
        self.wait_if_held();
        let mut s = lock(&self.sim);
        s.step();
        if let Fault::AdcDead { after_reads } = s.fault {
            if s.reads >= after_reads {
                return Err(AdcError::Timeout);
            }
        }
        s.reads += 1;
        let measured = s.measured();
        s.calls.push(Call::Read(measured));
        Ok(RawSample {
            counts: s.truth.mmhg_to_counts(measured),
            timestamp_us: s.t_us,
        })
    }

    fn calibration(&self) -> &CalibrationProfile {
        &self.cal
    }

    fn calibrate(&mut self, profile: CalibrationProfile) {
        self.cal = profile;
    }
}

impl ActuatorPort for SimCuff {
    fn pump_on(&mut self) {
        let mut s = lock(&self.sim);
        s.pump_on = true;
        s.calls.push(Call::PumpOn);
    }

    fn pump_off(&mut self) {
        let mut s = lock(&self.sim);
        s.pump_on = false;
        s.calls.push(Call::PumpOff);
    }

    fn valve_open(&mut self, percent: u8) {
        let mut s = lock(&self.sim);
        let percent = percent.min(100);
        s.valve = if percent == 0 {
            Valve::Closed
        } else {
            Valve::Open(percent)
        };
        if percent > 0 && percent < 100 && s.deflate_started_us.is_none() {
            s.deflate_started_us = Some(s.t_us);
        }
        s.calls.push(Call::ValveOpen(percent));
    }

    fn valve_close(&mut self) {
        let mut s = lock(&self.sim);
        s.valve = Valve::Closed;
        s.calls.push(Call::ValveClose);
    }

    fn emergency_release(&mut self) {
        let mut s = lock(&self.sim);
        s.pump_on = false;
        s.valve = Valve::Released;
        s.calls.push(Call::EmergencyRelease);
    }
}

// ── Monitor (EmergencyPort + TimePort + inspection) ─────────────

#[derive(Clone)]
pub struct Monitor {
    sim: Arc<Mutex<Sim>>,
}

impl Monitor {
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.sim).calls.clone()
    }

    pub fn reads(&self) -> usize {
        lock(&self.sim).reads
    }

    pub fn pressure(&self) -> f64 {
        lock(&self.sim).pressure
    }

    pub fn valve(&self) -> Valve {
        lock(&self.sim).valve
    }

    pub fn pump_running(&self) -> bool {
        lock(&self.sim).pump_on
    }

    /// Block the next read once `reads` conversions have been served.
    pub fn hold_at(&self, reads: usize) {
        lock(&self.sim).hold_at = Some(reads);
    }

    /// Spin until the worker is parked on the hold.
    pub fn wait_held(&self) {
        while !lock(&self.sim).held {
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn release(&self) {
        lock(&self.sim).hold_at = None;
    }

    /// Move virtual time forward without sampling.
    pub fn advance(&self, us: u64) {
        lock(&self.sim).t_us += us;
    }

    pub fn count(&self, call: Call) -> usize {
        lock(&self.sim).calls.iter().filter(|c| **c == call).count()
    }
}

impl EmergencyPort for Monitor {
    fn vent(&self) {
        let mut s = lock(&self.sim);
        s.pump_on = false;
        s.valve = Valve::Released;
        s.calls.push(Call::Vent);
    }
}

impl TimePort for Monitor {
    fn uptime_us(&self) -> u64 {
        lock(&self.sim).t_us
    }
}

// ── RecordingSink ─────────────────────────────────────────────

/// Event sink whose history stays readable after the engine takes it.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<AppEvent>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<AppEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
