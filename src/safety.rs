//! Safety supervisor.
//!
//! The supervisor runs **every tick before the FSM** and accumulates a
//! fault bitmask in `FsmContext.fault_flags`.  Any set bit makes the
//! service force the FSM into `Aborted`, whose `on_enter` commands
//! `emergency_release()`.
//!
//! ## Fault lifecycle
//!
//! 1. A condition triggers a fault (pressure over the soft ceiling, a
//!    stalled deflation, an ADC failure, an external stop).
//! 2. The supervisor sets the corresponding bit.  Bits are **latched**
//!    for the rest of the session: a cuff that went over pressure once is
//!    not trusted again until a new session resets the supervisor.
//! 3. [`SafetySupervisor::abort_reason`] picks the reason to report when
//!    several faults are active, by [`SafetyFault::PRIORITY`].

use heapless::Deque;
use log::{error, info};

use crate::config::MeasurementConfig;
use crate::error::{AbortReason, AdcError, SafetyFault};
use crate::fsm::StateId;
use crate::sensors::PressureSample;

/// Smoothing time constant of the pressure fed to stall detection (s).
const STALL_SMOOTHING_TAU_S: f64 = 0.5;

/// History slots for the rolling stall window.
const STALL_HISTORY: usize = 512;

/// Entries recorded per stall window; the rest of the deque is headroom.
const STALL_HISTORY_STEPS: u64 = 400;

/// Safety supervisor.
pub struct SafetySupervisor {
    ceiling_mmhg: f64,
    stall_window_us: u64,
    stall_threshold_mmhg: f64,
    /// Minimum spacing between history entries.
    history_spacing_us: u64,
    /// Latched fault bitmask.
    faults: u8,
    /// First ADC failure, reported with `AdcFault`.
    adc_error: Option<AdcError>,
    /// Smoothed pressure and the time of its last update.
    smoothed: Option<(u64, f64)>,
    /// `(timestamp_us, smoothed_mmhg)` over the last stall window.
    history: Deque<(u64, f64), STALL_HISTORY>,
}

impl SafetySupervisor {
    pub fn new(config: &MeasurementConfig) -> Self {
        let stall_window_us = (config.stall_window_secs * 1e6) as u64;
        Self {
            ceiling_mmhg: config.soft_ceiling_mmhg,
            stall_window_us,
            stall_threshold_mmhg: config.stall_threshold_mmhg,
            history_spacing_us: (stall_window_us / STALL_HISTORY_STEPS).max(1),
            faults: 0,
            adc_error: None,
            smoothed: None,
            history: Deque::new(),
        }
    }

    /// Clear all latched faults and stall history.  Called at session start.
    pub fn reset(&mut self) {
        if self.faults != 0 {
            info!("SAFETY FAULTS CLEARED: {:#04x}", self.faults);
        }
        self.faults = 0;
        self.adc_error = None;
        self.smoothed = None;
        self.history.clear();
    }

    /// Latch a fault raised outside [`evaluate`](Self::evaluate)
    /// (cancel, emergency release).
    pub fn latch(&mut self, fault: SafetyFault) {
        self.set_fault(fault);
    }

    /// Latch `AdcFault`, remembering the first failure for the abort reason.
    pub fn latch_adc(&mut self, e: AdcError) {
        self.adc_error.get_or_insert(e);
        self.set_fault(SafetyFault::AdcFault);
    }

    /// Evaluate all safety conditions against the latest sample.
    /// `None` means no sample this tick (the read failed).
    /// Returns the updated fault bitmask.
    pub fn evaluate(&mut self, sample: Option<&PressureSample>, state: StateId) -> u8 {
        let Some(sample) = sample else {
            return self.faults;
        };

        // ── Soft ceiling ──────────────────────────────────────────
        if sample.pressure_mmhg > self.ceiling_mmhg {
            self.set_fault(SafetyFault::OverPressure);
        }

        // ── Stall (controlled deflation only) ────────────────────
        if state == StateId::DeflatingAcquiring {
            if self.is_stalled(sample) {
                self.set_fault(SafetyFault::DeflationStalled);
            }
        } else {
            self.smoothed = None;
            self.history.clear();
        }

        self.faults
    }

    /// Current fault bitmask.
    pub fn faults(&self) -> u8 {
        self.faults
    }

    /// True if **any** fault is active.
    pub fn has_faults(&self) -> bool {
        self.faults != 0
    }

    /// Check if a specific fault is active.
    pub fn has_fault(&self, fault: SafetyFault) -> bool {
        self.faults & fault.mask() != 0
    }

    /// Highest-priority abort reason for the active faults.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        SafetyFault::PRIORITY
            .iter()
            .find(|f| self.has_fault(**f))
            .map(|f| match f {
                SafetyFault::EmergencyReleased => AbortReason::EmergencyReleased,
                SafetyFault::OverPressure => AbortReason::OverPressure,
                SafetyFault::AdcFault => {
                    AbortReason::HardwareFault(self.adc_error.unwrap_or(AdcError::Timeout))
                }
                SafetyFault::DeflationStalled => AbortReason::DeflationStalled,
                SafetyFault::UserCancelled => AbortReason::UserCancelled,
            })
    }

    // ── Internal ──────────────────────────────────────────────────

    fn set_fault(&mut self, fault: SafetyFault) {
        if self.faults & fault.mask() == 0 {
            error!("SAFETY FAULT SET: {fault}");
        }
        self.faults |= fault.mask();
    }

    /// Feed one sample into the smoothed stall window.  True once a full
    /// window has elapsed with less than the threshold of change.
    fn is_stalled(&mut self, sample: &PressureSample) -> bool {
        let now = sample.timestamp_us;
        let value = match self.smoothed {
            None => sample.pressure_mmhg,
            Some((t, prev)) => {
                let dt = now.saturating_sub(t) as f64 / 1e6;
                let alpha = 1.0 - (-dt / STALL_SMOOTHING_TAU_S).exp();
                prev + alpha * (sample.pressure_mmhg - prev)
            }
        };
        self.smoothed = Some((now, value));

        let due = self
            .history
            .back()
            .is_none_or(|&(t, _)| now.saturating_sub(t) >= self.history_spacing_us);
        if due {
            if self.history.is_full() {
                self.history.pop_front();
            }
            let _ = self.history.push_back((now, value));
        }

        // Keep exactly one entry at or before the window start.
        let window_start = now.saturating_sub(self.stall_window_us);
        while self
            .history
            .iter()
            .nth(1)
            .is_some_and(|&(t, _)| t <= window_start)
        {
            self.history.pop_front();
        }

        match self.history.front() {
            Some(&(t0, p0)) if now.saturating_sub(t0) >= self.stall_window_us => {
                (p0 - value).abs() < self.stall_threshold_mmhg
            }
            _ => false,
        }
    }
}
