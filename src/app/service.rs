//! Measurement service — the hexagonal core.
//!
//! [`MeasurementService`] owns the FSM, safety supervisor, deflate-rate PID
//! and the session blackboard for **one** measurement.  All I/O flows
//! through port traits injected at call sites, making the entire service
//! testable against a simulated cuff.
//!
//! ```text
//!     AdcPort ──▶ ┌──────────────────────────┐ ──▶ EventSink
//!                 │    MeasurementService     │
//! ActuatorPort ◀──│  Safety · FSM · PID       │ ──▶ SessionShared
//!                 └──────────────────────────┘       (status, heartbeat)
//! ```
//!
//! One [`tick`](MeasurementService::tick) is one ADC conversion, so the
//! loop runs at the converter's output rate and reacts to cancel and
//! emergency flags once per sample.

use std::sync::Arc;

use log::{error, info, warn};

use crate::config::MeasurementConfig;
use crate::control::pid::PidController;
use crate::error::{AbortReason, SafetyFault};
use crate::fsm::context::{ActuatorCommands, FsmContext, ValveCommand};
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, StateId};
use crate::result::MeasurementResult;
use crate::safety::SafetySupervisor;
use crate::sensors::PressureSample;
use crate::session::{MeasurementSession, SessionHandle, SessionOutcome, SessionShared};

use super::events::AppEvent;
use super::ports::{ActuatorPort, AdcPort, EventSink};

/// Pressure smoothing ahead of the rate derivative (s).
const RATE_PRESSURE_TAU_S: f64 = 0.5;
/// Smoothing of the derivative itself (s).
const RATE_TAU_S: f64 = 1.0;
/// Interval between `Progress` events (µs).
const PROGRESS_INTERVAL_US: u64 = 1_000_000;

// ───────────────────────────────────────────────────────────────
// Deflation rate estimate
// ───────────────────────────────────────────────────────────────

/// Double-EMA estimate of the deflation rate (mmHg/s, positive while
/// pressure falls).  Heartbeat oscillations are mostly filtered out.
struct RateEstimator {
    last: Option<(u64, f64)>,
    rate: f64,
}

impl RateEstimator {
    const fn new() -> Self {
        Self {
            last: None,
            rate: 0.0,
        }
    }

    /// Seed the pressure smoother at its steady-state lag behind a ramp
    /// falling at `initial_rate`.
    fn reset(&mut self, initial_rate: f64, sample: &PressureSample) {
        self.last = Some((
            sample.timestamp_us,
            sample.pressure_mmhg + initial_rate * RATE_PRESSURE_TAU_S,
        ));
        self.rate = initial_rate;
    }

    /// Returns `(rate, dt_s)`, or `None` if no time has passed.
    fn update(&mut self, sample: &PressureSample) -> Option<(f64, f64)> {
        let Some((t, p)) = self.last else {
            self.last = Some((sample.timestamp_us, sample.pressure_mmhg));
            return None;
        };
        let dt = sample.timestamp_us.checked_sub(t).filter(|d| *d > 0)? as f64 / 1e6;
        let smoothed = p + (1.0 - (-dt / RATE_PRESSURE_TAU_S).exp()) * (sample.pressure_mmhg - p);
        let instant = (p - smoothed) / dt;
        self.rate += (1.0 - (-dt / RATE_TAU_S).exp()) * (instant - self.rate);
        self.last = Some((sample.timestamp_us, smoothed));
        Some((self.rate, dt))
    }
}

// ───────────────────────────────────────────────────────────────
// MeasurementService
// ───────────────────────────────────────────────────────────────

/// Orchestrates one inflate → deflate → analyze session.
pub struct MeasurementService {
    fsm: Fsm,
    ctx: FsmContext,
    safety: SafetySupervisor,
    /// Closed-loop trim of the valve duty around its feed-forward value.
    pid: PidController,
    rate: RateEstimator,
    shared: Arc<SessionShared>,
    /// Commands last written to the actuator port.
    applied: Option<ActuatorCommands>,
    last_progress_us: u64,
    tick_count: u64,
}

impl MeasurementService {
    /// Build a service for the session `handle`, started at `now_us`.
    ///
    /// Does **not** touch hardware; call [`start`](Self::start) next.
    pub fn new(
        config: MeasurementConfig,
        shared: Arc<SessionShared>,
        handle: SessionHandle,
        now_us: u64,
    ) -> Self {
        let session = MeasurementSession::new(
            handle,
            config.inflate_target_mmhg,
            config.deflate_rate_mmhg_per_s,
            now_us,
        );
        let ff = f32::from(config.deflate_feedforward_percent);
        let mut pid = PidController::new(
            config.deflate_kp,
            config.deflate_ki,
            config.deflate_kd,
            config.deflate_rate_mmhg_per_s as f32,
        );
        pid.set_limits(f32::from(config.deflate_min_percent) - ff, 100.0 - ff);

        let safety = SafetySupervisor::new(&config);
        let ctx = FsmContext::new(config, session);
        Self {
            fsm: Fsm::new(build_state_table(), StateId::Idle),
            ctx,
            safety,
            pid,
            rate: RateEstimator::new(),
            shared,
            applied: None,
            last_progress_us: now_us,
            tick_count: 0,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Enter `Inflating` and command the pump.
    ///
    /// A cancel or emergency release that arrived before the worker got
    /// here aborts straight from `Idle`: the pump is never started.
    pub fn start(&mut self, hw: &mut impl ActuatorPort, sink: &mut impl EventSink) {
        self.safety.reset();
        self.fsm.start(&mut self.ctx);

        let handle = self.ctx.session.handle;
        sink.emit(&AppEvent::SessionStarted {
            session: handle,
            target_mmhg: self.ctx.session.target_inflate_mmhg,
            rate_mmhg_per_s: self.ctx.session.deflate_rate_mmhg_per_s,
        });

        if self.latch_stop_requests() {
            let faults = self.safety.faults();
            self.ctx.fault_flags = faults;
            self.abort_on_faults(faults, sink);
            self.apply_actuators(hw);
            sink.emit(&AppEvent::StateChanged {
                from: StateId::Idle,
                to: StateId::Aborted,
            });
            if let Some(reason) = self.ctx.abort_reason {
                sink.emit(&AppEvent::Aborted(reason));
            }
            self.publish();
            warn!("Session {} stopped before inflation", handle.id());
            return;
        }

        self.fsm.force_transition(StateId::Inflating, &mut self.ctx);
        self.apply_actuators(hw);
        sink.emit(&AppEvent::StateChanged {
            from: StateId::Idle,
            to: StateId::Inflating,
        });
        self.publish();
        info!("Session {} started", handle.id());
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one control cycle: flags → read → safety → FSM → PID → actuators.
    ///
    /// The `hw` parameter satisfies **both** [`AdcPort`] and
    /// [`ActuatorPort`], which avoids a double mutable borrow while
    /// keeping the port boundary explicit.
    pub fn tick(&mut self, hw: &mut (impl AdcPort + ActuatorPort), sink: &mut impl EventSink) {
        let prev_state = self.fsm.current_state();
        if prev_state.is_terminal() {
            return;
        }
        self.tick_count += 1;

        // 1. Out-of-band requests
        let stop_requested = self.latch_stop_requests();

        // 2. Acquire via AdcPort (skipped once a stop is pending, and on
        //    the analysis tick: acquisition is over and the cuff is venting)
        let read = if stop_requested || prev_state == StateId::Analyzing {
            None
        } else {
            Some(hw.read_pressure(self.ctx.config.adc_timeout_ms))
        };
        let sample = match read {
            None => None,
            Some(Ok(s)) => {
                self.ctx.now_us = s.timestamp_us;
                self.ctx.pressure = s;
                Some(s)
            }
            Some(Err(e)) => {
                error!("ADC read failed mid-session: {e}");
                self.safety.latch_adc(e);
                None
            }
        };

        // 3. Safety evaluation
        let faults = self.safety.evaluate(sample.as_ref(), prev_state);
        self.ctx.fault_flags = faults;

        if faults != 0 {
            self.abort_on_faults(faults, sink);
        } else {
            // 4. FSM tick (pure state logic)
            self.fsm.tick(&mut self.ctx);
        }

        // 5. Deflate-rate regulation
        let new_state = self.fsm.current_state();
        if let Some(s) = sample.as_ref() {
            self.regulate_deflation(prev_state, new_state, s);
        }

        // 6. Apply actuator commands via ActuatorPort
        self.apply_actuators(hw);

        // 7. Events and shared status
        if new_state != prev_state {
            sink.emit(&AppEvent::StateChanged {
                from: prev_state,
                to: new_state,
            });
            match new_state {
                StateId::Result => {
                    if let Some(result) = &self.ctx.result {
                        sink.emit(&AppEvent::Completed(result.clone()));
                    }
                }
                StateId::Aborted => {
                    if let Some(reason) = self.ctx.abort_reason {
                        sink.emit(&AppEvent::Aborted(reason));
                    }
                }
                _ => {}
            }
        }
        self.publish();
        if self.ctx.now_us.saturating_sub(self.last_progress_us) >= PROGRESS_INTERVAL_US {
            self.last_progress_us = self.ctx.now_us;
            sink.emit(&AppEvent::Progress(self.shared.status()));
        }
    }

    // ── Queries ───────────────────────────────────────────────

    /// Current FSM state.
    pub fn state(&self) -> StateId {
        self.fsm.current_state()
    }

    /// `Result` or `Aborted` reached.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Terminal outcome, once finished.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        match (self.state(), &self.ctx.result) {
            (StateId::Result, Some(result)) => Some(Ok(result.clone())),
            (StateId::Result | StateId::Aborted, _) => Some(Err(self
                .ctx
                .abort_reason
                .unwrap_or(AbortReason::EmergencyReleased))),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&MeasurementResult> {
        self.ctx.result.as_ref()
    }

    pub fn session(&self) -> &MeasurementSession {
        &self.ctx.session
    }

    /// Active fault bitmask (0 = no faults).
    pub fn fault_flags(&self) -> u8 {
        self.ctx.fault_flags
    }

    /// Control ticks executed since `start`.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    // ── Internal ──────────────────────────────────────────────

    /// Latch pending cancel / emergency requests.  Returns `true` if any.
    fn latch_stop_requests(&mut self) -> bool {
        let mut stop = false;
        if self.shared.emergency_requested() {
            self.safety.latch(SafetyFault::EmergencyReleased);
            stop = true;
        }
        if self.shared.cancel_requested() {
            self.safety.latch(SafetyFault::UserCancelled);
            stop = true;
        }
        stop
    }

    /// Force `Aborted` with the highest-priority latched fault.
    fn abort_on_faults(&mut self, faults: u8, sink: &mut impl EventSink) {
        let reason = self
            .safety
            .abort_reason()
            .unwrap_or(AbortReason::EmergencyReleased);
        warn!("Safety fault! flags=0b{faults:08b}, aborting: {reason}");
        self.ctx.abort(reason);
        self.fsm.force_transition(StateId::Aborted, &mut self.ctx);
        sink.emit(&AppEvent::FaultDetected(faults));
    }

    fn publish(&self) {
        let elapsed = self.ctx.session.elapsed_secs(self.ctx.now_us);
        self.shared.publish(
            self.fsm.current_state(),
            self.ctx.pressure.pressure_mmhg,
            elapsed,
        );
        self.shared.beat((self.ctx.now_us / 1000) as u32);
    }

    /// PID on the measured deflation rate; trims the Deflate duty.
    fn regulate_deflation(&mut self, prev: StateId, now: StateId, sample: &PressureSample) {
        if now != StateId::DeflatingAcquiring {
            return;
        }
        if prev != StateId::DeflatingAcquiring {
            self.pid.reset();
            self.rate
                .reset(self.ctx.session.deflate_rate_mmhg_per_s, sample);
            return;
        }
        let Some((rate, dt)) = self.rate.update(sample) else {
            return;
        };
        let trim = self.pid.compute(rate as f32, dt as f32);
        let cfg = &self.ctx.config;
        let duty = (f32::from(cfg.deflate_feedforward_percent) + trim)
            .round()
            .clamp(f32::from(cfg.deflate_min_percent), 100.0) as u8;
        self.ctx.commands.valve = ValveCommand::Deflate(duty);
    }

    /// Translate FSM actuator commands into port calls, only on change.
    fn apply_actuators(&mut self, hw: &mut impl ActuatorPort) {
        let cmds = self.ctx.commands;
        let prev = self.applied;
        if prev == Some(cmds) {
            return;
        }

        // ── Emergency release: one call does it all ─────────
        if cmds.valve == ValveCommand::Release {
            if prev.map(|p| p.valve) != Some(ValveCommand::Release) {
                hw.emergency_release();
            }
            self.applied = Some(cmds);
            return;
        }

        // ── Pump off before the valve moves ──────────────────
        if !cmds.pump_on && prev.is_none_or(|p| p.pump_on) {
            hw.pump_off();
        }

        // ── Valve ────────────────────────────────────────────
        if prev.map(|p| p.valve) != Some(cmds.valve) {
            match cmds.valve {
                ValveCommand::Closed => hw.valve_close(),
                ValveCommand::Deflate(percent) => hw.valve_open(percent),
                ValveCommand::Vent => hw.valve_open(100),
                ValveCommand::Release => {}
            }
        }

        // ── Pump on only against a sealed valve ──────────────
        if cmds.pump_on && prev.is_none_or(|p| !p.pump_on) {
            hw.pump_on();
        }

        self.applied = Some(cmds);
    }
}
