//! Caller-facing measurement API and worker lifecycle.
//!
//! ```text
//!   caller thread                         worker (APP core)
//!   ─────────────                         ─────────────────
//!   start_measurement() ──spawn──────────▶ MeasurementService
//!   poll_status() ◀──── SessionShared ◀─── publish() every sample
//!   cancel() ─────────▶ cancel flag ─────▶ abort on next tick
//!   EmergencyStop ──vent()──▶ hardware      (no worker needed)
//!                 └──flag──▶ emergency ──▶ abort on next tick
//!   wait_for_outcome() ◀──── join ◀─────── (hw, sink, outcome)
//! ```
//!
//! The worker owns the hardware for the whole session and hands it back
//! through its join handle, so exactly one session can drive the cuff.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use log::{error, info, warn};

use crate::config::MeasurementConfig;
use crate::drivers::task_pin::{Core, spawn_on_core};
use crate::error::{AbortReason, ConfigError, EngineError};
use crate::sensors::CalibrationProfile;
use crate::session::{SessionHandle, SessionOutcome, SessionShared, SessionStatus};

use super::ports::{ActuatorPort, AdcPort, EmergencyPort, EventSink, TimePort};
use super::service::MeasurementService;

/// Worker task priority (FreeRTOS).
const WORKER_PRIORITY: u8 = 10;
/// Worker stack.  The service carries the stall history inline (8 KB);
/// the signal pipeline allocates on the heap.
const WORKER_STACK_KB: usize = 48;

/// Completion callback, fired exactly once per session from the worker.
pub type CompletionFn = Arc<dyn Fn(SessionOutcome) + Send + Sync>;

type WorkerOutput<H, S> = (H, S, SessionOutcome);

// ───────────────────────────────────────────────────────────────
// EmergencyStop
// ───────────────────────────────────────────────────────────────

/// Cloneable emergency-release handle for UI and watchdog threads.
#[derive(Clone)]
pub struct EmergencyStop {
    shared: Arc<SessionShared>,
    port: Arc<dyn EmergencyPort>,
}

impl EmergencyStop {
    /// Vent the cuff now, then tell the worker to abort.
    ///
    /// Only the first call per session actuates anything; a session that
    /// already ended is left alone.
    pub fn trigger(&self) {
        if self.shared.state().is_terminal() {
            return;
        }
        if !self.shared.latch_release() {
            return;
        }
        warn!("EMERGENCY RELEASE");
        self.port.vent();
        self.shared.request_emergency();
    }
}

// ───────────────────────────────────────────────────────────────
// MeasurementEngine
// ───────────────────────────────────────────────────────────────

enum Slot<H, S> {
    /// Hardware parked, no session running.
    Ready { hw: H, sink: S },
    /// A worker owns the hardware.
    Running {
        handle: SessionHandle,
        join: JoinHandle<Option<WorkerOutput<H, S>>>,
    },
    /// The worker died and took the hardware with it.
    Lost,
}

/// Single-cuff measurement engine.
pub struct MeasurementEngine<H, S>
where
    H: AdcPort + ActuatorPort + Send + 'static,
    S: EventSink + Send + 'static,
{
    config: MeasurementConfig,
    slot: Slot<H, S>,
    shared: Arc<SessionShared>,
    emergency: EmergencyStop,
    clock: Arc<dyn TimePort + Send + Sync>,
    on_complete: Option<CompletionFn>,
    next_id: u32,
    /// Outcome of the most recently joined session.
    last: Option<(SessionHandle, SessionOutcome)>,
}

impl<H, S> MeasurementEngine<H, S>
where
    H: AdcPort + ActuatorPort + Send + 'static,
    S: EventSink + Send + 'static,
{
    /// Validate `config` once and take ownership of the hardware.
    pub fn new(
        config: MeasurementConfig,
        mut hw: H,
        sink: S,
        emergency: Arc<dyn EmergencyPort>,
        clock: Arc<dyn TimePort + Send + Sync>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        hw.calibrate(config.calibration);
        let shared = Arc::new(SessionShared::new());
        info!(
            "Engine ready: target {:.0} mmHg, deflate {:.1} mmHg/s, ceiling {:.0} mmHg",
            config.inflate_target_mmhg, config.deflate_rate_mmhg_per_s, config.soft_ceiling_mmhg
        );
        Ok(Self {
            config,
            slot: Slot::Ready { hw, sink },
            emergency: EmergencyStop {
                shared: shared.clone(),
                port: emergency,
            },
            shared,
            clock,
            on_complete: None,
            next_id: 1,
            last: None,
        })
    }

    /// Register the completion callback for future sessions.
    pub fn set_on_complete(&mut self, f: CompletionFn) {
        self.on_complete = Some(f);
    }

    // ── Session control ───────────────────────────────────────

    /// Start a session with per-session target and deflate rate.
    pub fn start_measurement(
        &mut self,
        target_inflate_mmhg: f64,
        deflate_rate_mmhg_per_s: f64,
    ) -> Result<SessionHandle, EngineError> {
        let config = self
            .config
            .for_session(target_inflate_mmhg, deflate_rate_mmhg_per_s)?;
        self.reclaim(false)?;
        let Slot::Ready { hw, sink } = std::mem::replace(&mut self.slot, Slot::Lost) else {
            return Err(EngineError::WorkerPanicked);
        };

        let handle = SessionHandle::new(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.shared.begin(handle);

        let (tx, rx) = mpsc::sync_channel::<(H, S)>(1);
        let shared = self.shared.clone();
        let on_complete = self.on_complete.clone();
        let started_at_us = self.clock.uptime_us();

        let spawned = spawn_on_core(Core::App, WORKER_PRIORITY, WORKER_STACK_KB, "nibp\0", move || {
            let (mut hw, mut sink) = rx.recv().ok()?;
            let mut svc = MeasurementService::new(config, shared, handle, started_at_us);
            svc.start(&mut hw, &mut sink);
            while !svc.is_finished() {
                svc.tick(&mut hw, &mut sink);
            }
            let outcome = svc
                .outcome()
                .unwrap_or(Err(AbortReason::EmergencyReleased));
            if let Some(cb) = on_complete {
                cb(outcome.clone());
            }
            Some((hw, sink, outcome))
        });

        let join = match spawned {
            Ok(join) => join,
            Err(e) => {
                error!("Worker spawn failed: {e}");
                self.slot = Slot::Ready { hw, sink };
                return Err(EngineError::WorkerSpawn);
            }
        };
        if let Err(mpsc::SendError((hw, sink))) = tx.send((hw, sink)) {
            error!("Worker exited before taking the hardware");
            self.slot = Slot::Ready { hw, sink };
            return Err(EngineError::WorkerSpawn);
        }

        self.slot = Slot::Running { handle, join };
        info!(
            "Measurement {} requested: {target_inflate_mmhg:.0} mmHg, {deflate_rate_mmhg_per_s:.1} mmHg/s",
            handle.id()
        );
        Ok(handle)
    }

    /// Ask the worker to abort `handle` with `UserCancelled`.
    ///
    /// Calling it again, or after the session ended, changes nothing.
    pub fn cancel(&self, handle: SessionHandle) -> Result<(), EngineError> {
        self.check_handle(handle)?;
        if self.shared.state().is_terminal() {
            return Ok(());
        }
        if !self.shared.cancel_requested() {
            info!("Cancel requested for session {}", handle.id());
        }
        self.shared.request_cancel();
        Ok(())
    }

    /// Vent the cuff from the calling thread, then abort the session.
    pub fn emergency_release(&self) {
        self.emergency.trigger();
    }

    /// Handle for threads that must be able to vent without the engine.
    pub fn emergency_handle(&self) -> EmergencyStop {
        self.emergency.clone()
    }

    // ── Queries ───────────────────────────────────────────────

    /// Cheap, lock-free progress snapshot.
    pub fn poll_status(&self, handle: SessionHandle) -> Result<SessionStatus, EngineError> {
        self.check_handle(handle)?;
        Ok(self.shared.status())
    }

    /// True while a worker is still driving the cuff.
    pub fn is_busy(&self) -> bool {
        matches!(&self.slot, Slot::Running { join, .. } if !join.is_finished())
    }

    /// Shared status block (for the session watchdog).
    pub fn shared(&self) -> Arc<SessionShared> {
        self.shared.clone()
    }

    /// Block until `handle` reaches a terminal state.
    pub fn wait_for_outcome(&mut self, handle: SessionHandle) -> Result<SessionOutcome, EngineError> {
        self.check_handle(handle)?;
        self.reclaim(true)?;
        match &self.last {
            Some((h, outcome)) if *h == handle => Ok(outcome.clone()),
            _ => Err(EngineError::StaleHandle),
        }
    }

    // ── Idle-only operations ──────────────────────────────────

    /// Replace the calibration profile.  Refused while a session runs.
    pub fn recalibrate(&mut self, profile: CalibrationProfile) -> Result<(), EngineError> {
        profile.validate()?;
        let hw = self.idle_hw()?;
        hw.calibrate(profile);
        self.config.calibration = profile;
        info!(
            "Calibration updated: offset {} counts, {:.3e} mmHg/count{}",
            profile.offset_counts,
            profile.slope_mmhg_per_count,
            if profile.inverted { ", inverted" } else { "" }
        );
        Ok(())
    }

    /// Zero the transducer: average `samples` raw conversions with the
    /// cuff vented and move the offset there.
    pub fn tare(&mut self, samples: usize) -> Result<CalibrationProfile, EngineError> {
        if samples == 0 {
            return Err(ConfigError::ValidationFailed("tare needs at least one sample").into());
        }
        let timeout_ms = self.config.adc_timeout_ms;
        let hw = self.idle_hw()?;
        hw.valve_open(100);
        let mut sum = 0_i64;
        for _ in 0..samples {
            sum += i64::from(hw.read_raw(timeout_ms)?.counts);
        }
        let zero = (sum as f64 / samples as f64).round() as i32;
        let profile = hw.calibration().with_zero(zero);
        hw.calibrate(profile);
        self.config.calibration = profile;
        info!("Tare: zero at {zero} counts over {samples} samples");
        Ok(profile)
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    // ── Internal ──────────────────────────────────────────────

    fn check_handle(&self, handle: SessionHandle) -> Result<(), EngineError> {
        if handle.id() == self.shared.session_id() {
            Ok(())
        } else {
            Err(EngineError::StaleHandle)
        }
    }

    fn idle_hw(&mut self) -> Result<&mut H, EngineError> {
        self.reclaim(false)?;
        match &mut self.slot {
            Slot::Ready { hw, .. } => Ok(hw),
            Slot::Running { .. } => Err(EngineError::Busy),
            Slot::Lost => Err(EngineError::WorkerPanicked),
        }
    }

    /// Take the hardware back from a finished worker.  With `block`,
    /// waits for a running one.
    fn reclaim(&mut self, block: bool) -> Result<(), EngineError> {
        match std::mem::replace(&mut self.slot, Slot::Lost) {
            Slot::Ready { hw, sink } => {
                self.slot = Slot::Ready { hw, sink };
                Ok(())
            }
            Slot::Running { handle, join } if !block && !join.is_finished() => {
                self.slot = Slot::Running { handle, join };
                Err(EngineError::Busy)
            }
            Slot::Running { handle, join } => match join.join() {
                Ok(Some((hw, sink, outcome))) => {
                    self.last = Some((handle, outcome));
                    self.slot = Slot::Ready { hw, sink };
                    Ok(())
                }
                Ok(None) | Err(_) => {
                    error!("Measurement worker for session {} died", handle.id());
                    Err(EngineError::WorkerPanicked)
                }
            },
            Slot::Lost => Err(EngineError::WorkerPanicked),
        }
    }
}

impl<H, S> Drop for MeasurementEngine<H, S>
where
    H: AdcPort + ActuatorPort + Send + 'static,
    S: EventSink + Send + 'static,
{
    fn drop(&mut self) {
        if let Slot::Running { join, .. } = std::mem::replace(&mut self.slot, Slot::Lost) {
            self.shared.request_cancel();
            let _ = join.join();
        }
    }
}
