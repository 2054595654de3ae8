//! Measurement session data and the lock-free status block shared between
//! the worker and the caller-facing API.
//!
//! ```text
//!   worker ──publish()──▶ SessionShared ◀──status()── poll_status()
//!          ◀─flags()────               ◀──request_cancel()/emergency
//! ```
//!
//! All fields are 32-bit atomics so the block works on cores without
//! native 64-bit atomics.

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use crate::error::AbortReason;
use crate::fsm::StateId;
use crate::result::MeasurementResult;
use crate::sensors::PressureSample;

/// Terminal outcome handed to `on_complete`.
pub type SessionOutcome = Result<MeasurementResult, AbortReason>;

/// Opaque identifier for one measurement request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u32);

impl SessionHandle {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }
}

/// Cheap progress snapshot for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStatus {
    pub state: StateId,
    pub current_pressure_mmhg: f64,
    pub elapsed_s: f64,
}

// ---------------------------------------------------------------------------
// MeasurementSession (owned by the worker)
// ---------------------------------------------------------------------------

/// One inflate→deflate→analyze run.  Mutated only by the orchestrator.
#[derive(Debug, Clone)]
pub struct MeasurementSession {
    pub handle: SessionHandle,
    pub state: StateId,
    pub started_at_us: u64,
    pub target_inflate_mmhg: f64,
    pub deflate_rate_mmhg_per_s: f64,
    /// Samples captured during `DeflatingAcquiring`, append-only.
    pub samples: Vec<PressureSample>,
    /// Deadline of the current timed phase, if any.
    pub deadline_us: Option<u64>,
}

impl MeasurementSession {
    pub fn new(
        handle: SessionHandle,
        target_inflate_mmhg: f64,
        deflate_rate_mmhg_per_s: f64,
        now_us: u64,
    ) -> Self {
        Self {
            handle,
            state: StateId::Idle,
            started_at_us: now_us,
            target_inflate_mmhg,
            deflate_rate_mmhg_per_s,
            samples: Vec::with_capacity(1024),
            deadline_us: None,
        }
    }

    pub fn push(&mut self, sample: PressureSample) {
        self.samples.push(sample);
    }

    /// Seconds from `now_us` to [`deadline_us`](Self::deadline_us),
    /// negative once it has passed.
    pub fn secs_to_deadline(&self, now_us: u64) -> Option<f64> {
        self.deadline_us
            .map(|d| (d as f64 - now_us as f64) / 1e6)
    }

    pub fn elapsed_secs(&self, now_us: u64) -> f64 {
        now_us.saturating_sub(self.started_at_us) as f64 / 1e6
    }

    /// Mean acquisition rate over the captured samples (Hz).
    pub fn sample_rate_hz(&self) -> Option<f64> {
        let (first, last) = (self.samples.first()?, self.samples.last()?);
        let span = last.timestamp_us.saturating_sub(first.timestamp_us);
        if self.samples.len() < 2 || span == 0 {
            return None;
        }
        Some((self.samples.len() - 1) as f64 * 1e6 / span as f64)
    }

    /// True when no sample rises more than `tolerance_mmhg` above the
    /// lowest pressure seen before it.
    pub fn is_deflation_monotonic(&self, tolerance_mmhg: f64) -> bool {
        let mut floor = f64::INFINITY;
        for s in &self.samples {
            if s.pressure_mmhg > floor + tolerance_mmhg {
                return false;
            }
            floor = floor.min(s.pressure_mmhg);
        }
        true
    }
}

// ---------------------------------------------------------------------------
// SessionShared (worker ⇄ API)
// ---------------------------------------------------------------------------

/// Lock-free status and signalling block.
#[derive(Debug, Default)]
pub struct SessionShared {
    session_id: AtomicU32,
    state: AtomicU8,
    pressure_bits: AtomicU32,
    elapsed_ms: AtomicU32,
    heartbeat_ms: AtomicU32,
    cancel: AtomicBool,
    emergency: AtomicBool,
    release_latched: AtomicBool,
}

impl SessionShared {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a new session.  Called before the worker starts.
    pub fn begin(&self, handle: SessionHandle) {
        self.cancel.store(false, Ordering::Release);
        self.emergency.store(false, Ordering::Release);
        self.release_latched.store(false, Ordering::Release);
        self.pressure_bits.store(0f32.to_bits(), Ordering::Relaxed);
        self.elapsed_ms.store(0, Ordering::Relaxed);
        self.state.store(StateId::Idle as u8, Ordering::Release);
        self.session_id.store(handle.id(), Ordering::Release);
    }

    pub fn session_id(&self) -> u32 {
        self.session_id.load(Ordering::Acquire)
    }

    pub fn state(&self) -> StateId {
        StateId::from_index(self.state.load(Ordering::Acquire) as usize)
    }

    /// True while a session is between start and its terminal state.
    pub fn is_active(&self) -> bool {
        let s = self.state();
        s != StateId::Idle && !s.is_terminal()
    }

    /// Worker-side progress publication.
    pub fn publish(&self, state: StateId, pressure_mmhg: f64, elapsed_s: f64) {
        self.pressure_bits
            .store((pressure_mmhg as f32).to_bits(), Ordering::Relaxed);
        self.elapsed_ms
            .store((elapsed_s * 1000.0) as u32, Ordering::Relaxed);
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state(),
            current_pressure_mmhg: f64::from(f32::from_bits(
                self.pressure_bits.load(Ordering::Relaxed),
            )),
            elapsed_s: f64::from(self.elapsed_ms.load(Ordering::Relaxed)) / 1000.0,
        }
    }

    // ── Liveness ──────────────────────────────────────────────

    pub fn beat(&self, now_ms: u32) {
        self.heartbeat_ms.store(now_ms, Ordering::Release);
    }

    pub fn last_beat_ms(&self) -> u32 {
        self.heartbeat_ms.load(Ordering::Acquire)
    }

    // ── Out-of-band signals ───────────────────────────────────

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn request_emergency(&self) {
        self.emergency.store(true, Ordering::Release);
    }

    pub fn emergency_requested(&self) -> bool {
        self.emergency.load(Ordering::Acquire)
    }

    /// Latch the emergency release.  Returns `true` only for the first
    /// caller since [`begin`](Self::begin).
    pub fn latch_release(&self) -> bool {
        !self.release_latched.swap(true, Ordering::AcqRel)
    }

    pub fn release_latched(&self) -> bool {
        self.release_latched.load(Ordering::Acquire)
    }
}
