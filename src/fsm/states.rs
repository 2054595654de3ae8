//! Concrete state handler functions and table builder.
//!
//! Each state is three plain `fn` pointers in a fixed table.
//!
//! ```text
//!  IDLE ──[start]──▶ INFLATING ──[target reached]──▶ DEFLATING_ACQUIRING
//!                        │                                  │
//!                 [inflate timeout]          [below floor | deadline near]
//!                        │                                  ▼
//!                        │                             ANALYZING ──[ok]──▶ RESULT
//!                        ▼                                  │
//!                     ABORTED ◀───────[estimation error]────┘
//!
//!  Any active state ──[safety fault | cancel | emergency]──▶ ABORTED
//! ```
//!
//! Safety-driven aborts are forced by the service; the handlers here only
//! cover the transitions the measurement itself decides.

use super::context::{ActuatorCommands, FsmContext, ValveCommand};
use super::{StateDescriptor, StateId};
use crate::error::AbortReason;
use crate::{estimator, signal};
use log::{info, warn};

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.  Called once per session.
pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        // Index 0: Idle
        StateDescriptor {
            id: StateId::Idle,
            name: "Idle",
            on_enter: Some(idle_enter),
            on_exit: None,
            on_update: idle_update,
        },
        // Index 1: Inflating
        StateDescriptor {
            id: StateId::Inflating,
            name: "Inflating",
            on_enter: Some(inflating_enter),
            on_exit: Some(inflating_exit),
            on_update: inflating_update,
        },
        // Index 2: DeflatingAcquiring
        StateDescriptor {
            id: StateId::DeflatingAcquiring,
            name: "DeflatingAcquiring",
            on_enter: Some(deflating_enter),
            on_exit: None,
            on_update: deflating_update,
        },
        // Index 3: Analyzing
        StateDescriptor {
            id: StateId::Analyzing,
            name: "Analyzing",
            on_enter: Some(analyzing_enter),
            on_exit: None,
            on_update: analyzing_update,
        },
        // Index 4: Result
        StateDescriptor {
            id: StateId::Result,
            name: "Result",
            on_enter: Some(result_enter),
            on_exit: None,
            on_update: terminal_update,
        },
        // Index 5: Aborted
        StateDescriptor {
            id: StateId::Aborted,
            name: "Aborted",
            on_enter: Some(aborted_enter),
            on_exit: None,
            on_update: terminal_update,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  IDLE state
// ═══════════════════════════════════════════════════════════════════════════

fn idle_enter(ctx: &mut FsmContext) {
    ctx.commands = ActuatorCommands::vented();
}

fn idle_update(_ctx: &mut FsmContext) -> Option<StateId> {
    // Leaves only through `start`, which forces Inflating.
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  INFLATING state
// ═══════════════════════════════════════════════════════════════════════════

fn inflating_enter(ctx: &mut FsmContext) {
    info!(
        "Inflating to {:.0} mmHg",
        ctx.session.target_inflate_mmhg
    );
    ctx.commands = ActuatorCommands {
        pump_on: true,
        valve: ValveCommand::Closed,
    };
    ctx.session.deadline_us =
        Some(ctx.now_us + (ctx.config.inflate_timeout_secs * 1e6) as u64);
}

fn inflating_exit(ctx: &mut FsmContext) {
    ctx.commands.pump_on = false;
}

fn inflating_update(ctx: &mut FsmContext) -> Option<StateId> {
    if ctx.pressure.pressure_mmhg >= ctx.session.target_inflate_mmhg {
        info!(
            "Target reached at {:.1} mmHg after {:.1}s",
            ctx.pressure.pressure_mmhg,
            ctx.secs_in_state()
        );
        return Some(StateId::DeflatingAcquiring);
    }
    if ctx.secs_to_deadline().is_some_and(|left| left < 0.0) {
        warn!(
            "Inflate timeout at {:.1} mmHg",
            ctx.pressure.pressure_mmhg
        );
        return ctx.abort(AbortReason::InflateTimeout);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  DEFLATING_ACQUIRING state
// ═══════════════════════════════════════════════════════════════════════════

fn deflating_enter(ctx: &mut FsmContext) {
    ctx.commands = ActuatorCommands {
        pump_on: false,
        valve: ValveCommand::Deflate(ctx.config.deflate_feedforward_percent),
    };
    ctx.session.deadline_us =
        Some(ctx.now_us + (ctx.config.deflate_timeout_secs * 1e6) as u64);
}

fn deflating_update(ctx: &mut FsmContext) -> Option<StateId> {
    ctx.session.push(ctx.pressure);

    if ctx.pressure.pressure_mmhg < ctx.config.deflate_floor_mmhg {
        info!(
            "Deflation floor reached, {} samples in {:.1}s",
            ctx.session.samples.len(),
            ctx.secs_in_state()
        );
        return Some(StateId::Analyzing);
    }

    let left = ctx.secs_to_deadline()?;
    if left <= 0.0 {
        warn!("Deflate timeout at {:.1} mmHg", ctx.pressure.pressure_mmhg);
        return ctx.abort(AbortReason::DeflateTimeout);
    }
    if left <= ctx.config.deflate_timeout_margin_secs {
        warn!(
            "Deflate deadline near at {:.1} mmHg, analysing what we have",
            ctx.pressure.pressure_mmhg
        );
        ctx.deflate_deadline_hit = true;
        return Some(StateId::Analyzing);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  ANALYZING state
// ═══════════════════════════════════════════════════════════════════════════

fn analyzing_enter(ctx: &mut FsmContext) {
    ctx.commands = ActuatorCommands::vented();
    ctx.session.deadline_us = None;
}

fn analyzing_update(ctx: &mut FsmContext) -> Option<StateId> {
    let outcome = signal::process(&ctx.session.samples, &ctx.config)
        .and_then(|a| estimator::estimate(&a.envelope, a.snr_db, &ctx.config));

    match outcome {
        Ok(result) => {
            ctx.result = Some(result);
            Some(StateId::Result)
        }
        Err(e) if ctx.deflate_deadline_hit => {
            warn!("Analysis after deflate deadline failed: {e}");
            ctx.abort(AbortReason::DeflateTimeout)
        }
        Err(e) => {
            warn!("Analysis failed: {e}");
            ctx.abort(AbortReason::Estimation(e))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  RESULT / ABORTED (terminal)
// ═══════════════════════════════════════════════════════════════════════════

fn result_enter(ctx: &mut FsmContext) {
    ctx.commands = ActuatorCommands::vented();
}

fn aborted_enter(ctx: &mut FsmContext) {
    ctx.commands = ActuatorCommands {
        pump_on: false,
        valve: ValveCommand::Release,
    };
    ctx.session.deadline_us = None;
    warn!(
        "Session aborted: {}",
        ctx.abort_reason.map_or("unknown", AbortReason::code)
    );
}

fn terminal_update(_ctx: &mut FsmContext) -> Option<StateId> {
    None
}
