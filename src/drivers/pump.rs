//! Cuff inflation pump driver (low-side MOSFET, LEDC PWM on ch0).
//!
//! ## Safety contract
//!
//! The pump must never run with the valve vented or after an abort.
//! Enforced by the orchestrator and the emergency path; this driver is a
//! dumb actuator.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: drives real PWM via hw_init helpers.
//! On host/test: tracks state in-memory only.

use crate::drivers::hw_init;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Stopped,
    Running { duty: u8 },
}

pub struct PumpDriver {
    state: PumpState,
}

impl Default for PumpDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl PumpDriver {
    pub fn new() -> Self {
        Self {
            state: PumpState::Stopped,
        }
    }

    pub fn run(&mut self, duty: u8) {
        let duty = duty.min(100);
        if duty == 0 {
            self.stop();
            return;
        }
        hw_init::ledc_set(hw_init::LEDC_CH_PUMP, hw_init::percent_to_duty(duty));
        self.state = PumpState::Running { duty };
    }

    pub fn stop(&mut self) {
        hw_init::ledc_set(hw_init::LEDC_CH_PUMP, 0);
        self.state = PumpState::Stopped;
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.state, PumpState::Stopped)
    }
}
