//! Deflate valve driver (normally-open proportional solenoid, LEDC ch1).
//!
//! Dual-layer safety:
//! 1. Hardware — the valve is open when unpowered, so a crash, reset or
//!    brown-out vents the cuff with no software involvement.
//! 2. Software — [`ValveDriver::release`] de-energises the coil outright.
//!
//! Commands are expressed as *percent open*.  Because the coil closes the
//! valve, the PWM duty written is the complement: 0 % open = coil fully on.

use log::warn;

use crate::drivers::hw_init;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveState {
    /// Coil fully energised, cuff sealed.
    Closed,
    /// Throttled deflation.
    Open { percent: u8 },
    /// Coil de-energised by the emergency path.
    Released,
}

pub struct ValveDriver {
    state: ValveState,
}

impl Default for ValveDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ValveDriver {
    /// Starts released: the coil is off until something closes it.
    pub fn new() -> Self {
        Self {
            state: ValveState::Released,
        }
    }

    pub fn open(&mut self, percent: u8) {
        let percent = percent.min(100);
        self.set_coil_hw(100 - percent);
        self.state = if percent == 0 {
            ValveState::Closed
        } else {
            ValveState::Open { percent }
        };
    }

    pub fn close(&mut self) {
        self.open(0);
    }

    /// De-energise the coil.  Valid from any state.
    pub fn release(&mut self) {
        self.set_coil_hw(0);
        if self.state != ValveState::Released {
            warn!("valve: released");
        }
        self.state = ValveState::Released;
    }

    fn set_coil_hw(&self, coil_percent: u8) {
        hw_init::ledc_set(hw_init::LEDC_CH_VALVE, hw_init::percent_to_duty(coil_percent));
    }

    pub fn state(&self) -> ValveState {
        self.state
    }

    /// True when air can leave the cuff.
    pub fn is_venting(&self) -> bool {
        !matches!(self.state, ValveState::Closed)
    }
}
