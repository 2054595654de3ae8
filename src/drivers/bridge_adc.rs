//! Bit-bang driver for a 24-bit differential bridge ADC (HX711 class).
//!
//! Two lines: DOUT (input, driven by the ADC) and PD_SCK (output).
//!
//! ```text
//!  DOUT  ‾‾‾‾‾\____ready____/‾‾ b23 ‾‾ b22 ‾‾ … ‾‾ b0 ‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾
//!  SCK   _________________/‾\_/‾\_/‾\_ … _/‾\_/‾\ (+1..3 gain pulses)
//!                         │←≥2µs→│
//! ```
//!
//! A conversion is ready when DOUT is low.  The 24 data pulses and the
//! trailing gain pulses run inside a critical section so scheduler jitter
//! cannot stretch a high phase past the ADC's 60 µs power-down threshold.
//! The number of trailing pulses selects gain for the *next* conversion.
//!
//! On any failure SCK is driven low so the ADC is left idle, never
//! half-clocked or powered down.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use log::{debug, warn};

use crate::app::ports::TimePort;
use crate::error::AdcError;
use crate::sensors::RawSample;

/// Minimum hold time for each SCK level (µs).
pub const PULSE_HOLD_US: u32 = 2;

/// Poll interval while waiting for DOUT to fall (µs).
const READY_POLL_US: u32 = 100;

/// SCK high longer than this powers the ADC down.
const POWER_DOWN_HOLD_US: u32 = 80;

const CODE_MAX: u32 = 0x7F_FFFF;
const CODE_MIN: u32 = 0x80_0000;

/// Channel/gain selection, applied one conversion ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Gain {
    /// Channel A, gain 128 (one trailing pulse).
    #[default]
    A128,
    /// Channel B, gain 32 (two trailing pulses).
    B32,
    /// Channel A, gain 64 (three trailing pulses).
    A64,
}

impl Gain {
    pub const fn trailing_pulses(self) -> u8 {
        match self {
            Self::A128 => 1,
            Self::B32 => 2,
            Self::A64 => 3,
        }
    }

    pub const fn factor(self) -> f64 {
        match self {
            Self::A128 => 128.0,
            Self::B32 => 32.0,
            Self::A64 => 64.0,
        }
    }
}

/// Sign-extend a 24-bit two's-complement code.
#[inline]
pub const fn sign_extend_24(raw: u32) -> i32 {
    ((raw << 8) as i32) >> 8
}

/// Bridge ADC driver.  Owns both lines; only one read can be in flight.
pub struct BridgeAdc<DOUT, SCK, D, T> {
    dout: DOUT,
    sck: SCK,
    delay: D,
    clock: T,
    /// Gain that will be clocked into the ADC after the next read.
    gain: Gain,
    /// Gain the conversion currently in the ADC was taken with.
    active_gain: Option<Gain>,
}

impl<DOUT, SCK, D, T> BridgeAdc<DOUT, SCK, D, T>
where
    DOUT: InputPin,
    SCK: OutputPin,
    D: DelayNs,
    T: TimePort,
{
    pub fn new(dout: DOUT, mut sck: SCK, delay: D, clock: T, gain: Gain) -> Self {
        // SCK idles low; a failure here surfaces on the first read.
        let _ = sck.set_low();
        Self {
            dout,
            sck,
            delay,
            clock,
            gain,
            active_gain: None,
        }
    }

    /// Select gain for conversions after the next read.
    pub fn set_gain(&mut self, gain: Gain) {
        self.gain = gain;
    }

    /// Gain of the most recently returned sample, once known.
    pub fn active_gain(&self) -> Option<Gain> {
        self.active_gain
    }

    /// Wait up to `timeout_ms` for a conversion, then clock it out.
    pub fn read_raw(&mut self, timeout_ms: u32) -> Result<RawSample, AdcError> {
        self.wait_ready(timeout_ms)?;

        let shifted = critical_section::with(|_| self.shift_in());
        let raw = match shifted {
            Ok(raw) => raw,
            Err(e) => {
                let _ = self.sck.set_low();
                warn!("bridge_adc: pulse train failed: {e}");
                return Err(e);
            }
        };

        // After the trailing pulses DOUT returns high until the next
        // conversion completes.  Still low means we lost sync.
        if self.dout.is_low().map_err(|_| AdcError::ProtocolFault)? {
            warn!("bridge_adc: DOUT stuck low after gain pulses");
            return Err(AdcError::ProtocolFault);
        }

        if raw == CODE_MAX || raw == CODE_MIN {
            warn!("bridge_adc: saturated code 0x{raw:06X}");
            return Err(AdcError::ProtocolFault);
        }

        self.active_gain = Some(self.gain);
        Ok(RawSample {
            counts: sign_extend_24(raw),
            timestamp_us: self.clock.uptime_us(),
        })
    }

    /// Hold SCK high past the power-down threshold.
    pub fn power_down(&mut self) -> Result<(), AdcError> {
        self.sck.set_low().map_err(|_| AdcError::ProtocolFault)?;
        self.sck.set_high().map_err(|_| AdcError::ProtocolFault)?;
        self.delay.delay_us(POWER_DOWN_HOLD_US);
        debug!("bridge_adc: powered down");
        Ok(())
    }

    /// Release SCK; the ADC resets to channel A / gain 128.
    pub fn power_up(&mut self) -> Result<(), AdcError> {
        self.sck.set_low().map_err(|_| AdcError::ProtocolFault)?;
        self.active_gain = None;
        Ok(())
    }

    // ── Internal ──────────────────────────────────────────────

    fn wait_ready(&mut self, timeout_ms: u32) -> Result<(), AdcError> {
        let deadline = self
            .clock
            .uptime_us()
            .saturating_add(u64::from(timeout_ms) * 1_000);
        loop {
            match self.dout.is_low() {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(_) => {
                    let _ = self.sck.set_low();
                    return Err(AdcError::ProtocolFault);
                }
            }
            if self.clock.uptime_us() >= deadline {
                let _ = self.sck.set_low();
                return Err(AdcError::Timeout);
            }
            self.delay.delay_us(READY_POLL_US);
        }
    }

    fn shift_in(&mut self) -> Result<u32, AdcError> {
        let mut raw = 0u32;
        for _ in 0..24 {
            self.sck.set_high().map_err(|_| AdcError::ProtocolFault)?;
            self.delay.delay_us(PULSE_HOLD_US);
            let bit = self.dout.is_high().map_err(|_| AdcError::ProtocolFault)?;
            self.sck.set_low().map_err(|_| AdcError::ProtocolFault)?;
            self.delay.delay_us(PULSE_HOLD_US);
            raw = (raw << 1) | u32::from(bit);
        }
        for _ in 0..self.gain.trailing_pulses() {
            self.sck.set_high().map_err(|_| AdcError::ProtocolFault)?;
            self.delay.delay_us(PULSE_HOLD_US);
            self.sck.set_low().map_err(|_| AdcError::ProtocolFault)?;
            self.delay.delay_us(PULSE_HOLD_US);
        }
        Ok(raw)
    }
}
