//! Hardware adapter — bridges real peripherals to domain port traits.
//!
//! Owns the [`BridgeAdc`], the calibration profile and both actuator
//! drivers, exposing them through [`AdcPort`] and [`ActuatorPort`].  The
//! measurement worker is its only user while a session runs.
//!
//! [`LedcEmergencyVent`] is the second, deliberately independent path to
//! the same actuators: it writes the LEDC duty registers directly so any
//! task can vent the cuff while the worker holds the adapter.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use log::{info, warn};

use crate::app::ports::{ActuatorPort, AdcPort, EmergencyPort, TimePort};
use crate::drivers::bridge_adc::BridgeAdc;
use crate::drivers::hw_init;
use crate::drivers::pump::PumpDriver;
use crate::drivers::valve::ValveDriver;
use crate::error::AdcError;
use crate::sensors::{CalibrationProfile, RawSample};

/// Pump duty used while inflating (percent).
pub const DEFAULT_PUMP_DUTY: u8 = 85;

/// Concrete adapter that combines all cuff hardware behind port traits.
pub struct HardwareAdapter<DOUT, SCK, D, T> {
    adc: BridgeAdc<DOUT, SCK, D, T>,
    calibration: CalibrationProfile,
    pump: PumpDriver,
    valve: ValveDriver,
    pump_duty: u8,
}

impl<DOUT, SCK, D, T> HardwareAdapter<DOUT, SCK, D, T>
where
    DOUT: InputPin,
    SCK: OutputPin,
    D: DelayNs,
    T: TimePort,
{
    pub fn new(
        adc: BridgeAdc<DOUT, SCK, D, T>,
        calibration: CalibrationProfile,
        pump: PumpDriver,
        valve: ValveDriver,
    ) -> Self {
        Self {
            adc,
            calibration,
            pump,
            valve,
            pump_duty: DEFAULT_PUMP_DUTY,
        }
    }

    /// Pump duty for subsequent `pump_on` calls.
    pub fn set_pump_duty(&mut self, duty: u8) {
        self.pump_duty = duty.clamp(1, 100);
    }

    pub fn adc_mut(&mut self) -> &mut BridgeAdc<DOUT, SCK, D, T> {
        &mut self.adc
    }
}

// ── AdcPort implementation ────────────────────────────────────

impl<DOUT, SCK, D, T> AdcPort for HardwareAdapter<DOUT, SCK, D, T>
where
    DOUT: InputPin,
    SCK: OutputPin,
    D: DelayNs,
    T: TimePort,
{
    fn read_raw(&mut self, timeout_ms: u32) -> Result<RawSample, AdcError> {
        self.adc.read_raw(timeout_ms)
    }

    fn calibration(&self) -> &CalibrationProfile {
        &self.calibration
    }

    fn calibrate(&mut self, profile: CalibrationProfile) {
        self.calibration = profile;
    }
}

// ── ActuatorPort implementation ───────────────────────────────

impl<DOUT, SCK, D, T> ActuatorPort for HardwareAdapter<DOUT, SCK, D, T>
where
    DOUT: InputPin,
    SCK: OutputPin,
    D: DelayNs,
    T: TimePort,
{
    fn pump_on(&mut self) {
        if self.valve.is_venting() {
            warn!("pump_on with valve venting, ignored");
            return;
        }
        self.pump.run(self.pump_duty);
    }

    fn pump_off(&mut self) {
        self.pump.stop();
    }

    fn valve_open(&mut self, percent: u8) {
        self.valve.open(percent);
    }

    fn valve_close(&mut self) {
        self.valve.close();
    }

    fn emergency_release(&mut self) {
        self.pump.stop();
        self.valve.release();
    }
}

// ── Out-of-band vent ──────────────────────────────────────────

/// Register-level vent usable from any task.
///
/// Pump duty 0 and valve coil duty 0; the normally-open valve then vents.
#[derive(Debug, Default)]
pub struct LedcEmergencyVent;

impl EmergencyPort for LedcEmergencyVent {
    fn vent(&self) {
        hw_init::ledc_set(hw_init::LEDC_CH_PUMP, 0);
        hw_init::ledc_set(hw_init::LEDC_CH_VALVE, 0);
        info!("Emergency vent: pump and valve coil de-energised");
    }
}
