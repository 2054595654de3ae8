//! NIBP firmware — main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  HardwareAdapter        LogEventSink      MonotonicClock       │
//! │  (Adc+Actuator)         (EventSink)       (TimePort)           │
//! │  LedcEmergencyVent (EmergencyPort)                             │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  MeasurementEngine ── worker (APP core)                │    │
//! │  │    MeasurementService: FSM · Safety · PID · DSP        │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Main loop (PRO core): status polling · session watchdog       │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use esp_idf_hal::delay::Ets;
use esp_idf_hal::gpio::PinDriver;
use esp_idf_hal::peripherals::Peripherals;
use log::{error, info, warn};

use nibp::adapters::hardware::{HardwareAdapter, LedcEmergencyVent};
use nibp::adapters::log_sink::LogEventSink;
use nibp::adapters::time::MonotonicClock;
use nibp::app::ports::EmergencyPort;
use nibp::app::watchdog::SessionWatchdog;
use nibp::drivers::bridge_adc::{BridgeAdc, Gain};
use nibp::drivers::hw_init;
use nibp::drivers::pump::PumpDriver;
use nibp::drivers::valve::ValveDriver;
use nibp::{MeasurementConfig, MeasurementEngine, SessionOutcome};

/// Main-loop period while a session runs.
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Worker silence that makes the watchdog vent the cuff.
const SESSION_WATCHDOG_MS: u32 = 2_000;
/// Pause between automatic measurements.
const MEASUREMENT_INTERVAL: Duration = Duration::from_secs(60);
/// Raw conversions averaged by the boot-time tare.
const TARE_SAMPLES: usize = 16;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  NIBP v{}                          ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Peripherals ────────────────────────────────────────
    if let Err(e) = hw_init::init_peripherals() {
        // Without LEDC the valve cannot be closed; the cuff stays vented.
        error!("HAL init failed: {}", e);
        return Err(e.into());
    }
    let peripherals = Peripherals::take()?;
    // GPIO numbers match pins::ADC_DOUT_GPIO / pins::ADC_SCK_GPIO.
    let dout = PinDriver::input(peripherals.pins.gpio4)?;
    let sck = PinDriver::output(peripherals.pins.gpio5)?;

    let clock = MonotonicClock::new();
    let config = MeasurementConfig::default();
    let adc = BridgeAdc::new(dout, sck, Ets, clock, Gain::A128);
    let mut hw = HardwareAdapter::new(adc, config.calibration, PumpDriver::new(), ValveDriver::new());
    hw.set_pump_duty(config.pump_duty_percent);

    // ── 3. Engine ─────────────────────────────────────────────
    let clock: Arc<MonotonicClock> = Arc::new(clock);
    let mut engine = MeasurementEngine::new(
        config,
        hw,
        LogEventSink::new(),
        Arc::new(LedcEmergencyVent),
        clock.clone(),
    )?;
    engine.set_on_complete(Arc::new(|outcome: SessionOutcome| match outcome {
        Ok(r) => info!("Measurement done: {:.0}/{:.0} mmHg", r.systolic, r.diastolic),
        Err(reason) => warn!("Measurement failed: {reason}"),
    }));

    match engine.tare(TARE_SAMPLES) {
        Ok(profile) => info!("Boot tare: offset {} counts", profile.offset_counts),
        Err(e) => warn!("Boot tare failed ({}), keeping default zero", e),
    }

    let mut watchdog = SessionWatchdog::new(
        engine.shared(),
        engine.emergency_handle(),
        clock,
        SESSION_WATCHDOG_MS,
    );

    info!("System ready. Entering measurement loop.");

    // ── 4. Measurement loop ───────────────────────────────────
    loop {
        let (target, rate) = {
            let c = engine.config();
            (c.inflate_target_mmhg, c.deflate_rate_mmhg_per_s)
        };
        let handle = match engine.start_measurement(target, rate) {
            Ok(h) => h,
            Err(e) => {
                error!("Could not start measurement: {e}");
                std::thread::sleep(MEASUREMENT_INTERVAL);
                continue;
            }
        };

        while engine.is_busy() {
            watchdog.check();
            std::thread::sleep(POLL_INTERVAL);
        }

        if let Err(e) = engine.wait_for_outcome(handle) {
            // The worker took the hardware down with it; nothing left to drive.
            error!("Session {} lost: {e}", handle.id());
            LedcEmergencyVent.vent();
            return Err(e.into());
        }
        std::thread::sleep(MEASUREMENT_INTERVAL);
    }
}
