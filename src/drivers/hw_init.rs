//! One-shot hardware peripheral initialization.
//!
//! Configures the LEDC timers/channels for the pump and valve using raw
//! ESP-IDF sys calls.  Called once from `main()` before the engine starts.
//! The bridge ADC pins are owned by `PinDriver`s, not configured here.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
use log::info;

#[cfg(target_os = "espidf")]
use crate::pins;

// ── Error type ────────────────────────────────────────────────

/// Errors during one-shot peripheral initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    LedcTimerFailed(i32),
    LedcChannelFailed(i32),
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::LedcTimerFailed(rc) => write!(f, "LEDC timer config failed (rc={})", rc),
            Self::LedcChannelFailed(rc) => write!(f, "LEDC channel config failed (rc={})", rc),
        }
    }
}

impl std::error::Error for HwInitError {}

pub const LEDC_CH_PUMP: u32 = 0;
pub const LEDC_CH_VALVE: u32 = 1;

/// Map 0–100 % onto the 8-bit LEDC duty range.
#[inline]
pub fn percent_to_duty(percent: u8) -> u8 {
    ((u16::from(percent.min(100)) * 255) / 100) as u8
}

#[cfg(target_os = "espidf")]
pub fn init_peripherals() -> Result<(), HwInitError> {
    // SAFETY: Called once from main() before the engine starts; single-threaded.
    unsafe { init_ledc() }?;
    info!("hw_init: all peripherals configured");
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_peripherals() -> Result<(), HwInitError> {
    log::info!("hw_init(sim): peripheral init skipped");
    Ok(())
}

// ── LEDC PWM ─────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_ledc() -> Result<(), HwInitError> {
    // Timer 0: pump (25 kHz), timer 1: valve (1 kHz); both 8-bit.
    for (timer, freq) in [
        (ledc_timer_t_LEDC_TIMER_0, pins::PUMP_PWM_FREQ_HZ),
        (ledc_timer_t_LEDC_TIMER_1, pins::VALVE_PWM_FREQ_HZ),
    ] {
        let cfg = ledc_timer_config_t {
            speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
            timer_num: timer,
            duty_resolution: ledc_timer_bit_t_LEDC_TIMER_8_BIT,
            freq_hz: freq,
            clk_cfg: soc_periph_ledc_clk_src_legacy_t_LEDC_AUTO_CLK,
            ..Default::default()
        };
        let ret = unsafe { ledc_timer_config(&cfg) };
        if ret != ESP_OK as i32 {
            return Err(HwInitError::LedcTimerFailed(ret));
        }
    }

    // Both channels start at duty 0: pump off, valve coil off (= open).
    for (channel, timer, gpio) in [
        (ledc_channel_t_LEDC_CHANNEL_0, ledc_timer_t_LEDC_TIMER_0, pins::PUMP_PWM_GPIO),
        (ledc_channel_t_LEDC_CHANNEL_1, ledc_timer_t_LEDC_TIMER_1, pins::VALVE_PWM_GPIO),
    ] {
        let ret = unsafe {
            ledc_channel_config(&ledc_channel_config_t {
                speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
                channel,
                timer_sel: timer,
                gpio_num: gpio,
                duty: 0,
                hpoint: 0,
                ..Default::default()
            })
        };
        if ret != ESP_OK as i32 {
            return Err(HwInitError::LedcChannelFailed(ret));
        }
    }

    info!("hw_init: LEDC configured (pump=CH0, valve=CH1)");
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn ledc_set(channel: u32, duty: u8) {
    // SAFETY: channels were configured in init_ledc(); the LEDC driver
    // serialises duty updates internally, so the emergency vent path may
    // call this from another task.
    unsafe {
        ledc_set_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel, u32::from(duty));
        ledc_update_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel);
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn ledc_set(_channel: u32, _duty: u8) {}
