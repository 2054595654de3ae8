//! GPIO / peripheral pin assignments for the NIBP cuff board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// Bridge ADC (HX711-class, bit-banged)
// ---------------------------------------------------------------------------

/// ADC data output (input to the MCU).  Low = conversion ready.
pub const ADC_DOUT_GPIO: i32 = 4;
/// ADC serial clock / power-down (output).  Idles low.
pub const ADC_SCK_GPIO: i32 = 5;

// ---------------------------------------------------------------------------
// Cuff pump (N-MOSFET low-side switch)
// ---------------------------------------------------------------------------

/// LEDC PWM output driving the pump MOSFET gate.
pub const PUMP_PWM_GPIO: i32 = 1;

// ---------------------------------------------------------------------------
// Deflate valve (normally-open solenoid)
// ---------------------------------------------------------------------------

/// LEDC PWM output driving the valve MOSFET gate.  Unpowered = open, so a
/// reset or brown-out vents the cuff.
pub const VALVE_PWM_GPIO: i32 = 2;

// ---------------------------------------------------------------------------
// PWM configuration
// ---------------------------------------------------------------------------

/// LEDC timer resolution (bits).  8-bit gives 0 – 255 duty levels.
pub const PWM_RESOLUTION_BITS: u32 = 8;
/// Pump PWM frequency (25 kHz, inaudible).
pub const PUMP_PWM_FREQ_HZ: u32 = 25_000;
/// Valve PWM frequency.  Low enough for the solenoid to proportionally
/// throttle rather than chatter.
pub const VALVE_PWM_FREQ_HZ: u32 = 1_000;
