//! Bridge ADC, actuator drivers, hardware initialisation, and thread helpers.

pub mod bridge_adc;
pub mod hw_init;
pub mod pump;
pub mod task_pin;
pub mod valve;
