//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter      | Implements        | Connects to                    |
//! |--------------|-------------------|--------------------------------|
//! | `hardware`   | AdcPort           | Bridge ADC (bit-banged GPIO)   |
//! |              | ActuatorPort      | Pump + valve LEDC PWM          |
//! |              | EmergencyPort     | LEDC duty registers            |
//! | `log_sink`   | EventSink         | Serial log output              |
//! | `time`       | TimePort          | ESP32 high-resolution timer    |

pub mod hardware;
pub mod log_sink;
pub mod time;
