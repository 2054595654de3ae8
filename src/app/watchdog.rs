//! Session liveness watchdog.
//!
//! The worker stamps [`SessionShared::beat`] after every sample.  If a
//! session is active and the stamp goes stale (ADC wedged, worker stuck in
//! analysis), the watchdog vents the cuff through the [`EmergencyStop`]
//! path, which needs no cooperation from the worker.
//!
//! Runs from any thread that is not the worker: the main loop on hardware,
//! the test thread in simulation.

use std::sync::Arc;

use log::error;

use super::engine::EmergencyStop;
use super::ports::TimePort;
use crate::session::SessionShared;

pub struct SessionWatchdog {
    shared: Arc<SessionShared>,
    stop: EmergencyStop,
    clock: Arc<dyn TimePort + Send + Sync>,
    timeout_ms: u32,
    fired: bool,
}

impl SessionWatchdog {
    pub fn new(
        shared: Arc<SessionShared>,
        stop: EmergencyStop,
        clock: Arc<dyn TimePort + Send + Sync>,
        timeout_ms: u32,
    ) -> Self {
        Self {
            shared,
            stop,
            clock,
            timeout_ms,
            fired: false,
        }
    }

    /// Check the heartbeat once.  Returns `true` if the cuff was vented.
    pub fn check(&mut self) -> bool {
        if !self.shared.is_active() {
            self.fired = false;
            return false;
        }
        let now_ms = (self.clock.uptime_us() / 1000) as u32;
        let silent_ms = now_ms.wrapping_sub(self.shared.last_beat_ms());
        if silent_ms <= self.timeout_ms || self.fired {
            return false;
        }
        error!(
            "Session {} silent for {silent_ms} ms, venting",
            self.shared.session_id()
        );
        self.fired = true;
        self.stop.trigger();
        true
    }
}
