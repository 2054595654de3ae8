//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (UART / USB-CDC in production).  Results are also
//! printed as one JSON line so a host script can scrape readings off the
//! serial console.

use log::{error, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::SessionStarted {
                session,
                target_mmhg,
                rate_mmhg_per_s,
            } => {
                info!(
                    "START | session={} target={:.0}mmHg rate={:.1}mmHg/s",
                    session.id(),
                    target_mmhg,
                    rate_mmhg_per_s
                );
            }
            AppEvent::Progress(s) => {
                info!(
                    "PROGRESS | state={} | P={:.1}mmHg | t={:.1}s",
                    s.state.name(),
                    s.current_pressure_mmhg,
                    s.elapsed_s
                );
            }
            AppEvent::StateChanged { from, to } => {
                info!("STATE | {} -> {}", from.name(), to.name());
            }
            AppEvent::FaultDetected(flags) => {
                warn!("FAULT | detected, flags=0b{:08b}", flags);
            }
            AppEvent::Completed(r) => {
                info!(
                    "RESULT | SYS={:.0} DIA={:.0} MAP={:.0} HR={:.0} | quality={:?} conf={:.2} | {:?}",
                    r.systolic,
                    r.diastolic,
                    r.map,
                    r.heart_rate_bpm,
                    r.quality,
                    r.confidence,
                    r.category
                );
                match r.to_json() {
                    Ok(json) => info!("RESULT_JSON | {json}"),
                    Err(e) => error!("RESULT | JSON encode failed: {e}"),
                }
            }
            AppEvent::Aborted(reason) => {
                warn!("ABORT | {} ({})", reason, reason.code());
            }
        }
    }
}
