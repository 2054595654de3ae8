//! MeasurementEngine end to end: worker thread, cancel, emergency release,
//! watchdog, completion callback and idle-only operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use nibp::app::engine::MeasurementEngine;
use nibp::app::watchdog::SessionWatchdog;
use nibp::config::MeasurementConfig;
use nibp::error::{AbortReason, ConfigError, EngineError};
use nibp::fsm::StateId;
use nibp::sensors::CalibrationProfile;
use nibp::session::{SessionHandle, SessionOutcome};

use crate::mock_hw::{Call, Patient, Monitor, RecordingSink, SimCuff, Valve};

type Engine = MeasurementEngine<SimCuff, RecordingSink>;

fn engine(cuff: SimCuff) -> (Engine, Monitor, RecordingSink) {
    let monitor = cuff.monitor();
    let sink = RecordingSink::default();
    let engine = MeasurementEngine::new(
        MeasurementConfig::default(),
        cuff,
        sink.clone(),
        Arc::new(monitor.clone()),
        Arc::new(monitor.clone()),
    )
    .unwrap();
    (engine, monitor, sink)
}

fn start(engine: &mut Engine) -> SessionHandle {
    engine.start_measurement(180.0, 3.0).unwrap()
}

#[test]
fn full_session_completes_once() {
    let (mut engine, monitor, _) = engine(SimCuff::new(Patient::normal()));
    let fired = Arc::new(AtomicUsize::new(0));
    let seen = fired.clone();
    engine.set_on_complete(Arc::new(move |outcome: SessionOutcome| {
        assert!(outcome.is_ok(), "{outcome:?}");
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    let handle = start(&mut engine);
    let result = engine.wait_for_outcome(handle).unwrap().unwrap();
    assert!((result.systolic - 120.0).abs() <= 5.0);
    assert!((result.diastolic - 80.0).abs() <= 5.0);
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    let status = engine.poll_status(handle).unwrap();
    assert_eq!(status.state, StateId::Result);
    assert!(!engine.is_busy());
    assert!(!monitor.pump_running());

    // Joining again returns the same outcome without re-firing.
    assert!(engine.wait_for_outcome(handle).unwrap().is_ok());
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn engine_runs_back_to_back_sessions() {
    let (mut engine, _, _) = engine(SimCuff::new(Patient::normal()));
    let first = start(&mut engine);
    assert!(engine.wait_for_outcome(first).unwrap().is_ok());

    let second = start(&mut engine);
    assert_ne!(first, second);
    assert_eq!(engine.poll_status(first), Err(EngineError::StaleHandle));
    assert!(engine.wait_for_outcome(second).unwrap().is_ok());
}

#[test]
fn second_start_while_running_is_busy() {
    let cuff = SimCuff::new(Patient::normal());
    cuff.monitor().hold_at(20);
    let (mut engine, monitor, _) = engine(cuff);

    let handle = start(&mut engine);
    monitor.wait_held();
    assert!(engine.is_busy());
    assert_eq!(engine.start_measurement(180.0, 3.0), Err(EngineError::Busy));
    assert_eq!(
        engine.recalibrate(CalibrationProfile::default()),
        Err(EngineError::Busy)
    );
    assert_eq!(engine.tare(4), Err(EngineError::Busy));

    let status = engine.poll_status(handle).unwrap();
    assert_eq!(status.state, StateId::Inflating);
    assert!(status.current_pressure_mmhg > 10.0);

    monitor.release();
    assert!(engine.wait_for_outcome(handle).unwrap().is_ok());
}

#[test]
fn invalid_session_parameters_are_rejected() {
    let (mut engine, monitor, _) = engine(SimCuff::new(Patient::normal()));
    assert!(matches!(
        engine.start_measurement(250.0, 3.0),
        Err(EngineError::InvalidConfig(ConfigError::ValidationFailed(_)))
    ));
    assert!(matches!(
        engine.start_measurement(180.0, 0.0),
        Err(EngineError::InvalidConfig(_))
    ));
    assert!(matches!(
        engine.start_measurement(f64::NAN, 3.0),
        Err(EngineError::InvalidConfig(_))
    ));
    assert!(monitor.calls().is_empty());
}

#[test]
fn invalid_config_is_rejected_at_construction() {
    let cuff = SimCuff::new(Patient::normal());
    let monitor = cuff.monitor();
    let config = MeasurementConfig {
        soft_ceiling_mmhg: 30.0,
        ..MeasurementConfig::default()
    };
    let built = MeasurementEngine::new(
        config,
        cuff,
        RecordingSink::default(),
        Arc::new(monitor.clone()),
        Arc::new(monitor),
    );
    assert!(matches!(built, Err(EngineError::InvalidConfig(_))));
}

#[test]
fn cancel_aborts_and_is_idempotent() {
    let cuff = SimCuff::new(Patient::normal());
    cuff.monitor().hold_at(60);
    let (mut engine, monitor, sink) = engine(cuff);

    let handle = start(&mut engine);
    monitor.wait_held();
    engine.cancel(handle).unwrap();
    engine.cancel(handle).unwrap();
    monitor.release();

    assert_eq!(
        engine.wait_for_outcome(handle).unwrap(),
        Err(AbortReason::UserCancelled)
    );
    assert_eq!(monitor.valve(), Valve::Released);
    assert!(!monitor.pump_running());
    // The read in flight at cancel time completes; nothing after it.
    assert_eq!(monitor.reads(), 61);

    let calls = monitor.calls();
    engine.cancel(handle).unwrap();
    engine.emergency_release();
    assert_eq!(monitor.calls(), calls);
    assert_eq!(
        sink.count(|e| matches!(e, nibp::app::events::AppEvent::Aborted(_))),
        1
    );
    assert_eq!(
        engine.cancel(SessionHandle::new(handle.id() + 1)),
        Err(EngineError::StaleHandle)
    );
}

#[test]
fn emergency_release_vents_before_the_worker_reacts() {
    let cuff = SimCuff::new(Patient::normal());
    cuff.monitor().hold_at(100);
    let (mut engine, monitor, _) = engine(cuff);

    let handle = start(&mut engine);
    monitor.wait_held();
    assert!(monitor.pump_running());

    let stop = engine.emergency_handle();
    let ui = std::thread::spawn(move || stop.trigger());
    ui.join().unwrap();

    // Vented by the caller's thread while the worker is still parked.
    assert_eq!(monitor.valve(), Valve::Released);
    assert!(!monitor.pump_running());
    assert_eq!(monitor.count(Call::Vent), 1);

    engine.emergency_release();
    assert_eq!(monitor.count(Call::Vent), 1);

    monitor.release();
    assert_eq!(
        engine.wait_for_outcome(handle).unwrap(),
        Err(AbortReason::EmergencyReleased)
    );
    let calls = monitor.calls();
    let vent = calls.iter().position(|c| *c == Call::Vent).unwrap();
    assert!(!calls[vent..].contains(&Call::PumpOn));
    assert!(!calls[vent..].contains(&Call::ValveClose));

    engine.emergency_release();
    assert_eq!(monitor.count(Call::Vent), 1);
}

#[test]
fn watchdog_vents_a_silent_session() {
    let cuff = SimCuff::new(Patient::normal());
    cuff.monitor().hold_at(40);
    let (mut engine, monitor, _) = engine(cuff);
    let mut watchdog = SessionWatchdog::new(
        engine.shared(),
        engine.emergency_handle(),
        Arc::new(monitor.clone()),
        2_000,
    );

    let handle = start(&mut engine);
    monitor.wait_held();
    assert!(!watchdog.check());

    monitor.advance(3_000_000);
    assert!(watchdog.check());
    assert!(!watchdog.check());
    assert_eq!(monitor.count(Call::Vent), 1);
    assert_eq!(monitor.valve(), Valve::Released);

    monitor.release();
    assert_eq!(
        engine.wait_for_outcome(handle).unwrap(),
        Err(AbortReason::EmergencyReleased)
    );
    assert!(!watchdog.check());
}

#[test]
fn tare_moves_the_zero_and_recalibrate_applies() {
    let cuff = SimCuff::new(Patient::normal()).with_zero_counts(12_345);
    let (mut engine, monitor, _) = engine(cuff);

    assert!(matches!(
        engine.tare(0),
        Err(EngineError::InvalidConfig(_))
    ));
    let profile = engine.tare(8).unwrap();
    assert_eq!(profile.offset_counts, 12_345);
    assert_eq!(engine.config().calibration, profile);
    assert_eq!(monitor.reads(), 8);
    assert_eq!(monitor.calls()[0], Call::ValveOpen(100));

    let handle = start(&mut engine);
    let result = engine.wait_for_outcome(handle).unwrap().unwrap();
    assert!((result.systolic - 120.0).abs() <= 5.0);

    let bad = CalibrationProfile {
        slope_mmhg_per_count: -1.0,
        ..profile
    };
    assert!(matches!(
        engine.recalibrate(bad),
        Err(EngineError::InvalidConfig(_))
    ));
    engine.recalibrate(CalibrationProfile::default()).unwrap();
    assert_eq!(engine.config().calibration, CalibrationProfile::default());
}
