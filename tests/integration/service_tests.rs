//! MeasurementService driven tick by tick against the simulated cuff.
//!
//! Single-threaded: the test owns the service and the hardware, so every
//! actuator call can be checked against the sample that caused it.

use std::sync::Arc;

use nibp::app::events::AppEvent;
use nibp::app::service::MeasurementService;
use nibp::config::MeasurementConfig;
use nibp::error::{AbortReason, AdcError, EstimationError, SafetyFault};
use nibp::fsm::StateId;
use nibp::result::Quality;
use nibp::session::{SessionHandle, SessionShared};

use crate::mock_hw::{Call, Fault, Patient, RecordingSink, SimCuff, Valve};

/// Generous upper bound on ticks for any session (about 150 s of samples).
const MAX_TICKS: usize = 3_000;

fn run(cuff: &mut SimCuff, config: MeasurementConfig) -> (MeasurementService, RecordingSink) {
    let shared = Arc::new(SessionShared::new());
    let handle = SessionHandle::new(1);
    shared.begin(handle);
    let mut sink = RecordingSink::default();
    let mut svc = MeasurementService::new(config, shared, handle, 0);
    svc.start(cuff, &mut sink);
    for _ in 0..MAX_TICKS {
        if svc.is_finished() {
            break;
        }
        svc.tick(cuff, &mut sink);
    }
    assert!(svc.is_finished(), "session did not finish in {MAX_TICKS} ticks");
    (svc, sink)
}

fn abort_reason(svc: &MeasurementService) -> AbortReason {
    match svc.outcome() {
        Some(Err(reason)) => reason,
        other => panic!("expected abort, got {other:?}"),
    }
}

/// Calls issued after the last ADC read.
fn calls_after_last_read(calls: &[Call]) -> Vec<Call> {
    let last = calls
        .iter()
        .rposition(|c| matches!(c, Call::Read(_)))
        .expect("no reads");
    calls[last + 1..].to_vec()
}

#[test]
fn normal_patient_is_measured_within_tolerance() {
    let mut cuff = SimCuff::new(Patient::normal());
    let monitor = cuff.monitor();
    let (svc, sink) = run(&mut cuff, MeasurementConfig::default());

    assert_eq!(svc.state(), StateId::Result);
    let r = svc.result().expect("result");
    assert!((r.systolic - 120.0).abs() <= 5.0, "SYS {}", r.systolic);
    assert!((r.diastolic - 80.0).abs() <= 5.0, "DIA {}", r.diastolic);
    assert!((r.map - 93.0).abs() <= 5.0, "MAP {}", r.map);
    assert!((r.heart_rate_bpm - 72.0).abs() <= 3.0, "HR {}", r.heart_rate_bpm);
    assert!(r.systolic >= r.map && r.map >= r.diastolic);
    assert!(r.quality > Quality::Poor, "quality {:?}", r.quality);

    // Cuff left vented, pump off.
    assert!(!monitor.pump_running());
    assert_eq!(monitor.valve(), Valve::Open(100));
    assert_eq!(sink.count(|e| matches!(e, AppEvent::Completed(_))), 1);
    assert_eq!(sink.count(|e| matches!(e, AppEvent::Aborted(_))), 0);
}

#[test]
fn deflation_samples_are_monotonic() {
    let mut cuff = SimCuff::new(Patient::normal());
    let (svc, _) = run(&mut cuff, MeasurementConfig::default());
    assert_eq!(svc.state(), StateId::Result);
    let session = svc.session();
    assert!(session.samples.len() > 500);
    assert!(session.is_deflation_monotonic(1.0));
    let rate = session.sample_rate_hz().unwrap();
    assert!((rate - 20.0).abs() < 0.1, "rate {rate}");
}

#[test]
fn deflation_rate_follows_setpoint() {
    let mut cuff = SimCuff::new(Patient::normal());
    let (svc, _) = run(&mut cuff, MeasurementConfig::default());
    let samples = &svc.session().samples;
    let (first, last) = (samples[0], samples[samples.len() - 1]);
    let secs = (last.timestamp_us - first.timestamp_us) as f64 / 1e6;
    let rate = (first.pressure_mmhg - last.pressure_mmhg) / secs;
    assert!((rate - 3.0).abs() < 0.3, "mean rate {rate}");
}

#[test]
fn state_events_follow_the_happy_path() {
    let mut cuff = SimCuff::new(Patient::normal());
    let (_, sink) = run(&mut cuff, MeasurementConfig::default());
    let path: Vec<StateId> = sink
        .events()
        .iter()
        .filter_map(|e| match e {
            AppEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(
        path,
        [
            StateId::Inflating,
            StateId::DeflatingAcquiring,
            StateId::Analyzing,
            StateId::Result
        ]
    );
    assert!(sink.count(|e| matches!(e, AppEvent::Progress(_))) > 30);
}

#[test]
fn pulseless_cuff_reports_low_signal_quality() {
    let mut cuff = SimCuff::new(Patient::pulseless());
    let (svc, _) = run(&mut cuff, MeasurementConfig::default());
    assert_eq!(
        abort_reason(&svc),
        AbortReason::Estimation(EstimationError::LowSignalQuality)
    );
    assert!(svc.result().is_none());
}

#[test]
fn spike_over_ceiling_releases_immediately() {
    let mut cuff = SimCuff::with_fault(
        Patient::normal(),
        Fault::Spike {
            at_mmhg: 150.0,
            to_mmhg: 205.0,
        },
    );
    let monitor = cuff.monitor();
    let (svc, sink) = run(&mut cuff, MeasurementConfig::default());

    assert_eq!(abort_reason(&svc), AbortReason::OverPressure);
    let calls = monitor.calls();
    let over = calls
        .iter()
        .position(|c| matches!(c, Call::Read(p) if *p > 200.0))
        .expect("no over-pressure read");
    assert_eq!(calls.get(over + 1), Some(&Call::EmergencyRelease));
    assert_eq!(calls_after_last_read(&calls), [Call::EmergencyRelease]);
    assert_eq!(monitor.valve(), Valve::Released);
    assert!(!monitor.pump_running());
    assert_eq!(
        sink.count(|e| matches!(e, AppEvent::FaultDetected(f) if f & SafetyFault::OverPressure.mask() != 0)),
        1
    );
}

#[test]
fn stuck_valve_is_detected_as_stall() {
    let mut cuff = SimCuff::with_fault(
        Patient::normal(),
        Fault::StuckValve {
            after_s: 5.0,
            for_s: 8.0,
        },
    );
    let monitor = cuff.monitor();
    let (svc, _) = run(&mut cuff, MeasurementConfig::default());

    assert_eq!(abort_reason(&svc), AbortReason::DeflationStalled);
    assert_eq!(monitor.valve(), Valve::Released);
    assert_eq!(monitor.count(Call::EmergencyRelease), 1);
    // Detected while the valve was still stuck: deflation began at about
    // 9 s, the stall lasts from 14 s to 22 s.
    let ended_s = svc.session().samples.last().unwrap().timestamp_us as f64 / 1e6;
    assert!(ended_s < 22.0, "stall detected at {ended_s} s");
}

#[test]
fn adc_failure_aborts_with_hardware_fault() {
    let mut cuff = SimCuff::with_fault(Patient::normal(), Fault::AdcDead { after_reads: 250 });
    let monitor = cuff.monitor();
    let (svc, _) = run(&mut cuff, MeasurementConfig::default());

    assert_eq!(
        abort_reason(&svc),
        AbortReason::HardwareFault(AdcError::Timeout)
    );
    assert_eq!(monitor.reads(), 250);
    let calls = monitor.calls();
    assert_eq!(calls.last(), Some(&Call::EmergencyRelease));
    assert!(!calls_after_last_read(&calls).contains(&Call::PumpOn));
}

#[test]
fn weak_pump_times_out_inflating() {
    let mut cuff = SimCuff::with_fault(Patient::normal(), Fault::WeakPump { rate: 2.0 });
    let monitor = cuff.monitor();
    let (svc, _) = run(&mut cuff, MeasurementConfig::default());

    assert_eq!(abort_reason(&svc), AbortReason::InflateTimeout);
    assert!(svc.session().samples.is_empty());
    assert_eq!(monitor.valve(), Valve::Released);
    // 30 s at 20 SPS, plus the tick that noticed.
    assert!((600..=602).contains(&monitor.reads()), "reads {}", monitor.reads());
}

#[test]
fn slow_valve_hits_deflate_deadline() {
    let mut cuff = SimCuff::with_fault(Patient::normal(), Fault::SlowValve { factor: 0.05 });
    let monitor = cuff.monitor();
    let config = MeasurementConfig::default();
    let (svc, _) = run(&mut cuff, config.clone());

    assert_eq!(abort_reason(&svc), AbortReason::DeflateTimeout);
    // Pushed the valve wide open trying to keep up.
    assert!(monitor.calls().contains(&Call::ValveOpen(100)));
    let samples = &svc.session().samples;
    let secs = (samples[samples.len() - 1].timestamp_us - samples[0].timestamp_us) as f64 / 1e6;
    let window = config.deflate_timeout_secs - config.deflate_timeout_margin_secs;
    assert!((secs - window).abs() < 0.2, "deflated for {secs} s");
}

#[test]
fn cancel_between_ticks_aborts_without_reading() {
    let mut cuff = SimCuff::new(Patient::normal());
    let monitor = cuff.monitor();
    let shared = Arc::new(SessionShared::new());
    let handle = SessionHandle::new(7);
    shared.begin(handle);
    let mut sink = RecordingSink::default();
    let mut svc =
        MeasurementService::new(MeasurementConfig::default(), shared.clone(), handle, 0);
    svc.start(&mut cuff, &mut sink);
    for _ in 0..40 {
        svc.tick(&mut cuff, &mut sink);
    }
    let reads = monitor.reads();

    shared.request_cancel();
    svc.tick(&mut cuff, &mut sink);
    assert_eq!(svc.state(), StateId::Aborted);
    assert_eq!(abort_reason(&svc), AbortReason::UserCancelled);
    assert_eq!(monitor.reads(), reads);

    let calls = monitor.calls();
    svc.tick(&mut cuff, &mut sink);
    shared.request_cancel();
    svc.tick(&mut cuff, &mut sink);
    assert_eq!(monitor.calls(), calls);
    assert_eq!(sink.count(|e| matches!(e, AppEvent::Aborted(_))), 1);
}

#[test]
fn emergency_before_worker_start_never_pressurises() {
    let mut cuff = SimCuff::new(Patient::normal());
    let monitor = cuff.monitor();
    let shared = Arc::new(SessionShared::new());
    let handle = SessionHandle::new(1);
    shared.begin(handle);
    shared.request_emergency();

    let mut sink = RecordingSink::default();
    let mut svc = MeasurementService::new(MeasurementConfig::default(), shared, handle, 0);
    svc.start(&mut cuff, &mut sink);

    assert!(svc.is_finished());
    assert_eq!(abort_reason(&svc), AbortReason::EmergencyReleased);
    assert_eq!(monitor.calls(), [Call::EmergencyRelease]);
    assert!(!monitor.pump_running());
    assert_eq!(monitor.valve(), Valve::Released);
    assert_eq!(sink.count(|e| matches!(e, AppEvent::Aborted(_))), 1);
}
