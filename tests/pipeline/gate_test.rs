//! Scan gate: calibration capping and trusted-domain violations.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use tripwire::alerts::{Alert, CollectingAlertSink};
use tripwire::clock::ManualClock;
use tripwire::config::GovernanceConfig;
use tripwire::governance::GovernanceEngine;
use tripwire::pipeline::{ScanGate, ScanOutcome};
use tripwire::verdict::{CalibrationStatus, Verdict};

struct Fixture {
    _dir: tempfile::TempDir,
    sink: Arc<CollectingAlertSink>,
    gate: ScanGate,
}

fn fixture() -> Fixture {
    let dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => panic!("tempdir: {e}"),
    };
    let config = GovernanceConfig::with_state_dir(dir.path());
    let start = match Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0) {
        chrono::LocalResult::Single(t) => t,
        other => panic!("unambiguous timestamp expected, got {other:?}"),
    };
    let sink = Arc::new(CollectingAlertSink::new());
    let engine = match GovernanceEngine::open_with(
        &config,
        Arc::new(ManualClock::new(start)),
        sink.clone(),
    ) {
        Ok(engine) => engine,
        Err(e) => panic!("engine should open: {e}"),
    };
    Fixture {
        _dir: dir,
        sink,
        gate: ScanGate::new(Arc::new(engine)),
    }
}

fn outcome(verdict: Verdict, trusted: bool, calibration: CalibrationStatus) -> ScanOutcome {
    ScanOutcome {
        domain: "example.com".to_owned(),
        verdict,
        confidence: 0.9,
        is_trusted: trusted,
        calibration,
    }
}

#[test]
fn healthy_untrusted_verdict_passes_through() {
    let f = fixture();
    let gated = f
        .gate
        .evaluate(&outcome(Verdict::Phishing, false, CalibrationStatus::Healthy))
        .expect("evaluate");
    assert_eq!(gated.verdict, Verdict::Phishing);
    assert!((gated.confidence - 0.9).abs() < f64::EPSILON);
    assert!(!gated.downgraded);
    assert!(!gated.violation);
    assert!(gated.warning.is_none());
}

#[test]
fn degraded_calibration_caps_and_penalises() {
    let f = fixture();
    let gated = f
        .gate
        .evaluate(&outcome(Verdict::Phishing, false, CalibrationStatus::Degraded))
        .expect("evaluate");
    assert_eq!(gated.verdict, Verdict::Suspicious);
    assert!(gated.downgraded);
    assert!((gated.confidence - 0.72).abs() < 1e-9);
    assert_eq!(
        gated.warning.as_deref(),
        Some("Model calibration is degraded. Confidence reduced.")
    );
    assert!(!f.gate.engine().is_frozen().expect("frozen"));
}

#[test]
fn trusted_domain_flag_freezes_and_never_shows_phishing() {
    let f = fixture();
    let gated = f
        .gate
        .evaluate(&outcome(Verdict::Phishing, true, CalibrationStatus::Healthy))
        .expect("evaluate");
    assert_eq!(gated.verdict, Verdict::Suspicious);
    assert!(gated.downgraded);
    assert!(gated.violation);
    assert!(f.gate.engine().is_frozen().expect("frozen"));
    assert!(f
        .sink
        .alerts()
        .iter()
        .any(|a| matches!(a, Alert::FreezeTriggered { .. })));
}

#[test]
fn suspicious_on_trusted_is_a_violation() {
    let f = fixture();
    let gated = f
        .gate
        .evaluate(&outcome(Verdict::Suspicious, true, CalibrationStatus::Healthy))
        .expect("evaluate");
    assert_eq!(gated.verdict, Verdict::Suspicious);
    assert!(!gated.downgraded);
    assert!(gated.violation);
    assert!(f.gate.engine().is_frozen().expect("frozen"));
}

#[test]
fn safe_on_trusted_is_fine() {
    let f = fixture();
    let gated = f
        .gate
        .evaluate(&outcome(Verdict::Safe, true, CalibrationStatus::Unknown))
        .expect("evaluate");
    assert_eq!(gated.verdict, Verdict::Safe);
    assert!(!gated.violation);
    assert!(gated.warning.is_some());
    assert!(!f.gate.engine().is_frozen().expect("frozen"));
}

#[tokio::test]
async fn async_entry_point_matches_sync_behaviour() {
    let f = fixture();
    let gated = f
        .gate
        .evaluate_async(outcome(Verdict::Phishing, true, CalibrationStatus::Degraded))
        .await
        .expect("evaluate");
    assert_eq!(gated.verdict, Verdict::Suspicious);
    assert!(gated.violation);
    assert!(f.gate.engine().is_frozen().expect("frozen"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_async_scans_freeze_once_per_violation() {
    let f = fixture();
    let mut tasks = Vec::new();
    for trusted in [false, false, true, false] {
        let gate = f.gate.clone();
        tasks.push(tokio::spawn(async move {
            gate.evaluate_async(outcome(Verdict::Suspicious, trusted, CalibrationStatus::Healthy))
                .await
        }));
    }
    let mut violations = 0;
    for task in tasks {
        if task.await.expect("join").expect("evaluate").violation {
            violations += 1;
        }
    }
    assert_eq!(violations, 1);
    let status = f.gate.engine().status().expect("status");
    assert!(status.is_frozen);
    assert_eq!(status.counters.suspicious_on_trusted, 1);
}
