//! Shared fixtures: an engine on a temp dir with a manual clock and a
//! collecting alert sink.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use tripwire::alerts::CollectingAlertSink;
use tripwire::clock::ManualClock;
use tripwire::config::GovernanceConfig;
use tripwire::governance::{GovernanceEngine, OverrideAuthority, OverrideKind, OverrideRequest};

/// Fixed start time for every test.
pub fn t0() -> DateTime<Utc> {
    match Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0) {
        chrono::LocalResult::Single(t) => t,
        other => panic!("unambiguous timestamp expected, got {other:?}"),
    }
}

/// An engine plus the handles a test needs to drive and observe it.
pub struct Harness {
    pub dir: TempDir,
    pub config: GovernanceConfig,
    pub clock: Arc<ManualClock>,
    pub sink: Arc<CollectingAlertSink>,
    pub engine: GovernanceEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut GovernanceConfig)) -> Self {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => panic!("tempdir: {e}"),
        };
        let mut config = GovernanceConfig::with_state_dir(dir.path());
        tweak(&mut config);
        let clock = Arc::new(ManualClock::new(t0()));
        let sink = Arc::new(CollectingAlertSink::new());
        let engine = open(&config, &clock, &sink);
        Self {
            dir,
            config,
            clock,
            sink,
            engine,
        }
    }

    /// A second engine over the same state file, as after a restart.
    pub fn reopen(&self) -> GovernanceEngine {
        open(&self.config, &self.clock, &self.sink)
    }
}

fn open(
    config: &GovernanceConfig,
    clock: &Arc<ManualClock>,
    sink: &Arc<CollectingAlertSink>,
) -> GovernanceEngine {
    match GovernanceEngine::open_with(config, clock.clone(), sink.clone()) {
        Ok(engine) => engine,
        Err(e) => panic!("engine should open: {e}"),
    }
}

/// A valid EMERGENCY request from on-call.
pub fn emergency(domain: &str) -> OverrideRequest {
    OverrideRequest::new(OverrideKind::Emergency, OverrideAuthority::OnCall)
        .domains([domain])
        .reason("false positive during incident")
        .approved_by("alice")
}

/// A valid TESTING request from CI.
pub fn testing(domain: &str) -> OverrideRequest {
    OverrideRequest::new(OverrideKind::Testing, OverrideAuthority::CiSystem)
        .domains([domain])
        .reason("fixture")
        .approved_by("ci-bot")
}
