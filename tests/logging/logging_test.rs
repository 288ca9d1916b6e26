//! Tests for `src/logging.rs`.

use tripwire::logging::LoggingGuard;

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_production_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs").join("tripwire");
    assert!(!logs_dir.exists());

    // Only one global subscriber per process; a second install is an Err,
    // but the directory is created before that point either way.
    let _result = tripwire::logging::init_production(&logs_dir, "info");
    assert!(logs_dir.exists(), "logs directory should be created");
}

#[test]
fn init_cli_tolerates_an_installed_subscriber() {
    tripwire::logging::init_cli("debug");
    tripwire::logging::init_cli("warn");
}
