//! Coverage for config parsing, env overrides and validation.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Duration;

use tripwire::config::GovernanceConfig;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn empty_file_yields_defaults() {
    let config = GovernanceConfig::from_toml("").expect("should parse");
    assert_eq!(config.paths.state_dir, PathBuf::from("."));
    assert_eq!(config.budget.max_overrides_per_window, 3);
    assert_eq!(config.budget.max_canary_failures, 5);
    assert_eq!(config.overrides.emergency_max_hours, 24);
    assert_eq!(config.overrides.testing_max_minutes, 60);
    assert_eq!(config.canary.min_runs, 5);
    assert_eq!(config.canary.min_sample_size, 100);
    assert_eq!(config.logging.level, "info");
    assert!(config.logging.dir.is_none());
    assert!(config.validate().is_ok());
}

#[test]
fn partial_sections_keep_other_defaults() {
    let config = GovernanceConfig::from_toml(
        r#"
[budget]
max_overrides_per_window = 2

[overrides]
testing_max_minutes = 15
"#,
    )
    .expect("should parse");
    assert_eq!(config.budget.max_overrides_per_window, 2);
    assert_eq!(config.budget.max_canary_failures, 5);
    assert_eq!(config.override_policy().testing_max, Duration::minutes(15));
    assert_eq!(config.override_policy().emergency_max, Duration::hours(24));
    assert!(config.validate().is_ok());
}

#[test]
fn loosening_any_limit_is_rejected() {
    let cases = [
        "[budget]\nmax_overrides_per_window = 4",
        "[budget]\nmax_overrides_per_window = 0",
        "[budget]\nmax_canary_failures = 6",
        "[budget]\nwindow_hours = 0",
        "[overrides]\nemergency_max_hours = 48",
        "[overrides]\ntesting_max_minutes = 90",
        "[canary]\nmin_runs = 3",
        "[canary]\nmin_sample_size = 50",
        "[logging]\nlevel = \"\"",
    ];
    for case in cases {
        let config = GovernanceConfig::from_toml(case).expect("should parse");
        assert!(config.validate().is_err(), "should reject: {case}");
    }
}

#[test]
fn tightening_is_accepted() {
    let config = GovernanceConfig::from_toml(
        r#"
[budget]
max_canary_failures = 0
window_hours = 12

[canary]
min_runs = 10
min_sample_size = 1000
"#,
    )
    .expect("should parse");
    assert!(config.validate().is_ok());
    assert_eq!(config.budget_limits().window, Duration::hours(12));
    assert_eq!(config.canary_thresholds().min_runs, 10);
}

#[test]
fn mistyped_values_fail_to_parse() {
    assert!(GovernanceConfig::from_toml("[budget]\nmax_canary_failures = \"five\"").is_err());
}

#[test]
fn env_overrides_beat_file_values() {
    let mut config =
        GovernanceConfig::from_toml("[paths]\nstate_dir = \"/from/file\"").expect("should parse");
    config.apply_overrides(env_from(&[
        ("TRIPWIRE_STATE_DIR", "/from/env"),
        ("TRIPWIRE_LOG_LEVEL", "debug"),
        ("TRIPWIRE_LOG_DIR", "/var/log/tripwire"),
    ]));
    assert_eq!(config.paths.state_dir, PathBuf::from("/from/env"));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.dir, Some(PathBuf::from("/var/log/tripwire")));
}

#[test]
fn absent_env_leaves_config_untouched() {
    let mut config =
        GovernanceConfig::from_toml("[logging]\nlevel = \"warn\"").expect("should parse");
    config.apply_overrides(env_from(&[]));
    assert_eq!(config.logging.level, "warn");
}

#[test]
fn config_path_prefers_env() {
    let path = GovernanceConfig::config_path_with(env_from(&[(
        "TRIPWIRE_CONFIG",
        "/etc/tripwire/custom.toml",
    )]));
    assert_eq!(path, PathBuf::from("/etc/tripwire/custom.toml"));
}

#[test]
fn artifact_paths_resolve_against_state_dir() {
    let config = GovernanceConfig::with_state_dir("/srv/tripwire");
    let paths = config.artifact_paths();
    assert_eq!(
        paths.manifest,
        PathBuf::from("/srv/tripwire/trusted_domains_manifest.json")
    );
    assert_eq!(
        paths.snapshot,
        PathBuf::from("/srv/tripwire/tests/fixtures/trusted_domains_snapshot.json")
    );
    assert_eq!(
        paths.calibration_metrics,
        PathBuf::from("/srv/tripwire/calibration_metrics.json")
    );
    assert_eq!(
        paths.state_file,
        Some(PathBuf::from("/srv/tripwire/governance_state.json"))
    );
}

#[test]
fn load_from_missing_file_is_default_and_bad_file_is_error() {
    let dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => panic!("tempdir: {e}"),
    };
    let missing = dir.path().join("tripwire.toml");
    let config = GovernanceConfig::load_from(&missing).expect("defaults");
    assert_eq!(config.budget.max_overrides_per_window, 3);

    std::fs::write(&missing, "[budget\nbroken").expect("write");
    let err = GovernanceConfig::load_from(&missing).expect_err("malformed");
    assert!(format!("{err:#}").contains("failed to parse config"));
}
