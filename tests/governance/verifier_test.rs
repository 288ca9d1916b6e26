//! Policy-as-code verification.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use tripwire::config::GovernanceConfig;
use tripwire::governance::PolicyVerifier;

struct Artifacts {
    dir: TempDir,
    config: GovernanceConfig,
}

impl Artifacts {
    fn empty() -> Self {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => panic!("tempdir: {e}"),
        };
        let config = GovernanceConfig::with_state_dir(dir.path());
        Self { dir, config }
    }

    /// Manifest, matching snapshot and healthy metrics.
    fn consistent() -> Self {
        let a = Self::empty();
        a.manifest(r#"{"version": "2026.03.1", "change_reason": "quarterly review", "domains": []}"#);
        a.snapshot(r#"{"_manifest_version": "2026.03.1", "domains": []}"#);
        a.metrics(r#"{"calibration_status": "healthy", "ece": 0.02}"#);
        a
    }

    fn write(&self, rel: &str, contents: &str) {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, contents).expect("write");
    }

    fn manifest(&self, contents: &str) {
        self.write("trusted_domains_manifest.json", contents);
    }

    fn snapshot(&self, contents: &str) {
        self.write("tests/fixtures/trusted_domains_snapshot.json", contents);
    }

    fn metrics(&self, contents: &str) {
        self.write("calibration_metrics.json", contents);
    }

    fn remove(&self, rel: &str) {
        fs::remove_file(self.dir.path().join(rel)).expect("remove");
    }

    fn verifier(&self) -> PolicyVerifier {
        PolicyVerifier::new(self.config.artifact_paths())
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[test]
fn consistent_artifacts_pass() {
    let a = Artifacts::consistent();
    let report = a.verifier().verify();
    assert!(report.consistent, "{report:?}");
    assert!(!report.should_fail_ci);
    assert!(report.errors.is_empty());
    assert!(report.warnings.is_empty());
    assert_eq!(report.checked.len(), 3);
}

#[test]
fn missing_manifest_fails_ci() {
    let a = Artifacts::consistent();
    a.remove("trusted_domains_manifest.json");
    let report = a.verifier().verify();
    assert!(report.should_fail_ci);
    assert!(!report.consistent);
    assert!(report.errors.iter().any(|e| e.contains("manifest file missing")));
}

#[test]
fn missing_metrics_only_warns() {
    let a = Artifacts::consistent();
    a.remove("calibration_metrics.json");
    let report = a.verifier().verify();
    assert!(!report.should_fail_ci);
    assert!(report.consistent);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("calibration metrics file missing"));
}

#[test]
fn unhealthy_calibration_only_warns() {
    let a = Artifacts::consistent();
    a.metrics(r#"{"calibration_status": "degraded"}"#);
    let report = a.verifier().verify();
    assert!(!report.should_fail_ci);
    assert_eq!(
        report.warnings,
        vec!["calibration status is 'degraded', not 'healthy'".to_owned()]
    );
}

#[test]
fn version_drift_is_an_error() {
    let a = Artifacts::consistent();
    a.snapshot(r#"{"_manifest_version": "2026.02.7"}"#);
    let report = a.verifier().verify();
    assert!(report.should_fail_ci);
    assert_eq!(
        report.errors,
        vec!["version mismatch: manifest=2026.03.1, snapshot=2026.02.7".to_owned()]
    );
}

#[test]
fn findings_accumulate_instead_of_short_circuiting() {
    let a = Artifacts::empty();
    a.manifest(r#"{"domains": []}"#);
    let report = a.verifier().verify();
    // Missing version, missing change_reason, missing snapshot.
    assert_eq!(report.errors.len(), 3, "{:?}", report.errors);
    assert!(report.errors.iter().any(|e| e == "manifest missing 'version' field"));
    assert!(report
        .errors
        .iter()
        .any(|e| e == "manifest missing 'change_reason' field"));
    assert!(report.errors.iter().any(|e| e.contains("snapshot file missing")));
    assert_eq!(report.warnings.len(), 1);
}

#[test]
fn malformed_json_is_reported_not_thrown() {
    let a = Artifacts::consistent();
    a.manifest("{ truncated");
    a.metrics("[]");
    let report = a.verifier().verify();
    assert!(report.should_fail_ci);
    assert!(report.errors.iter().any(|e| e.contains("manifest unreadable")));
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("calibration metrics unreadable")));
}

#[test]
fn corrupt_state_file_is_an_error() {
    let a = Artifacts::consistent();
    fs::write(a.path().join("governance_state.json"), "garbage").expect("write");
    let report = a.verifier().verify();
    assert!(report.should_fail_ci);
    assert_eq!(report.checked.len(), 4);
    assert!(report
        .errors
        .iter()
        .any(|e| e.starts_with("governance state invalid")));
}

#[test]
fn numeric_versions_compare_by_value() {
    let a = Artifacts::consistent();
    a.manifest(r#"{"version": 3, "change_reason": "bump"}"#);
    a.snapshot(r#"{"_manifest_version": 3}"#);
    assert!(a.verifier().verify().consistent);

    a.snapshot(r#"{"_manifest_version": "3"}"#);
    assert!(!a.verifier().verify().consistent);
}
