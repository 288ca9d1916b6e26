//! Policy-as-code verification.
//!
//! Cross-checks the trusted-domain manifest, its test snapshot, the
//! calibration metrics and the governance state file. Every check runs and
//! every finding is collected. Structural drift is an error and fails CI;
//! missing or unhealthy telemetry is only a warning.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::store::StateStore;

/// Locations of the artifacts the verifier reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Trusted-domain manifest (`version`, `change_reason`).
    pub manifest: PathBuf,
    /// Trusted-domain snapshot (`_manifest_version`).
    pub snapshot: PathBuf,
    /// Calibration metrics (`calibration_status`).
    pub calibration_metrics: PathBuf,
    /// Governance state snapshot; checked only when present.
    pub state_file: Option<PathBuf>,
}

/// A single drift finding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyDrift {
    /// No manifest on disk.
    #[error("manifest file missing: {0}")]
    ManifestMissing(PathBuf),
    /// Manifest exists but is not a JSON object.
    #[error("manifest unreadable at {path}: {detail}")]
    ManifestUnreadable {
        /// Manifest location.
        path: PathBuf,
        /// Parse or I/O failure.
        detail: String,
    },
    /// Manifest lacks a required field.
    #[error("manifest missing '{0}' field")]
    ManifestFieldMissing(&'static str),
    /// No snapshot on disk.
    #[error("snapshot file missing: {0}")]
    SnapshotMissing(PathBuf),
    /// Snapshot exists but is not a JSON object.
    #[error("snapshot unreadable at {path}: {detail}")]
    SnapshotUnreadable {
        /// Snapshot location.
        path: PathBuf,
        /// Parse or I/O failure.
        detail: String,
    },
    /// Snapshot was generated from a different manifest version.
    #[error("version mismatch: manifest={manifest}, snapshot={snapshot}")]
    VersionMismatch {
        /// Live manifest version.
        manifest: String,
        /// Version recorded in the snapshot.
        snapshot: String,
    },
    /// No calibration metrics on disk.
    #[error("calibration metrics file missing: {0}")]
    CalibrationMetricsMissing(PathBuf),
    /// Calibration metrics exist but cannot be parsed.
    #[error("calibration metrics unreadable at {path}: {detail}")]
    CalibrationMetricsUnreadable {
        /// Metrics location.
        path: PathBuf,
        /// Parse or I/O failure.
        detail: String,
    },
    /// Calibration is not healthy.
    #[error("calibration status is '{0}', not 'healthy'")]
    CalibrationNotHealthy(String),
    /// The governance state file fails to load.
    #[error("governance state invalid: {0}")]
    StateInvalid(String),
}

/// Outcome of a verification run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// No errors were found.
    pub consistent: bool,
    /// Structural drift findings.
    pub errors: Vec<String>,
    /// Advisory findings.
    pub warnings: Vec<String>,
    /// True iff `errors` is non-empty.
    pub should_fail_ci: bool,
    /// Artifacts inspected.
    pub checked: Vec<String>,
}

/// Runs the consistency checks.
#[derive(Debug, Clone)]
pub struct PolicyVerifier {
    paths: ArtifactPaths,
}

impl PolicyVerifier {
    /// Verifier over `paths`.
    pub fn new(paths: ArtifactPaths) -> Self {
        Self { paths }
    }

    /// Artifact locations.
    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Run every check and collect the findings.
    pub fn verify(&self) -> ConsistencyReport {
        let mut errors: Vec<PolicyDrift> = Vec::new();
        let mut warnings: Vec<PolicyDrift> = Vec::new();
        let mut checked = Vec::new();

        // Manifest.
        let manifest_path = &self.paths.manifest;
        checked.push(manifest_path.display().to_string());
        let manifest = match read_json(manifest_path) {
            Artifact::Missing => {
                errors.push(PolicyDrift::ManifestMissing(manifest_path.clone()));
                None
            }
            Artifact::Unreadable(detail) => {
                errors.push(PolicyDrift::ManifestUnreadable {
                    path: manifest_path.clone(),
                    detail,
                });
                None
            }
            Artifact::Loaded(manifest) => {
                for field in ["version", "change_reason"] {
                    if !has_value(&manifest, field) {
                        errors.push(PolicyDrift::ManifestFieldMissing(field));
                    }
                }
                Some(manifest)
            }
        };

        // Snapshot.
        let snapshot_path = &self.paths.snapshot;
        checked.push(snapshot_path.display().to_string());
        match read_json(snapshot_path) {
            Artifact::Missing => errors.push(PolicyDrift::SnapshotMissing(snapshot_path.clone())),
            Artifact::Unreadable(detail) => errors.push(PolicyDrift::SnapshotUnreadable {
                path: snapshot_path.clone(),
                detail,
            }),
            Artifact::Loaded(snapshot) => {
                if let Some(manifest) = &manifest {
                    let live = manifest.get("version").unwrap_or(&Value::Null);
                    let recorded = snapshot.get("_manifest_version").unwrap_or(&Value::Null);
                    if live != recorded {
                        errors.push(PolicyDrift::VersionMismatch {
                            manifest: display_value(live),
                            snapshot: display_value(recorded),
                        });
                    }
                }
            }
        }

        // Calibration metrics.
        let metrics_path = &self.paths.calibration_metrics;
        checked.push(metrics_path.display().to_string());
        match read_json(metrics_path) {
            Artifact::Missing => {
                warnings.push(PolicyDrift::CalibrationMetricsMissing(metrics_path.clone()));
            }
            Artifact::Unreadable(detail) => {
                warnings.push(PolicyDrift::CalibrationMetricsUnreadable {
                    path: metrics_path.clone(),
                    detail,
                });
            }
            Artifact::Loaded(metrics) => {
                let status = metrics
                    .get("calibration_status")
                    .and_then(Value::as_str)
                    .unwrap_or("missing");
                if status != "healthy" {
                    warnings.push(PolicyDrift::CalibrationNotHealthy(status.to_owned()));
                }
            }
        }

        // Governance state.
        if let Some(state_path) = &self.paths.state_file {
            if state_path.exists() {
                checked.push(state_path.display().to_string());
                if let Err(e) = StateStore::new(state_path.clone()).load() {
                    errors.push(PolicyDrift::StateInvalid(e.to_string()));
                }
            }
        }

        let errors: Vec<String> = errors.iter().map(ToString::to_string).collect();
        let warnings = warnings.iter().map(ToString::to_string).collect();
        ConsistencyReport {
            consistent: errors.is_empty(),
            should_fail_ci: !errors.is_empty(),
            errors,
            warnings,
            checked,
        }
    }
}

enum Artifact {
    Missing,
    Unreadable(String),
    Loaded(Value),
}

fn read_json(path: &Path) -> Artifact {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Artifact::Missing,
        Err(e) => return Artifact::Unreadable(e.to_string()),
    };
    match serde_json::from_str::<Value>(&contents) {
        Ok(v) if v.is_object() => Artifact::Loaded(v),
        Ok(_) => Artifact::Unreadable("top level is not an object".to_owned()),
        Err(e) => Artifact::Unreadable(e.to_string()),
    }
}

/// Present and not null, empty or false.
fn has_value(object: &Value, field: &str) -> bool {
    match object.get(field) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn display_value(v: &Value) -> String {
    match v {
        Value::Null => "none".to_owned(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
