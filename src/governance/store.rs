//! Durable governance snapshot.
//!
//! One JSON document holds overrides, canary signals and the safety budget.
//! Writes go to a sibling `.tmp` file, are flushed to disk, then renamed over
//! the live file, so a crash leaves either the old or the new snapshot.
//!
//! Loading is strict. A snapshot that exists but fails schema or semantic
//! validation is an error, never an empty state: defaulting would silently
//! discard live overrides and budget history.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::budget::SafetyBudget;
use super::canary::CanarySignal;
use super::overrides::{Override, OverrideKind};
use super::GovernanceError;

/// Snapshot layout version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Everything the engine persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceState {
    /// Layout version.
    pub schema_version: u32,
    /// Every override ever issued, in issue order.
    pub overrides: Vec<Override>,
    /// Canary evidence keyed by domain.
    pub canary_signals: BTreeMap<String, CanarySignal>,
    /// Budget window and freeze state.
    pub safety_budget: SafetyBudget,
    /// Time of the last successful write.
    pub last_updated: Option<DateTime<Utc>>,
}

impl GovernanceState {
    /// Empty state with a budget window starting at `now`.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            overrides: Vec::new(),
            canary_signals: BTreeMap::new(),
            safety_budget: SafetyBudget::new(now),
            last_updated: None,
        }
    }

    /// Check invariants serde cannot express.
    fn validate(&self) -> Result<(), String> {
        let mut ids = HashSet::new();
        for o in &self.overrides {
            if !ids.insert(o.id.as_str()) {
                return Err(format!("duplicate override id {}", o.id));
            }
            match (o.kind, o.expires_at) {
                (OverrideKind::Permanent, Some(_)) => {
                    return Err(format!("permanent override {} has an expiry", o.id));
                }
                (OverrideKind::Emergency | OverrideKind::Testing, None) => {
                    return Err(format!("{} override {} has no expiry", o.kind, o.id));
                }
                _ => {}
            }
        }

        for (key, signal) in &self.canary_signals {
            if *key != signal.domain {
                return Err(format!(
                    "canary entry '{key}' holds signal for '{}'",
                    signal.domain
                ));
            }
            if signal.passes.checked_add(signal.failures) != Some(signal.test_runs) {
                return Err(format!(
                    "canary '{key}': passes ({}) + failures ({}) != test_runs ({})",
                    signal.passes, signal.failures, signal.test_runs
                ));
            }
            if signal.consecutive_passes > signal.passes {
                return Err(format!(
                    "canary '{key}': consecutive_passes ({}) > passes ({})",
                    signal.consecutive_passes, signal.passes
                ));
            }
        }

        let budget = &self.safety_budget;
        let has_reason = budget
            .freeze_reason
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty());
        if budget.is_frozen && !has_reason {
            return Err("safety budget is frozen without a freeze_reason".to_owned());
        }
        Ok(())
    }
}

/// File-backed snapshot store.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot. `Ok(None)` when no snapshot exists yet.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::StateCorruption`] if the file cannot be read or
    /// fails validation.
    pub fn load(&self) -> Result<Option<GovernanceState>, GovernanceError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.corrupt(format!("unreadable: {e}"))),
        };
        self.decode(&bytes).map(Some)
    }

    fn decode(&self, bytes: &[u8]) -> Result<GovernanceState, GovernanceError> {
        let mut value: Value =
            serde_json::from_slice(bytes).map_err(|e| self.corrupt(format!("invalid JSON: {e}")))?;
        let Some(object) = value.as_object_mut() else {
            return Err(self.corrupt("top level is not an object".to_owned()));
        };

        match object.get("schema_version") {
            None => {
                warn!(
                    path = %self.path.display(),
                    "snapshot has no schema_version, reading as legacy layout"
                );
                object.insert("schema_version".to_owned(), Value::from(SCHEMA_VERSION));
            }
            Some(v) if v.as_u64() == Some(u64::from(SCHEMA_VERSION)) => {}
            Some(v) => {
                return Err(self.corrupt(format!(
                    "unsupported schema_version {v} (expected {SCHEMA_VERSION})"
                )));
            }
        }

        let state: GovernanceState = serde_json::from_value(value)
            .map_err(|e| self.corrupt(format!("schema validation failed: {e}")))?;
        state.validate().map_err(|detail| self.corrupt(detail))?;
        Ok(state)
    }

    /// Atomically replace the snapshot with `state`.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::Persistence`] on any I/O failure. The previous
    /// snapshot is left intact.
    pub fn save(&self, state: &GovernanceState) -> Result<(), GovernanceError> {
        let json = serde_json::to_vec_pretty(state).map_err(|e| self.io_error(std::io::Error::other(e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let tmp_path = self.tmp_path();
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&json)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp_path);
            return Err(self.io_error(e));
        }

        debug!(path = %self.path.display(), "governance state persisted");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "governance_state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn corrupt(&self, detail: String) -> GovernanceError {
        GovernanceError::StateCorruption {
            path: self.path.clone(),
            detail,
        }
    }

    fn io_error(&self, source: std::io::Error) -> GovernanceError {
        GovernanceError::Persistence {
            path: self.path.clone(),
            source,
        }
    }
}
