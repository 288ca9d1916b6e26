//! Configuration loading and validation.
//!
//! Loads `tripwire.toml` (or `$TRIPWIRE_CONFIG`). Every section is
//! `#[serde(default)]`, so a missing or empty file yields the stock policy.
//! Precedence: env vars > config file > defaults.
//!
//! Limits may only be tightened: validation rejects any value looser than
//! the built-in policy.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Duration;
use serde::Deserialize;

use crate::governance::{ArtifactPaths, BudgetLimits, CanaryThresholds, OverridePolicy};

/// Built-in ceiling for overrides per window.
const MAX_OVERRIDES_CEILING: u32 = 3;
/// Built-in ceiling for canary failures per window.
const MAX_CANARY_FAILURES_CEILING: u32 = 5;
/// Built-in ceiling for emergency override lifetime.
const EMERGENCY_HOURS_CEILING: u32 = 24;
/// Built-in ceiling for testing override lifetime.
const TESTING_MINUTES_CEILING: u32 = 60;
/// Built-in floor for canary runs.
const MIN_RUNS_FLOOR: u32 = 5;
/// Built-in floor for canary sample size.
const MIN_SAMPLE_FLOOR: u64 = 100;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Artifact locations.
    pub paths: PathsConfig,
    /// Safety budget limits.
    pub budget: BudgetConfig,
    /// Override lifetime caps.
    pub overrides: OverridesConfig,
    /// Canary promotion thresholds.
    pub canary: CanaryConfig,
    /// Log level and optional file output.
    pub logging: LoggingConfig,
}

/// Where the engine keeps and reads its artifacts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root that relative paths resolve against.
    pub state_dir: PathBuf,
    /// Governance snapshot.
    pub state_file: PathBuf,
    /// Trusted-domain manifest.
    pub manifest: PathBuf,
    /// Trusted-domain test snapshot.
    pub snapshot: PathBuf,
    /// Calibration metrics written by the evaluation job.
    pub calibration_metrics: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("."),
            state_file: PathBuf::from("governance_state.json"),
            manifest: PathBuf::from("trusted_domains_manifest.json"),
            snapshot: PathBuf::from("tests/fixtures/trusted_domains_snapshot.json"),
            calibration_metrics: PathBuf::from("calibration_metrics.json"),
        }
    }
}

/// Safety budget limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Nominal window length in hours.
    pub window_hours: u32,
    /// Overrides allowed per window (1 to 3).
    pub max_overrides_per_window: u32,
    /// Canary failures tolerated per window (0 to 5).
    pub max_canary_failures: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            max_overrides_per_window: MAX_OVERRIDES_CEILING,
            max_canary_failures: MAX_CANARY_FAILURES_CEILING,
        }
    }
}

/// Override lifetime caps.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OverridesConfig {
    /// Emergency cap in hours (1 to 24).
    pub emergency_max_hours: u32,
    /// Testing cap in minutes (1 to 60).
    pub testing_max_minutes: u32,
}

impl Default for OverridesConfig {
    fn default() -> Self {
        Self {
            emergency_max_hours: EMERGENCY_HOURS_CEILING,
            testing_max_minutes: TESTING_MINUTES_CEILING,
        }
    }
}

/// Canary promotion thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CanaryConfig {
    /// Minimum runs and consecutive passes (at least 5).
    pub min_runs: u32,
    /// Minimum cumulative predictions (at least 100).
    pub min_sample_size: u64,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            min_runs: MIN_RUNS_FLOOR,
            min_sample_size: MIN_SAMPLE_FLOOR,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Enables JSON file logging with daily rotation.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            dir: None,
        }
    }
}

impl GovernanceConfig {
    /// Load with precedence env > file > defaults, then validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the result fails [`Self::validate`].
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` without env overrides. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("failed to read config at {}", path.display())),
        }
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML or mistyped values.
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).context("failed to parse config TOML")
    }

    /// Resolve the config file path using a custom env resolver.
    ///
    /// `$TRIPWIRE_CONFIG` wins; otherwise `./tripwire.toml` if present,
    /// then `~/.tripwire/tripwire.toml`, then `./tripwire.toml` as the
    /// default-yielding fallback.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(p) = env("TRIPWIRE_CONFIG") {
            return PathBuf::from(p);
        }
        let local = PathBuf::from("tripwire.toml");
        if local.exists() {
            return local;
        }
        match user_config_dir() {
            Some(dir) if dir.join("tripwire.toml").exists() => dir.join("tripwire.toml"),
            _ => local,
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Takes a resolver function so tests never need `set_var`.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("TRIPWIRE_STATE_DIR") {
            self.paths.state_dir = PathBuf::from(v);
        }
        if let Some(v) = env("TRIPWIRE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("TRIPWIRE_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(v));
        }
    }

    /// Reject anything looser than the built-in policy.
    ///
    /// # Errors
    ///
    /// Names the first offending setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.budget.window_hours >= 1, "budget.window_hours must be >= 1");
        anyhow::ensure!(
            (1..=MAX_OVERRIDES_CEILING).contains(&self.budget.max_overrides_per_window),
            "budget.max_overrides_per_window must be in [1, {MAX_OVERRIDES_CEILING}]"
        );
        anyhow::ensure!(
            self.budget.max_canary_failures <= MAX_CANARY_FAILURES_CEILING,
            "budget.max_canary_failures must be in [0, {MAX_CANARY_FAILURES_CEILING}]"
        );
        anyhow::ensure!(
            (1..=EMERGENCY_HOURS_CEILING).contains(&self.overrides.emergency_max_hours),
            "overrides.emergency_max_hours must be in [1, {EMERGENCY_HOURS_CEILING}]"
        );
        anyhow::ensure!(
            (1..=TESTING_MINUTES_CEILING).contains(&self.overrides.testing_max_minutes),
            "overrides.testing_max_minutes must be in [1, {TESTING_MINUTES_CEILING}]"
        );
        anyhow::ensure!(
            self.canary.min_runs >= MIN_RUNS_FLOOR,
            "canary.min_runs must be >= {MIN_RUNS_FLOOR}"
        );
        anyhow::ensure!(
            self.canary.min_sample_size >= MIN_SAMPLE_FLOOR,
            "canary.min_sample_size must be >= {MIN_SAMPLE_FLOOR}"
        );
        anyhow::ensure!(
            !self.logging.level.trim().is_empty(),
            "logging.level must not be empty"
        );
        Ok(())
    }

    /// Resolve `path` against `state_dir` unless it is absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.paths.state_dir.join(path)
        }
    }

    /// Governance snapshot location.
    pub fn state_path(&self) -> PathBuf {
        self.resolve(&self.paths.state_file)
    }

    /// Artifacts the verifier cross-checks.
    pub fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths {
            manifest: self.resolve(&self.paths.manifest),
            snapshot: self.resolve(&self.paths.snapshot),
            calibration_metrics: self.resolve(&self.paths.calibration_metrics),
            state_file: Some(self.state_path()),
        }
    }

    /// Budget limits.
    pub fn budget_limits(&self) -> BudgetLimits {
        BudgetLimits {
            max_overrides_per_window: self.budget.max_overrides_per_window,
            max_canary_failures: self.budget.max_canary_failures,
            window: Duration::hours(i64::from(self.budget.window_hours)),
        }
    }

    /// Override lifetime caps.
    pub fn override_policy(&self) -> OverridePolicy {
        OverridePolicy {
            emergency_max: Duration::hours(i64::from(self.overrides.emergency_max_hours)),
            testing_max: Duration::minutes(i64::from(self.overrides.testing_max_minutes)),
        }
    }

    /// Canary thresholds.
    pub fn canary_thresholds(&self) -> CanaryThresholds {
        CanaryThresholds {
            min_runs: self.canary.min_runs,
            min_sample_size: self.canary.min_sample_size,
        }
    }

    /// Configuration rooted at `state_dir`, everything else default.
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.paths.state_dir = state_dir.into();
        config
    }
}

/// Per-user config directory (`~/.tripwire/`), if a home directory exists.
pub fn user_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|home| home.home_dir().join(".tripwire"))
}
