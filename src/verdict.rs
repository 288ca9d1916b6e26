//! Closed vocabularies shared with the scan pipeline.
//!
//! The classifier reports one of three verdicts and an externally computed
//! calibration health. Both arrive as strings at the boundary and are parsed
//! into these enums before any policy decision is made.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Tri-state verdict emitted by the scan pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// No phishing indicators.
    Safe,
    /// Some indicators; shown to the user as a caution.
    Suspicious,
    /// High-severity phishing verdict.
    Phishing,
}

impl Verdict {
    /// Wire representation (`SAFE`, `SUSPICIOUS`, `PHISHING`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::Suspicious => "SUSPICIOUS",
            Self::Phishing => "PHISHING",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a verdict string is not one of the three known values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown verdict '{0}' (expected SAFE, SUSPICIOUS or PHISHING)")]
pub struct ParseVerdictError(pub String);

impl FromStr for Verdict {
    type Err = ParseVerdictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SAFE" => Ok(Self::Safe),
            "SUSPICIOUS" => Ok(Self::Suspicious),
            "PHISHING" => Ok(Self::Phishing),
            _ => Err(ParseVerdictError(s.to_owned())),
        }
    }
}

/// Externally reported health of the probability calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationStatus {
    /// Calibration metrics are within tolerance.
    Healthy,
    /// Calibration metrics have drifted.
    Degraded,
    /// No usable calibration report.
    Unknown,
}

impl CalibrationStatus {
    /// Lowercase wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a reported status. Anything unrecognised is [`CalibrationStatus::Unknown`].
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "healthy" => Self::Healthy,
            "degraded" => Self::Degraded,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for CalibrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalibrationStatus {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}
