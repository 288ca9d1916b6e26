//! Calibration health as a policy input.
//!
//! Degraded or unknown calibration never raises severity: it only lowers
//! confidence and caps verdicts at SUSPICIOUS.

use serde::Serialize;
use tracing::warn;

use crate::verdict::{CalibrationStatus, Verdict};

/// Verdict restriction and confidence penalty for a calibration status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationPolicy {
    /// Fraction of confidence removed (0.0 to 1.0).
    pub confidence_penalty: f64,
    /// Downgrade PHISHING to SUSPICIOUS.
    pub restrict_phishing: bool,
    /// Users must be warned that results are less reliable.
    pub require_warning: bool,
    /// CI should surface a warning.
    pub ci_should_warn: bool,
    /// Text of the warning, when one is required.
    pub warning_message: Option<&'static str>,
}

impl CalibrationPolicy {
    /// Policy for `status`.
    pub fn for_status(status: CalibrationStatus) -> Self {
        match status {
            CalibrationStatus::Healthy => Self {
                confidence_penalty: 0.0,
                restrict_phishing: false,
                require_warning: false,
                ci_should_warn: false,
                warning_message: None,
            },
            CalibrationStatus::Degraded => Self {
                confidence_penalty: 0.20,
                restrict_phishing: true,
                require_warning: true,
                ci_should_warn: true,
                warning_message: Some("Model calibration is degraded. Confidence reduced."),
            },
            CalibrationStatus::Unknown => Self {
                confidence_penalty: 0.10,
                restrict_phishing: true,
                require_warning: true,
                ci_should_warn: true,
                warning_message: Some("Calibration status unknown. Results may be unreliable."),
            },
        }
    }

    /// Apply the penalty to a confidence value, clamped to `[0, 1]`.
    pub fn penalized_confidence(&self, confidence: f64) -> f64 {
        (confidence * (1.0 - self.confidence_penalty)).clamp(0.0, 1.0)
    }

    /// Downgrade PHISHING to SUSPICIOUS when restricted; otherwise pass through.
    pub fn restrict(&self, verdict: Verdict) -> Verdict {
        if self.restrict_phishing && verdict == Verdict::Phishing {
            warn!("verdict restricted due to calibration: PHISHING -> SUSPICIOUS");
            return Verdict::Suspicious;
        }
        verdict
    }
}

/// Restrict `verdict` according to `status`.
pub fn apply_restriction(verdict: Verdict, status: CalibrationStatus) -> Verdict {
    CalibrationPolicy::for_status(status).restrict(verdict)
}
