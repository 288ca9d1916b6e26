//! Gate between the classifier and the verdict a user sees.
//!
//! Every scan result passes through [`ScanGate`] before it is returned.
//! Calibration drift caps the verdict and lowers confidence; a non-SAFE
//! verdict on a trusted domain is a zero-tolerance violation that freezes
//! the governance engine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::governance::budget::SafetyEvent;
use crate::governance::{CalibrationPolicy, GovernanceEngine, GovernanceError};
use crate::verdict::{CalibrationStatus, Verdict};

/// Raw classifier output for one URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOutcome {
    /// Registrable domain of the scanned URL.
    pub domain: String,
    /// Verdict proposed by the classifier.
    pub verdict: Verdict,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f64,
    /// Domain is on the trusted-domain allowlist.
    pub is_trusted: bool,
    /// Calibration status at scan time.
    pub calibration: CalibrationStatus,
}

/// What the user is allowed to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatedVerdict {
    /// Final verdict.
    pub verdict: Verdict,
    /// Confidence after the calibration penalty.
    pub confidence: f64,
    /// The final verdict is milder than the classifier's.
    pub downgraded: bool,
    /// Reliability warning to show alongside the result.
    pub warning: Option<String>,
    /// A trusted domain was flagged; the engine has frozen.
    pub violation: bool,
}

/// Applies governance policy to scan outcomes.
#[derive(Debug, Clone)]
pub struct ScanGate {
    engine: Arc<GovernanceEngine>,
}

impl ScanGate {
    /// Gate backed by `engine`.
    pub fn new(engine: Arc<GovernanceEngine>) -> Self {
        Self { engine }
    }

    /// The engine this gate reports to.
    pub fn engine(&self) -> &Arc<GovernanceEngine> {
        &self.engine
    }

    /// Gate one outcome.
    ///
    /// # Errors
    ///
    /// Only when recording a trusted-domain violation fails to persist. The
    /// caller must then withhold the result.
    pub fn evaluate(&self, outcome: &ScanOutcome) -> Result<GatedVerdict, GovernanceError> {
        let policy = CalibrationPolicy::for_status(outcome.calibration);
        let mut verdict = policy.restrict(outcome.verdict);
        let confidence = policy.penalized_confidence(outcome.confidence);

        let violation = outcome.is_trusted && outcome.verdict != Verdict::Safe;
        if violation {
            error!(
                domain = %outcome.domain,
                verdict = %outcome.verdict,
                "non-SAFE verdict on trusted domain"
            );
            self.engine.record_event(SafetyEvent::SuspiciousOnTrusted)?;
            if verdict == Verdict::Phishing {
                verdict = Verdict::Suspicious;
            }
        }

        let downgraded = verdict != outcome.verdict;
        if downgraded {
            warn!(
                domain = %outcome.domain,
                from = %outcome.verdict,
                to = %verdict,
                "verdict downgraded by governance"
            );
        }

        Ok(GatedVerdict {
            verdict,
            confidence,
            downgraded,
            warning: policy.warning_message.map(str::to_owned),
            violation,
        })
    }

    /// [`Self::evaluate`] on the blocking pool, so the snapshot write never
    /// stalls the async executor.
    ///
    /// # Errors
    ///
    /// As [`Self::evaluate`], or [`GovernanceError::Interrupted`] if the
    /// blocking task was cancelled.
    pub async fn evaluate_async(&self, outcome: ScanOutcome) -> Result<GatedVerdict, GovernanceError> {
        let gate = self.clone();
        match tokio::task::spawn_blocking(move || gate.evaluate(&outcome)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(GovernanceError::Interrupted(e.to_string())),
        }
    }
}
