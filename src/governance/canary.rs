//! Canary domains: evidence accumulation and promotion eligibility.
//!
//! A canary is promotable only after enough runs, enough evaluated
//! predictions, an unbroken pass streak and a perfect pass rate. Promotion
//! itself only produces a record; editing the trusted-domain manifest is a
//! separate, human-reviewed step.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::budget::{SafetyBudgetMonitor, SafetyEvent};
use super::store::GovernanceState;
use super::{require_text, GovernanceError};
use crate::alerts::Alert;
use crate::verdict::Verdict;

/// Approval fields a promotion must carry.
pub const APPROVAL_METADATA_REQUIRED: [&str; 3] = ["approved_by", "approval_date", "review_ticket"];

/// Minimum evidence before a canary can be promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanaryThresholds {
    /// Minimum runs, and minimum consecutive passes.
    pub min_runs: u32,
    /// Minimum cumulative predictions evaluated.
    pub min_sample_size: u64,
}

impl Default for CanaryThresholds {
    fn default() -> Self {
        Self {
            min_runs: 5,
            min_sample_size: 100,
        }
    }
}

/// Accumulated evidence for one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanarySignal {
    /// Normalised domain name.
    pub domain: String,
    /// Total recorded runs.
    pub test_runs: u32,
    /// Runs with a non-PHISHING verdict.
    pub passes: u32,
    /// Runs with a PHISHING verdict.
    pub failures: u32,
    /// Predictions evaluated across all runs.
    pub sample_size: u64,
    /// Time of the latest run.
    pub last_run: Option<DateTime<Utc>>,
    /// Verdict of the latest run.
    pub last_verdict: Option<Verdict>,
    /// Passes since the last failure.
    pub consecutive_passes: u32,
}

impl CanarySignal {
    /// Empty signal for `domain`.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            test_runs: 0,
            passes: 0,
            failures: 0,
            sample_size: 0,
            last_run: None,
            last_verdict: None,
            consecutive_passes: 0,
        }
    }

    /// Passes over runs; zero when there are no runs.
    pub fn pass_rate(&self) -> f64 {
        if self.test_runs == 0 {
            return 0.0;
        }
        f64::from(self.passes) / f64::from(self.test_runs)
    }

    /// Enough runs and enough predictions to judge.
    pub fn has_sufficient_signal(&self, thresholds: &CanaryThresholds) -> bool {
        self.test_runs >= thresholds.min_runs && self.sample_size >= thresholds.min_sample_size
    }

    /// All promotion criteria hold.
    pub fn is_promotable(&self, thresholds: &CanaryThresholds) -> bool {
        self.has_sufficient_signal(thresholds)
            && self.consecutive_passes >= thresholds.min_runs
            && self.passes == self.test_runs
    }
}

/// Result of an eligibility check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionEligibility {
    /// Whether every criterion holds.
    pub eligible: bool,
    /// Which criterion failed, or confirmation that all hold.
    pub reason: String,
    /// Evidence considered, if any was recorded.
    pub signal: Option<CanarySignal>,
    /// Eligibility is necessary but not sufficient: a human must approve.
    pub requires_approval: bool,
    /// Approval fields the promotion must carry.
    pub approval_metadata_required: Vec<String>,
}

impl PromotionEligibility {
    fn rejected(reason: String, signal: Option<CanarySignal>) -> Self {
        Self {
            eligible: false,
            reason,
            signal,
            requires_approval: false,
            approval_metadata_required: Vec::new(),
        }
    }
}

/// Evidence that a canary was approved for promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionRecord {
    /// Promoted domain.
    pub domain: String,
    /// Approval time.
    pub promoted_at: DateTime<Utc>,
    /// Approver identity.
    pub approved_by: String,
    /// Review ticket.
    pub review_ticket: String,
    /// Signal that justified the promotion.
    pub signal: CanarySignal,
}

/// Records canary results and decides promotion eligibility.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanarySignalTracker {
    thresholds: CanaryThresholds,
}

impl CanarySignalTracker {
    /// Create a tracker with `thresholds`.
    pub fn new(thresholds: CanaryThresholds) -> Self {
        Self { thresholds }
    }

    /// Thresholds in force.
    pub fn thresholds(&self) -> &CanaryThresholds {
        &self.thresholds
    }

    /// Record one canary run.
    ///
    /// PHISHING is a failure: it resets the streak and counts against the
    /// canary-failure budget, which may freeze the system. Anything else
    /// is a pass.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::Validation`] for a blank domain.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        state: &mut GovernanceState,
        monitor: &SafetyBudgetMonitor,
        domain: &str,
        verdict: Verdict,
        sample_size: u64,
        now: DateTime<Utc>,
        alerts: &mut Vec<Alert>,
    ) -> Result<CanarySignal, GovernanceError> {
        let domain = normalize_domain(domain)?;
        let signal = state
            .canary_signals
            .entry(domain.clone())
            .or_insert_with(|| CanarySignal::new(domain.clone()));

        signal.test_runs = signal.test_runs.saturating_add(1);
        signal.sample_size = signal.sample_size.saturating_add(sample_size);
        signal.last_run = Some(now);
        signal.last_verdict = Some(verdict);

        if verdict == Verdict::Phishing {
            signal.failures = signal.failures.saturating_add(1);
            signal.consecutive_passes = 0;
            let snapshot = signal.clone();
            info!(domain = %domain, failures = snapshot.failures, "canary failure recorded");
            monitor.record_event(
                &mut state.safety_budget,
                SafetyEvent::CanaryFailure,
                now,
                alerts,
            );
            return Ok(snapshot);
        }

        signal.passes = signal.passes.saturating_add(1);
        signal.consecutive_passes = signal.consecutive_passes.saturating_add(1);
        Ok(signal.clone())
    }

    /// Decide whether `domain` may be promoted. Read-only.
    pub fn eligibility(
        &self,
        signals: &BTreeMap<String, CanarySignal>,
        domain: &str,
    ) -> PromotionEligibility {
        let key = domain.trim().to_ascii_lowercase();
        let Some(signal) = signals.get(&key) else {
            return PromotionEligibility::rejected("no signal data recorded".to_owned(), None);
        };
        let th = &self.thresholds;

        if !signal.has_sufficient_signal(th) {
            let mut shortfalls = Vec::new();
            if signal.test_runs < th.min_runs {
                shortfalls.push(format!("{}/{} runs", signal.test_runs, th.min_runs));
            }
            if signal.sample_size < th.min_sample_size {
                shortfalls.push(format!(
                    "{}/{} samples",
                    signal.sample_size, th.min_sample_size
                ));
            }
            return PromotionEligibility::rejected(
                format!("insufficient signal: {}", shortfalls.join(", ")),
                Some(signal.clone()),
            );
        }

        if signal.consecutive_passes < th.min_runs {
            return PromotionEligibility::rejected(
                format!(
                    "insufficient consecutive passes: {}/{}",
                    signal.consecutive_passes, th.min_runs
                ),
                Some(signal.clone()),
            );
        }

        if signal.passes != signal.test_runs {
            return PromotionEligibility::rejected(
                format!(
                    "pass rate {:.1}% < 100% required",
                    signal.pass_rate() * 100.0
                ),
                Some(signal.clone()),
            );
        }

        PromotionEligibility {
            eligible: true,
            reason: "all promotion criteria met; human approval (approved_by, approval_date, review_ticket) required before promotion".to_owned(),
            signal: Some(signal.clone()),
            requires_approval: true,
            approval_metadata_required: APPROVAL_METADATA_REQUIRED
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        }
    }

    /// Produce a promotion record for an eligible canary.
    ///
    /// Does not touch the trusted-domain manifest.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::Validation`] if the canary is ineligible or the
    /// approval metadata is blank.
    pub fn promote(
        &self,
        signals: &BTreeMap<String, CanarySignal>,
        domain: &str,
        approved_by: &str,
        review_ticket: &str,
        now: DateTime<Utc>,
    ) -> Result<PromotionRecord, GovernanceError> {
        let eligibility = self.eligibility(signals, domain);
        let signal = match eligibility.signal {
            Some(signal) if eligibility.eligible => signal,
            _ => {
                return Err(GovernanceError::Validation(format!(
                    "cannot promote {domain}: {}",
                    eligibility.reason
                )));
            }
        };
        require_text("approved_by", approved_by)?;
        require_text("review ticket", review_ticket)?;

        info!(domain = %signal.domain, approved_by = %approved_by, "canary promoted");
        Ok(PromotionRecord {
            domain: signal.domain.clone(),
            promoted_at: now,
            approved_by: approved_by.to_owned(),
            review_ticket: review_ticket.to_owned(),
            signal,
        })
    }
}

fn normalize_domain(domain: &str) -> Result<String, GovernanceError> {
    let domain = domain.trim().to_ascii_lowercase();
    if domain.is_empty() {
        return Err(GovernanceError::Validation(
            "canary domain must not be empty".to_owned(),
        ));
    }
    Ok(domain)
}
