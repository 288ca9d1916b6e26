//! Safety budgets and the Normal/Frozen state machine.
//!
//! Three counters accumulate within a budget window. Crossing any limit
//! freezes the system: new overrides are refused until an operator lifts
//! the freeze, which also restarts the window from zero. There is no
//! automatic recovery from Frozen.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{require_text, GovernanceError};
use crate::alerts::Alert;

/// Suspicious-on-trusted budget. Zero: the first occurrence is the violation.
pub const SUSPICIOUS_ON_TRUSTED_LIMIT: u32 = 0;

/// Which budget a counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetKind {
    /// SUSPICIOUS (or worse) verdicts on trusted domains.
    SuspiciousOnTrusted,
    /// Overrides issued in the window.
    OverridesPerWindow,
    /// PHISHING verdicts on canary domains.
    CanaryFailures,
}

impl BudgetKind {
    /// Every budget, in reporting order.
    pub const ALL: [Self; 3] = [
        Self::SuspiciousOnTrusted,
        Self::OverridesPerWindow,
        Self::CanaryFailures,
    ];

    /// Stable snake_case name used in reasons and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuspiciousOnTrusted => "suspicious_on_trusted",
            Self::OverridesPerWindow => "overrides_per_window",
            Self::CanaryFailures => "canary_failures",
        }
    }
}

impl fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Safety-relevant event reported into the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyEvent {
    /// The pipeline produced a non-SAFE verdict for a trusted domain.
    SuspiciousOnTrusted,
    /// An override was used.
    Override,
    /// A canary domain received a PHISHING verdict.
    CanaryFailure,
}

impl SafetyEvent {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuspiciousOnTrusted => "suspicious_on_trusted",
            Self::Override => "override",
            Self::CanaryFailure => "canary_failure",
        }
    }
}

impl fmt::Display for SafetyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unrecognised event name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown safety event '{0}' (expected suspicious_on_trusted, override or canary_failure)")]
pub struct ParseSafetyEventError(pub String);

impl FromStr for SafetyEvent {
    type Err = ParseSafetyEventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "suspicious_on_trusted" => Ok(Self::SuspiciousOnTrusted),
            "override" => Ok(Self::Override),
            "canary_failure" => Ok(Self::CanaryFailure),
            _ => Err(ParseSafetyEventError(s.to_owned())),
        }
    }
}

/// Per-window limits. Suspicious-on-trusted is fixed at zero and not listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetLimits {
    /// Maximum overrides issued per window.
    pub max_overrides_per_window: u32,
    /// Maximum canary failures per window.
    pub max_canary_failures: u32,
    /// Nominal window length, reported as `window_elapsed`.
    pub window: Duration,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            max_overrides_per_window: 3,
            max_canary_failures: 5,
            window: Duration::hours(24),
        }
    }
}

impl BudgetLimits {
    /// Limit for a given budget.
    pub fn limit(&self, kind: BudgetKind) -> u32 {
        match kind {
            BudgetKind::SuspiciousOnTrusted => SUSPICIOUS_ON_TRUSTED_LIMIT,
            BudgetKind::OverridesPerWindow => self.max_overrides_per_window,
            BudgetKind::CanaryFailures => self.max_canary_failures,
        }
    }
}

/// Rolling-window counters plus freeze state, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyBudget {
    /// Start of the current window.
    pub window_start: DateTime<Utc>,
    /// Non-SAFE verdicts observed on trusted domains.
    pub suspicious_on_trusted: u32,
    /// Overrides issued in the window.
    pub overrides_used: u32,
    /// Canary failures in the window.
    pub canary_failures: u32,
    /// Whether the freeze is engaged.
    pub is_frozen: bool,
    /// Why the freeze engaged. Present whenever `is_frozen` is set.
    pub freeze_reason: Option<String>,
}

impl SafetyBudget {
    /// Fresh window starting at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            suspicious_on_trusted: 0,
            overrides_used: 0,
            canary_failures: 0,
            is_frozen: false,
            freeze_reason: None,
        }
    }

    /// Current counter for a budget.
    pub fn used(&self, kind: BudgetKind) -> u32 {
        match kind {
            BudgetKind::SuspiciousOnTrusted => self.suspicious_on_trusted,
            BudgetKind::OverridesPerWindow => self.overrides_used,
            BudgetKind::CanaryFailures => self.canary_failures,
        }
    }

    /// Which budgets are over their limit.
    pub fn exceeded(&self, limits: &BudgetLimits) -> BudgetBreaches {
        let over = |kind| self.used(kind) > limits.limit(kind);
        BudgetBreaches {
            suspicious_on_trusted: over(BudgetKind::SuspiciousOnTrusted),
            overrides_per_window: over(BudgetKind::OverridesPerWindow),
            canary_failures: over(BudgetKind::CanaryFailures),
        }
    }
}

/// Per-budget exceeded flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetBreaches {
    /// Suspicious-on-trusted count is above zero.
    pub suspicious_on_trusted: bool,
    /// Override count is above its limit.
    pub overrides_per_window: bool,
    /// Canary failure count is above its limit.
    pub canary_failures: bool,
}

impl BudgetBreaches {
    /// Whether `kind` is breached.
    pub fn get(&self, kind: BudgetKind) -> bool {
        match kind {
            BudgetKind::SuspiciousOnTrusted => self.suspicious_on_trusted,
            BudgetKind::OverridesPerWindow => self.overrides_per_window,
            BudgetKind::CanaryFailures => self.canary_failures,
        }
    }

    /// Budgets breached here that were not breached in `before`.
    pub fn newly_exceeded(&self, before: &Self) -> Vec<BudgetKind> {
        BudgetKind::ALL
            .into_iter()
            .filter(|k| self.get(*k) && !before.get(*k))
            .collect()
    }

    /// Every breached budget.
    pub fn kinds(&self) -> Vec<BudgetKind> {
        BudgetKind::ALL
            .into_iter()
            .filter(|k| self.get(*k))
            .collect()
    }

    /// Whether any budget is breached.
    pub fn any(&self) -> bool {
        BudgetKind::ALL.into_iter().any(|k| self.get(k))
    }
}

/// Counter values in the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetCounters {
    /// Non-SAFE verdicts on trusted domains.
    pub suspicious_on_trusted: u32,
    /// Overrides issued.
    pub overrides_used: u32,
    /// Canary failures.
    pub canary_failures: u32,
}

/// Configured limits, as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLimitReport {
    /// Always zero.
    pub suspicious_on_trusted: u32,
    /// Override limit.
    pub overrides_per_window: u32,
    /// Canary failure limit.
    pub canary_failures: u32,
}

/// Health summary returned by `status()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyStatus {
    /// Whether the freeze is engaged.
    pub is_frozen: bool,
    /// Why, when frozen.
    pub freeze_reason: Option<String>,
    /// Raw counters.
    pub counters: BudgetCounters,
    /// Configured limits.
    pub limits: BudgetLimitReport,
    /// `"used/limit"` per budget.
    pub budget_usage: std::collections::BTreeMap<String, String>,
    /// Which budgets are breached.
    pub budget_exceeded: BudgetBreaches,
    /// Number of overrides currently active.
    pub active_overrides: usize,
    /// Start of the current window.
    pub window_start: DateTime<Utc>,
    /// Whether the window is older than its nominal length. Informational only.
    pub window_elapsed: bool,
}

/// Applies budget limits to a [`SafetyBudget`] and drives freezes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyBudgetMonitor {
    limits: BudgetLimits,
}

impl SafetyBudgetMonitor {
    /// Create a monitor enforcing `limits`.
    pub fn new(limits: BudgetLimits) -> Self {
        Self { limits }
    }

    /// Limits in force.
    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    /// Count an event and freeze if any limit is over.
    ///
    /// `suspicious_on_trusted` freezes unconditionally: its budget is zero, so
    /// the first occurrence is already the violation. While frozen, only a
    /// newly breached limit is announced again.
    pub fn record_event(
        &self,
        budget: &mut SafetyBudget,
        event: SafetyEvent,
        now: DateTime<Utc>,
        alerts: &mut Vec<Alert>,
    ) {
        let before = budget.exceeded(&self.limits);
        match event {
            SafetyEvent::SuspiciousOnTrusted => {
                budget.suspicious_on_trusted = budget.suspicious_on_trusted.saturating_add(1);
                self.trigger_freeze(
                    budget,
                    "CRITICAL: SUSPICIOUS verdict on trusted domain (suspicious_on_trusted budget is zero)",
                    now,
                    alerts,
                );
                return;
            }
            SafetyEvent::Override => {
                budget.overrides_used = budget.overrides_used.saturating_add(1);
            }
            SafetyEvent::CanaryFailure => {
                budget.canary_failures = budget.canary_failures.saturating_add(1);
            }
        }
        info!(event = %event, "safety event recorded");

        let after = budget.exceeded(&self.limits);
        let mut causes = after.newly_exceeded(&before);
        if causes.is_empty() && !budget.is_frozen {
            causes = after.kinds();
        }
        self.freeze_for(budget, &causes, "safety budget exceeded", now, alerts);
    }

    /// Freeze an unfrozen budget whose counters are already over a limit.
    ///
    /// Counters carried over from a snapshot written under looser limits
    /// land here. Returns whether a freeze was engaged.
    pub fn enforce_limits(
        &self,
        budget: &mut SafetyBudget,
        now: DateTime<Utc>,
        alerts: &mut Vec<Alert>,
    ) -> bool {
        if budget.is_frozen {
            return false;
        }
        let causes = budget.exceeded(&self.limits).kinds();
        if causes.is_empty() {
            return false;
        }
        warn!(?causes, "persisted counters exceed configured limits");
        self.freeze_for(
            budget,
            &causes,
            "safety budget exceeded under current limits",
            now,
            alerts,
        );
        true
    }

    fn freeze_for(
        &self,
        budget: &mut SafetyBudget,
        causes: &[BudgetKind],
        prefix: &str,
        now: DateTime<Utc>,
        alerts: &mut Vec<Alert>,
    ) {
        for &kind in causes {
            let reason = format!(
                "{prefix}: {kind} ({}/{})",
                budget.used(kind),
                self.limits.limit(kind)
            );
            self.trigger_freeze(budget, &reason, now, alerts);
        }
    }

    /// Engage the freeze.
    ///
    /// Already frozen: the new cause is appended to the recorded reason and
    /// announced again; nothing else changes.
    pub fn trigger_freeze(
        &self,
        budget: &mut SafetyBudget,
        reason: &str,
        now: DateTime<Utc>,
        alerts: &mut Vec<Alert>,
    ) {
        let combined = match budget.freeze_reason.take() {
            Some(existing) if budget.is_frozen => format!("{existing}; {reason}"),
            _ => reason.to_owned(),
        };
        budget.is_frozen = true;
        budget.freeze_reason = Some(combined);
        alerts.push(Alert::FreezeTriggered {
            reason: reason.to_owned(),
            at: now,
        });
    }

    /// Clear the freeze and restart the window from zero.
    ///
    /// Returns `false` without validating anything when not frozen.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::Validation`] if any of the identity,
    /// resolution or ticket fields is blank.
    pub fn lift_freeze(
        &self,
        budget: &mut SafetyBudget,
        lifted_by: &str,
        resolution: &str,
        ticket: &str,
        now: DateTime<Utc>,
        alerts: &mut Vec<Alert>,
    ) -> Result<bool, GovernanceError> {
        if !budget.is_frozen {
            return Ok(false);
        }
        require_text("lifted_by", lifted_by)?;
        require_text("resolution", resolution)?;
        require_text("review ticket", ticket)?;

        warn!(
            lifted_by = %lifted_by,
            resolution = %resolution,
            ticket = %ticket,
            previous_reason = budget.freeze_reason.as_deref().unwrap_or(""),
            "freeze lifted, budget window reset"
        );
        *budget = SafetyBudget::new(now);
        alerts.push(Alert::FreezeLifted {
            lifted_by: lifted_by.to_owned(),
            resolution: resolution.to_owned(),
            ticket: ticket.to_owned(),
            at: now,
        });
        Ok(true)
    }

    /// Restart the window outside of a freeze.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::Frozen`] while frozen (only a lift leaves
    /// Frozen) and [`GovernanceError::Validation`] for blank fields.
    pub fn reset_window(
        &self,
        budget: &mut SafetyBudget,
        reset_by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), GovernanceError> {
        if budget.is_frozen {
            return Err(GovernanceError::Frozen {
                reason: budget.freeze_reason.clone().unwrap_or_default(),
            });
        }
        require_text("reset_by", reset_by)?;
        require_text("reason", reason)?;
        info!(
            reset_by = %reset_by,
            reason = %reason,
            previous_start = %budget.window_start,
            "budget window reset"
        );
        *budget = SafetyBudget::new(now);
        Ok(())
    }

    /// Summarise the budget for health reporting.
    pub fn status(
        &self,
        budget: &SafetyBudget,
        active_overrides: usize,
        now: DateTime<Utc>,
    ) -> SafetyStatus {
        let budget_usage = BudgetKind::ALL
            .into_iter()
            .map(|k| {
                (
                    k.as_str().to_owned(),
                    format!("{}/{}", budget.used(k), self.limits.limit(k)),
                )
            })
            .collect();
        let window_elapsed = now.signed_duration_since(budget.window_start) >= self.limits.window;

        SafetyStatus {
            is_frozen: budget.is_frozen,
            freeze_reason: budget.freeze_reason.clone(),
            counters: BudgetCounters {
                suspicious_on_trusted: budget.suspicious_on_trusted,
                overrides_used: budget.overrides_used,
                canary_failures: budget.canary_failures,
            },
            limits: BudgetLimitReport {
                suspicious_on_trusted: SUSPICIOUS_ON_TRUSTED_LIMIT,
                overrides_per_window: self.limits.max_overrides_per_window,
                canary_failures: self.limits.max_canary_failures,
            },
            budget_usage,
            budget_exceeded: budget.exceeded(&self.limits),
            active_overrides,
            window_start: budget.window_start,
            window_elapsed,
        }
    }
}
