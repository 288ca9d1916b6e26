//! Time-boxed policy exceptions and the authority matrix that guards them.
//!
//! | kind      | permitted authority       | lifetime              |
//! |-----------|---------------------------|-----------------------|
//! | permanent | security-team + ticket    | never expires         |
//! | emergency | security-team, on-call    | at most 24h           |
//! | testing   | ci-system                 | at most 1h            |
//!
//! Records are never deleted. Expiry and revocation only clear `is_active`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::budget::{BudgetKind, SafetyBudgetMonitor};
use super::store::GovernanceState;
use super::{require_text, GovernanceError};
use crate::alerts::Alert;

/// Kind of override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideKind {
    /// Standing policy change; requires full review.
    Permanent,
    /// Incident response; must expire.
    Emergency,
    /// Automated test fixture; expires quickly.
    Testing,
}

impl OverrideKind {
    /// Every kind.
    pub const ALL: [Self; 3] = [Self::Permanent, Self::Emergency, Self::Testing];

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::Emergency => "emergency",
            Self::Testing => "testing",
        }
    }

    /// Uppercase name used in operator messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Permanent => "PERMANENT",
            Self::Emergency => "EMERGENCY",
            Self::Testing => "TESTING",
        }
    }
}

impl fmt::Display for OverrideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unrecognised override kind or authority.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what} '{value}'")]
pub struct ParseOverrideError {
    what: &'static str,
    value: String,
}

impl FromStr for OverrideKind {
    type Err = ParseOverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permanent" => Ok(Self::Permanent),
            "emergency" => Ok(Self::Emergency),
            "testing" => Ok(Self::Testing),
            _ => Err(ParseOverrideError {
                what: "override kind",
                value: s.to_owned(),
            }),
        }
    }
}

/// Who is asking for the override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverrideAuthority {
    /// Owns standing policy.
    SecurityTeam,
    /// Incident responder.
    OnCall,
    /// Automation.
    CiSystem,
}

impl OverrideAuthority {
    /// Every authority.
    pub const ALL: [Self; 3] = [Self::SecurityTeam, Self::OnCall, Self::CiSystem];

    /// Kebab-case wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SecurityTeam => "security-team",
            Self::OnCall => "on-call",
            Self::CiSystem => "ci-system",
        }
    }
}

impl fmt::Display for OverrideAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverrideAuthority {
    type Err = ParseOverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "security-team" => Ok(Self::SecurityTeam),
            "on-call" => Ok(Self::OnCall),
            "ci-system" => Ok(Self::CiSystem),
            _ => Err(ParseOverrideError {
                what: "override authority",
                value: s.to_owned(),
            }),
        }
    }
}

/// Whether `authority` may issue an override of `kind`.
///
/// No wildcard arm: a new kind or authority does not compile until placed
/// in the matrix.
pub fn authority_permits(kind: OverrideKind, authority: OverrideAuthority) -> bool {
    use OverrideAuthority::{CiSystem, OnCall, SecurityTeam};
    use OverrideKind::{Emergency, Permanent, Testing};

    match (kind, authority) {
        (Permanent, SecurityTeam) => true,
        (Permanent, OnCall | CiSystem) => false,
        (Emergency, SecurityTeam | OnCall) => true,
        (Emergency, CiSystem) => false,
        (Testing, CiSystem) => true,
        (Testing, SecurityTeam | OnCall) => false,
    }
}

fn authority_rejection(kind: OverrideKind, authority: OverrideAuthority) -> String {
    match kind {
        OverrideKind::Permanent => {
            format!("PERMANENT overrides require SECURITY_TEAM authority, got {authority}")
        }
        OverrideKind::Emergency => {
            format!("EMERGENCY overrides require SECURITY_TEAM or ON_CALL, got {authority}")
        }
        OverrideKind::Testing => {
            format!("TESTING overrides are for CI_SYSTEM only, got {authority}")
        }
    }
}

/// A persisted policy exception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Override {
    /// `OVERRIDE-<YYYYmmddHHMMSS>-<8 hex>`.
    #[serde(alias = "override_id")]
    pub id: String,
    /// Override kind.
    #[serde(alias = "override_type")]
    pub kind: OverrideKind,
    /// Issuing authority.
    pub authority: OverrideAuthority,
    /// Issue time.
    pub created_at: DateTime<Utc>,
    /// Expiry; `None` for permanent overrides.
    pub expires_at: Option<DateTime<Utc>>,
    /// Domains the override applies to.
    #[serde(alias = "affected_domains")]
    pub domains: Vec<String>,
    /// Why it was needed.
    pub reason: String,
    /// Approver identity.
    pub approved_by: String,
    /// Review ticket; mandatory for permanent overrides.
    pub review_ticket: Option<String>,
    /// Cleared by revocation or expiry.
    pub is_active: bool,
}

impl Override {
    /// Whether `now` is past the expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| now > t)
    }
}

/// Parameters for [`OverrideLedger::request`].
#[derive(Debug, Clone)]
pub struct OverrideRequest {
    /// Requested kind.
    pub kind: OverrideKind,
    /// Requesting authority.
    pub authority: OverrideAuthority,
    /// Affected domains; must not be empty.
    pub domains: Vec<String>,
    /// Justification.
    pub reason: String,
    /// Approver identity.
    pub approved_by: String,
    /// Review ticket.
    pub review_ticket: Option<String>,
    /// Requested lifetime; capped to the kind's maximum.
    pub duration: Option<Duration>,
}

impl OverrideRequest {
    /// Start a request for `kind` by `authority`.
    pub fn new(kind: OverrideKind, authority: OverrideAuthority) -> Self {
        Self {
            kind,
            authority,
            domains: Vec::new(),
            reason: String::new(),
            approved_by: String::new(),
            review_ticket: None,
            duration: None,
        }
    }

    /// Set the affected domains.
    pub fn domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Set the justification.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set the approver.
    pub fn approved_by(mut self, approver: impl Into<String>) -> Self {
        self.approved_by = approver.into();
        self
    }

    /// Attach a review ticket.
    pub fn ticket(mut self, ticket: impl Into<String>) -> Self {
        self.review_ticket = Some(ticket.into());
        self
    }

    /// Request a specific lifetime.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Maximum lifetimes per override kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverridePolicy {
    /// Emergency cap.
    pub emergency_max: Duration,
    /// Testing cap.
    pub testing_max: Duration,
}

impl Default for OverridePolicy {
    fn default() -> Self {
        Self {
            emergency_max: Duration::hours(24),
            testing_max: Duration::hours(1),
        }
    }
}

impl OverridePolicy {
    /// Maximum lifetime for `kind`; `None` means it never expires.
    pub fn max_duration(&self, kind: OverrideKind) -> Option<Duration> {
        match kind {
            OverrideKind::Permanent => None,
            OverrideKind::Emergency => Some(self.emergency_max),
            OverrideKind::Testing => Some(self.testing_max),
        }
    }
}

/// Validates, issues, expires and revokes overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverrideLedger {
    policy: OverridePolicy,
}

impl OverrideLedger {
    /// Create a ledger enforcing `policy`.
    pub fn new(policy: OverridePolicy) -> Self {
        Self { policy }
    }

    /// Validate and issue an override.
    ///
    /// Check order: freeze, authority matrix (and ticket), request fields,
    /// expiry, override budget. Only the budget breach mutates `state`
    /// before failing: it freezes the system.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::Frozen`], [`GovernanceError::Validation`] or
    /// [`GovernanceError::BudgetExceeded`].
    pub fn request(
        &self,
        state: &mut GovernanceState,
        monitor: &SafetyBudgetMonitor,
        request: OverrideRequest,
        now: DateTime<Utc>,
        alerts: &mut Vec<Alert>,
    ) -> Result<Override, GovernanceError> {
        let budget = &mut state.safety_budget;
        if budget.is_frozen {
            return Err(GovernanceError::Frozen {
                reason: budget.freeze_reason.clone().unwrap_or_default(),
            });
        }

        if !authority_permits(request.kind, request.authority) {
            return Err(GovernanceError::Validation(authority_rejection(
                request.kind,
                request.authority,
            )));
        }
        let review_ticket = request
            .review_ticket
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty());
        if request.kind == OverrideKind::Permanent && review_ticket.is_none() {
            return Err(GovernanceError::Validation(
                "PERMANENT overrides require a review_ticket reference".to_owned(),
            ));
        }

        let domains: Vec<String> = request
            .domains
            .iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        if domains.is_empty() {
            return Err(GovernanceError::Validation(
                "override must name at least one affected domain".to_owned(),
            ));
        }
        require_text("reason", &request.reason)?;
        require_text("approved_by", &request.approved_by)?;

        let expires_at = self.expiration(request.kind, request.duration, now)?;

        let limit = monitor.limits().max_overrides_per_window;
        let would_use = budget.overrides_used.saturating_add(1);
        if would_use > limit {
            let reason = format!(
                "safety budget exceeded: {} ({would_use}/{limit})",
                BudgetKind::OverridesPerWindow
            );
            monitor.trigger_freeze(budget, &reason, now, alerts);
            return Err(GovernanceError::BudgetExceeded {
                budget: BudgetKind::OverridesPerWindow,
                used: would_use,
                limit,
            });
        }

        let record = Override {
            id: generate_override_id(now),
            kind: request.kind,
            authority: request.authority,
            created_at: now,
            expires_at,
            domains,
            reason: request.reason,
            approved_by: request.approved_by,
            review_ticket,
            is_active: true,
        };

        budget.overrides_used = would_use;
        state.overrides.push(record.clone());
        alerts.push(Alert::OverrideActivated(record.clone()));
        Ok(record)
    }

    /// Effective expiry for a new override of `kind`.
    fn expiration(
        &self,
        kind: OverrideKind,
        requested: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, GovernanceError> {
        let Some(max) = self.policy.max_duration(kind) else {
            return Ok(None);
        };

        let duration = match requested {
            None => max,
            Some(d) if d <= Duration::zero() => {
                return Err(GovernanceError::Validation(
                    "override duration must be positive".to_owned(),
                ));
            }
            Some(d) if d > max => {
                warn!(
                    kind = %kind,
                    requested_mins = d.num_minutes(),
                    max_mins = max.num_minutes(),
                    "requested override duration exceeds maximum, capping"
                );
                max
            }
            Some(d) => d,
        };

        now.checked_add_signed(duration)
            .map(Some)
            .ok_or_else(|| GovernanceError::Validation("override expiry out of range".to_owned()))
    }

    /// Deactivate an override.
    ///
    /// Returns `false` if it was already inactive.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::NotFound`] if no override has this id.
    pub fn revoke(
        &self,
        overrides: &mut [Override],
        id: &str,
        revoked_by: &str,
        reason: &str,
    ) -> Result<bool, GovernanceError> {
        let record = overrides
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| GovernanceError::NotFound(id.to_owned()))?;

        if !record.is_active {
            info!(override_id = %id, "override already inactive, nothing to revoke");
            return Ok(false);
        }
        record.is_active = false;
        warn!(
            override_id = %id,
            revoked_by = %revoked_by,
            reason = %reason,
            "override revoked"
        );
        Ok(true)
    }

    /// Clear `is_active` on every override past its expiry. Returns how many changed.
    pub fn demote_expired(&self, overrides: &mut [Override], now: DateTime<Utc>) -> usize {
        let mut demoted = 0usize;
        for record in overrides.iter_mut().filter(|o| o.is_active && o.is_expired(now)) {
            record.is_active = false;
            demoted = demoted.saturating_add(1);
            info!(override_id = %record.id, "override expired");
        }
        demoted
    }

    /// Active overrides in issue order. Call [`Self::demote_expired`] first.
    pub fn active(overrides: &[Override]) -> Vec<Override> {
        overrides.iter().filter(|o| o.is_active).cloned().collect()
    }
}

/// Build a unique override identifier stamped with `now`.
fn generate_override_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "OVERRIDE-{}-{}",
        now.format("%Y%m%d%H%M%S"),
        suffix.get(..8).unwrap_or(&suffix)
    )
}
