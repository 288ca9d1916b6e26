//! Operator-visible notices for overrides and safety freezes.
//!
//! These are not diagnostics: an override or a freeze must be impossible to
//! miss. The engine hands every notice to an [`AlertSink`] after the state
//! change that caused it has been persisted.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use crate::governance::Override;

/// Width of the banner frame.
const BANNER_WIDTH: usize = 70;

/// A notice the operator must see.
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    /// A policy override was issued.
    OverrideActivated(Override),
    /// The safety freeze engaged (or gained an additional cause).
    FreezeTriggered {
        /// Cause of the freeze.
        reason: String,
        /// When it happened.
        at: DateTime<Utc>,
    },
    /// An operator lifted the freeze and the budget window restarted.
    FreezeLifted {
        /// Operator identity.
        lifted_by: String,
        /// Documented resolution.
        resolution: String,
        /// Review ticket reference.
        ticket: String,
        /// When it happened.
        at: DateTime<Utc>,
    },
}

/// Destination for operator notices.
pub trait AlertSink: Send + Sync {
    /// Deliver one notice. Must not fail; sinks swallow their own I/O errors.
    fn emit(&self, alert: &Alert);
}

/// Prints framed banners to stderr and mirrors them into `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrAlertSink;

impl AlertSink for StderrAlertSink {
    fn emit(&self, alert: &Alert) {
        eprintln!("{}", render(alert));
        match alert {
            Alert::OverrideActivated(o) => warn!(
                override_id = %o.id,
                kind = %o.kind,
                authority = %o.authority,
                approved_by = %o.approved_by,
                "policy override activated"
            ),
            Alert::FreezeTriggered { reason, .. } => {
                error!(reason = %reason, "safety freeze triggered");
            }
            Alert::FreezeLifted {
                lifted_by, ticket, ..
            } => warn!(lifted_by = %lifted_by, ticket = %ticket, "safety freeze lifted"),
        }
    }
}

/// Keeps notices in memory, for hosts that forward them elsewhere and for tests.
#[derive(Debug, Default)]
pub struct CollectingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl CollectingAlertSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every notice received so far.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain the received notices.
    pub fn take(&self) -> Vec<Alert> {
        std::mem::take(&mut *self.alerts.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl AlertSink for CollectingAlertSink {
    fn emit(&self, alert: &Alert) {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(alert.clone());
    }
}

/// Render a notice as the multi-line banner shown to operators.
pub fn render(alert: &Alert) -> String {
    match alert {
        Alert::OverrideActivated(o) => {
            let rule = "=".repeat(BANNER_WIDTH);
            let expires = o
                .expires_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "NEVER (permanent)".to_owned());
            [
                String::new(),
                rule.clone(),
                "\u{26a0}\u{fe0f}  POLICY OVERRIDE ACTIVATED".to_owned(),
                rule.clone(),
                format!("ID:        {}", o.id),
                format!("Type:      {}", o.kind),
                format!("Authority: {}", o.authority),
                format!("Domains:   {}", o.domains.join(", ")),
                format!("Expires:   {expires}"),
                format!("Reason:    {}", o.reason),
                format!("Approved:  {}", o.approved_by),
                format!("Ticket:    {}", o.review_ticket.as_deref().unwrap_or("N/A")),
                rule,
                String::new(),
            ]
            .join("\n")
        }
        Alert::FreezeTriggered { reason, at } => {
            let rule = "!".repeat(BANNER_WIDTH);
            [
                String::new(),
                rule.clone(),
                "\u{1f6a8}  SAFETY FREEZE TRIGGERED".to_owned(),
                rule.clone(),
                format!("Reason: {reason}"),
                format!("Time:   {}", at.to_rfc3339()),
                String::new(),
                "ACTIONS REQUIRED:".to_owned(),
                "1. Investigate the safety violation".to_owned(),
                "2. Fix root cause".to_owned(),
                "3. Lift the freeze with `tripwire lift-freeze --by <you> --resolution <what> --ticket <id>`"
                    .to_owned(),
                rule,
                String::new(),
            ]
            .join("\n")
        }
        Alert::FreezeLifted {
            lifted_by,
            resolution,
            ticket,
            at,
        } => {
            let rule = "=".repeat(BANNER_WIDTH);
            [
                String::new(),
                rule.clone(),
                "SAFETY FREEZE LIFTED".to_owned(),
                rule.clone(),
                format!("Lifted by:  {lifted_by}"),
                format!("Resolution: {resolution}"),
                format!("Ticket:     {ticket}"),
                format!("Time:       {}", at.to_rfc3339()),
                "Budget window reset; all counters are zero.".to_owned(),
                rule,
                String::new(),
            ]
            .join("\n")
        }
    }
}
