//! Governance engine: executable policy between the classifier and users.
//!
//! The engine owns three collections of state (overrides, canary signals,
//! safety-budget counters), persists them as one versioned snapshot, and
//! refuses any policy change that would violate the override authority
//! matrix or a safety budget.
//!
//! Callers only ever touch [`engine::GovernanceEngine`]; the component
//! modules operate on borrowed state inside the engine's critical section.

use std::path::PathBuf;

pub mod budget;
pub mod calibration;
pub mod canary;
pub mod engine;
pub mod overrides;
pub mod store;
pub mod verifier;

pub use budget::{BudgetKind, BudgetLimits, SafetyBudget, SafetyBudgetMonitor, SafetyEvent, SafetyStatus};
pub use calibration::CalibrationPolicy;
pub use canary::{CanarySignal, CanarySignalTracker, CanaryThresholds, PromotionEligibility, PromotionRecord};
pub use engine::GovernanceEngine;
pub use overrides::{Override, OverrideAuthority, OverrideKind, OverrideLedger, OverridePolicy, OverrideRequest};
pub use store::{GovernanceState, StateStore, SCHEMA_VERSION};
pub use verifier::{ArtifactPaths, ConsistencyReport, PolicyDrift, PolicyVerifier};

/// Errors surfaced by governance operations.
#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    /// Malformed or policy-violating request. Nothing was mutated.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Issuing the request would breach a safety budget. The system froze.
    #[error("safety budget exceeded: {budget} ({used}/{limit}); system frozen")]
    BudgetExceeded {
        /// Which budget was breached.
        budget: BudgetKind,
        /// Counter value the request would have produced.
        used: u32,
        /// Configured limit for the window.
        limit: u32,
    },

    /// Override requested while the safety freeze is active.
    #[error("system is frozen: {reason}; no overrides allowed until the freeze is lifted")]
    Frozen {
        /// Recorded freeze reason.
        reason: String,
    },

    /// No override with the given identifier exists.
    #[error("override not found: {0}")]
    NotFound(String),

    /// The persisted snapshot exists but cannot be trusted.
    #[error("governance state at {path} is corrupt: {detail}")]
    StateCorruption {
        /// Snapshot location.
        path: PathBuf,
        /// What failed validation.
        detail: String,
    },

    /// Writing the snapshot failed; memory and disk are unchanged.
    #[error("failed to persist governance state to {path}")]
    Persistence {
        /// Snapshot location.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A thread panicked while holding the engine lock.
    #[error("governance state lock poisoned")]
    LockPoisoned,

    /// A background governance task ended before completing.
    #[error("governance task was interrupted: {0}")]
    Interrupted(String),
}

impl GovernanceError {
    /// Whether the failed operation still changed state that must be persisted.
    ///
    /// Only a budget breach qualifies: the freeze it triggers outlives the
    /// rejected request.
    pub fn changes_state(&self) -> bool {
        matches!(self, Self::BudgetExceeded { .. })
    }
}

/// Reject blank free-text fields with a uniform message.
pub(crate) fn require_text(field: &str, value: &str) -> Result<(), GovernanceError> {
    if value.trim().is_empty() {
        return Err(GovernanceError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}
