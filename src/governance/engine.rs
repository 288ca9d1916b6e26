//! The governance façade.
//!
//! All state lives behind one [`Mutex`]. Each mutating operation runs the
//! whole check-validate-mutate-persist sequence inside that critical section
//! on a working copy; the copy is persisted first and only then becomes the
//! live state. A failed validation or a failed write therefore leaves both
//! memory and disk untouched. Operator alerts go out after the write lands.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::budget::{SafetyBudgetMonitor, SafetyEvent, SafetyStatus};
use super::calibration::{self, CalibrationPolicy};
use super::canary::{CanarySignal, CanarySignalTracker, PromotionEligibility, PromotionRecord};
use super::overrides::{Override, OverrideLedger, OverrideRequest};
use super::store::{GovernanceState, StateStore};
use super::verifier::{ConsistencyReport, PolicyVerifier};
use super::GovernanceError;
use crate::alerts::{Alert, AlertSink, StderrAlertSink};
use crate::clock::{Clock, SystemClock};
use crate::config::GovernanceConfig;
use crate::verdict::{CalibrationStatus, Verdict};

/// Entry point for every governance decision.
///
/// Construct one per process at startup and share it (for example behind an
/// [`Arc`]) with the components that report scan outcomes.
///
/// The snapshot is read once, at open, and every later save overwrites the
/// file. Only one engine may own a state file at a time: a long-lived host
/// must not share its state file with the operator CLI, or the host's next
/// save discards whatever the CLI wrote (a lifted freeze, a revocation).
pub struct GovernanceEngine {
    store: StateStore,
    state: Mutex<GovernanceState>,
    clock: Arc<dyn Clock>,
    alerts: Arc<dyn AlertSink>,
    ledger: OverrideLedger,
    tracker: CanarySignalTracker,
    monitor: SafetyBudgetMonitor,
    verifier: PolicyVerifier,
}

impl std::fmt::Debug for GovernanceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceEngine")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl GovernanceEngine {
    /// Open the engine with the wall clock and stderr alerts.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::StateCorruption`] if an existing snapshot fails
    /// validation. The engine refuses to start on a partial view of policy.
    /// A persistence error if counters loaded over a tightened limit force a
    /// freeze that cannot be written.
    pub fn open(config: &GovernanceConfig) -> Result<Self, GovernanceError> {
        Self::open_with(config, Arc::new(SystemClock), Arc::new(StderrAlertSink))
    }

    /// Open the engine with an explicit clock and alert sink.
    ///
    /// # Errors
    ///
    /// See [`Self::open`].
    pub fn open_with(
        config: &GovernanceConfig,
        clock: Arc<dyn Clock>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self, GovernanceError> {
        let store = StateStore::new(config.state_path());
        let state = match store.load()? {
            Some(state) => {
                info!(
                    path = %store.path().display(),
                    overrides = state.overrides.len(),
                    canaries = state.canary_signals.len(),
                    frozen = state.safety_budget.is_frozen,
                    "governance state loaded"
                );
                state
            }
            None => {
                info!(path = %store.path().display(), "no governance state found, starting fresh window");
                GovernanceState::fresh(clock.now())
            }
        };

        let engine = Self {
            store,
            state: Mutex::new(state),
            clock,
            alerts,
            ledger: OverrideLedger::new(config.override_policy()),
            tracker: CanarySignalTracker::new(config.canary_thresholds()),
            monitor: SafetyBudgetMonitor::new(config.budget_limits()),
            verifier: PolicyVerifier::new(config.artifact_paths()),
        };

        // Limits may have been tightened since the snapshot was written.
        let monitor = engine.monitor;
        engine.transact(|state, now, alerts| {
            monitor.enforce_limits(&mut state.safety_budget, now, alerts);
            Ok(())
        })?;
        Ok(engine)
    }

    // -----------------------------------------------------------------------
    // Overrides
    // -----------------------------------------------------------------------

    /// Validate and issue an override.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::Frozen`], [`GovernanceError::Validation`],
    /// [`GovernanceError::BudgetExceeded`] (the system is frozen as a side
    /// effect), or a persistence error.
    pub fn request_override(&self, request: OverrideRequest) -> Result<Override, GovernanceError> {
        let ledger = self.ledger;
        let monitor = self.monitor;
        self.transact(|state, now, alerts| ledger.request(state, &monitor, request, now, alerts))
    }

    /// Deactivate an override.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::NotFound`] for an unknown id, or a persistence error.
    pub fn revoke_override(
        &self,
        id: &str,
        revoked_by: &str,
        reason: &str,
    ) -> Result<(), GovernanceError> {
        let ledger = self.ledger;
        self.transact(|state, _, _| {
            ledger
                .revoke(&mut state.overrides, id, revoked_by, reason)
                .map(|_| ())
        })
    }

    /// Currently active overrides, demoting (and persisting) any that expired.
    ///
    /// # Errors
    ///
    /// Lock or persistence errors.
    pub fn active_overrides(&self) -> Result<Vec<Override>, GovernanceError> {
        let ledger = self.ledger;
        self.transact(|state, now, _| {
            ledger.demote_expired(&mut state.overrides, now);
            Ok(OverrideLedger::active(&state.overrides))
        })
    }

    // -----------------------------------------------------------------------
    // Canaries
    // -----------------------------------------------------------------------

    /// Record one canary run.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::Validation`] for a blank domain, or a persistence error.
    pub fn record_canary_result(
        &self,
        domain: &str,
        verdict: Verdict,
        sample_size: u64,
    ) -> Result<CanarySignal, GovernanceError> {
        let tracker = self.tracker;
        let monitor = self.monitor;
        self.transact(|state, now, alerts| {
            tracker.record(state, &monitor, domain, verdict, sample_size, now, alerts)
        })
    }

    /// Promotion eligibility for `domain`. Read-only.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::LockPoisoned`].
    pub fn promotion_eligibility(&self, domain: &str) -> Result<PromotionEligibility, GovernanceError> {
        let state = self.lock()?;
        Ok(self.tracker.eligibility(&state.canary_signals, domain))
    }

    /// Produce a promotion record. Does not edit any manifest.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::Validation`] if ineligible or approval metadata is blank.
    pub fn promote_canary(
        &self,
        domain: &str,
        approved_by: &str,
        review_ticket: &str,
    ) -> Result<PromotionRecord, GovernanceError> {
        let now = self.clock.now();
        let state = self.lock()?;
        self.tracker
            .promote(&state.canary_signals, domain, approved_by, review_ticket, now)
    }

    // -----------------------------------------------------------------------
    // Safety budget
    // -----------------------------------------------------------------------

    /// Count a safety event; may freeze the system.
    ///
    /// # Errors
    ///
    /// Lock or persistence errors.
    pub fn record_event(&self, event: SafetyEvent) -> Result<(), GovernanceError> {
        let monitor = self.monitor;
        self.transact(|state, now, alerts| {
            monitor.record_event(&mut state.safety_budget, event, now, alerts);
            Ok(())
        })
    }

    /// Lift the freeze and restart the window. `Ok(false)` if not frozen.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::Validation`] for blank fields, or a persistence error.
    pub fn lift_freeze(
        &self,
        lifted_by: &str,
        resolution: &str,
        ticket: &str,
    ) -> Result<bool, GovernanceError> {
        let monitor = self.monitor;
        self.transact(|state, now, alerts| {
            monitor.lift_freeze(&mut state.safety_budget, lifted_by, resolution, ticket, now, alerts)
        })
    }

    /// Restart the budget window while not frozen.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::Frozen`] while frozen, [`GovernanceError::Validation`]
    /// for blank fields, or a persistence error.
    pub fn reset_window(&self, reset_by: &str, reason: &str) -> Result<(), GovernanceError> {
        let monitor = self.monitor;
        self.transact(|state, now, _| monitor.reset_window(&mut state.safety_budget, reset_by, reason, now))
    }

    /// Budget and freeze summary. Demotes expired overrides first.
    ///
    /// # Errors
    ///
    /// Lock or persistence errors.
    pub fn status(&self) -> Result<SafetyStatus, GovernanceError> {
        let ledger = self.ledger;
        let monitor = self.monitor;
        self.transact(|state, now, _| {
            ledger.demote_expired(&mut state.overrides, now);
            let active = state.overrides.iter().filter(|o| o.is_active).count();
            Ok(monitor.status(&state.safety_budget, active, now))
        })
    }

    /// Whether the freeze is engaged.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::LockPoisoned`].
    pub fn is_frozen(&self) -> Result<bool, GovernanceError> {
        Ok(self.lock()?.safety_budget.is_frozen)
    }

    // -----------------------------------------------------------------------
    // Calibration and verification
    // -----------------------------------------------------------------------

    /// Policy adjustment for a calibration status.
    pub fn calibration_policy(&self, status: CalibrationStatus) -> CalibrationPolicy {
        CalibrationPolicy::for_status(status)
    }

    /// Downgrade PHISHING to SUSPICIOUS when calibration is not healthy.
    pub fn apply_restriction(&self, verdict: Verdict, status: CalibrationStatus) -> Verdict {
        calibration::apply_restriction(verdict, status)
    }

    /// Cross-check the deployed policy artifacts.
    pub fn verify(&self) -> ConsistencyReport {
        self.verifier.verify()
    }

    /// Copy of the live state.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::LockPoisoned`].
    pub fn snapshot(&self) -> Result<GovernanceState, GovernanceError> {
        Ok(self.lock()?.clone())
    }

    // -----------------------------------------------------------------------
    // Critical section
    // -----------------------------------------------------------------------

    fn lock(&self) -> Result<MutexGuard<'_, GovernanceState>, GovernanceError> {
        self.state.lock().map_err(|_| GovernanceError::LockPoisoned)
    }

    /// Run `op` on a working copy under the lock, persist if anything
    /// changed, then publish the copy and dispatch alerts.
    fn transact<T>(
        &self,
        op: impl FnOnce(&mut GovernanceState, DateTime<Utc>, &mut Vec<Alert>) -> Result<T, GovernanceError>,
    ) -> Result<T, GovernanceError> {
        let mut guard = self.lock()?;
        let now = self.clock.now();
        let mut working = guard.clone();
        let mut alerts = Vec::new();

        let outcome = op(&mut working, now, &mut alerts);
        let keep = match &outcome {
            Ok(_) => true,
            Err(e) => e.changes_state(),
        };

        if keep && working != *guard {
            working.last_updated = Some(now);
            self.store.save(&working)?;
            *guard = working;
        } else {
            debug!("governance state unchanged, skipping persist");
        }

        if keep {
            for alert in &alerts {
                self.alerts.emit(alert);
            }
        }
        outcome
    }
}
