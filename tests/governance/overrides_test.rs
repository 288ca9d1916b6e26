//! Override ledger: authority matrix, expiry, revocation.

use chrono::Duration;

use tripwire::alerts::Alert;
use tripwire::governance::{GovernanceError, OverrideAuthority, OverrideKind, OverrideRequest};

use crate::support::{emergency, t0, testing, Harness};

fn request(kind: OverrideKind, authority: OverrideAuthority) -> OverrideRequest {
    OverrideRequest::new(kind, authority)
        .domains(["example.com"])
        .reason("matrix probe")
        .approved_by("alice")
        .ticket("T-1")
}

#[test]
fn permanent_from_on_call_is_rejected_with_authority_message() {
    let h = Harness::new();
    let err = h
        .engine
        .request_override(request(OverrideKind::Permanent, OverrideAuthority::OnCall))
        .expect_err("on-call cannot issue permanent overrides");
    match err {
        GovernanceError::Validation(msg) => assert_eq!(
            msg,
            "PERMANENT overrides require SECURITY_TEAM authority, got on-call"
        ),
        other => panic!("expected Validation, got {other:?}"),
    }
}

#[test]
fn authority_matrix_is_enforced_for_every_pair() {
    let permitted = [
        (OverrideKind::Permanent, OverrideAuthority::SecurityTeam),
        (OverrideKind::Emergency, OverrideAuthority::SecurityTeam),
        (OverrideKind::Emergency, OverrideAuthority::OnCall),
        (OverrideKind::Testing, OverrideAuthority::CiSystem),
    ];
    for kind in OverrideKind::ALL {
        for authority in OverrideAuthority::ALL {
            let h = Harness::new();
            let result = h.engine.request_override(request(kind, authority));
            if permitted.contains(&(kind, authority)) {
                assert!(result.is_ok(), "{kind}/{authority} should be permitted: {result:?}");
            } else {
                assert!(
                    matches!(result, Err(GovernanceError::Validation(_))),
                    "{kind}/{authority} should be rejected: {result:?}"
                );
            }
        }
    }
}

#[test]
fn permanent_without_ticket_always_fails() {
    for authority in OverrideAuthority::ALL {
        let h = Harness::new();
        let req = OverrideRequest::new(OverrideKind::Permanent, authority)
            .domains(["example.com"])
            .reason("standing exception")
            .approved_by("alice");
        let result = h.engine.request_override(req);
        assert!(
            matches!(result, Err(GovernanceError::Validation(_))),
            "{authority}: {result:?}"
        );
    }

    let h = Harness::new();
    let blank_ticket = OverrideRequest::new(OverrideKind::Permanent, OverrideAuthority::SecurityTeam)
        .domains(["example.com"])
        .reason("standing exception")
        .approved_by("alice")
        .ticket("   ");
    assert!(matches!(
        h.engine.request_override(blank_ticket),
        Err(GovernanceError::Validation(_))
    ));
}

#[test]
fn permanent_override_has_no_expiry() {
    let h = Harness::new();
    let o = h
        .engine
        .request_override(request(OverrideKind::Permanent, OverrideAuthority::SecurityTeam))
        .expect("permitted");
    assert!(o.expires_at.is_none());
    assert_eq!(o.review_ticket.as_deref(), Some("T-1"));
}

#[test]
fn overlong_durations_are_capped_not_rejected() {
    let h = Harness::new();
    let e = h
        .engine
        .request_override(emergency("example.com").duration(Duration::hours(72)))
        .expect("capped, not rejected");
    assert_eq!(e.expires_at, Some(t0() + Duration::hours(24)));

    let t = h
        .engine
        .request_override(testing("ci.example").duration(Duration::hours(5)))
        .expect("capped, not rejected");
    assert_eq!(t.expires_at, Some(t0() + Duration::hours(1)));
}

#[test]
fn shorter_durations_are_honoured_and_default_is_the_maximum() {
    let h = Harness::new();
    let short = h
        .engine
        .request_override(emergency("example.com").duration(Duration::hours(2)))
        .expect("valid");
    assert_eq!(short.expires_at, Some(t0() + Duration::hours(2)));

    let default = h
        .engine
        .request_override(testing("ci.example"))
        .expect("valid");
    assert_eq!(default.expires_at, Some(t0() + Duration::hours(1)));
}

#[test]
fn non_positive_duration_is_rejected() {
    let h = Harness::new();
    let result = h
        .engine
        .request_override(emergency("example.com").duration(Duration::zero()));
    assert!(matches!(result, Err(GovernanceError::Validation(_))));
}

#[test]
fn request_fields_are_validated() {
    let h = Harness::new();
    let no_domains = OverrideRequest::new(OverrideKind::Emergency, OverrideAuthority::OnCall)
        .reason("r")
        .approved_by("alice");
    assert!(matches!(
        h.engine.request_override(no_domains),
        Err(GovernanceError::Validation(_))
    ));

    let blank_reason = emergency("example.com").reason(" ");
    assert!(matches!(
        h.engine.request_override(blank_reason),
        Err(GovernanceError::Validation(_))
    ));

    let blank_approver = emergency("example.com").approved_by("");
    assert!(matches!(
        h.engine.request_override(blank_approver),
        Err(GovernanceError::Validation(_))
    ));
}

#[test]
fn rejected_request_mutates_nothing() {
    let h = Harness::new();
    let _ = h
        .engine
        .request_override(request(OverrideKind::Testing, OverrideAuthority::OnCall));
    let state = h.engine.snapshot().expect("snapshot");
    assert!(state.overrides.is_empty());
    assert_eq!(state.safety_budget.overrides_used, 0);
    assert!(!h.config.state_path().exists());
    assert!(h.sink.alerts().is_empty());
}

#[test]
fn issued_override_is_loud_and_counted() {
    let h = Harness::new();
    let o = h
        .engine
        .request_override(emergency("Example.COM"))
        .expect("valid");
    assert_eq!(o.domains, vec!["example.com".to_owned()]);
    assert!(o.id.starts_with("OVERRIDE-20260301090000-"));
    assert!(o.is_active);

    assert_eq!(h.sink.alerts(), vec![Alert::OverrideActivated(o.clone())]);
    let status = h.engine.status().expect("status");
    assert_eq!(status.counters.overrides_used, 1);
    assert_eq!(status.active_overrides, 1);
}

#[test]
fn expired_overrides_are_demoted_but_retained() {
    let h = Harness::new();
    let t = h
        .engine
        .request_override(testing("ci.example"))
        .expect("valid");
    let e = h
        .engine
        .request_override(emergency("example.com"))
        .expect("valid");

    h.clock.advance(Duration::minutes(61));
    let active = h.engine.active_overrides().expect("active");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, e.id);

    // The demotion is durable and the record is kept.
    let reopened = h.reopen();
    let state = reopened.snapshot().expect("snapshot");
    let testing_record = state
        .overrides
        .iter()
        .find(|o| o.id == t.id)
        .expect("expired record retained");
    assert!(!testing_record.is_active);
}

#[test]
fn override_is_active_until_strictly_past_expiry() {
    let h = Harness::new();
    h.engine
        .request_override(testing("ci.example"))
        .expect("valid");
    h.clock.advance(Duration::hours(1));
    assert_eq!(h.engine.active_overrides().expect("active").len(), 1);
    h.clock.advance(Duration::seconds(1));
    assert!(h.engine.active_overrides().expect("active").is_empty());
}

#[test]
fn revoke_unknown_id_is_not_found() {
    let h = Harness::new();
    let result = h.engine.revoke_override("OVERRIDE-missing", "alice", "cleanup");
    assert!(matches!(result, Err(GovernanceError::NotFound(id)) if id == "OVERRIDE-missing"));
}

#[test]
fn revoke_deactivates_and_is_idempotent() {
    let h = Harness::new();
    let o = h
        .engine
        .request_override(emergency("example.com"))
        .expect("valid");
    h.engine
        .revoke_override(&o.id, "alice", "incident closed")
        .expect("revoke");
    assert!(h.engine.active_overrides().expect("active").is_empty());

    h.engine
        .revoke_override(&o.id, "alice", "again")
        .expect("second revoke is a no-op");

    let state = h.reopen().snapshot().expect("snapshot");
    assert_eq!(state.overrides.len(), 1);
    assert!(!state.overrides[0].is_active);
    // Revocation does not refund the budget.
    assert_eq!(state.safety_budget.overrides_used, 1);
}
