use super::common::*;
use chrono::{Duration, Weekday};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::workflows::change_requests::domain::{
    ChangeRequest, ConflictKind, DecisionOutcome, EnrollmentStatus, HistoryAction, PeriodId,
    RequestId, RequestStatus, StudentId, UserId,
};
use crate::workflows::change_requests::ledger::EnrollmentLedger;
use crate::workflows::change_requests::repository::RequestRepository;
use crate::workflows::change_requests::{
    InMemoryCampus, InMemoryRequestRepository, LedgerError, RepositoryError, RequestServiceError,
    ValidationError,
};

fn coordinator() -> UserId {
    UserId::new("coord-7")
}

fn stored(repository: &impl RequestRepository, id: &RequestId) -> ChangeRequest {
    repository
        .fetch(id)
        .expect("repository read")
        .expect("request stored")
}

#[test]
fn approving_clean_request_swaps_enrollment() {
    let harness = harness();
    let created = harness
        .service
        .create(group_change(&harness.seed, "calc2-g2"))
        .expect("created");

    let approved = harness
        .service
        .decide(
            &created.id,
            coordinator(),
            DecisionOutcome::Approve,
            Some("schedule verified".to_string()),
        )
        .expect("approved");

    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(approved.history.len(), 2);
    let last = approved.history.last().expect("history entry");
    assert_eq!(last.action, HistoryAction::Approved);
    assert_eq!(last.actor, coordinator());
    assert_eq!(last.comment.as_deref(), Some("schedule verified"));
    assert_eq!(approved.response_deadline, created.response_deadline);
    assert!(holds(&harness.campus, "calc2-g2"));
    assert!(!holds(&harness.campus, "calc2-g1"));
    assert_eq!(live_group(&harness.campus, "calc2-g2").enrolled, 1);
    assert_eq!(live_group(&harness.campus, "calc2-g1").enrolled, 0);

    let events = harness.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].template, "request_approved");
    assert_eq!(events[0].student_id, student());
    assert_eq!(
        events[0].details.get("comment").map(String::as_str),
        Some("schedule verified")
    );
    assert_eq!(stored(harness.repository.as_ref(), &created.id), approved);
}

#[test]
fn approved_enrollment_keeps_its_seat_in_a_full_group() {
    let harness = harness();
    harness.campus.add_group(group(
        "calc2-g5",
        "calc2",
        CURRENT,
        1,
        vec![slot(Weekday::Fri, 14, 16)],
    ));
    harness
        .campus
        .enroll(
            &StudentId::new(OTHER_STUDENT),
            &gid("calc2-g5"),
            EnrollmentStatus::Approved,
        )
        .expect("approved seat");
    assert!(live_group(&harness.campus, "calc2-g5").is_full());

    let created = harness
        .service
        .create(group_change(&harness.seed, "calc2-g5"))
        .expect("created");
    let kinds: Vec<ConflictKind> = created.conflicts.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, [ConflictKind::CapacityExceeded]);

    let err = harness
        .service
        .decide(&created.id, coordinator(), DecisionOutcome::Approve, None)
        .expect_err("full group blocks approval");
    assert!(matches!(err, RequestServiceError::BlockingConflicts { .. }));
    assert!(holds(&harness.campus, "calc2-g1"));
    assert!(!holds(&harness.campus, "calc2-g5"));
    assert_eq!(live_group(&harness.campus, "calc2-g5").enrolled, 1);

    let swap = harness
        .campus
        .apply_change(&student(), &gid("calc2-g1"), &gid("calc2-g5"));
    assert!(matches!(swap, Err(LedgerError::CapacityExhausted { capacity: 1, .. })));
}

#[test]
fn blocking_conflict_refuses_approval_and_changes_nothing() {
    let harness = harness();
    let created = harness
        .service
        .create(group_change(&harness.seed, "calc2-g3"))
        .expect("created");

    let err = harness
        .service
        .decide(&created.id, coordinator(), DecisionOutcome::Approve, None)
        .expect_err("overlap blocks approval");

    match err {
        RequestServiceError::BlockingConflicts { id, conflicts } => {
            assert_eq!(id, created.id);
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].kind, ConflictKind::ScheduleOverlap);
        }
        other => panic!("expected blocking conflicts, got {other:?}"),
    }
    assert_eq!(stored(harness.repository.as_ref(), &created.id), created);
    assert!(holds(&harness.campus, "calc2-g1"));
    assert!(!holds(&harness.campus, "calc2-g3"));
    assert!(harness.notifier.events().is_empty());
}

#[test]
fn approval_rechecks_conflicts_against_current_ledger() {
    let harness = harness();
    let created = harness
        .service
        .create(group_change(&harness.seed, "calc2-g4"))
        .expect("created");
    assert_eq!(created.conflicts[0].kind, ConflictKind::CapacityExceeded);

    harness
        .campus
        .apply_change(&StudentId::new(OTHER_STUDENT), &gid("calc2-g4"), &gid("calc2-g2"))
        .expect("other student moves away");

    let conflicts = harness.service.evaluate(&created.id).expect("evaluated");
    assert!(conflicts.is_empty());

    let approved = harness
        .service
        .decide(&created.id, coordinator(), DecisionOutcome::Approve, None)
        .expect("seat freed up");
    assert_eq!(approved.status, RequestStatus::Approved);
    assert!(holds(&harness.campus, "calc2-g4"));
}

#[test]
fn evaluate_persists_refreshed_conflicts() {
    let harness = harness();
    let created = harness
        .service
        .create(group_change(&harness.seed, "calc2-g2"))
        .expect("created");

    // Fill calc2-g2 behind the request's back.
    let mut crowded = live_group(&harness.campus, "calc2-g2");
    crowded.capacity = 0;
    harness.campus.add_group(crowded);

    let conflicts = harness.service.evaluate(&created.id).expect("evaluated");
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].kind, ConflictKind::CapacityExceeded);

    let after = stored(harness.repository.as_ref(), &created.id);
    assert_eq!(after.conflicts, conflicts);
    assert_eq!(after.status, RequestStatus::Pending);
    assert_eq!(after.history.len(), 1);
    assert_eq!(after.revision, created.revision + 1);
}

#[test]
fn evaluate_on_terminal_request_returns_stored_conflicts() {
    let harness = harness();
    let created = harness
        .service
        .create(group_change(&harness.seed, "calc2-g3"))
        .expect("created");
    harness
        .service
        .decide(&created.id, coordinator(), DecisionOutcome::Reject, None)
        .expect("rejected");

    let conflicts = harness.service.evaluate(&created.id).expect("evaluated");
    assert_eq!(conflicts, created.conflicts);
}

#[test]
fn evaluate_unknown_request_is_not_found() {
    let harness = harness();
    let err = harness
        .service
        .evaluate(&RequestId::new("missing"))
        .expect_err("unknown");
    assert!(matches!(err, RequestServiceError::NotFound(_)));
}

#[test]
fn reject_succeeds_despite_conflicts_and_leaves_ledger_alone() {
    let harness = harness();
    let created = harness
        .service
        .create(group_change(&harness.seed, "calc2-g3"))
        .expect("created");
    let before = harness.campus.enrollments_of(&student());

    let rejected = harness
        .service
        .decide(
            &created.id,
            coordinator(),
            DecisionOutcome::Reject,
            Some("clashes with physics".to_string()),
        )
        .expect("rejected");

    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(
        rejected.history.last().map(|entry| entry.action),
        Some(HistoryAction::Rejected)
    );
    assert_eq!(harness.campus.enrollments_of(&student()), before);
    let events = harness.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].template, "request_rejected");
}

#[test]
fn terminal_requests_refuse_further_decisions() {
    let harness = harness();
    let created = harness
        .service
        .create(group_change(&harness.seed, "calc2-g2"))
        .expect("created");
    harness
        .service
        .decide(&created.id, coordinator(), DecisionOutcome::Approve, None)
        .expect("approved");

    let err = harness
        .service
        .decide(&created.id, coordinator(), DecisionOutcome::Reject, None)
        .expect_err("already decided");
    match err {
        RequestServiceError::InvalidState {
            status, operation, ..
        } => {
            assert_eq!(status, RequestStatus::Approved);
            assert_eq!(operation, "reject");
        }
        other => panic!("expected invalid state, got {other:?}"),
    }
}

#[test]
fn review_then_approve() {
    let harness = harness();
    let created = harness
        .service
        .create(group_change(&harness.seed, "calc2-g2"))
        .expect("created");

    let reviewing = harness
        .service
        .start_review(&created.id, coordinator())
        .expect("review started");
    assert_eq!(reviewing.status, RequestStatus::UnderReview);
    assert_eq!(
        reviewing.history.last().map(|entry| entry.action),
        Some(HistoryAction::ReviewStarted)
    );

    let err = harness
        .service
        .start_review(&created.id, coordinator())
        .expect_err("review only starts once");
    assert!(matches!(err, RequestServiceError::InvalidState { .. }));

    let approved = harness
        .service
        .decide(&created.id, coordinator(), DecisionOutcome::Approve, None)
        .expect("approved from review");
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(approved.history.len(), 3);
}

#[test]
fn reprioritize_keeps_deadline() {
    let harness = harness();
    let created = harness
        .service
        .create(group_change(&harness.seed, "calc2-g2"))
        .expect("created");

    let updated = harness
        .service
        .reprioritize(&created.id, 4, coordinator())
        .expect("reprioritized");

    assert_eq!(updated.priority, 4);
    assert_eq!(updated.status, RequestStatus::Pending);
    assert_eq!(updated.response_deadline, created.response_deadline);
    assert_eq!(
        updated.history.last().map(|entry| entry.action),
        Some(HistoryAction::PriorityChanged)
    );
}

#[test]
fn reprioritize_rejects_zero_and_terminal_requests() {
    let harness = harness();
    let created = harness
        .service
        .create(group_change(&harness.seed, "calc2-g2"))
        .expect("created");

    let err = harness
        .service
        .reprioritize(&created.id, 0, coordinator())
        .expect_err("zero priority");
    assert!(matches!(
        err,
        RequestServiceError::Validation(ValidationError::InvalidPriority(0))
    ));

    harness
        .service
        .cancel(&created.id, &student())
        .expect("cancelled");
    let err = harness
        .service
        .reprioritize(&created.id, 2, coordinator())
        .expect_err("cancelled requests keep their priority");
    assert!(matches!(err, RequestServiceError::InvalidState { .. }));
}

#[test]
fn only_the_requester_may_cancel() {
    let harness = harness();
    let created = harness
        .service
        .create(group_change(&harness.seed, "calc2-g2"))
        .expect("created");

    let err = harness
        .service
        .cancel(&created.id, &StudentId::new(OTHER_STUDENT))
        .expect_err("not the owner");
    assert!(matches!(err, RequestServiceError::Forbidden { .. }));
    assert_eq!(stored(harness.repository.as_ref(), &created.id), created);

    let cancelled = harness
        .service
        .cancel(&created.id, &student())
        .expect("owner cancels");
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert_eq!(
        cancelled.history.last().map(|entry| entry.actor.as_str()),
        Some(STUDENT)
    );
    assert_eq!(harness.notifier.events()[0].template, "request_cancelled");

    let err = harness
        .service
        .decide(&created.id, coordinator(), DecisionOutcome::Approve, None)
        .expect_err("cancelled is terminal");
    assert!(matches!(
        err,
        RequestServiceError::InvalidState {
            status: RequestStatus::Cancelled,
            ..
        }
    ));
}

#[test]
fn overdue_request_expires_once_on_read() {
    let harness = harness();
    let created = harness
        .service
        .create(group_change(&harness.seed, "calc2-g2"))
        .expect("created");
    harness.clock.set(created.response_deadline + Duration::seconds(1));

    let first = harness.service.get(&created.id).expect("read");
    assert_eq!(first.status, RequestStatus::Expired);
    assert_eq!(first.history.len(), 2);
    let entry = first.history.last().expect("expiry entry");
    assert_eq!(entry.action, HistoryAction::Expired);
    assert_eq!(entry.actor.as_str(), "system");

    let second = harness.service.get(&created.id).expect("read again");
    assert_eq!(second, first);
    assert_eq!(stored(harness.repository.as_ref(), &created.id), first);
    assert_eq!(first.response_deadline, created.response_deadline);
}

#[test]
fn request_at_deadline_is_still_open() {
    let harness = harness();
    let created = harness
        .service
        .create(group_change(&harness.seed, "calc2-g2"))
        .expect("created");
    harness.clock.set(created.response_deadline);

    let current = harness.service.get(&created.id).expect("read");
    assert_eq!(current.status, RequestStatus::Pending);
}

#[test]
fn decisions_on_overdue_requests_see_expired_state() {
    let harness = harness();
    let created = harness
        .service
        .create(group_change(&harness.seed, "calc2-g2"))
        .expect("created");
    harness.clock.advance(Duration::days(31));

    let err = harness
        .service
        .decide(&created.id, coordinator(), DecisionOutcome::Approve, None)
        .expect_err("expired");
    assert!(matches!(
        err,
        RequestServiceError::InvalidState {
            status: RequestStatus::Expired,
            ..
        }
    ));
    assert!(holds(&harness.campus, "calc2-g1"));
    assert_eq!(
        stored(harness.repository.as_ref(), &created.id).status,
        RequestStatus::Expired
    );
}

#[test]
fn sweep_expires_only_overdue_open_requests() {
    let harness = harness();
    let old = harness
        .service
        .create(group_change(&harness.seed, "calc2-g2"))
        .expect("old");
    let decided = harness
        .service
        .create({
            let mut command = subject_change(&harness.seed, "algo-g1");
            command.description = "elective".to_string();
            command
        })
        .expect("decided");
    harness
        .service
        .decide(&decided.id, coordinator(), DecisionOutcome::Reject, None)
        .expect("rejected");

    harness.clock.advance(Duration::days(20));
    let fresh = harness
        .service
        .create({
            let mut command = group_change(&harness.seed, "calc2-g2");
            command.student_id = StudentId::new(OTHER_STUDENT);
            command.source_enrollment_id = harness.seed.other_student_enrollment.clone();
            command
        })
        .expect("fresh");

    harness.clock.advance(Duration::days(11));
    assert_eq!(harness.service.sweep_expired().expect("sweep"), 1);
    assert_eq!(harness.service.sweep_expired().expect("second sweep"), 0);

    let repository = harness.repository.as_ref();
    assert_eq!(stored(repository, &old.id).status, RequestStatus::Expired);
    assert_eq!(stored(repository, &decided.id).status, RequestStatus::Rejected);
    assert_eq!(stored(repository, &fresh.id).status, RequestStatus::Pending);
}

#[test]
fn ledger_failure_leaves_request_untouched() {
    let campus = Arc::new(InMemoryCampus::default());
    let seed = seed_campus(&campus);
    let repository = Arc::new(InMemoryRequestRepository::default());
    let service = service_over(
        repository.clone(),
        campus.clone(),
        Arc::new(FaultyLedger {
            inner: campus.clone(),
        }),
    );
    let created = service
        .create(group_change(&seed, "calc2-g2"))
        .expect("created");

    let err = service
        .decide(&created.id, coordinator(), DecisionOutcome::Approve, None)
        .expect_err("ledger offline");

    assert!(matches!(
        err,
        RequestServiceError::Ledger(LedgerError::Unavailable(_))
    ));
    let after = stored(repository.as_ref(), &created.id);
    assert_eq!(after, created);
    assert_eq!(after.history.len(), 1);
    assert!(holds(&campus, "calc2-g1"));
}

#[test]
fn lost_approval_write_reverts_the_swap() {
    let campus = Arc::new(InMemoryCampus::default());
    let seed = seed_campus(&campus);
    let repository = Arc::new(RacingRepository::default());
    let service = service_over(repository.clone(), campus.clone(), campus.clone());
    let created = service
        .create(group_change(&seed, "calc2-g2"))
        .expect("created");

    let err = service
        .decide(&created.id, coordinator(), DecisionOutcome::Approve, None)
        .expect_err("write raced");

    assert!(err.is_retryable());
    assert!(holds(&campus, "calc2-g1"));
    assert!(!holds(&campus, "calc2-g2"));
    assert_eq!(stored(repository.as_ref(), &created.id).status, RequestStatus::Pending);

    let retried = service
        .decide(&created.id, coordinator(), DecisionOutcome::Approve, None)
        .expect("retry succeeds");
    assert_eq!(retried.status, RequestStatus::Approved);
    assert!(holds(&campus, "calc2-g2"));
}

#[test]
fn failed_revert_leaves_the_swap_in_place_and_reports_the_ledger() {
    let campus = Arc::new(InMemoryCampus::default());
    let seed = seed_campus(&campus);
    let repository = Arc::new(RacingRepository::default());
    let ledger = Arc::new(SwapOnceLedger {
        inner: campus.clone(),
        swapped: AtomicBool::new(false),
    });
    let service = service_over(repository.clone(), campus.clone(), ledger);
    let created = service
        .create(group_change(&seed, "calc2-g2"))
        .expect("created");

    let err = service
        .decide(&created.id, coordinator(), DecisionOutcome::Approve, None)
        .expect_err("write raced and revert refused");

    assert!(matches!(err, RequestServiceError::Ledger(LedgerError::Unavailable(_))));
    assert!(!err.is_retryable());
    assert!(holds(&campus, "calc2-g2"));
    assert!(!holds(&campus, "calc2-g1"));
    assert_eq!(stored(repository.as_ref(), &created.id).status, RequestStatus::Pending);
}

#[test]
fn repository_outage_surfaces_as_repository_error() {
    let campus = Arc::new(InMemoryCampus::default());
    seed_campus(&campus);
    let service = service_over(Arc::new(UnavailableRepository), campus.clone(), campus);

    let err = service
        .get(&RequestId::new("any"))
        .expect_err("repository down");
    assert!(matches!(
        err,
        RequestServiceError::Repository(RepositoryError::Unavailable(_))
    ));
}

#[test]
fn pending_queue_follows_priority() {
    let harness = harness();
    let calc = harness
        .service
        .create(group_change(&harness.seed, "calc2-g2"))
        .expect("calc");
    harness.clock.advance(Duration::hours(1));
    let algo = harness
        .service
        .create(subject_change(&harness.seed, "algo-g1"))
        .expect("algo");
    harness
        .service
        .reprioritize(&calc.id, 2, coordinator())
        .expect("demoted");

    let queue = harness
        .service
        .list_pending(&PeriodId::new(CURRENT), 10)
        .expect("queue");
    let order: Vec<&RequestId> = queue.iter().map(|request| &request.id).collect();
    assert_eq!(order, vec![&algo.id, &calc.id]);

    let limited = harness
        .service
        .list_pending(&PeriodId::new(CURRENT), 1)
        .expect("queue");
    assert_eq!(limited.len(), 1);

    let elsewhere = harness
        .service
        .list_pending(&PeriodId::new(PREVIOUS), 10)
        .expect("queue");
    assert!(elsewhere.is_empty());
}

#[test]
fn queue_drops_requests_that_expired() {
    let harness = harness();
    harness
        .service
        .create(group_change(&harness.seed, "calc2-g2"))
        .expect("created");
    harness.clock.advance(Duration::days(31));

    let queue = harness
        .service
        .list_pending(&PeriodId::new(CURRENT), 10)
        .expect("queue");
    assert!(queue.is_empty());
}

#[test]
fn student_history_lists_all_requests() {
    let harness = harness();
    let first = harness
        .service
        .create(group_change(&harness.seed, "calc2-g2"))
        .expect("first");
    harness
        .service
        .cancel(&first.id, &student())
        .expect("cancelled");
    harness.clock.advance(Duration::minutes(1));
    let second = harness
        .service
        .create(group_change(&harness.seed, "calc2-g2"))
        .expect("second");

    let requests = harness
        .service
        .requests_for_student(&student())
        .expect("history");
    let ids: Vec<&RequestId> = requests.iter().map(|request| &request.id).collect();
    assert_eq!(ids, vec![&first.id, &second.id]);
    assert!(harness
        .service
        .requests_for_student(&StudentId::new(OTHER_STUDENT))
        .expect("empty history")
        .is_empty());
}
