use crate::infra::{
    build_service, seed_demo_campus, CampusService, DemoSeed, DEMO_PERIOD, DEMO_STUDENT,
};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use sirha::error::AppError;
use sirha::workflows::change_requests::{
    ChangeRequest, ChangeRequestKind, Conflict, CreateRequestCommand, DecisionOutcome, GroupId,
    InMemoryCampus, ManualClock, PeriodId, RequestPolicy, RequestServiceError, StudentId, UserId,
};
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Demo clock start (RFC 3339). Defaults to now.
    #[arg(long, value_parser = crate::infra::parse_timestamp)]
    pub(crate) now: Option<DateTime<Utc>>,
    /// Response window applied to the demo requests, in days.
    #[arg(long, default_value_t = 30)]
    pub(crate) window_days: i64,
    /// Also fast-forward past the deadline and show the expiry sweep.
    #[arg(long)]
    pub(crate) show_expiry: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        now,
        window_days,
        show_expiry,
    } = args;

    let start = now.unwrap_or_else(Utc::now);
    let clock = Arc::new(ManualClock::new(start));
    let campus = Arc::new(InMemoryCampus::default());
    let seed = seed_demo_campus(&campus, start).map_err(RequestServiceError::from)?;
    let (service, notifier) = build_service(
        campus.clone(),
        RequestPolicy::new(window_days, 1),
        clock.clone(),
    );
    let coordinator = UserId::new("coord-sistemas");

    println!(
        "SIRHA schedule-change demo ({})",
        start.format("%Y-%m-%d %H:%M UTC")
    );
    println!("Student {DEMO_STUDENT} holds CALD-1 (Mon 07-09) and FIS1-1 (Wed 07-09)");

    println!("\n1. Request a move to CALD-3, which meets on Wednesday mornings");
    let clashing = service.create(group_change(
        &seed,
        "cald-3",
        "Mornings free for a teaching job",
    ))?;
    print_request(&clashing);
    print_conflicts(&service.evaluate(&clashing.id)?);

    match service.decide(&clashing.id, coordinator.clone(), DecisionOutcome::Approve, None) {
        Ok(_) => println!("  Unexpected approval"),
        Err(RequestServiceError::BlockingConflicts { conflicts, .. }) => {
            println!("  Approval refused: {} blocking conflict(s)", conflicts.len());
        }
        Err(err) => return Err(err.into()),
    }
    let rejected = service.decide(
        &clashing.id,
        coordinator.clone(),
        DecisionOutcome::Reject,
        Some("CALD-3 overlaps FIS1-1".to_string()),
    )?;
    print_request(&rejected);

    println!("\n2. Request a move to CALD-2 (Tuesday 10-12)");
    let clean = service.create(group_change(&seed, "cald-2", "Monday commute is too long"))?;
    print_request(&clean);
    print_conflicts(&service.evaluate(&clean.id)?);
    service.start_review(&clean.id, coordinator.clone())?;
    let approved = service.decide(
        &clean.id,
        coordinator.clone(),
        DecisionOutcome::Approve,
        Some("seat available".to_string()),
    )?;
    print_request(&approved);
    let student = StudentId::new(DEMO_STUDENT);
    println!(
        "  Ledger now: {}",
        campus
            .enrollments_of(&student)
            .iter()
            .filter(|enrollment| enrollment.status.counts())
            .map(|enrollment| format!("{} ({:?})", enrollment.group_id, enrollment.status))
            .collect::<Vec<_>>()
            .join(", ")
    );

    println!("\n3. Swap FIS1 for POOB, which needs MDIS");
    clock.advance(Duration::hours(2));
    let elective = service.create(CreateRequestCommand {
        student_id: student.clone(),
        kind: ChangeRequestKind::SubjectChange,
        source_enrollment_id: seed.physics.clone(),
        target_group_id: GroupId::new("poob-1"),
        target_subject_id: None,
        period_id: PeriodId::new(DEMO_PERIOD),
        description: "Prefer the programming elective".to_string(),
        observations: None,
    })?;
    print_request(&elective);
    print_conflicts(&elective.conflicts);

    println!("\nCoordinator queue for {DEMO_PERIOD}");
    print_queue(&service)?;

    if show_expiry {
        clock.advance(Duration::days(window_days) + Duration::hours(1));
        let expired = service.sweep_expired()?;
        println!("\nAfter the response window: sweep expired {expired} request(s)");
        print_queue(&service)?;
    }

    println!("\nStudent history");
    for request in service.requests_for_student(&student)? {
        let view = request.status_view();
        println!(
            "  - {} {} (last action {})",
            view.code,
            view.status,
            view.last_action.unwrap_or("-")
        );
    }

    println!("\nNotifications sent");
    for notice in notifier.events() {
        println!(
            "  - {} -> {} ({})",
            notice.template, notice.student_id, notice.request_id
        );
    }

    Ok(())
}

fn group_change(seed: &DemoSeed, target: &str, reason: &str) -> CreateRequestCommand {
    CreateRequestCommand {
        student_id: StudentId::new(DEMO_STUDENT),
        kind: ChangeRequestKind::GroupChange,
        source_enrollment_id: seed.calculus.clone(),
        target_group_id: GroupId::new(target),
        target_subject_id: None,
        period_id: PeriodId::new(DEMO_PERIOD),
        description: reason.to_string(),
        observations: None,
    }
}

fn print_request(request: &ChangeRequest) {
    println!(
        "  {} {} -> {} | status {} | priority {} | due {}",
        request.code,
        request.source_group_id,
        request.target_group_id,
        request.status,
        request.priority,
        request.response_deadline.format("%Y-%m-%d")
    );
}

fn print_conflicts(conflicts: &[Conflict]) {
    if conflicts.is_empty() {
        println!("  No conflicts detected");
        return;
    }
    for conflict in conflicts {
        println!(
            "  - [{:?}{}] {}",
            conflict.severity,
            if conflict.blocking { ", blocking" } else { "" },
            conflict.description
        );
    }
}

fn print_queue(service: &CampusService) -> Result<(), AppError> {
    let queue = service.list_pending(&PeriodId::new(DEMO_PERIOD), 10)?;
    if queue.is_empty() {
        println!("  (empty)");
    }
    for request in &queue {
        print_request(request);
    }
    Ok(())
}
