use chrono::{DateTime, Duration, NaiveTime, Utc, Weekday};
use metrics_exporter_prometheus::PrometheusHandle;
use sirha::workflows::change_requests::{
    AcademicPeriod, ChangeRequestService, Clock, EnrollmentId, EnrollmentStatus, Group, GroupId,
    InMemoryCampus, InMemoryNotifier, InMemoryRequestRepository, LedgerError, PeriodId,
    RequestPolicy, ScheduleSlot, StudentId, Subject, SubjectId,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type CampusService =
    ChangeRequestService<InMemoryRequestRepository, InMemoryCampus, InMemoryCampus>;

pub(crate) const DEMO_PERIOD: &str = "2025-1";
pub(crate) const DEMO_STUDENT: &str = "est-1001";

/// Ids of the rows `seed_demo_campus` creates for the demo student.
#[derive(Debug, Clone)]
pub(crate) struct DemoSeed {
    pub(crate) calculus: EnrollmentId,
    pub(crate) physics: EnrollmentId,
}

pub(crate) fn build_service(
    campus: Arc<InMemoryCampus>,
    policy: RequestPolicy,
    clock: Arc<dyn Clock>,
) -> (Arc<CampusService>, Arc<InMemoryNotifier>) {
    let notifier = Arc::new(InMemoryNotifier::default());
    let service = ChangeRequestService::new(
        Arc::new(InMemoryRequestRepository::default()),
        campus.clone(),
        campus,
        notifier.clone(),
        policy,
    )
    .with_clock(clock);
    (Arc::new(service), notifier)
}

fn slot(day: Weekday, from: u32, to: u32) -> ScheduleSlot {
    let at = |hour| NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
    ScheduleSlot::new(day, at(from), at(to))
}

fn subject(id: &str, mnemonic: &str, credits: u8, prerequisites: &[&str]) -> Subject {
    Subject {
        id: SubjectId::new(id),
        mnemonic: mnemonic.to_string(),
        credits,
        level: 1,
        prerequisites: prerequisites.iter().map(|p| SubjectId::new(*p)).collect(),
        unlocks: Vec::new(),
        active: true,
    }
}

fn group(
    id: &str,
    subject: &str,
    period: &str,
    capacity: u32,
    schedule: Vec<ScheduleSlot>,
) -> Group {
    Group {
        id: GroupId::new(id),
        subject_id: SubjectId::new(subject),
        period_id: PeriodId::new(period),
        code: id.to_ascii_uppercase(),
        capacity,
        enrolled: 0,
        schedule,
        active: true,
    }
}

/// Small engineering-school catalog: the demo student holds CALD group 1 and
/// FIS1 group 1 and has already passed CALI.
pub(crate) fn seed_demo_campus(
    campus: &InMemoryCampus,
    now: DateTime<Utc>,
) -> Result<DemoSeed, LedgerError> {
    campus.add_period(AcademicPeriod {
        id: PeriodId::new(DEMO_PERIOD),
        name: "2025 first semester".to_string(),
        change_window_opens_at: now - Duration::days(7),
        change_window_closes_at: now + Duration::days(21),
    });
    campus.add_period(AcademicPeriod {
        id: PeriodId::new("2024-2"),
        name: "2024 second semester".to_string(),
        change_window_opens_at: now - Duration::days(200),
        change_window_closes_at: now - Duration::days(170),
    });

    campus.add_subject(subject("cali", "CALI", 4, &[]));
    campus.add_subject(subject("cald", "CALD", 4, &["cali"]));
    campus.add_subject(subject("fis1", "FIS1", 3, &[]));
    campus.add_subject(subject("poob", "POOB", 3, &["mdis"]));

    campus.add_group(group("cali-1", "cali", "2024-2", 30, vec![slot(Weekday::Mon, 7, 9)]));
    campus.add_group(group("cald-1", "cald", DEMO_PERIOD, 30, vec![slot(Weekday::Mon, 7, 9)]));
    campus.add_group(group("cald-2", "cald", DEMO_PERIOD, 30, vec![slot(Weekday::Tue, 10, 12)]));
    campus.add_group(group("cald-3", "cald", DEMO_PERIOD, 30, vec![slot(Weekday::Wed, 8, 10)]));
    campus.add_group(group("fis1-1", "fis1", DEMO_PERIOD, 30, vec![slot(Weekday::Wed, 7, 9)]));
    campus.add_group(group("poob-1", "poob", DEMO_PERIOD, 25, vec![slot(Weekday::Thu, 14, 16)]));

    let student = StudentId::new(DEMO_STUDENT);
    campus.enroll(&student, &GroupId::new("cali-1"), EnrollmentStatus::Approved)?;
    let calculus = campus.enroll(&student, &GroupId::new("cald-1"), EnrollmentStatus::Enrolled)?;
    let physics = campus.enroll(&student, &GroupId::new("fis1-1"), EnrollmentStatus::Enrolled)?;

    Ok(DemoSeed { calculus, physics })
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| format!("failed to parse '{raw}' as an RFC 3339 timestamp ({err})"))
}
