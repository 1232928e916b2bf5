use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::response::Response;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc, Weekday};
use serde_json::Value;

use crate::workflows::change_requests::catalog::CatalogIndex;
use crate::workflows::change_requests::domain::{
    AcademicPeriod, ChangeRequest, ChangeRequestKind, CreateRequestCommand, Enrollment,
    EnrollmentId, EnrollmentStatus, Group, GroupId, PeriodId, RequestId, ScheduleSlot, StudentId,
    Subject, SubjectId,
};
use crate::workflows::change_requests::ledger::{EnrollmentLedger, LedgerError};
use crate::workflows::change_requests::repository::{
    RepositoryError, RequestQuery, RequestRepository,
};
use crate::workflows::change_requests::{
    ChangeRequestService, InMemoryCampus, InMemoryNotifier, InMemoryRequestRepository,
    ManualClock, RequestPolicy,
};

pub(super) const CURRENT: &str = "2025-1";
pub(super) const PREVIOUS: &str = "2024-2";
pub(super) const STUDENT: &str = "s-100";
pub(super) const OTHER_STUDENT: &str = "s-200";

/// Monday 3 February 2025, 08:00 UTC.
pub(super) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, 3, 8, 0, 0).unwrap()
}

pub(super) fn at(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
}

pub(super) fn slot(day: Weekday, from: u32, to: u32) -> ScheduleSlot {
    ScheduleSlot::new(day, at(from, 0), at(to, 0))
}

pub(super) fn student() -> StudentId {
    StudentId::new(STUDENT)
}

pub(super) fn gid(id: &str) -> GroupId {
    GroupId::new(id)
}

pub(super) fn subject(id: &str, prerequisites: &[&str]) -> Subject {
    Subject {
        id: SubjectId::new(id),
        mnemonic: id.to_ascii_uppercase(),
        credits: 3,
        level: 1,
        prerequisites: prerequisites.iter().map(|p| SubjectId::new(*p)).collect(),
        unlocks: Vec::new(),
        active: true,
    }
}

pub(super) fn group(
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

pub(super) fn current_period(closes_at: DateTime<Utc>) -> AcademicPeriod {
    AcademicPeriod {
        id: PeriodId::new(CURRENT),
        name: "2025 first semester".to_string(),
        change_window_opens_at: Utc.with_ymd_and_hms(2025, 1, 20, 0, 0, 0).unwrap(),
        change_window_closes_at: closes_at,
    }
}

/// Seeded campus ids the tests refer to.
#[derive(Debug, Clone)]
pub(super) struct Seed {
    pub(super) calc2_enrollment: EnrollmentId,
    pub(super) phys1_enrollment: EnrollmentId,
    pub(super) other_student_enrollment: EnrollmentId,
}

/// Campus layout:
/// - calc1 (no prerequisites), calc2 (needs calc1), phys1, prog1, algo (needs prog1)
/// - the student passed calc1 last period and holds calc2-g1 (Mon 7-9) and phys1-g1 (Wed 10-12)
/// - calc2-g4 has a single seat taken by another student
pub(super) fn seed_campus(campus: &InMemoryCampus) -> Seed {
    campus.add_period(current_period(start() + Duration::days(25)));
    campus.add_period(AcademicPeriod {
        id: PeriodId::new(PREVIOUS),
        name: "2024 second semester".to_string(),
        change_window_opens_at: Utc.with_ymd_and_hms(2024, 7, 20, 0, 0, 0).unwrap(),
        change_window_closes_at: Utc.with_ymd_and_hms(2024, 8, 20, 0, 0, 0).unwrap(),
    });

    campus.add_subject(subject("calc1", &[]));
    campus.add_subject(subject("calc2", &["calc1"]));
    campus.add_subject(subject("phys1", &[]));
    campus.add_subject(subject("prog1", &[]));
    campus.add_subject(subject("algo", &["prog1"]));

    campus.add_group(group("calc1-old", "calc1", PREVIOUS, 30, vec![slot(Weekday::Mon, 7, 9)]));
    campus.add_group(group("calc2-g1", "calc2", CURRENT, 30, vec![slot(Weekday::Mon, 7, 9)]));
    campus.add_group(group("calc2-g2", "calc2", CURRENT, 30, vec![slot(Weekday::Tue, 9, 11)]));
    campus.add_group(group("calc2-g3", "calc2", CURRENT, 30, vec![slot(Weekday::Wed, 11, 13)]));
    campus.add_group(group("calc2-g4", "calc2", CURRENT, 1, vec![slot(Weekday::Thu, 7, 9)]));
    let mut retired = group("calc2-g9", "calc2", CURRENT, 30, vec![slot(Weekday::Sat, 7, 9)]);
    retired.active = false;
    campus.add_group(retired);
    campus.add_group(group("phys1-g1", "phys1", CURRENT, 30, vec![slot(Weekday::Wed, 10, 12)]));
    campus.add_group(group("phys1-g2", "phys1", CURRENT, 30, vec![slot(Weekday::Thu, 14, 16)]));
    campus.add_group(group("algo-g1", "algo", CURRENT, 30, vec![slot(Weekday::Fri, 7, 9)]));

    let student = student();
    campus
        .enroll(&student, &gid("calc1-old"), EnrollmentStatus::Approved)
        .expect("history");
    let calc2_enrollment = campus
        .enroll(&student, &gid("calc2-g1"), EnrollmentStatus::Enrolled)
        .expect("calc2");
    let phys1_enrollment = campus
        .enroll(&student, &gid("phys1-g1"), EnrollmentStatus::Enrolled)
        .expect("phys1");
    let other_student_enrollment = campus
        .enroll(
            &StudentId::new(OTHER_STUDENT),
            &gid("calc2-g4"),
            EnrollmentStatus::Enrolled,
        )
        .expect("other student");

    Seed {
        calc2_enrollment,
        phys1_enrollment,
        other_student_enrollment,
    }
}

pub(super) type MemoryService =
    ChangeRequestService<InMemoryRequestRepository, InMemoryCampus, InMemoryCampus>;

pub(super) struct Harness<S> {
    pub(super) service: S,
    pub(super) campus: Arc<InMemoryCampus>,
    pub(super) repository: Arc<InMemoryRequestRepository>,
    pub(super) notifier: Arc<InMemoryNotifier>,
    pub(super) clock: Arc<ManualClock>,
    pub(super) seed: Seed,
}

pub(super) fn harness() -> Harness<MemoryService> {
    let campus = Arc::new(InMemoryCampus::default());
    let seed = seed_campus(&campus);
    let repository = Arc::new(InMemoryRequestRepository::default());
    let notifier = Arc::new(InMemoryNotifier::default());
    let clock = Arc::new(ManualClock::new(start()));

    let service = ChangeRequestService::new(
        repository.clone(),
        campus.clone(),
        campus.clone(),
        notifier.clone(),
        RequestPolicy::default(),
    )
    .with_clock(clock.clone());

    Harness {
        service,
        campus,
        repository,
        notifier,
        clock,
        seed,
    }
}

pub(super) fn group_change(seed: &Seed, target: &str) -> CreateRequestCommand {
    CreateRequestCommand {
        student_id: student(),
        kind: ChangeRequestKind::GroupChange,
        source_enrollment_id: seed.calc2_enrollment.clone(),
        target_group_id: gid(target),
        target_subject_id: None,
        period_id: PeriodId::new(CURRENT),
        description: "Work shift moved to Monday mornings".to_string(),
        observations: None,
    }
}

pub(super) fn subject_change(seed: &Seed, target: &str) -> CreateRequestCommand {
    CreateRequestCommand {
        student_id: student(),
        kind: ChangeRequestKind::SubjectChange,
        source_enrollment_id: seed.phys1_enrollment.clone(),
        target_group_id: gid(target),
        target_subject_id: None,
        period_id: PeriodId::new(CURRENT),
        description: "Swap physics for an elective".to_string(),
        observations: Some("advisor agreed".to_string()),
    }
}

pub(super) fn holds(campus: &InMemoryCampus, group: &str) -> bool {
    campus.is_enrolled(&student(), &gid(group)).expect("ledger read")
}

/// Ledger whose swaps always fail; reads go to the wrapped campus.
pub(super) struct FaultyLedger {
    pub(super) inner: Arc<InMemoryCampus>,
}

impl EnrollmentLedger for FaultyLedger {
    fn enrollment(&self, id: &EnrollmentId) -> Result<Option<Enrollment>, LedgerError> {
        self.inner.enrollment(id)
    }

    fn active_enrollments(
        &self,
        student_id: &StudentId,
        period_id: &PeriodId,
    ) -> Result<Vec<Enrollment>, LedgerError> {
        self.inner.active_enrollments(student_id, period_id)
    }

    fn enrollment_history(&self, student_id: &StudentId) -> Result<Vec<Enrollment>, LedgerError> {
        self.inner.enrollment_history(student_id)
    }

    fn is_enrolled(&self, student_id: &StudentId, group_id: &GroupId) -> Result<bool, LedgerError> {
        self.inner.is_enrolled(student_id, group_id)
    }

    fn apply_change(
        &self,
        _student_id: &StudentId,
        _from: &GroupId,
        _to: &GroupId,
    ) -> Result<(), LedgerError> {
        Err(LedgerError::Unavailable("registrar database offline".to_string()))
    }
}

/// Ledger that commits the first swap and refuses every later one.
pub(super) struct SwapOnceLedger {
    pub(super) inner: Arc<InMemoryCampus>,
    pub(super) swapped: AtomicBool,
}

impl EnrollmentLedger for SwapOnceLedger {
    fn enrollment(&self, id: &EnrollmentId) -> Result<Option<Enrollment>, LedgerError> {
        self.inner.enrollment(id)
    }

    fn active_enrollments(
        &self,
        student_id: &StudentId,
        period_id: &PeriodId,
    ) -> Result<Vec<Enrollment>, LedgerError> {
        self.inner.active_enrollments(student_id, period_id)
    }

    fn enrollment_history(&self, student_id: &StudentId) -> Result<Vec<Enrollment>, LedgerError> {
        self.inner.enrollment_history(student_id)
    }

    fn is_enrolled(&self, student_id: &StudentId, group_id: &GroupId) -> Result<bool, LedgerError> {
        self.inner.is_enrolled(student_id, group_id)
    }

    fn apply_change(
        &self,
        student_id: &StudentId,
        from: &GroupId,
        to: &GroupId,
    ) -> Result<(), LedgerError> {
        if self.swapped.swap(true, Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("registrar database offline".to_string()));
        }
        self.inner.apply_change(student_id, from, to)
    }
}

/// Repository that loses the next approval write to a simulated concurrent writer.
#[derive(Default)]
pub(super) struct RacingRepository {
    pub(super) inner: InMemoryRequestRepository,
    pub(super) raced: AtomicBool,
}

impl RequestRepository for RacingRepository {
    fn insert(&self, request: ChangeRequest) -> Result<ChangeRequest, RepositoryError> {
        self.inner.insert(request)
    }

    fn update(
        &self,
        request: ChangeRequest,
        expected_revision: u64,
    ) -> Result<ChangeRequest, RepositoryError> {
        if request.status == crate::workflows::change_requests::RequestStatus::Approved
            && !self.raced.swap(true, Ordering::SeqCst)
        {
            return Err(RepositoryError::RevisionMismatch {
                expected: expected_revision,
                found: expected_revision + 1,
            });
        }
        self.inner.update(request, expected_revision)
    }

    fn fetch(&self, id: &RequestId) -> Result<Option<ChangeRequest>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn query(&self, query: &RequestQuery) -> Result<Vec<ChangeRequest>, RepositoryError> {
        self.inner.query(query)
    }
}

pub(super) struct UnavailableRepository;

impl RequestRepository for UnavailableRepository {
    fn insert(&self, _request: ChangeRequest) -> Result<ChangeRequest, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn update(
        &self,
        _request: ChangeRequest,
        _expected_revision: u64,
    ) -> Result<ChangeRequest, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch(&self, _id: &RequestId) -> Result<Option<ChangeRequest>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn query(&self, _query: &RequestQuery) -> Result<Vec<ChangeRequest>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) fn service_over<R, L>(
    repository: Arc<R>,
    campus: Arc<InMemoryCampus>,
    ledger: Arc<L>,
) -> ChangeRequestService<R, InMemoryCampus, L>
where
    R: RequestRepository + 'static,
    L: EnrollmentLedger + 'static,
{
    ChangeRequestService::new(
        repository,
        campus,
        ledger,
        Arc::new(InMemoryNotifier::default()),
        RequestPolicy::default(),
    )
    .with_clock(Arc::new(ManualClock::new(start())))
}

pub(super) fn live_group(campus: &InMemoryCampus, id: &str) -> Group {
    campus.group(&gid(id)).expect("group seeded")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
