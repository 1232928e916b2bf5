use std::fmt;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

identifier!(
    /// Identifier wrapper for submitted change requests.
    RequestId
);
identifier!(StudentId);
identifier!(
    /// Acting user (student, coordinator, administrator) recorded in the audit trail.
    UserId
);
identifier!(EnrollmentId);
identifier!(GroupId);
identifier!(SubjectId);
identifier!(PeriodId);

impl From<&StudentId> for UserId {
    fn from(value: &StudentId) -> Self {
        UserId(value.0.clone())
    }
}

/// What the student is asking to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeRequestKind {
    GroupChange,
    SubjectChange,
}

/// Lifecycle state tracked for every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

impl RequestStatus {
    /// States that still await a coordinator decision.
    pub const OPEN: [RequestStatus; 2] = [RequestStatus::Pending, RequestStatus::UnderReview];

    pub const fn label(self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::UnderReview => "UNDER_REVIEW",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Rejected => "REJECTED",
            RequestStatus::Expired => "EXPIRED",
            RequestStatus::Cancelled => "CANCELLED",
        }
    }

    pub const fn is_open(self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::UnderReview)
    }

    pub const fn is_terminal(self) -> bool {
        !self.is_open()
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Audit trail action tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    Created,
    ReviewStarted,
    PriorityChanged,
    Approved,
    Rejected,
    Cancelled,
    Expired,
}

impl HistoryAction {
    pub const fn label(self) -> &'static str {
        match self {
            HistoryAction::Created => "CREATED",
            HistoryAction::ReviewStarted => "REVIEW_STARTED",
            HistoryAction::PriorityChanged => "PRIORITY_CHANGED",
            HistoryAction::Approved => "APPROVED",
            HistoryAction::Rejected => "REJECTED",
            HistoryAction::Cancelled => "CANCELLED",
            HistoryAction::Expired => "EXPIRED",
        }
    }
}

/// Immutable audit record appended on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub action: HistoryAction,
    pub actor: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Rule violations the conflict detector can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    ScheduleOverlap,
    CapacityExceeded,
    PrerequisiteUnmet,
    DuplicateEnrollment,
    PeriodClosed,
}

impl ConflictKind {
    pub const fn code(self) -> &'static str {
        match self {
            ConflictKind::ScheduleOverlap => "schedule-overlap",
            ConflictKind::CapacityExceeded => "capacity-exceeded",
            ConflictKind::PrerequisiteUnmet => "prerequisite-unmet",
            ConflictKind::DuplicateEnrollment => "duplicate-enrollment",
            ConflictKind::PeriodClosed => "period-closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictSeverity {
    High,
    Medium,
    Low,
}

/// A detected rule violation attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub request_id: RequestId,
    pub student_id: StudentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    pub kind: ConflictKind,
    pub description: String,
    pub severity: ConflictSeverity,
    pub blocking: bool,
    pub detected_at: DateTime<Utc>,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Enrolled,
    Cancelled,
    Approved,
    Failed,
}

impl EnrollmentStatus {
    /// Enrollments that still occupy a seat or prove completion.
    pub const fn counts(self) -> bool {
        matches!(self, EnrollmentStatus::Enrolled | EnrollmentStatus::Approved)
    }
}

/// A student's binding to a group for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub student_id: StudentId,
    pub group_id: GroupId,
    pub period_id: PeriodId,
    pub status: EnrollmentStatus,
}

/// Weekly meeting slot of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub day: Weekday,
    pub starts_at: NaiveTime,
    pub ends_at: NaiveTime,
}

impl ScheduleSlot {
    pub fn new(day: Weekday, starts_at: NaiveTime, ends_at: NaiveTime) -> Self {
        Self {
            day,
            starts_at,
            ends_at,
        }
    }

    /// Half-open intervals: back-to-back slots do not overlap.
    pub fn overlaps(&self, other: &ScheduleSlot) -> bool {
        self.day == other.day && self.starts_at < other.ends_at && other.starts_at < self.ends_at
    }
}

impl fmt::Display for ScheduleSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{}",
            self.day,
            self.starts_at.format("%H:%M"),
            self.ends_at.format("%H:%M")
        )
    }
}

/// Scheduled offering of a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub subject_id: SubjectId,
    pub period_id: PeriodId,
    pub code: String,
    pub capacity: u32,
    pub enrolled: u32,
    pub schedule: Vec<ScheduleSlot>,
    pub active: bool,
}

impl Group {
    pub fn is_full(&self) -> bool {
        self.enrolled >= self.capacity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub mnemonic: String,
    pub credits: u8,
    pub level: u8,
    pub prerequisites: Vec<SubjectId>,
    pub unlocks: Vec<SubjectId>,
    pub active: bool,
}

/// Academic term with the window in which change requests are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcademicPeriod {
    pub id: PeriodId,
    pub name: String,
    pub change_window_opens_at: DateTime<Utc>,
    pub change_window_closes_at: DateTime<Utc>,
}

impl AcademicPeriod {
    pub fn change_window_closed(&self, now: DateTime<Utc>) -> bool {
        now > self.change_window_closes_at
    }
}

/// Inbound creation command accepted by the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequestCommand {
    pub student_id: StudentId,
    pub kind: ChangeRequestKind,
    pub source_enrollment_id: EnrollmentId,
    pub target_group_id: GroupId,
    #[serde(default)]
    pub target_subject_id: Option<SubjectId>,
    pub period_id: PeriodId,
    pub description: String,
    #[serde(default)]
    pub observations: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOutcome {
    Approve,
    Reject,
}

/// The change request entity owned by the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: RequestId,
    pub code: String,
    pub kind: ChangeRequestKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<String>,
    pub student_id: StudentId,
    pub source_enrollment_id: EnrollmentId,
    pub source_group_id: GroupId,
    pub target_group_id: GroupId,
    pub target_subject_id: SubjectId,
    pub period_id: PeriodId,
    pub priority: u8,
    pub status: RequestStatus,
    pub submitted_at: DateTime<Utc>,
    pub response_deadline: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<HistoryEntry>,
    pub conflicts: Vec<Conflict>,
    /// Optimistic concurrency token, bumped by the repository on every write.
    pub revision: u64,
}

impl ChangeRequest {
    pub fn blocking_conflicts(&self) -> Vec<&Conflict> {
        self.conflicts
            .iter()
            .filter(|conflict| conflict.blocking && !conflict.resolved)
            .collect()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.response_deadline
    }

    pub fn status_view(&self) -> RequestStatusView {
        RequestStatusView {
            request_id: self.id.clone(),
            code: self.code.clone(),
            status: self.status.label(),
            priority: self.priority,
            response_deadline: self.response_deadline,
            blocking_conflicts: self.blocking_conflicts().len(),
            last_action: self.history.last().map(|entry| entry.action.label()),
        }
    }
}

/// Trimmed representation exposed to API callers.
#[derive(Debug, Clone, Serialize)]
pub struct RequestStatusView {
    pub request_id: RequestId,
    pub code: String,
    pub status: &'static str,
    pub priority: u8,
    pub response_deadline: DateTime<Utc>,
    pub blocking_conflicts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_action: Option<&'static str>,
}
