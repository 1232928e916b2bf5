use super::domain::{Enrollment, EnrollmentId, GroupId, PeriodId, StudentId};

/// Read/write view of student enrollments.
///
/// `apply_change` is the only mutation and must be all-or-nothing: either the
/// source enrollment is cancelled and the target enrollment is active, or
/// neither changed. Implementations serialize it per group so two approvals
/// cannot book the same seat.
pub trait EnrollmentLedger: Send + Sync {
    fn enrollment(&self, id: &EnrollmentId) -> Result<Option<Enrollment>, LedgerError>;
    /// ENROLLED and APPROVED enrollments of the student in the period.
    fn active_enrollments(
        &self,
        student_id: &StudentId,
        period_id: &PeriodId,
    ) -> Result<Vec<Enrollment>, LedgerError>;
    /// Every enrollment the student ever held, across periods.
    fn enrollment_history(&self, student_id: &StudentId) -> Result<Vec<Enrollment>, LedgerError>;
    fn is_enrolled(&self, student_id: &StudentId, group_id: &GroupId) -> Result<bool, LedgerError>;
    fn apply_change(
        &self,
        student_id: &StudentId,
        from: &GroupId,
        to: &GroupId,
    ) -> Result<(), LedgerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("student {student} is not enrolled in group {group}")]
    SourceNotEnrolled { student: StudentId, group: GroupId },
    #[error("student {student} already holds a seat in group {group}")]
    AlreadyEnrolled { student: StudentId, group: GroupId },
    #[error("group {group} has no free seats (capacity {capacity})")]
    CapacityExhausted { group: GroupId, capacity: u32 },
    #[error("group {0} is not known to the ledger")]
    UnknownGroup(GroupId),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}
