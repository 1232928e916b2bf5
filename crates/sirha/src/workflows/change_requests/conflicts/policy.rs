use chrono::{DateTime, Utc};

use super::super::domain::{
    ChangeRequest, Conflict, ConflictKind, ConflictSeverity, GroupId,
};

/// Severity assigned to each conflict kind.
pub const fn severity_for(kind: ConflictKind) -> ConflictSeverity {
    match kind {
        ConflictKind::ScheduleOverlap | ConflictKind::PrerequisiteUnmet => ConflictSeverity::High,
        ConflictKind::CapacityExceeded | ConflictKind::DuplicateEnrollment => {
            ConflictSeverity::Medium
        }
        ConflictKind::PeriodClosed => ConflictSeverity::Low,
    }
}

/// HIGH always blocks. Below HIGH the kind decides; capacity, duplicate
/// enrollment and a closed period are hard constraints.
pub const fn is_blocking(kind: ConflictKind, severity: ConflictSeverity) -> bool {
    if matches!(severity, ConflictSeverity::High) {
        return true;
    }
    matches!(
        kind,
        ConflictKind::CapacityExceeded
            | ConflictKind::DuplicateEnrollment
            | ConflictKind::PeriodClosed
    )
}

pub(crate) fn raise(
    request: &ChangeRequest,
    kind: ConflictKind,
    group_id: Option<GroupId>,
    description: String,
    detected_at: DateTime<Utc>,
) -> Conflict {
    let severity = severity_for(kind);
    Conflict {
        id: format!("{}:{}", request.id, kind.code()),
        request_id: request.id.clone(),
        student_id: request.student_id.clone(),
        group_id,
        kind,
        description,
        severity,
        blocking: is_blocking(kind, severity),
        detected_at,
        resolved: false,
        observations: None,
    }
}
