mod policy;
mod rules;

pub use policy::{is_blocking, severity_for};

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::domain::{
    AcademicPeriod, ChangeRequest, Conflict, Enrollment, Group, Subject, SubjectId,
};

/// Everything the detector looks at. Assembled by the service from the catalog and ledger.
#[derive(Debug, Clone, Copy)]
pub struct DetectionInput<'a> {
    pub request: &'a ChangeRequest,
    /// The student's active enrollments in the request's period.
    pub enrollments: &'a [Enrollment],
    /// Catalog groups backing `enrollments`.
    pub enrolled_groups: &'a [Group],
    pub completed_subjects: &'a BTreeSet<SubjectId>,
    pub target_group: &'a Group,
    pub target_subject: &'a Subject,
    pub period: &'a AcademicPeriod,
    pub now: DateTime<Utc>,
}

type Check = fn(&DetectionInput<'_>) -> Option<Conflict>;

/// Display order of the checks. Each check is independent of the others.
const CHECKS: [Check; 5] = [
    rules::schedule_overlap,
    rules::capacity_exceeded,
    rules::prerequisites_unmet,
    rules::duplicate_enrollment,
    rules::period_closed,
];

/// Stateless detector; identical inputs always yield the identical sequence.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, input: &DetectionInput<'_>) -> Vec<Conflict> {
        CHECKS.iter().filter_map(|check| check(input)).collect()
    }
}
