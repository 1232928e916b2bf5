use chrono::{DateTime, Duration, Utc};

use super::domain::{
    AcademicPeriod, ChangeRequest, ChangeRequestKind, CreateRequestCommand, Enrollment,
    EnrollmentId, EnrollmentStatus, Group, GroupId, HistoryAction, HistoryEntry, PeriodId,
    RequestId, RequestStatus, StudentId, Subject, SubjectId, UserId,
};

/// Validation errors raised while turning a command into a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{entity} '{id}' does not exist")]
    UnknownReference { entity: &'static str, id: String },
    #[error("description must not be blank")]
    BlankDescription,
    #[error("enrollment {enrollment} does not belong to student {student}")]
    EnrollmentNotOwned {
        enrollment: EnrollmentId,
        student: StudentId,
    },
    #[error("enrollment {enrollment} is {status:?}, only ENROLLED enrollments can be changed")]
    EnrollmentNotActive {
        enrollment: EnrollmentId,
        status: EnrollmentStatus,
    },
    #[error("{entity} belongs to period {found}, request targets {expected}")]
    PeriodMismatch {
        entity: &'static str,
        expected: PeriodId,
        found: PeriodId,
    },
    #[error("group {0} is not accepting students")]
    InactiveGroup(GroupId),
    #[error("subject {0} is not active")]
    InactiveSubject(SubjectId),
    #[error("target group {0} is the group the student already holds")]
    SameGroup(GroupId),
    #[error("group change must stay within subject {expected}, target group teaches {found}")]
    SubjectMismatch { expected: SubjectId, found: SubjectId },
    #[error("subject change must target a different subject than {0}")]
    SameSubject(SubjectId),
    #[error("request {existing} is already open for enrollment {enrollment}")]
    DuplicatePending {
        existing: RequestId,
        enrollment: EnrollmentId,
    },
    #[error("priority must be at least 1 (got {0})")]
    InvalidPriority(u8),
}

const DEFAULT_RESPONSE_WINDOW_DAYS: i64 = 30;
const DEFAULT_PRIORITY: u8 = 1;

/// Policy dials applied at intake: deadline window and starting priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    response_window: Duration,
    default_priority: u8,
}

impl RequestPolicy {
    pub fn new(response_window_days: i64, default_priority: u8) -> Self {
        let days = if response_window_days > 0 {
            response_window_days
        } else {
            DEFAULT_RESPONSE_WINDOW_DAYS
        };

        Self {
            response_window: Duration::days(days),
            default_priority: default_priority.max(1),
        }
    }

    pub fn response_window(&self) -> Duration {
        self.response_window
    }

    pub fn default_priority(&self) -> u8 {
        self.default_priority
    }

    pub fn deadline_for(&self, submitted_at: DateTime<Utc>) -> DateTime<Utc> {
        submitted_at + self.response_window
    }
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSE_WINDOW_DAYS, DEFAULT_PRIORITY)
    }
}

/// Catalog and ledger entities referenced by a creation command.
#[derive(Debug, Clone)]
pub struct ResolvedReferences {
    pub source_enrollment: Enrollment,
    pub source_group: Group,
    pub target_group: Group,
    pub target_subject: Subject,
    pub period: AcademicPeriod,
}

/// Guard responsible for producing new `ChangeRequest` entities.
#[derive(Debug, Clone, Default)]
pub struct RequestIntake {
    policy: RequestPolicy,
}

impl RequestIntake {
    pub fn with_policy(policy: RequestPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RequestPolicy {
        &self.policy
    }

    /// Check the command against the entities it references.
    pub fn check(
        &self,
        command: &CreateRequestCommand,
        refs: &ResolvedReferences,
    ) -> Result<(), ValidationError> {
        if command.description.trim().is_empty() {
            return Err(ValidationError::BlankDescription);
        }

        let enrollment = &refs.source_enrollment;
        if enrollment.student_id != command.student_id {
            return Err(ValidationError::EnrollmentNotOwned {
                enrollment: enrollment.id.clone(),
                student: command.student_id.clone(),
            });
        }
        if enrollment.status != EnrollmentStatus::Enrolled {
            return Err(ValidationError::EnrollmentNotActive {
                enrollment: enrollment.id.clone(),
                status: enrollment.status,
            });
        }
        if enrollment.period_id != command.period_id {
            return Err(ValidationError::PeriodMismatch {
                entity: "source enrollment",
                expected: command.period_id.clone(),
                found: enrollment.period_id.clone(),
            });
        }

        let target = &refs.target_group;
        if !target.active {
            return Err(ValidationError::InactiveGroup(target.id.clone()));
        }
        if target.period_id != command.period_id {
            return Err(ValidationError::PeriodMismatch {
                entity: "target group",
                expected: command.period_id.clone(),
                found: target.period_id.clone(),
            });
        }
        if target.id == refs.source_group.id {
            return Err(ValidationError::SameGroup(target.id.clone()));
        }
        if !refs.target_subject.active {
            return Err(ValidationError::InactiveSubject(refs.target_subject.id.clone()));
        }

        if let Some(named) = &command.target_subject_id {
            if named != &target.subject_id {
                return Err(ValidationError::SubjectMismatch {
                    expected: named.clone(),
                    found: target.subject_id.clone(),
                });
            }
        }

        match command.kind {
            ChangeRequestKind::GroupChange if target.subject_id != refs.source_group.subject_id => {
                Err(ValidationError::SubjectMismatch {
                    expected: refs.source_group.subject_id.clone(),
                    found: target.subject_id.clone(),
                })
            }
            ChangeRequestKind::SubjectChange
                if target.subject_id == refs.source_group.subject_id =>
            {
                Err(ValidationError::SameSubject(target.subject_id.clone()))
            }
            _ => Ok(()),
        }
    }

    /// Build the PENDING entity with its deadline and CREATED history entry.
    pub fn admit(
        &self,
        command: CreateRequestCommand,
        refs: &ResolvedReferences,
        id: RequestId,
        code: String,
        now: DateTime<Utc>,
    ) -> ChangeRequest {
        let actor = UserId::from(&command.student_id);
        ChangeRequest {
            id,
            code,
            kind: command.kind,
            description: command.description.trim().to_string(),
            observations: command.observations,
            student_id: command.student_id,
            source_enrollment_id: command.source_enrollment_id,
            source_group_id: refs.source_group.id.clone(),
            target_group_id: refs.target_group.id.clone(),
            target_subject_id: refs.target_group.subject_id.clone(),
            period_id: command.period_id,
            priority: self.policy.default_priority(),
            status: RequestStatus::Pending,
            submitted_at: now,
            response_deadline: self.policy.deadline_for(now),
            updated_at: now,
            history: vec![HistoryEntry {
                at: now,
                action: HistoryAction::Created,
                actor,
                comment: None,
            }],
            conflicts: Vec::new(),
            revision: 0,
        }
    }
}
