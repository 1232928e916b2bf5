use std::collections::BTreeSet;

use super::domain::{
    AcademicPeriod, Enrollment, EnrollmentStatus, Group, GroupId, PeriodId, Subject, SubjectId,
};

/// Read-only view of subjects, groups, and periods.
pub trait CatalogIndex: Send + Sync {
    fn subject(&self, id: &SubjectId) -> Result<Subject, CatalogError>;
    fn group(&self, id: &GroupId) -> Result<Group, CatalogError>;
    /// Active groups offered for the subject.
    fn groups_for_subject(&self, subject_id: &SubjectId) -> Result<Vec<Group>, CatalogError>;
    fn period(&self, id: &PeriodId) -> Result<AcademicPeriod, CatalogError>;

    /// Subjects the student has passed, resolved from APPROVED enrollments.
    fn completed_subjects(
        &self,
        history: &[Enrollment],
    ) -> Result<BTreeSet<SubjectId>, CatalogError> {
        let mut completed = BTreeSet::new();
        for enrollment in history
            .iter()
            .filter(|enrollment| enrollment.status == EnrollmentStatus::Approved)
        {
            match self.group(&enrollment.group_id) {
                Ok(group) => {
                    completed.insert(group.subject_id);
                }
                // Retired groups no longer resolve; their history cannot prove anything.
                Err(CatalogError::NotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(completed)
    }

    fn has_prerequisites_satisfied(
        &self,
        history: &[Enrollment],
        subject_id: &SubjectId,
    ) -> Result<bool, CatalogError> {
        let subject = self.subject(subject_id)?;
        let completed = self.completed_subjects(history)?;
        Ok(subject
            .prerequisites
            .iter()
            .all(|prerequisite| completed.contains(prerequisite)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("{entity} '{id}' not found in catalog")]
    NotFound { entity: &'static str, id: String },
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

impl CatalogError {
    pub fn subject(id: &SubjectId) -> Self {
        Self::NotFound {
            entity: "subject",
            id: id.0.clone(),
        }
    }

    pub fn group(id: &GroupId) -> Self {
        Self::NotFound {
            entity: "group",
            id: id.0.clone(),
        }
    }

    pub fn period(id: &PeriodId) -> Self {
        Self::NotFound {
            entity: "period",
            id: id.0.clone(),
        }
    }
}
