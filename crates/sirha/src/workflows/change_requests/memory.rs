//! In-process collaborators backing the demo binary and the test suites.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::catalog::{CatalogError, CatalogIndex};
use super::domain::{
    AcademicPeriod, ChangeRequest, Enrollment, EnrollmentId, EnrollmentStatus, Group, GroupId,
    PeriodId, RequestId, StudentId, Subject, SubjectId,
};
use super::ledger::{EnrollmentLedger, LedgerError};
use super::repository::{
    NotifyError, RepositoryError, RequestNotice, RequestNotifier, RequestQuery, RequestRepository,
};

#[derive(Debug, Default)]
struct CampusState {
    subjects: HashMap<SubjectId, Subject>,
    groups: HashMap<GroupId, Group>,
    periods: HashMap<PeriodId, AcademicPeriod>,
    enrollments: Vec<Enrollment>,
    next_enrollment: u64,
}

impl CampusState {
    /// Seats held in the group. APPROVED rows keep their seat, as ENROLLED ones do.
    fn occupancy(&self, group_id: &GroupId) -> u32 {
        self.enrollments
            .iter()
            .filter(|enrollment| &enrollment.group_id == group_id && enrollment.status.counts())
            .count() as u32
    }

    fn live_group(&self, group: &Group) -> Group {
        let mut group = group.clone();
        group.enrolled = self.occupancy(&group.id);
        group
    }

    fn next_enrollment_id(&mut self) -> EnrollmentId {
        self.next_enrollment += 1;
        EnrollmentId(format!("enr-{:04}", self.next_enrollment))
    }
}

/// Catalog and enrollment ledger sharing one state, so group occupancy is always
/// derived from the ENROLLED and APPROVED rows the ledger holds.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCampus {
    state: Arc<Mutex<CampusState>>,
}

impl InMemoryCampus {
    pub fn add_subject(&self, subject: Subject) {
        let mut guard = self.state.lock().expect("campus mutex poisoned");
        guard.subjects.insert(subject.id.clone(), subject);
    }

    pub fn add_group(&self, group: Group) {
        let mut guard = self.state.lock().expect("campus mutex poisoned");
        guard.groups.insert(group.id.clone(), group);
    }

    pub fn add_period(&self, period: AcademicPeriod) {
        let mut guard = self.state.lock().expect("campus mutex poisoned");
        guard.periods.insert(period.id.clone(), period);
    }

    /// Record an enrollment in the group's own period.
    pub fn enroll(
        &self,
        student_id: &StudentId,
        group_id: &GroupId,
        status: EnrollmentStatus,
    ) -> Result<EnrollmentId, LedgerError> {
        let mut guard = self.state.lock().expect("campus mutex poisoned");
        let period_id = guard
            .groups
            .get(group_id)
            .map(|group| group.period_id.clone())
            .ok_or_else(|| LedgerError::UnknownGroup(group_id.clone()))?;
        let id = guard.next_enrollment_id();
        guard.enrollments.push(Enrollment {
            id: id.clone(),
            student_id: student_id.clone(),
            group_id: group_id.clone(),
            period_id,
            status,
        });
        Ok(id)
    }

    pub fn enrollments_of(&self, student_id: &StudentId) -> Vec<Enrollment> {
        let guard = self.state.lock().expect("campus mutex poisoned");
        guard
            .enrollments
            .iter()
            .filter(|enrollment| &enrollment.student_id == student_id)
            .cloned()
            .collect()
    }
}

impl CatalogIndex for InMemoryCampus {
    fn subject(&self, id: &SubjectId) -> Result<Subject, CatalogError> {
        let guard = self.state.lock().expect("campus mutex poisoned");
        guard
            .subjects
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::subject(id))
    }

    fn group(&self, id: &GroupId) -> Result<Group, CatalogError> {
        let guard = self.state.lock().expect("campus mutex poisoned");
        guard
            .groups
            .get(id)
            .map(|group| guard.live_group(group))
            .ok_or_else(|| CatalogError::group(id))
    }

    fn groups_for_subject(&self, subject_id: &SubjectId) -> Result<Vec<Group>, CatalogError> {
        let guard = self.state.lock().expect("campus mutex poisoned");
        let mut groups: Vec<Group> = guard
            .groups
            .values()
            .filter(|group| group.active && &group.subject_id == subject_id)
            .map(|group| guard.live_group(group))
            .collect();
        groups.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(groups)
    }

    fn period(&self, id: &PeriodId) -> Result<AcademicPeriod, CatalogError> {
        let guard = self.state.lock().expect("campus mutex poisoned");
        guard
            .periods
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::period(id))
    }
}

impl EnrollmentLedger for InMemoryCampus {
    fn enrollment(&self, id: &EnrollmentId) -> Result<Option<Enrollment>, LedgerError> {
        let guard = self.state.lock().expect("campus mutex poisoned");
        Ok(guard
            .enrollments
            .iter()
            .find(|enrollment| &enrollment.id == id)
            .cloned())
    }

    fn active_enrollments(
        &self,
        student_id: &StudentId,
        period_id: &PeriodId,
    ) -> Result<Vec<Enrollment>, LedgerError> {
        let guard = self.state.lock().expect("campus mutex poisoned");
        Ok(guard
            .enrollments
            .iter()
            .filter(|enrollment| {
                &enrollment.student_id == student_id
                    && &enrollment.period_id == period_id
                    && enrollment.status.counts()
            })
            .cloned()
            .collect())
    }

    fn enrollment_history(&self, student_id: &StudentId) -> Result<Vec<Enrollment>, LedgerError> {
        Ok(self.enrollments_of(student_id))
    }

    fn is_enrolled(&self, student_id: &StudentId, group_id: &GroupId) -> Result<bool, LedgerError> {
        let guard = self.state.lock().expect("campus mutex poisoned");
        Ok(guard.enrollments.iter().any(|enrollment| {
            &enrollment.student_id == student_id
                && &enrollment.group_id == group_id
                && enrollment.status == EnrollmentStatus::Enrolled
        }))
    }

    fn apply_change(
        &self,
        student_id: &StudentId,
        from: &GroupId,
        to: &GroupId,
    ) -> Result<(), LedgerError> {
        let mut guard = self.state.lock().expect("campus mutex poisoned");

        let source = guard
            .enrollments
            .iter()
            .position(|enrollment| {
                &enrollment.student_id == student_id
                    && &enrollment.group_id == from
                    && enrollment.status == EnrollmentStatus::Enrolled
            })
            .ok_or_else(|| LedgerError::SourceNotEnrolled {
                student: student_id.clone(),
                group: from.clone(),
            })?;

        let target = guard
            .groups
            .get(to)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownGroup(to.clone()))?;

        let already_enrolled = guard.enrollments.iter().any(|enrollment| {
            &enrollment.student_id == student_id
                && &enrollment.group_id == to
                && enrollment.status == EnrollmentStatus::Enrolled
        });
        if already_enrolled {
            return Err(LedgerError::AlreadyEnrolled {
                student: student_id.clone(),
                group: to.clone(),
            });
        }

        if guard.occupancy(to) >= target.capacity {
            return Err(LedgerError::CapacityExhausted {
                group: to.clone(),
                capacity: target.capacity,
            });
        }

        // All checks passed; nothing below can fail.
        guard.enrollments[source].status = EnrollmentStatus::Cancelled;
        let reusable = guard.enrollments.iter().position(|enrollment| {
            &enrollment.student_id == student_id
                && &enrollment.group_id == to
                && enrollment.status == EnrollmentStatus::Cancelled
        });
        match reusable {
            Some(index) => guard.enrollments[index].status = EnrollmentStatus::Enrolled,
            None => {
                let id = guard.next_enrollment_id();
                guard.enrollments.push(Enrollment {
                    id,
                    student_id: student_id.clone(),
                    group_id: to.clone(),
                    period_id: target.period_id,
                    status: EnrollmentStatus::Enrolled,
                });
            }
        }
        Ok(())
    }
}

/// Request store enforcing revision checks on update.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRequestRepository {
    records: Arc<Mutex<HashMap<RequestId, ChangeRequest>>>,
}

impl RequestRepository for InMemoryRequestRepository {
    fn insert(&self, mut request: ChangeRequest) -> Result<ChangeRequest, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(&request.id) {
            return Err(RepositoryError::Conflict);
        }
        request.revision = 0;
        guard.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    fn update(
        &self,
        mut request: ChangeRequest,
        expected_revision: u64,
    ) -> Result<ChangeRequest, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        let stored = guard.get(&request.id).ok_or(RepositoryError::NotFound)?;
        if stored.revision != expected_revision {
            return Err(RepositoryError::RevisionMismatch {
                expected: expected_revision,
                found: stored.revision,
            });
        }
        request.revision = expected_revision + 1;
        guard.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    fn fetch(&self, id: &RequestId) -> Result<Option<ChangeRequest>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn query(&self, query: &RequestQuery) -> Result<Vec<ChangeRequest>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        let mut matches: Vec<ChangeRequest> = guard
            .values()
            .filter(|request| query.matches(request))
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(matches)
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryNotifier {
    events: Arc<Mutex<Vec<RequestNotice>>>,
}

impl InMemoryNotifier {
    pub fn events(&self) -> Vec<RequestNotice> {
        self.events.lock().expect("notifier mutex poisoned").clone()
    }
}

impl RequestNotifier for InMemoryNotifier {
    fn publish(&self, notice: RequestNotice) -> Result<(), NotifyError> {
        self.events
            .lock()
            .expect("notifier mutex poisoned")
            .push(notice);
        Ok(())
    }
}
