use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::catalog::{CatalogError, CatalogIndex};
use super::clock::{Clock, SystemClock};
use super::conflicts::{ConflictDetector, DetectionInput};
use super::domain::{
    ChangeRequest, Conflict, CreateRequestCommand, DecisionOutcome, Enrollment, Group, PeriodId,
    RequestId, RequestStatus, StudentId, UserId,
};
use super::intake::{RequestIntake, RequestPolicy, ResolvedReferences, ValidationError};
use super::ledger::{EnrollmentLedger, LedgerError};
use super::lifecycle::{self, IllegalTransition, Transition};
use super::repository::{
    RepositoryError, RequestNotice, RequestNotifier, RequestQuery, RequestRepository,
};
use super::scheduler::PriorityScheduler;

/// Lifecycle manager composing intake, conflict detection, the review queue and
/// the external stores.
pub struct ChangeRequestService<R, C, L> {
    intake: RequestIntake,
    detector: ConflictDetector,
    scheduler: PriorityScheduler,
    repository: Arc<R>,
    catalog: Arc<C>,
    ledger: Arc<L>,
    notifier: Arc<dyn RequestNotifier>,
    clock: Arc<dyn Clock>,
    in_flight: InFlight,
    sequence: AtomicU64,
}

impl<R, C, L> ChangeRequestService<R, C, L>
where
    R: RequestRepository + 'static,
    C: CatalogIndex + 'static,
    L: EnrollmentLedger + 'static,
{
    pub fn new(
        repository: Arc<R>,
        catalog: Arc<C>,
        ledger: Arc<L>,
        notifier: Arc<dyn RequestNotifier>,
        policy: RequestPolicy,
    ) -> Self {
        Self {
            intake: RequestIntake::with_policy(policy),
            detector: ConflictDetector::new(),
            scheduler: PriorityScheduler::new(),
            repository,
            catalog,
            ledger,
            notifier,
            clock: Arc::new(SystemClock),
            in_flight: InFlight::default(),
            sequence: AtomicU64::new(1),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &RequestPolicy {
        self.intake.policy()
    }

    /// Validate a command, attach its initial conflicts and store it as PENDING.
    pub fn create(
        &self,
        command: CreateRequestCommand,
    ) -> Result<ChangeRequest, RequestServiceError> {
        let _claim = self.claim(format!("enrollment:{}", command.source_enrollment_id))?;
        let now = self.clock.now();

        let refs = self.resolve(&command)?;
        self.intake.check(&command, &refs)?;

        let open = self
            .repository
            .query(&RequestQuery::for_student(command.student_id.clone()))?;
        if let Some(existing) = open
            .into_iter()
            .map(|request| lifecycle::expire_if_overdue(request, now))
            .find(|request| {
                request.status.is_open()
                    && request.source_enrollment_id == command.source_enrollment_id
            })
        {
            return Err(ValidationError::DuplicatePending {
                existing: existing.id,
                enrollment: command.source_enrollment_id,
            }
            .into());
        }

        let id = RequestId(Uuid::new_v4().to_string());
        let code = self.next_code();
        let mut request = self.intake.admit(command, &refs, id, code, now);
        request.conflicts = self.detect(&request, now)?;

        let stored = self.repository.insert(request)?;
        info!(
            request_id = %stored.id,
            code = %stored.code,
            student_id = %stored.student_id,
            conflicts = stored.conflicts.len(),
            "change request created"
        );
        Ok(stored)
    }

    /// Re-derive the conflict set from current catalog and ledger data.
    ///
    /// Open requests get their conflicts replaced; terminal requests keep the set
    /// they were closed with.
    pub fn evaluate(&self, id: &RequestId) -> Result<Vec<Conflict>, RequestServiceError> {
        let _claim = self.claim(format!("request:{id}"))?;
        let now = self.clock.now();
        let current = self.load(id, now)?;

        if current.status.is_terminal() {
            return Ok(current.conflicts);
        }

        let conflicts = self.detect(&current, now)?;
        let mut next = current.clone();
        next.conflicts = conflicts;
        next.updated_at = now;
        let stored = self.persist(next, current.revision)?;

        debug!(
            request_id = %stored.id,
            conflicts = stored.conflicts.len(),
            blocking = stored.blocking_conflicts().len(),
            "change request evaluated"
        );
        Ok(stored.conflicts)
    }

    pub fn start_review(
        &self,
        id: &RequestId,
        reviewer: UserId,
    ) -> Result<ChangeRequest, RequestServiceError> {
        let _claim = self.claim(format!("request:{id}"))?;
        let now = self.clock.now();
        let current = self.load(id, now)?;

        let next = lifecycle::apply(&current, Transition::StartReview, reviewer, None, now)
            .map_err(|err| RequestServiceError::invalid_state(id, err))?;
        let stored = self.persist(next, current.revision)?;

        info!(request_id = %stored.id, "change request under review");
        Ok(stored)
    }

    pub fn reprioritize(
        &self,
        id: &RequestId,
        priority: u8,
        actor: UserId,
    ) -> Result<ChangeRequest, RequestServiceError> {
        if priority == 0 {
            return Err(ValidationError::InvalidPriority(priority).into());
        }

        let _claim = self.claim(format!("request:{id}"))?;
        let now = self.clock.now();
        let current = self.load(id, now)?;

        let next = lifecycle::reprioritize(&current, priority, actor, now)
            .map_err(|err| RequestServiceError::invalid_state(id, err))?;
        let stored = self.persist(next, current.revision)?;

        info!(request_id = %stored.id, priority, "change request reprioritized");
        Ok(stored)
    }

    /// Approve or reject an open request.
    ///
    /// Approval re-runs conflict detection and then performs the ledger swap; the
    /// request is only written once the swap has committed. If that write loses
    /// the revision race, the swap is reversed before reporting the conflict.
    /// The reversal can itself fail (another writer took the freed source seat in
    /// between); the ledger then stays swapped under an open request, which is
    /// logged at error level and returned as `Ledger` for an operator to repair.
    pub fn decide(
        &self,
        id: &RequestId,
        decider: UserId,
        outcome: DecisionOutcome,
        observations: Option<String>,
    ) -> Result<ChangeRequest, RequestServiceError> {
        let _claim = self.claim(format!("request:{id}"))?;
        let now = self.clock.now();
        let current = self.load(id, now)?;

        let transition = match outcome {
            DecisionOutcome::Approve => Transition::Approve,
            DecisionOutcome::Reject => Transition::Reject,
        };
        let mut next = lifecycle::apply(&current, transition, decider, observations, now)
            .map_err(|err| RequestServiceError::invalid_state(id, err))?;

        if outcome == DecisionOutcome::Reject {
            let stored = self.persist(next, current.revision)?;
            info!(request_id = %stored.id, "change request rejected");
            self.notify(&stored, "request_rejected");
            return Ok(stored);
        }

        let conflicts = self.detect(&current, now)?;
        let blocking: Vec<Conflict> = conflicts
            .iter()
            .filter(|conflict| conflict.blocking)
            .cloned()
            .collect();
        if !blocking.is_empty() {
            warn!(
                request_id = %current.id,
                blocking = blocking.len(),
                "approval refused due to blocking conflicts"
            );
            return Err(RequestServiceError::BlockingConflicts {
                id: current.id,
                conflicts: blocking,
            });
        }

        if let Err(err) = self.ledger.apply_change(
            &current.student_id,
            &current.source_group_id,
            &current.target_group_id,
        ) {
            warn!(request_id = %current.id, error = %err, "enrollment swap failed");
            return Err(err.into());
        }

        next.conflicts = conflicts;
        match self.repository.update(next, current.revision) {
            Ok(stored) => {
                info!(
                    request_id = %stored.id,
                    target_group = %stored.target_group_id,
                    "change request approved"
                );
                self.notify(&stored, "request_approved");
                Ok(stored)
            }
            Err(write_err) => {
                self.revert_swap(&current)?;
                Err(match write_err {
                    RepositoryError::RevisionMismatch { .. } => {
                        RequestServiceError::concurrent(&current.id)
                    }
                    other => other.into(),
                })
            }
        }
    }

    /// Withdraw a request. Only the student who submitted it may do so.
    pub fn cancel(
        &self,
        id: &RequestId,
        student_id: &StudentId,
    ) -> Result<ChangeRequest, RequestServiceError> {
        let _claim = self.claim(format!("request:{id}"))?;
        let now = self.clock.now();
        let current = self.load(id, now)?;

        if &current.student_id != student_id {
            return Err(RequestServiceError::Forbidden {
                id: id.clone(),
                student: student_id.clone(),
            });
        }

        let next = lifecycle::apply(
            &current,
            Transition::Cancel,
            UserId::from(student_id),
            None,
            now,
        )
        .map_err(|err| RequestServiceError::invalid_state(id, err))?;
        let stored = self.persist(next, current.revision)?;

        info!(request_id = %stored.id, "change request cancelled");
        self.notify(&stored, "request_cancelled");
        Ok(stored)
    }

    pub fn get(&self, id: &RequestId) -> Result<ChangeRequest, RequestServiceError> {
        let request = self
            .repository
            .fetch(id)?
            .ok_or_else(|| RequestServiceError::NotFound(id.clone()))?;
        self.refresh(request, self.clock.now())
    }

    pub fn requests_for_student(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<ChangeRequest>, RequestServiceError> {
        let now = self.clock.now();
        self.repository
            .query(&RequestQuery::for_student(student_id.clone()))?
            .into_iter()
            .map(|request| self.refresh(request, now))
            .collect()
    }

    /// Ordered review queue for a period, restricted to `states`.
    pub fn next_batch(
        &self,
        period_id: &PeriodId,
        states: &[RequestStatus],
        limit: usize,
    ) -> Result<Vec<ChangeRequest>, RequestServiceError> {
        let now = self.clock.now();
        let query = RequestQuery {
            period_id: Some(period_id.clone()),
            statuses: states.to_vec(),
            ..RequestQuery::default()
        };
        let candidates = self
            .repository
            .query(&query)?
            .into_iter()
            .map(|request| self.refresh(request, now))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(self
            .scheduler
            .next_batch(candidates, period_id, states, limit))
    }

    pub fn list_pending(
        &self,
        period_id: &PeriodId,
        limit: usize,
    ) -> Result<Vec<ChangeRequest>, RequestServiceError> {
        self.next_batch(period_id, &RequestStatus::OPEN, limit)
    }

    /// Persist EXPIRED for every overdue open request. Returns how many moved.
    pub fn sweep_expired(&self) -> Result<usize, RequestServiceError> {
        let now = self.clock.now();
        let mut expired = 0;

        for request in self.repository.query(&RequestQuery::open())? {
            if !request.is_overdue(now) {
                continue;
            }
            let Ok(_claim) = self.claim(format!("request:{}", request.id)) else {
                debug!(request_id = %request.id, "sweep skipped busy request");
                continue;
            };

            let revision = request.revision;
            let next = lifecycle::expire_if_overdue(request, now);
            match self.repository.update(next, revision) {
                Ok(stored) => {
                    info!(request_id = %stored.id, "change request expired");
                    expired += 1;
                }
                Err(RepositoryError::RevisionMismatch { .. }) => {
                    debug!("sweep lost revision race; request changed underneath");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(expired)
    }

    fn claim(&self, key: String) -> Result<Claim<'_>, RequestServiceError> {
        self.in_flight
            .claim(key.clone())
            .ok_or(RequestServiceError::ConcurrentModification { resource: key })
    }

    fn next_code(&self) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("SOL-{sequence:06}")
    }

    /// Fetch for a mutation, persisting expiry first when the deadline has passed.
    fn load(
        &self,
        id: &RequestId,
        now: DateTime<Utc>,
    ) -> Result<ChangeRequest, RequestServiceError> {
        let request = self
            .repository
            .fetch(id)?
            .ok_or_else(|| RequestServiceError::NotFound(id.clone()))?;

        let revision = request.revision;
        let current = lifecycle::expire_if_overdue(request.clone(), now);
        if current.status == request.status {
            return Ok(request);
        }

        let stored = self.persist(current, revision)?;
        info!(request_id = %stored.id, "change request expired");
        Ok(stored)
    }

    /// Read-path expiry: persisted best-effort, never observable as stale.
    fn refresh(
        &self,
        request: ChangeRequest,
        now: DateTime<Utc>,
    ) -> Result<ChangeRequest, RequestServiceError> {
        let revision = request.revision;
        let status = request.status;
        let current = lifecycle::expire_if_overdue(request, now);
        if current.status == status {
            return Ok(current);
        }

        let id = current.id.clone();
        match self.repository.update(current, revision) {
            Ok(stored) => {
                info!(request_id = %stored.id, "change request expired on read");
                Ok(stored)
            }
            Err(RepositoryError::RevisionMismatch { .. }) => {
                debug!(request_id = %id, "expiry write raced; re-reading");
                let latest = self
                    .repository
                    .fetch(&id)?
                    .ok_or(RequestServiceError::NotFound(id))?;
                Ok(lifecycle::expire_if_overdue(latest, now))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn persist(
        &self,
        request: ChangeRequest,
        expected_revision: u64,
    ) -> Result<ChangeRequest, RequestServiceError> {
        let id = request.id.clone();
        self.repository
            .update(request, expected_revision)
            .map_err(|err| match err {
                RepositoryError::RevisionMismatch { expected, found } => {
                    warn!(request_id = %id, expected, found, "optimistic write lost");
                    RequestServiceError::concurrent(&id)
                }
                RepositoryError::NotFound => RequestServiceError::NotFound(id),
                other => other.into(),
            })
    }

    fn revert_swap(&self, request: &ChangeRequest) -> Result<(), RequestServiceError> {
        match self.ledger.apply_change(
            &request.student_id,
            &request.target_group_id,
            &request.source_group_id,
        ) {
            Ok(()) => {
                warn!(request_id = %request.id, "approval write lost; enrollment swap reverted");
                Ok(())
            }
            Err(err) => {
                error!(
                    request_id = %request.id,
                    error = %err,
                    "approval write lost and enrollment swap could not be reverted"
                );
                Err(err.into())
            }
        }
    }

    fn resolve(
        &self,
        command: &CreateRequestCommand,
    ) -> Result<ResolvedReferences, RequestServiceError> {
        let source_enrollment = self
            .ledger
            .enrollment(&command.source_enrollment_id)?
            .ok_or_else(|| ValidationError::UnknownReference {
                entity: "enrollment",
                id: command.source_enrollment_id.0.clone(),
            })?;
        let source_group = self
            .catalog
            .group(&source_enrollment.group_id)
            .map_err(reference)?;
        let target_group = self
            .catalog
            .group(&command.target_group_id)
            .map_err(reference)?;
        let target_subject = self
            .catalog
            .subject(&target_group.subject_id)
            .map_err(reference)?;
        let period = self.catalog.period(&command.period_id).map_err(reference)?;

        Ok(ResolvedReferences {
            source_enrollment,
            source_group,
            target_group,
            target_subject,
            period,
        })
    }

    fn detect(
        &self,
        request: &ChangeRequest,
        now: DateTime<Utc>,
    ) -> Result<Vec<Conflict>, RequestServiceError> {
        let target_group = self
            .catalog
            .group(&request.target_group_id)
            .map_err(reference)?;
        let target_subject = self
            .catalog
            .subject(&request.target_subject_id)
            .map_err(reference)?;
        let period = self.catalog.period(&request.period_id).map_err(reference)?;
        let enrollments = self
            .ledger
            .active_enrollments(&request.student_id, &request.period_id)?;
        let enrolled_groups = self.groups_of(&enrollments)?;
        let history = self.ledger.enrollment_history(&request.student_id)?;
        let completed_subjects = self.catalog.completed_subjects(&history)?;

        Ok(self.detector.detect(&DetectionInput {
            request,
            enrollments: &enrollments,
            enrolled_groups: &enrolled_groups,
            completed_subjects: &completed_subjects,
            target_group: &target_group,
            target_subject: &target_subject,
            period: &period,
            now,
        }))
    }

    fn groups_of(
        &self,
        enrollments: &[Enrollment],
    ) -> Result<Vec<Group>, RequestServiceError> {
        let mut groups = Vec::with_capacity(enrollments.len());
        for enrollment in enrollments {
            match self.catalog.group(&enrollment.group_id) {
                Ok(group) => groups.push(group),
                Err(CatalogError::NotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(groups)
    }

    fn notify(&self, request: &ChangeRequest, template: &str) {
        let mut details = BTreeMap::new();
        details.insert("code".to_string(), request.code.clone());
        details.insert("status".to_string(), request.status.label().to_string());
        if let Some(comment) = request.history.last().and_then(|entry| entry.comment.clone()) {
            details.insert("comment".to_string(), comment);
        }

        let notice = RequestNotice {
            template: template.to_string(),
            request_id: request.id.clone(),
            student_id: request.student_id.clone(),
            details,
        };
        if let Err(err) = self.notifier.publish(notice) {
            warn!(request_id = %request.id, error = %err, "notification not delivered");
        }
    }
}

fn reference(err: CatalogError) -> RequestServiceError {
    match err {
        CatalogError::NotFound { entity, id } => {
            ValidationError::UnknownReference { entity, id }.into()
        }
        other => other.into(),
    }
}

/// Keys currently being mutated by this service instance.
#[derive(Debug, Default)]
struct InFlight {
    keys: Mutex<HashSet<String>>,
}

impl InFlight {
    fn claim(&self, key: String) -> Option<Claim<'_>> {
        let mut guard = self.keys.lock().expect("in-flight mutex poisoned");
        if !guard.insert(key.clone()) {
            return None;
        }
        Some(Claim { owner: self, key })
    }
}

struct Claim<'a> {
    owner: &'a InFlight,
    key: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.owner.keys.lock() {
            guard.remove(&self.key);
        }
    }
}

/// Error raised by the change request service.
#[derive(Debug, thiserror::Error)]
pub enum RequestServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("request {0} not found")]
    NotFound(RequestId),
    #[error("cannot {operation} request {id} in state {status}")]
    InvalidState {
        id: RequestId,
        status: RequestStatus,
        operation: &'static str,
    },
    #[error("request {id} has {} blocking conflict(s)", .conflicts.len())]
    BlockingConflicts {
        id: RequestId,
        conflicts: Vec<Conflict>,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("{resource} was modified concurrently; re-read and retry")]
    ConcurrentModification { resource: String },
    #[error("student {student} did not submit request {id}")]
    Forbidden { id: RequestId, student: StudentId },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl RequestServiceError {
    fn invalid_state(id: &RequestId, err: IllegalTransition) -> Self {
        Self::InvalidState {
            id: id.clone(),
            status: err.from,
            operation: err.transition.name(),
        }
    }

    fn concurrent(id: &RequestId) -> Self {
        Self::ConcurrentModification {
            resource: format!("request:{id}"),
        }
    }

    /// Whether a caller may re-read and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}
