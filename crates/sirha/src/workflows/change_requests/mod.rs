//! Request lifecycle and conflict resolution for schedule-change requests.
//!
//! A creation command is validated by [`intake`], scored against the catalog and
//! enrollment ledger by [`conflicts`], queued for coordinators by [`scheduler`]
//! and driven through the [`lifecycle`] state machine by [`service`].

pub mod catalog;
pub mod clock;
pub mod conflicts;
pub mod domain;
pub mod intake;
pub mod ledger;
pub mod lifecycle;
pub mod memory;
pub mod repository;
pub mod router;
pub mod scheduler;
pub mod service;

#[cfg(test)]
mod tests;

pub use catalog::{CatalogError, CatalogIndex};
pub use clock::{Clock, ManualClock, SystemClock};
pub use conflicts::{ConflictDetector, DetectionInput};
pub use domain::{
    AcademicPeriod, ChangeRequest, ChangeRequestKind, Conflict, ConflictKind, ConflictSeverity,
    CreateRequestCommand, DecisionOutcome, Enrollment, EnrollmentId, EnrollmentStatus, Group,
    GroupId, HistoryAction, HistoryEntry, PeriodId, RequestId, RequestStatus, RequestStatusView,
    ScheduleSlot, StudentId, Subject, SubjectId, UserId,
};
pub use intake::{RequestIntake, RequestPolicy, ValidationError};
pub use ledger::{EnrollmentLedger, LedgerError};
pub use memory::{InMemoryCampus, InMemoryNotifier, InMemoryRequestRepository};
pub use repository::{
    NotifyError, RepositoryError, RequestNotice, RequestNotifier, RequestQuery, RequestRepository,
};
pub use router::change_request_router;
pub use scheduler::PriorityScheduler;
pub use service::{ChangeRequestService, RequestServiceError};
