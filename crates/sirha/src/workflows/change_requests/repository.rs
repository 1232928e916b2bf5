use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{ChangeRequest, PeriodId, RequestId, RequestStatus, StudentId};

/// Filter used by the read paths. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestQuery {
    pub student_id: Option<StudentId>,
    pub period_id: Option<PeriodId>,
    pub statuses: Vec<RequestStatus>,
}

impl RequestQuery {
    pub fn for_student(student_id: StudentId) -> Self {
        Self {
            student_id: Some(student_id),
            ..Self::default()
        }
    }

    pub fn open() -> Self {
        Self {
            statuses: RequestStatus::OPEN.to_vec(),
            ..Self::default()
        }
    }

    pub fn matches(&self, request: &ChangeRequest) -> bool {
        self.student_id
            .as_ref()
            .map_or(true, |student| &request.student_id == student)
            && self
                .period_id
                .as_ref()
                .map_or(true, |period| &request.period_id == period)
            && (self.statuses.is_empty() || self.statuses.contains(&request.status))
    }
}

/// Storage abstraction for requests.
///
/// `update` is a compare-and-swap on `revision`: it succeeds only when the stored
/// revision equals `expected_revision`, and returns the stored copy with the
/// bumped revision.
pub trait RequestRepository: Send + Sync {
    fn insert(&self, request: ChangeRequest) -> Result<ChangeRequest, RepositoryError>;
    fn update(
        &self,
        request: ChangeRequest,
        expected_revision: u64,
    ) -> Result<ChangeRequest, RepositoryError>;
    fn fetch(&self, id: &RequestId) -> Result<Option<ChangeRequest>, RepositoryError>;
    fn query(&self, query: &RequestQuery) -> Result<Vec<ChangeRequest>, RepositoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("revision mismatch (expected {expected}, found {found})")]
    RevisionMismatch { expected: u64, found: u64 },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Outbound hook for notification delivery (mail, push, LMS adapters).
pub trait RequestNotifier: Send + Sync {
    fn publish(&self, notice: RequestNotice) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestNotice {
    pub template: String,
    pub request_id: RequestId,
    pub student_id: StudentId,
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}
