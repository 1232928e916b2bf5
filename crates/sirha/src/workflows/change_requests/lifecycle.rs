//! Pure state machine for change requests.
//!
//! ```text
//! PENDING ──review──▶ UNDER_REVIEW
//!    │                     │
//!    ├──approve/reject─────┼──▶ APPROVED | REJECTED
//!    ├──cancel─────────────┼──▶ CANCELLED
//!    └──deadline passed────┴──▶ EXPIRED
//! ```
//!
//! Every function here returns a new entity; persistence and the ledger are the
//! service's concern.

use chrono::{DateTime, Utc};

use super::domain::{ChangeRequest, HistoryAction, HistoryEntry, RequestStatus, UserId};

/// Actor recorded for transitions nobody asked for.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StartReview,
    Reprioritize,
    Approve,
    Reject,
    Cancel,
    Expire,
}

impl Transition {
    pub const fn name(self) -> &'static str {
        match self {
            Transition::StartReview => "start review",
            Transition::Reprioritize => "reprioritize",
            Transition::Approve => "approve",
            Transition::Reject => "reject",
            Transition::Cancel => "cancel",
            Transition::Expire => "expire",
        }
    }

    const fn action(self) -> HistoryAction {
        match self {
            Transition::StartReview => HistoryAction::ReviewStarted,
            Transition::Reprioritize => HistoryAction::PriorityChanged,
            Transition::Approve => HistoryAction::Approved,
            Transition::Reject => HistoryAction::Rejected,
            Transition::Cancel => HistoryAction::Cancelled,
            Transition::Expire => HistoryAction::Expired,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {} a request in state {from}", .transition.name())]
pub struct IllegalTransition {
    pub from: RequestStatus,
    pub transition: Transition,
}

/// Destination state of `transition` from `from`, if the machine allows it.
pub fn target_status(
    from: RequestStatus,
    transition: Transition,
) -> Result<RequestStatus, IllegalTransition> {
    use RequestStatus::*;

    let to = match (from, transition) {
        (Pending, Transition::StartReview) => UnderReview,
        (Pending | UnderReview, Transition::Reprioritize) => from,
        (Pending | UnderReview, Transition::Approve) => Approved,
        (Pending | UnderReview, Transition::Reject) => Rejected,
        (Pending | UnderReview, Transition::Cancel) => Cancelled,
        (Pending | UnderReview, Transition::Expire) => Expired,
        _ => return Err(IllegalTransition { from, transition }),
    };
    Ok(to)
}

/// Copy of `request` moved through `transition` with one history entry appended.
pub fn apply(
    request: &ChangeRequest,
    transition: Transition,
    actor: UserId,
    comment: Option<String>,
    at: DateTime<Utc>,
) -> Result<ChangeRequest, IllegalTransition> {
    let status = target_status(request.status, transition)?;

    let mut next = request.clone();
    next.status = status;
    next.updated_at = at;
    next.history.push(HistoryEntry {
        at,
        action: transition.action(),
        actor,
        comment,
    });
    Ok(next)
}

/// Expire `request` when its response deadline has passed without a decision.
///
/// Requests that are already terminal, or still inside their window, come back
/// untouched, so calling this repeatedly never stacks history entries.
pub fn expire_if_overdue(request: ChangeRequest, now: DateTime<Utc>) -> ChangeRequest {
    if !request.status.is_open() || !request.is_overdue(now) {
        return request;
    }

    let comment = format!(
        "no decision before {}",
        request.response_deadline.format("%Y-%m-%d %H:%M UTC")
    );
    match apply(
        &request,
        Transition::Expire,
        UserId::new(SYSTEM_ACTOR),
        Some(comment),
        now,
    ) {
        Ok(expired) => expired,
        Err(_) => request,
    }
}

/// Change the review priority of an open request. The deadline is never touched.
pub fn reprioritize(
    request: &ChangeRequest,
    priority: u8,
    actor: UserId,
    at: DateTime<Utc>,
) -> Result<ChangeRequest, IllegalTransition> {
    let comment = format!("priority {} -> {priority}", request.priority);
    let mut next = apply(request, Transition::Reprioritize, actor, Some(comment), at)?;
    next.priority = priority;
    Ok(next)
}
