use std::cmp::Ordering;

use super::domain::{ChangeRequest, PeriodId, RequestStatus};

/// Coordinator review order: lower priority value first, then earlier deadline,
/// then earlier submission. The request id settles exact ties so the order is total.
pub fn review_order(a: &ChangeRequest, b: &ChangeRequest) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.response_deadline.cmp(&b.response_deadline))
        .then_with(|| a.submitted_at.cmp(&b.submitted_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Read-only queue view, recomputed from whatever the caller hands in.
#[derive(Debug, Default, Clone, Copy)]
pub struct PriorityScheduler;

impl PriorityScheduler {
    pub fn new() -> Self {
        Self
    }

    pub fn next_batch<I>(
        &self,
        candidates: I,
        period_id: &PeriodId,
        states: &[RequestStatus],
        limit: usize,
    ) -> Vec<ChangeRequest>
    where
        I: IntoIterator<Item = ChangeRequest>,
    {
        let mut queue: Vec<ChangeRequest> = candidates
            .into_iter()
            .filter(|request| &request.period_id == period_id && states.contains(&request.status))
            .collect();
        queue.sort_by(review_order);
        queue.truncate(limit);
        queue
    }
}
