use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::catalog::CatalogIndex;
use super::domain::{CreateRequestCommand, DecisionOutcome, PeriodId, RequestId, StudentId, UserId};
use super::ledger::EnrollmentLedger;
use super::repository::RequestRepository;
use super::service::{ChangeRequestService, RequestServiceError};

const DEFAULT_PENDING_LIMIT: usize = 50;

/// Router builder exposing the lifecycle operations over HTTP.
pub fn change_request_router<R, C, L>(service: Arc<ChangeRequestService<R, C, L>>) -> Router
where
    R: RequestRepository + 'static,
    C: CatalogIndex + 'static,
    L: EnrollmentLedger + 'static,
{
    Router::new()
        .route("/api/v1/requests", post(create_handler::<R, C, L>))
        .route("/api/v1/requests/:request_id", get(status_handler::<R, C, L>))
        .route(
            "/api/v1/requests/:request_id/evaluate",
            post(evaluate_handler::<R, C, L>),
        )
        .route(
            "/api/v1/requests/:request_id/review",
            post(review_handler::<R, C, L>),
        )
        .route(
            "/api/v1/requests/:request_id/decision",
            post(decision_handler::<R, C, L>),
        )
        .route(
            "/api/v1/requests/:request_id/cancel",
            post(cancel_handler::<R, C, L>),
        )
        .route(
            "/api/v1/requests/:request_id/priority",
            post(priority_handler::<R, C, L>),
        )
        .route(
            "/api/v1/students/:student_id/requests",
            get(student_requests_handler::<R, C, L>),
        )
        .route(
            "/api/v1/periods/:period_id/pending",
            get(pending_handler::<R, C, L>),
        )
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReviewBody {
    pub(crate) reviewer_id: UserId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecisionBody {
    pub(crate) decider_id: UserId,
    pub(crate) outcome: DecisionOutcome,
    #[serde(default)]
    pub(crate) observations: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CancelBody {
    pub(crate) student_id: StudentId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PriorityBody {
    pub(crate) actor_id: UserId,
    pub(crate) priority: u8,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PendingParams {
    #[serde(default)]
    pub(crate) limit: Option<usize>,
}

pub(crate) async fn create_handler<R, C, L>(
    State(service): State<Arc<ChangeRequestService<R, C, L>>>,
    axum::Json(command): axum::Json<CreateRequestCommand>,
) -> Response
where
    R: RequestRepository + 'static,
    C: CatalogIndex + 'static,
    L: EnrollmentLedger + 'static,
{
    match service.create(command) {
        Ok(request) => (StatusCode::CREATED, axum::Json(request)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn status_handler<R, C, L>(
    State(service): State<Arc<ChangeRequestService<R, C, L>>>,
    Path(request_id): Path<String>,
) -> Response
where
    R: RequestRepository + 'static,
    C: CatalogIndex + 'static,
    L: EnrollmentLedger + 'static,
{
    match service.get(&RequestId(request_id)) {
        Ok(request) => (StatusCode::OK, axum::Json(request)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn evaluate_handler<R, C, L>(
    State(service): State<Arc<ChangeRequestService<R, C, L>>>,
    Path(request_id): Path<String>,
) -> Response
where
    R: RequestRepository + 'static,
    C: CatalogIndex + 'static,
    L: EnrollmentLedger + 'static,
{
    let id = RequestId(request_id);
    match service.evaluate(&id) {
        Ok(conflicts) => {
            let payload = json!({
                "request_id": id,
                "blocking": conflicts.iter().any(|conflict| conflict.blocking),
                "conflicts": conflicts,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn review_handler<R, C, L>(
    State(service): State<Arc<ChangeRequestService<R, C, L>>>,
    Path(request_id): Path<String>,
    axum::Json(body): axum::Json<ReviewBody>,
) -> Response
where
    R: RequestRepository + 'static,
    C: CatalogIndex + 'static,
    L: EnrollmentLedger + 'static,
{
    match service.start_review(&RequestId(request_id), body.reviewer_id) {
        Ok(request) => (StatusCode::OK, axum::Json(request)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn decision_handler<R, C, L>(
    State(service): State<Arc<ChangeRequestService<R, C, L>>>,
    Path(request_id): Path<String>,
    axum::Json(body): axum::Json<DecisionBody>,
) -> Response
where
    R: RequestRepository + 'static,
    C: CatalogIndex + 'static,
    L: EnrollmentLedger + 'static,
{
    let DecisionBody {
        decider_id,
        outcome,
        observations,
    } = body;
    match service.decide(&RequestId(request_id), decider_id, outcome, observations) {
        Ok(request) => (StatusCode::OK, axum::Json(request)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn cancel_handler<R, C, L>(
    State(service): State<Arc<ChangeRequestService<R, C, L>>>,
    Path(request_id): Path<String>,
    axum::Json(body): axum::Json<CancelBody>,
) -> Response
where
    R: RequestRepository + 'static,
    C: CatalogIndex + 'static,
    L: EnrollmentLedger + 'static,
{
    match service.cancel(&RequestId(request_id), &body.student_id) {
        Ok(request) => (StatusCode::OK, axum::Json(request)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn priority_handler<R, C, L>(
    State(service): State<Arc<ChangeRequestService<R, C, L>>>,
    Path(request_id): Path<String>,
    axum::Json(body): axum::Json<PriorityBody>,
) -> Response
where
    R: RequestRepository + 'static,
    C: CatalogIndex + 'static,
    L: EnrollmentLedger + 'static,
{
    match service.reprioritize(&RequestId(request_id), body.priority, body.actor_id) {
        Ok(request) => (StatusCode::OK, axum::Json(request)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn student_requests_handler<R, C, L>(
    State(service): State<Arc<ChangeRequestService<R, C, L>>>,
    Path(student_id): Path<String>,
) -> Response
where
    R: RequestRepository + 'static,
    C: CatalogIndex + 'static,
    L: EnrollmentLedger + 'static,
{
    match service.requests_for_student(&StudentId(student_id)) {
        Ok(requests) => {
            let views: Vec<_> = requests.iter().map(|request| request.status_view()).collect();
            (StatusCode::OK, axum::Json(views)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn pending_handler<R, C, L>(
    State(service): State<Arc<ChangeRequestService<R, C, L>>>,
    Path(period_id): Path<String>,
    Query(params): Query<PendingParams>,
) -> Response
where
    R: RequestRepository + 'static,
    C: CatalogIndex + 'static,
    L: EnrollmentLedger + 'static,
{
    let limit = params.limit.unwrap_or(DEFAULT_PENDING_LIMIT);
    match service.list_pending(&PeriodId(period_id), limit) {
        Ok(queue) => (StatusCode::OK, axum::Json(queue)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) fn error_response(err: RequestServiceError) -> Response {
    let (status, payload) = match &err {
        RequestServiceError::Validation(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": err.to_string() }),
        ),
        RequestServiceError::NotFound(_) => {
            (StatusCode::NOT_FOUND, json!({ "error": err.to_string() }))
        }
        RequestServiceError::Forbidden { .. } => {
            (StatusCode::FORBIDDEN, json!({ "error": err.to_string() }))
        }
        RequestServiceError::BlockingConflicts { conflicts, .. } => (
            StatusCode::CONFLICT,
            json!({ "error": err.to_string(), "conflicts": conflicts }),
        ),
        RequestServiceError::ConcurrentModification { .. } => (
            StatusCode::CONFLICT,
            json!({ "error": err.to_string(), "retryable": true }),
        ),
        RequestServiceError::InvalidState { .. } | RequestServiceError::Ledger(_) => {
            (StatusCode::CONFLICT, json!({ "error": err.to_string() }))
        }
        RequestServiceError::Catalog(_) | RequestServiceError::Repository(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": err.to_string() }),
        ),
    };
    (status, axum::Json(payload)).into_response()
}
