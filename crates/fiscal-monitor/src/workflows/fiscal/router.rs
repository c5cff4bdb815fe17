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
use uuid::Uuid;

use super::domain::{Category, Client, ClientId, ConsultationId};
use super::provider::LookupProvider;
use super::runner::ConsultationError;
use super::service::{FiscalMonitorService, ServiceError};
use super::store::{ConsultationStore, StoreError};

const DEFAULT_RECENT_LIMIT: usize = 50;
const DEFAULT_SUMMARY_LIMIT: usize = 100;

type SharedService<S, P> = Arc<FiscalMonitorService<S, P>>;

#[derive(Debug, Deserialize)]
pub struct ConsultRequest {
    pub client: Client,
    pub category: Category,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub clients: Vec<Client>,
    #[serde(default)]
    pub categories: Vec<Category>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// HTTP endpoints for consultations, client standings, and batches.
pub fn fiscal_router<S, P>(service: SharedService<S, P>) -> Router
where
    S: ConsultationStore + 'static,
    P: LookupProvider + 'static,
{
    Router::new()
        .route(
            "/api/v1/consultations",
            post(consult_handler::<S, P>)
                .get(recent_handler::<S, P>)
                .delete(clear_handler::<S, P>),
        )
        .route(
            "/api/v1/consultations/summary",
            get(summary_handler::<S, P>),
        )
        .route("/api/v1/consultations/sweep", post(sweep_handler::<S, P>))
        .route(
            "/api/v1/consultations/:consultation_id",
            get(consultation_handler::<S, P>),
        )
        .route(
            "/api/v1/clients/:client_id/fiscal-status",
            get(client_status_handler::<S, P>),
        )
        .route("/api/v1/batches", post(start_batch_handler::<S, P>))
        .route("/api/v1/batches/current", get(current_batch_handler::<S, P>))
        .route(
            "/api/v1/batches/current/cancel",
            post(cancel_batch_handler::<S, P>),
        )
        .with_state(service)
}

fn error_response(status: StatusCode, error: &ServiceError) -> Response {
    let payload = json!({
        "error": error.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}

fn status_for(error: &ServiceError) -> StatusCode {
    match error {
        ServiceError::InvalidCnpj(_) | ServiceError::EmptyBatch => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ServiceError::BatchInProgress => StatusCode::CONFLICT,
        ServiceError::NoBatchRunning
        | ServiceError::Store(StoreError::NotFound)
        | ServiceError::Consultation(ConsultationError::Store(StoreError::NotFound)) => {
            StatusCode::NOT_FOUND
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(error: ServiceError) -> Response {
    error_response(status_for(&error), &error)
}

pub(crate) async fn consult_handler<S, P>(
    State(service): State<SharedService<S, P>>,
    axum::Json(request): axum::Json<ConsultRequest>,
) -> Response
where
    S: ConsultationStore + 'static,
    P: LookupProvider + 'static,
{
    match service.consult(&request.client, request.category).await {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn recent_handler<S, P>(
    State(service): State<SharedService<S, P>>,
    Query(query): Query<LimitQuery>,
) -> Response
where
    S: ConsultationStore + 'static,
    P: LookupProvider + 'static,
{
    match service.recent(query.limit.unwrap_or(DEFAULT_RECENT_LIMIT)) {
        Ok(consultations) => (StatusCode::OK, axum::Json(consultations)).into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn summary_handler<S, P>(
    State(service): State<SharedService<S, P>>,
    Query(query): Query<LimitQuery>,
) -> Response
where
    S: ConsultationStore + 'static,
    P: LookupProvider + 'static,
{
    match service.summary(query.limit.unwrap_or(DEFAULT_SUMMARY_LIMIT)) {
        Ok(summary) => (StatusCode::OK, axum::Json(summary)).into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn clear_handler<S, P>(State(service): State<SharedService<S, P>>) -> Response
where
    S: ConsultationStore + 'static,
    P: LookupProvider + 'static,
{
    match service.clear_history() {
        Ok(removed) => (StatusCode::OK, axum::Json(json!({ "removed": removed }))).into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn sweep_handler<S, P>(State(service): State<SharedService<S, P>>) -> Response
where
    S: ConsultationStore + 'static,
    P: LookupProvider + 'static,
{
    match service.sweep_stale() {
        Ok(swept) => (StatusCode::OK, axum::Json(json!({ "swept": swept }))).into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn consultation_handler<S, P>(
    State(service): State<SharedService<S, P>>,
    Path(consultation_id): Path<String>,
) -> Response
where
    S: ConsultationStore + 'static,
    P: LookupProvider + 'static,
{
    let Ok(id) = Uuid::parse_str(&consultation_id) else {
        let payload = json!({
            "error": format!("'{consultation_id}' is not a consultation id"),
        });
        return (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response();
    };

    match service.consultation(ConsultationId(id)) {
        Ok(detail) => (StatusCode::OK, axum::Json(detail)).into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn client_status_handler<S, P>(
    State(service): State<SharedService<S, P>>,
    Path(client_id): Path<String>,
) -> Response
where
    S: ConsultationStore + 'static,
    P: LookupProvider + 'static,
{
    match service.client_status(&ClientId(client_id)) {
        Ok(status) => (StatusCode::OK, axum::Json(status)).into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn start_batch_handler<S, P>(
    State(service): State<SharedService<S, P>>,
    axum::Json(request): axum::Json<BatchRequest>,
) -> Response
where
    S: ConsultationStore + 'static,
    P: LookupProvider + 'static,
{
    match service.start_batch(request.clients, request.categories) {
        Ok(snapshot) => (StatusCode::ACCEPTED, axum::Json(snapshot)).into_response(),
        Err(error) => failure(error),
    }
}

pub(crate) async fn current_batch_handler<S, P>(
    State(service): State<SharedService<S, P>>,
) -> Response
where
    S: ConsultationStore + 'static,
    P: LookupProvider + 'static,
{
    match service.current_batch() {
        Ok(Some(snapshot)) => (StatusCode::OK, axum::Json(snapshot)).into_response(),
        Ok(None) => {
            let payload = json!({
                "error": "no batch has been started",
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(error) => failure(error),
    }
}

pub(crate) async fn cancel_batch_handler<S, P>(
    State(service): State<SharedService<S, P>>,
) -> Response
where
    S: ConsultationStore + 'static,
    P: LookupProvider + 'static,
{
    match service.cancel_batch() {
        Ok(snapshot) => (StatusCode::ACCEPTED, axum::Json(snapshot)).into_response(),
        Err(error) => failure(error),
    }
}
