//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the renewal REST endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use renewal_core::domain::{ActionResult, EventType};
use renewal_core::engine::{EngineError, EventInput, StartRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

/// What the employee sees when a step fails internally; detail stays in the
/// logs.
const GENERIC_FAILURE: &str =
    "Something went wrong while processing this step. Please try again in a moment.";

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        start_renewal_handler,
        renewal_event_handler,
        crate::web::cron::renewal_reminders_handler,
    ),
    components(
        schemas(
            StartRenewalRequest,
            StartRenewalResponse,
            RenewalEventRequest,
            RenewalEventResponse,
            crate::web::cron::SweepResponse,
        )
    ),
    tags(
        (name = "Renewal Orchestrator API", description = "Endpoints driving the durable license-renewal workflow.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Request/Response Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct StartRenewalRequest {
    pub employee_id: String,
    pub license_id: Option<String>,
    pub initial_message: Option<String>,
    /// Free-form caller context (contact details, locale, ...).
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Value,
}

#[derive(Serialize, ToSchema)]
pub struct StartRenewalResponse {
    pub session_id: Uuid,
    pub status: String,
    pub message: String,
    pub next_step: String,
    #[schema(value_type = Vec<Object>)]
    pub actions: Vec<ActionResult>,
}

#[derive(Deserialize, ToSchema)]
pub struct RenewalEventRequest {
    pub session_id: Uuid,
    pub event_type: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub event_data: Value,
    pub triggered_by: Option<String>,
    /// Optional key for de-duplicating webhook redeliveries.
    pub idempotency_key: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct RenewalEventResponse {
    pub session_id: Uuid,
    pub event_type: String,
    pub status: String,
    pub response: String,
    pub next_step: String,
    #[schema(value_type = Vec<Object>)]
    pub actions: Vec<ActionResult>,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Start a renewal workflow for an employee.
///
/// Idempotent: if the employee already has an active session, that session is
/// returned with a 200 instead of a new one being created.
#[utoipa::path(
    post,
    path = "/renewals/start",
    request_body = StartRenewalRequest,
    responses(
        (status = 201, description = "Renewal session created", body = StartRenewalResponse),
        (status = 200, description = "An active session already existed", body = StartRenewalResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn start_renewal_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<StartRenewalRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let outcome = app_state
        .engine
        .start_renewal(StartRequest {
            employee_id: req.employee_id,
            license_id: req.license_id,
            initial_message: req.initial_message,
            metadata: req.metadata,
        })
        .await
        .map_err(engine_error_response)?;

    let code = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let step = outcome.step;
    Ok((
        code,
        Json(StartRenewalResponse {
            session_id: step.session_id,
            status: step.status.to_string(),
            message: step.response,
            next_step: step.next_step,
            actions: step.actions,
        }),
    ))
}

/// Deliver an inbound event (upload, message, portal confirmation) to a
/// session.
#[utoipa::path(
    post,
    path = "/renewals/event",
    request_body = RenewalEventRequest,
    responses(
        (status = 200, description = "Event processed", body = RenewalEventResponse),
        (status = 400, description = "Unknown event type or terminal session"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Duplicate event delivery"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn renewal_event_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<RenewalEventRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let event_type = EventType::from_str(&req.event_type).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("'{}' is not a valid event type", req.event_type),
        )
    })?;

    let step = app_state
        .engine
        .handle_event(
            req.session_id,
            EventInput {
                event_type,
                event_data: req.event_data,
                triggered_by: req.triggered_by.unwrap_or_else(|| "api".to_string()),
                idempotency_key: req.idempotency_key,
            },
        )
        .await
        .map_err(engine_error_response)?;

    Ok((
        StatusCode::OK,
        Json(RenewalEventResponse {
            session_id: step.session_id,
            event_type: event_type.to_string(),
            status: step.status.to_string(),
            response: step.response,
            next_step: step.next_step,
            actions: step.actions,
        }),
    ))
}

/// Maps engine errors onto HTTP statuses. Internal failures degrade to a
/// generic message rather than leaking detail to the employee.
fn engine_error_response(e: EngineError) -> (StatusCode, String) {
    match e {
        EngineError::SessionNotFound(session_id) => (
            StatusCode::NOT_FOUND,
            format!("Session {session_id} not found"),
        ),
        EngineError::InvalidState(status) => (
            StatusCode::BAD_REQUEST,
            format!("Session is already {status} and cannot accept further events"),
        ),
        EngineError::DuplicateEvent => (
            StatusCode::CONFLICT,
            "This event was already processed".to_string(),
        ),
        EngineError::Oracle(detail) => {
            error!(detail = %detail, "decision oracle failure");
            (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE.to_string())
        }
        EngineError::Port(e) => {
            error!(error = %e, "store failure during workflow step");
            (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE.to_string())
        }
    }
}
