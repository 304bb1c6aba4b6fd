//! services/api/src/web/cron.rs
//!
//! The scheduler trigger endpoint, called by an external cron and gated by a
//! shared secret header.

use crate::web::state::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

/// Summary of one reminder/escalation sweep.
#[derive(Serialize, ToSchema)]
pub struct SweepResponse {
    pub checked: usize,
    pub reminded: usize,
    pub escalated: usize,
    pub errors: Vec<String>,
}

/// Run the reminder/escalation sweep over stale sessions.
#[utoipa::path(
    get,
    path = "/cron/renewal-reminders",
    responses(
        (status = 200, description = "Sweep finished", body = SweepResponse),
        (status = 401, description = "Missing or wrong x-cron-secret header")
    ),
    params(
        ("x-cron-secret" = String, Header, description = "Shared scheduler secret.")
    )
)]
pub async fn renewal_reminders_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let presented = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !secrets_match(presented, &app_state.config.cron_secret) {
        return Err((StatusCode::UNAUTHORIZED, "invalid cron secret".to_string()));
    }

    let summary = app_state.scheduler.run_sweep().await;
    Ok((
        StatusCode::OK,
        Json(SweepResponse {
            checked: summary.checked,
            reminded: summary.reminded,
            escalated: summary.escalated,
            errors: summary.errors,
        }),
    ))
}

/// Byte-wise comparison that never short-circuits, so response timing does not
/// leak how much of the secret matched.
fn secrets_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
