pub mod cron;
pub mod rest;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use cron::renewal_reminders_handler;
pub use rest::{renewal_event_handler, start_renewal_handler};
pub use state::AppState;

/// Builds the API router. Shared between the server binary and the handler
/// tests.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/renewals/start", post(start_renewal_handler))
        .route("/renewals/event", post(renewal_event_handler))
        .route("/cron/renewal-reminders", get(renewal_reminders_handler))
        .with_state(state)
}
