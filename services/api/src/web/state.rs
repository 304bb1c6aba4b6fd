//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use renewal_core::engine::WorkflowEngine;
use renewal_core::scheduler::ReminderScheduler;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all
/// handlers. All collaborators are constructor-injected; nothing here is a
/// module-level singleton.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub scheduler: Arc<ReminderScheduler>,
    pub config: Arc<Config>,
}
