//! crates/renewal_core/src/engine.rs
//!
//! The per-session control loop: load session, fold in the new event, ask the
//! Decision Oracle for the next move, dispatch the resulting actions, persist
//! the updated session plus its audit turn. One logical step per event.

use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatch::ActionDispatcher;
use crate::domain::{
    ConversationTurn, Event, EventType, RenewalSession, SessionContext, SessionStatus, StepOutcome,
};
use crate::ports::{
    AppendOutcome, CreateOutcome, DecisionOracle, EventLog, PortError, PortResult,
    ReferenceDataService, SessionStore,
};

//=========================================================================================
// Engine Errors
//=========================================================================================

/// The primary error type for one workflow step.
///
/// An oracle failure aborts the step with the session unchanged; the
/// triggering event is already in the event log by then, so the step can be
/// retried without losing the record that the event arrived.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Session {0} not found")]
    SessionNotFound(Uuid),

    /// The session is terminal and accepts no further events.
    #[error("Session is in terminal status '{0}' and cannot accept events")]
    InvalidState(SessionStatus),

    /// The oracle call failed, timed out, or proposed a status outside the
    /// closed enumeration.
    #[error("Decision oracle failure: {0}")]
    Oracle(String),

    /// The event's idempotency key was already seen; the step was skipped.
    #[error("Duplicate event delivery; step skipped")]
    DuplicateEvent,

    #[error(transparent)]
    Port(#[from] PortError),
}

//=========================================================================================
// Engine Inputs and Configuration
//=========================================================================================

/// A request to start (or idempotently resume) a renewal for an employee.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub employee_id: String,
    pub license_id: Option<String>,
    pub initial_message: Option<String>,
    pub metadata: Value,
}

/// An inbound signal for an existing session, not yet persisted.
#[derive(Debug, Clone)]
pub struct EventInput {
    pub event_type: EventType,
    pub event_data: Value,
    pub triggered_by: String,
    pub idempotency_key: Option<String>,
}

/// What a start request produced. `created` distinguishes a fresh session
/// from an idempotent hit on an already-active one.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub created: bool,
    pub step: StepOutcome,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How many recent conversation turns the Decision Oracle sees. The full
    /// history is always persisted.
    pub history_window: usize,
    /// Ceiling on one oracle call.
    pub oracle_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_window: 20,
            oracle_timeout: Duration::from_secs(60),
        }
    }
}

//=========================================================================================
// The Workflow Engine
//=========================================================================================

pub struct WorkflowEngine {
    store: Arc<dyn SessionStore>,
    events: Arc<dyn EventLog>,
    oracle: Arc<dyn DecisionOracle>,
    reference: Arc<dyn ReferenceDataService>,
    dispatcher: ActionDispatcher,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        events: Arc<dyn EventLog>,
        oracle: Arc<dyn DecisionOracle>,
        reference: Arc<dyn ReferenceDataService>,
        dispatcher: ActionDispatcher,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            events,
            oracle,
            reference,
            dispatcher,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn event_log(&self) -> &Arc<dyn EventLog> {
        &self.events
    }

    //-------------------------------------------------------------------------------------
    // Entry Points
    //-------------------------------------------------------------------------------------

    /// Starts a renewal workflow for an employee. Idempotent: if the employee
    /// already has a non-terminal session, that session is returned untouched
    /// and no oracle step runs.
    pub async fn start_renewal(&self, request: StartRequest) -> Result<StartOutcome, EngineError> {
        let session = RenewalSession::new(
            request.employee_id.clone(),
            request.license_id,
            request.metadata,
        );

        match self.store.create(session).await? {
            CreateOutcome::AlreadyActive(existing) => {
                info!(session_id = %existing.session_id, employee_id = %existing.employee_id,
                      "start request matched an existing active session");
                let response = existing
                    .last_response()
                    .unwrap_or("A renewal workflow is already in progress for this employee.")
                    .to_string();
                Ok(StartOutcome {
                    created: false,
                    step: StepOutcome {
                        session_id: existing.session_id,
                        status: existing.status,
                        next_step: existing.current_step,
                        response,
                        actions: Vec::new(),
                    },
                })
            }
            CreateOutcome::Created(created) => {
                info!(session_id = %created.session_id, employee_id = %created.employee_id,
                      "renewal session created");
                let event = request.initial_message.map(|message| EventInput {
                    event_type: EventType::EmployeeMessage,
                    event_data: json!({ "message": message }),
                    triggered_by: created.employee_id.clone(),
                    idempotency_key: None,
                });
                let step = self.run_step(created.session_id, event).await?;
                Ok(StartOutcome {
                    created: true,
                    step,
                })
            }
        }
    }

    /// Routes an inbound event to its session.
    pub async fn handle_event(
        &self,
        session_id: Uuid,
        event: EventInput,
    ) -> Result<StepOutcome, EngineError> {
        self.run_step(session_id, Some(event)).await
    }

    //-------------------------------------------------------------------------------------
    // The Step Algorithm
    //-------------------------------------------------------------------------------------

    /// Runs one workflow step. The triggering event (if any) is durably
    /// appended to the event log before the oracle is consulted, so a failure
    /// later in the step still leaves a truthful record that the event
    /// arrived.
    pub async fn run_step(
        &self,
        session_id: Uuid,
        event: Option<EventInput>,
    ) -> Result<StepOutcome, EngineError> {
        // 1. Load the session.
        let mut session = match self.store.get(session_id).await {
            Ok(session) => session,
            Err(PortError::NotFound(_)) => return Err(EngineError::SessionNotFound(session_id)),
            Err(e) => return Err(e.into()),
        };
        if session.is_terminal() {
            return Err(EngineError::InvalidState(session.status));
        }

        // 2. Durably record the event, then render it as the new user turn.
        let user_turn = match event {
            Some(input) => {
                let record = Event::new(
                    session_id,
                    input.event_type,
                    input.event_data.clone(),
                    input.triggered_by.clone(),
                    input.idempotency_key.clone(),
                );
                match self.events.append(record).await? {
                    AppendOutcome::Appended => {}
                    AppendOutcome::Duplicate => {
                        info!(session_id = %session_id, "duplicate event delivery skipped");
                        return Err(EngineError::DuplicateEvent);
                    }
                }
                Some(ConversationTurn::user(render_event(&input)))
            }
            None => None,
        };

        // 3. Ancillary read-only context. Missing reference data degrades the
        // oracle's context, not the step.
        let employee = self
            .soft_lookup(
                self.reference.employee_profile(&session.employee_id).await,
                "employee profile",
            );
        let license = match &session.license_id {
            Some(license_id) => self.soft_lookup(
                self.reference.license_record(license_id).await,
                "license record",
            ),
            None => None,
        };
        let jurisdiction_requirements = match license
            .as_ref()
            .and_then(|l| l.get("jurisdiction"))
            .and_then(Value::as_str)
        {
            Some(jurisdiction) => self.soft_lookup(
                self.reference.jurisdiction_requirements(jurisdiction).await,
                "jurisdiction requirements",
            ),
            None => None,
        };

        // 4. Build the oracle's context: control state + ancillary data + a
        // window of recent turns ending with the freshly arrived event.
        let mut recent_turns = session.recent_turns(self.config.history_window).to_vec();
        if let Some(turn) = &user_turn {
            recent_turns.push(turn.clone());
        }
        let context = SessionContext {
            session_id: session.session_id,
            employee_id: session.employee_id.clone(),
            license_id: session.license_id.clone(),
            status: session.status,
            current_step: session.current_step.clone(),
            completed_steps: session.completed_steps.clone(),
            pending_actions: session.pending_actions.clone(),
            has_submission_package: session.submission_package.is_some(),
            employee,
            license,
            jurisdiction_requirements,
            recent_turns,
        };

        let decision = match tokio::time::timeout(
            self.config.oracle_timeout,
            self.oracle.decide(&context),
        )
        .await
        {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => return Err(EngineError::Oracle(e.to_string())),
            Err(_) => {
                return Err(EngineError::Oracle(format!(
                    "timed out after {}s",
                    self.config.oracle_timeout.as_secs()
                )))
            }
        };

        // 5. The only authority for the next state is the oracle, but only
        // within the closed enumeration; anything else aborts the step with
        // the session unchanged.
        let next_status = SessionStatus::from_str(&decision.next_status)
            .map_err(|e| EngineError::Oracle(e.to_string()))?;

        // 6. Execute the decision's actions, in order.
        let (results, effects) = self.dispatcher.dispatch(&session, &decision.actions).await;

        // 7-8. Fold everything into the session and persist under the
        // store-level compare-and-swap.
        if let Some(turn) = user_turn {
            session.conversation_history.push(turn);
        }
        session
            .conversation_history
            .push(ConversationTurn::assistant(
                decision.response.clone(),
                results.clone(),
            ));

        if !session.current_step.is_empty()
            && decision.next_step != session.current_step
            && !session.completed_steps.contains(&session.current_step)
        {
            let finished = std::mem::take(&mut session.current_step);
            session.completed_steps.push(finished);
        }
        session.current_step = decision.next_step.clone();

        session.pending_actions = decision.pending_actions.clone();
        for pending in effects.add_pending {
            if !session.pending_actions.contains(&pending) {
                session.pending_actions.push(pending);
            }
        }

        if effects.package.is_some() && session.submission_package.is_none() {
            session.submission_package = effects.package;
        }

        // complete_workflow is the one action allowed to force a terminal
        // status; everything else goes through next_status.
        session.status = if effects.complete {
            SessionStatus::Completed
        } else {
            next_status
        };
        session.updated_at = chrono::Utc::now();

        let persisted = self.store.update(session).await?;
        info!(session_id = %session_id, status = %persisted.status,
              step = %persisted.current_step, "workflow step persisted");

        // 9. Hand the response back for immediate display.
        Ok(StepOutcome {
            session_id,
            status: persisted.status,
            next_step: persisted.current_step,
            response: decision.response,
            actions: results,
        })
    }

    fn soft_lookup(&self, result: PortResult<Option<Value>>, what: &str) -> Option<Value> {
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "failed to load {what}; continuing without it");
                None
            }
        }
    }
}

//=========================================================================================
// Event Rendering
//=========================================================================================

/// Renders an inbound event as the user turn the Decision Oracle reads.
fn render_event(input: &EventInput) -> String {
    let mut text = match input.event_type {
        EventType::PhotoUploaded => {
            "The employee uploaded a photo of their renewed license.".to_string()
        }
        EventType::CertificateUploaded => {
            "The employee uploaded a training certificate.".to_string()
        }
        EventType::EmployeeMessage => input
            .event_data
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| "The employee sent a message.".to_string()),
        EventType::PortalSubmitted => {
            "The employee confirmed they submitted the renewal on the portal.".to_string()
        }
        EventType::TimeoutReminder => {
            let days = input
                .event_data
                .get("days_since_update")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            format!(
                "No activity from the employee for {days} day(s). Decide how to follow up."
            )
        }
        EventType::SupervisorIntervention => {
            "A supervisor intervened in this renewal.".to_string()
        }
    };

    if input.event_type != EventType::EmployeeMessage && !input.event_data.is_null() {
        if let Some(obj) = input.event_data.as_object() {
            if !obj.is_empty() {
                text.push_str(&format!(" Details: {}", input.event_data));
            }
        }
    }
    text
}
