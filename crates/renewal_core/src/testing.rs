//! crates/renewal_core/src/testing.rs
//!
//! In-memory fakes and a scripted oracle shared by the engine and scheduler
//! unit tests. Test-only; the real adapters live in the api service.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::dispatch::{ActionDispatcher, DispatcherConfig};
use crate::domain::{Decision, Event, RenewalSession, SessionContext, SessionStatus};
use crate::engine::{EngineConfig, WorkflowEngine};
use crate::ports::{
    AppendOutcome, CreateOutcome, DecisionOracle, DeliveryReceipt, DocumentValidationService,
    EventLog, HrSyncService, MessagingService, PortError, PortResult, ReferenceDataService,
    SessionStore, ValidationReport,
};

//=========================================================================================
// In-Memory Session Store
//=========================================================================================

#[derive(Default)]
pub struct InMemoryStore {
    sessions: Mutex<HashMap<Uuid, RenewalSession>>,
}

impl InMemoryStore {
    /// Inserts a session directly, bypassing the create-time invariant.
    pub fn seed(&self, session: RenewalSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.session_id, session);
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create(&self, session: RenewalSession) -> PortResult<CreateOutcome> {
        let mut sessions = self.sessions.lock().unwrap();
        // check-then-insert is atomic under the single map lock
        if let Some(existing) = sessions
            .values()
            .find(|s| s.employee_id == session.employee_id && !s.is_terminal())
        {
            return Ok(CreateOutcome::AlreadyActive(existing.clone()));
        }
        sessions.insert(session.session_id, session.clone());
        Ok(CreateOutcome::Created(session))
    }

    async fn get(&self, session_id: Uuid) -> PortResult<RenewalSession> {
        self.sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Session {session_id} not found")))
    }

    async fn update(&self, mut session: RenewalSession) -> PortResult<RenewalSession> {
        let mut sessions = self.sessions.lock().unwrap();
        let stored = sessions
            .get(&session.session_id)
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session.session_id)))?;
        if stored.version != session.version {
            return Err(PortError::Conflict(format!(
                "session {} version {} != {}",
                session.session_id, session.version, stored.version
            )));
        }
        session.version += 1;
        sessions.insert(session.session_id, session.clone());
        Ok(session)
    }

    async fn find_active_by_employee(
        &self,
        employee_id: &str,
    ) -> PortResult<Option<RenewalSession>> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .find(|s| s.employee_id == employee_id && !s.is_terminal())
            .cloned())
    }

    async fn find_stale(
        &self,
        statuses: &[SessionStatus],
        older_than: Duration,
    ) -> PortResult<Vec<RenewalSession>> {
        let cutoff = Utc::now() - older_than;
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| statuses.contains(&s.status) && s.updated_at < cutoff)
            .cloned()
            .collect())
    }
}

//=========================================================================================
// In-Memory Event Log
//=========================================================================================

#[derive(Default)]
pub struct InMemoryEventLog {
    events: Mutex<Vec<Event>>,
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: Event) -> PortResult<AppendOutcome> {
        let mut events = self.events.lock().unwrap();
        if let Some(key) = &event.idempotency_key {
            let duplicate = events
                .iter()
                .any(|e| e.session_id == event.session_id && e.idempotency_key.as_ref() == Some(key));
            if duplicate {
                return Ok(AppendOutcome::Duplicate);
            }
        }
        events.push(event);
        Ok(AppendOutcome::Appended)
    }

    async fn list_by_session(&self, session_id: Uuid) -> PortResult<Vec<Event>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }
}

//=========================================================================================
// Scripted Oracle
//=========================================================================================

/// Replays a scripted sequence of decisions (or failures), falling back to a
/// harmless "awaiting_photo" decision once the script runs out.
pub struct ScriptedOracle {
    script: Mutex<Vec<Result<Decision, String>>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new(script: Vec<Result<Decision, String>>) -> Self {
        let mut script = script;
        script.reverse(); // pop() takes from the front of the original order
        Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn decide(&self, _context: &SessionContext) -> PortResult<Decision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop() {
            Some(Ok(decision)) => Ok(decision),
            Some(Err(message)) => Err(PortError::Unexpected(message)),
            None => Ok(decision("awaiting_photo", "collect license photo")),
        }
    }
}

/// A minimal decision with no actions.
pub fn decision(next_status: &str, next_step: &str) -> Decision {
    Decision {
        response: format!("moving to {next_step}"),
        next_status: next_status.to_string(),
        next_step: next_step.to_string(),
        actions: Vec::new(),
        pending_actions: Vec::new(),
    }
}

//=========================================================================================
// Stub Collaborators
//=========================================================================================

#[derive(Default)]
pub struct RecordingValidator {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingValidator {
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentValidationService for RecordingValidator {
    async fn validate(
        &self,
        document_type: &str,
        reference: &str,
    ) -> PortResult<ValidationReport> {
        self.calls
            .lock()
            .unwrap()
            .push((document_type.to_string(), reference.to_string()));
        Ok(ValidationReport {
            valid: true,
            extracted_fields: json!({ "document_type": document_type }),
            issues: Vec::new(),
        })
    }
}

pub struct RecordingMessenger {
    pub sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingMessenger {
    pub fn new(fail: bool) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail,
        }
    }
}

#[async_trait]
impl MessagingService for RecordingMessenger {
    async fn send_sms(&self, to: &str, body: &str) -> PortResult<DeliveryReceipt> {
        if self.fail {
            return Err(PortError::Unexpected("gateway unavailable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(DeliveryReceipt {
            message_id: Some("sms-1".to_string()),
        })
    }

    async fn send_email(
        &self,
        to: &str,
        _subject: &str,
        body: &str,
        _attachments: &[String],
    ) -> PortResult<DeliveryReceipt> {
        if self.fail {
            return Err(PortError::Unexpected("gateway unavailable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(DeliveryReceipt {
            message_id: Some("email-1".to_string()),
        })
    }
}

#[derive(Default)]
pub struct NullHrSync;

#[async_trait]
impl HrSyncService for NullHrSync {
    async fn update_record(&self, _subject_ref: &str, _fields: &Value) -> PortResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct NullReference;

#[async_trait]
impl ReferenceDataService for NullReference {
    async fn employee_profile(&self, employee_id: &str) -> PortResult<Option<Value>> {
        Ok(Some(json!({ "employee_id": employee_id, "name": "Test Employee" })))
    }

    async fn license_record(&self, license_id: &str) -> PortResult<Option<Value>> {
        Ok(Some(json!({ "license_id": license_id, "jurisdiction": "CA" })))
    }

    async fn jurisdiction_requirements(&self, jurisdiction: &str) -> PortResult<Option<Value>> {
        Ok(Some(json!({ "jurisdiction": jurisdiction, "training_hours": 4 })))
    }
}

//=========================================================================================
// Harness
//=========================================================================================

/// A fully wired engine over in-memory fakes plus handles to the fakes
/// themselves for assertions.
pub struct Harness {
    pub engine: WorkflowEngine,
    pub store: Arc<InMemoryStore>,
    pub events: Arc<InMemoryEventLog>,
    pub oracle: Arc<ScriptedOracle>,
    pub validator: Arc<RecordingValidator>,
    pub messenger: Arc<RecordingMessenger>,
}

pub fn harness(script: Vec<Result<Decision, String>>) -> Harness {
    build_harness(script, false)
}

pub fn harness_with_failing_messaging(script: Vec<Result<Decision, String>>) -> Harness {
    build_harness(script, true)
}

fn build_harness(script: Vec<Result<Decision, String>>, failing_messaging: bool) -> Harness {
    let store = Arc::new(InMemoryStore::default());
    let events = Arc::new(InMemoryEventLog::default());
    let oracle = Arc::new(ScriptedOracle::new(script));
    let validator = Arc::new(RecordingValidator::default());
    let messenger = Arc::new(RecordingMessenger::new(failing_messaging));

    let dispatcher = ActionDispatcher::new(
        validator.clone(),
        messenger.clone(),
        Arc::new(NullHrSync),
        DispatcherConfig::default(),
    );
    let engine = WorkflowEngine::new(
        store.clone(),
        events.clone(),
        oracle.clone(),
        Arc::new(NullReference),
        dispatcher,
        EngineConfig::default(),
    );

    Harness {
        engine,
        store,
        events,
        oracle,
        validator,
        messenger,
    }
}
