//! crates/renewal_core/src/domain.rs
//!
//! Defines the pure, core data structures for the renewal workflow.
//! These structs are independent of any database or transport format;
//! serde derives exist only because session context and event payloads
//! are JSON-shaped by nature.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Session Status
//=========================================================================================

/// The closed set of workflow states a renewal session can be in.
///
/// The Decision Oracle proposes the next status as free text; the engine only
/// accepts values that parse into this enum. Terminal states never accept
/// further events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    AwaitingPhoto,
    PhotoUploaded,
    PhotoValidated,
    AwaitingTraining,
    TrainingUploaded,
    TrainingValidated,
    ReadyForPortalSubmission,
    AwaitingPortalSubmission,
    PortalSubmitted,
    Completed,
    Escalated,
    Failed,
    Cancelled,
}

impl SessionStatus {
    /// The statuses in which the workflow is blocked on the employee and the
    /// reminder scheduler should watch for staleness.
    pub const WAITING: &'static [SessionStatus] = &[
        SessionStatus::AwaitingPhoto,
        SessionStatus::AwaitingTraining,
        SessionStatus::AwaitingPortalSubmission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::AwaitingPhoto => "awaiting_photo",
            SessionStatus::PhotoUploaded => "photo_uploaded",
            SessionStatus::PhotoValidated => "photo_validated",
            SessionStatus::AwaitingTraining => "awaiting_training",
            SessionStatus::TrainingUploaded => "training_uploaded",
            SessionStatus::TrainingValidated => "training_validated",
            SessionStatus::ReadyForPortalSubmission => "ready_for_portal_submission",
            SessionStatus::AwaitingPortalSubmission => "awaiting_portal_submission",
            SessionStatus::PortalSubmitted => "portal_submitted",
            SessionStatus::Completed => "completed",
            SessionStatus::Escalated => "escalated",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// A terminal session is immutable: no event may advance it further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed
                | SessionStatus::Escalated
                | SessionStatus::Failed
                | SessionStatus::Cancelled
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a member of the closed status set.
#[derive(Debug, Clone, thiserror::Error)]
#[error("'{0}' is not a valid session status")]
pub struct ParseStatusError(pub String);

impl FromStr for SessionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "active" => SessionStatus::Active,
            "awaiting_photo" => SessionStatus::AwaitingPhoto,
            "photo_uploaded" => SessionStatus::PhotoUploaded,
            "photo_validated" => SessionStatus::PhotoValidated,
            "awaiting_training" => SessionStatus::AwaitingTraining,
            "training_uploaded" => SessionStatus::TrainingUploaded,
            "training_validated" => SessionStatus::TrainingValidated,
            "ready_for_portal_submission" => SessionStatus::ReadyForPortalSubmission,
            "awaiting_portal_submission" => SessionStatus::AwaitingPortalSubmission,
            "portal_submitted" => SessionStatus::PortalSubmitted,
            "completed" => SessionStatus::Completed,
            "escalated" => SessionStatus::Escalated,
            "failed" => SessionStatus::Failed,
            "cancelled" => SessionStatus::Cancelled,
            other => return Err(ParseStatusError(other.to_string())),
        };
        Ok(status)
    }
}

//=========================================================================================
// Conversation History
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One turn of the session's audit/conversation history. Assistant turns carry
/// the results of the actions dispatched alongside the response text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_results: Vec<ActionResult>,
}

impl ConversationTurn {
    pub fn user(content: String) -> Self {
        Self {
            role: TurnRole::User,
            content,
            timestamp: Utc::now(),
            action_results: Vec::new(),
        }
    }

    pub fn assistant(content: String, action_results: Vec<ActionResult>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content,
            timestamp: Utc::now(),
            action_results,
        }
    }
}

//=========================================================================================
// Submission Package
//=========================================================================================

/// The pre-filled portal submission package. Generated once per session and
/// then reused; the `reference` token must stay stable so a link the employee
/// already received never goes stale behind their back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionPackage {
    pub portal_url: String,
    pub reference: String,
    pub checklist: Vec<String>,
    pub documents: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

//=========================================================================================
// RenewalSession (aggregate root)
//=========================================================================================

/// The durable record of one employee's in-progress renewal workflow.
///
/// Mutated exclusively through the workflow engine's single update path;
/// `version` backs the store-level compare-and-swap that serializes
/// concurrent updates to the same session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewalSession {
    pub session_id: Uuid,
    pub employee_id: String,
    pub license_id: Option<String>,
    pub status: SessionStatus,
    /// Human-readable label of the step in progress; advisory only.
    pub current_step: String,
    pub completed_steps: Vec<String>,
    /// Outstanding asks on the employee, e.g. "upload_training_certificate".
    pub pending_actions: Vec<String>,
    pub conversation_history: Vec<ConversationTurn>,
    pub submission_package: Option<SubmissionPackage>,
    /// Free-form caller-supplied context (contact details, locale, ...).
    pub metadata: Value,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RenewalSession {
    pub fn new(employee_id: String, license_id: Option<String>, metadata: Value) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            employee_id,
            license_id,
            status: SessionStatus::Active,
            current_step: String::new(),
            completed_steps: Vec::new(),
            pending_actions: Vec::new(),
            conversation_history: Vec::new(),
            submission_package: None,
            metadata,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The last `window` turns, oldest first. The full history is persisted;
    /// only the window is shown to the Decision Oracle.
    pub fn recent_turns(&self, window: usize) -> &[ConversationTurn] {
        let len = self.conversation_history.len();
        &self.conversation_history[len.saturating_sub(window)..]
    }

    /// The most recent assistant response, if any step has completed yet.
    pub fn last_response(&self) -> Option<&str> {
        self.conversation_history
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Assistant)
            .map(|t| t.content.as_str())
    }
}

//=========================================================================================
// Events
//=========================================================================================

/// The closed set of facts that can advance a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PhotoUploaded,
    CertificateUploaded,
    EmployeeMessage,
    PortalSubmitted,
    TimeoutReminder,
    SupervisorIntervention,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PhotoUploaded => "photo_uploaded",
            EventType::CertificateUploaded => "certificate_uploaded",
            EventType::EmployeeMessage => "employee_message",
            EventType::PortalSubmitted => "portal_submitted",
            EventType::TimeoutReminder => "timeout_reminder",
            EventType::SupervisorIntervention => "supervisor_intervention",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let event_type = match s {
            "photo_uploaded" => EventType::PhotoUploaded,
            "certificate_uploaded" => EventType::CertificateUploaded,
            "employee_message" => EventType::EmployeeMessage,
            "portal_submitted" => EventType::PortalSubmitted,
            "timeout_reminder" => EventType::TimeoutReminder,
            "supervisor_intervention" => EventType::SupervisorIntervention,
            other => return Err(ParseStatusError(other.to_string())),
        };
        Ok(event_type)
    }
}

/// An immutable record of something that happened to a session. Appended to
/// the event log before any processing, so the audit trail stays truthful
/// about "what arrived" even if the step afterwards fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub session_id: Uuid,
    pub event_type: EventType,
    pub event_data: Value,
    pub triggered_by: String,
    /// Caller-supplied key used to de-duplicate webhook redeliveries.
    pub idempotency_key: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        session_id: Uuid,
        event_type: EventType,
        event_data: Value,
        triggered_by: String,
        idempotency_key: Option<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            session_id,
            event_type,
            event_data,
            triggered_by,
            idempotency_key,
            timestamp: Utc::now(),
        }
    }
}

//=========================================================================================
// Decisions and Actions
//=========================================================================================

/// A single side-effecting instruction from a decision. The type is kept as a
/// string so an unknown type degrades to a skipped action instead of a parse
/// failure that would lose the rest of the decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub data: Value,
}

/// The outcome of dispatching one action, recorded on the assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_type: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok(action_type: &str, detail: Option<Value>) -> Self {
        Self {
            action_type: action_type.to_string(),
            success: true,
            detail,
            error: None,
        }
    }

    pub fn failed(action_type: &str, error: String) -> Self {
        Self {
            action_type: action_type.to_string(),
            success: false,
            detail: None,
            error: Some(error),
        }
    }
}

/// The Decision Oracle's structured instruction for one workflow step.
///
/// `next_status` stays a string here; the engine validates it against
/// [`SessionStatus`] and rejects the whole decision on an unknown value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub response: String,
    pub next_status: String,
    #[serde(default)]
    pub next_step: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub pending_actions: Vec<String>,
}

//=========================================================================================
// Session Context (Decision Oracle input)
//=========================================================================================

/// Everything the Decision Oracle sees for one step: the session's control
/// state, ancillary reference data, a window of recent turns, and the newly
/// arrived event (already rendered as the final user turn).
#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub employee_id: String,
    pub license_id: Option<String>,
    pub status: SessionStatus,
    pub current_step: String,
    pub completed_steps: Vec<String>,
    pub pending_actions: Vec<String>,
    pub has_submission_package: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jurisdiction_requirements: Option<Value>,
    pub recent_turns: Vec<ConversationTurn>,
}

//=========================================================================================
// Step and Sweep Outcomes
//=========================================================================================

/// What one engine invocation produced, returned to the HTTP layer for
/// immediate display.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub next_step: String,
    pub response: String,
    pub actions: Vec<ActionResult>,
}

/// Summary of one reminder/escalation sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub checked: usize,
    pub reminded: usize,
    pub escalated: usize,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            "active",
            "awaiting_photo",
            "ready_for_portal_submission",
            "completed",
        ] {
            let status: SessionStatus = s.parse().unwrap();
            assert_eq!(status.as_str(), s);
        }
        assert!("paused".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn only_the_four_terminal_statuses_are_terminal() {
        let terminal = [
            SessionStatus::Completed,
            SessionStatus::Escalated,
            SessionStatus::Failed,
            SessionStatus::Cancelled,
        ];
        for status in terminal {
            assert!(status.is_terminal());
        }
        assert!(!SessionStatus::AwaitingPhoto.is_terminal());
        assert!(!SessionStatus::PortalSubmitted.is_terminal());
    }

    #[test]
    fn recent_turns_windows_from_the_tail() {
        let mut session = RenewalSession::new("E1".to_string(), None, Value::Null);
        for i in 0..5 {
            session
                .conversation_history
                .push(ConversationTurn::user(format!("turn {i}")));
        }
        let window = session.recent_turns(2);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "turn 3");
        assert_eq!(window[1].content, "turn 4");
        assert_eq!(session.recent_turns(50).len(), 5);
    }
}
