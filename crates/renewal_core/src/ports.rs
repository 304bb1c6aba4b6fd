//! crates/renewal_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the orchestrator's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of specific external implementations like databases,
//! LLM providers, or messaging gateways.

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{Decision, Event, RenewalSession, SessionContext, SessionStatus};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services
/// (e.g., database, network, model provider).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A compare-and-swap update lost the race against a concurrent writer.
    #[error("Concurrent modification: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Session Store
//=========================================================================================

/// Result of an atomic check-then-create. Starting a renewal is idempotent:
/// if the employee already has a non-terminal session, that one comes back.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created(RenewalSession),
    AlreadyActive(RenewalSession),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates the session unless the employee already has an active one, in
    /// which case the existing session is returned. The check and the insert
    /// must be atomic with respect to concurrent creates.
    async fn create(&self, session: RenewalSession) -> PortResult<CreateOutcome>;

    async fn get(&self, session_id: Uuid) -> PortResult<RenewalSession>;

    /// Full read-modify-write persisted only if `session.version` still
    /// matches the stored row; the stored version is then incremented.
    /// A lost race surfaces as [`PortError::Conflict`].
    async fn update(&self, session: RenewalSession) -> PortResult<RenewalSession>;

    async fn find_active_by_employee(
        &self,
        employee_id: &str,
    ) -> PortResult<Option<RenewalSession>>;

    /// Sessions in one of `statuses` whose `updated_at` is older than
    /// `older_than`. This is the feed for the reminder scheduler.
    async fn find_stale(
        &self,
        statuses: &[SessionStatus],
        older_than: Duration,
    ) -> PortResult<Vec<RenewalSession>>;
}

//=========================================================================================
// Event Log
//=========================================================================================

/// Result of an event append. A duplicate idempotency key is reported rather
/// than erroring so the engine can skip redelivered webhooks quietly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Duplicate,
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends the event. Append-only: there is no update or delete.
    async fn append(&self, event: Event) -> PortResult<AppendOutcome>;

    async fn list_by_session(&self, session_id: Uuid) -> PortResult<Vec<Event>>;
}

//=========================================================================================
// Decision Oracle
//=========================================================================================

/// The external reasoning component. Given full session context it returns the
/// next workflow move; the engine treats it as opaque and validates everything
/// it says before acting on it.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(&self, context: &SessionContext) -> PortResult<Decision>;
}

//=========================================================================================
// Document Validation
//=========================================================================================

/// What the extraction/validation collaborator says about one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default)]
    pub extracted_fields: Value,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[async_trait]
pub trait DocumentValidationService: Send + Sync {
    /// Validates the referenced document. The report does not decide workflow
    /// progression; the Decision Oracle does that on the next invocation.
    async fn validate(&self, document_type: &str, reference: &str)
        -> PortResult<ValidationReport>;
}

//=========================================================================================
// Messaging
//=========================================================================================

/// Provider acknowledgement for one outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    #[serde(default)]
    pub message_id: Option<String>,
}

#[async_trait]
pub trait MessagingService: Send + Sync {
    async fn send_sms(&self, to: &str, body: &str) -> PortResult<DeliveryReceipt>;

    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        attachments: &[String],
    ) -> PortResult<DeliveryReceipt>;
}

//=========================================================================================
// Third-party HR Sync
//=========================================================================================

#[async_trait]
pub trait HrSyncService: Send + Sync {
    /// Pushes updated fields to the third-party HR record for `subject_ref`.
    async fn update_record(&self, subject_ref: &str, fields: &Value) -> PortResult<()>;
}

//=========================================================================================
// Reference Data
//=========================================================================================

/// Read-only lookups of ancillary context: employee display data, license
/// records, and jurisdiction-specific renewal requirements.
#[async_trait]
pub trait ReferenceDataService: Send + Sync {
    async fn employee_profile(&self, employee_id: &str) -> PortResult<Option<Value>>;

    async fn license_record(&self, license_id: &str) -> PortResult<Option<Value>>;

    async fn jurisdiction_requirements(&self, jurisdiction: &str) -> PortResult<Option<Value>>;
}
