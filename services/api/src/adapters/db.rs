//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete
//! implementation of the `SessionStore` and `EventLog` ports from the `core`
//! crate. It handles all interactions with the PostgreSQL database using
//! `sqlx`.
//!
//! Two store-level guarantees live here rather than in the engine:
//! - a partial unique index on `employee_id` makes check-then-create atomic,
//!   so at most one non-terminal session exists per employee;
//! - `update` is a compare-and-swap on the `version` column, so two
//!   concurrent steps on the same session cannot interleave.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use renewal_core::domain::{
    ConversationTurn, Event, EventType, RenewalSession, SessionStatus, SubmissionPackage,
};
use renewal_core::ports::{
    AppendOutcome, CreateOutcome, EventLog, PortError, PortResult, SessionStore,
};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter implementing the `SessionStore` and `EventLog` ports.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new `PgStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

const SESSION_COLUMNS: &str = "session_id, employee_id, license_id, status, current_step, \
     completed_steps, pending_actions, conversation_history, submission_package, metadata, \
     version, created_at, updated_at";

const EVENT_COLUMNS: &str =
    "event_id, session_id, event_type, event_data, triggered_by, idempotency_key, created_at";

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SessionRecord {
    session_id: Uuid,
    employee_id: String,
    license_id: Option<String>,
    status: String,
    current_step: String,
    completed_steps: Json<Vec<String>>,
    pending_actions: Json<Vec<String>>,
    conversation_history: Json<Vec<ConversationTurn>>,
    submission_package: Option<Json<SubmissionPackage>>,
    metadata: Json<Value>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SessionRecord {
    fn to_domain(self) -> PortResult<RenewalSession> {
        let status = SessionStatus::from_str(&self.status)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(RenewalSession {
            session_id: self.session_id,
            employee_id: self.employee_id,
            license_id: self.license_id,
            status,
            current_step: self.current_step,
            completed_steps: self.completed_steps.0,
            pending_actions: self.pending_actions.0,
            conversation_history: self.conversation_history.0,
            submission_package: self.submission_package.map(|p| p.0),
            metadata: self.metadata.0,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct EventRecord {
    event_id: Uuid,
    session_id: Uuid,
    event_type: String,
    event_data: Json<Value>,
    triggered_by: String,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
}

impl EventRecord {
    fn to_domain(self) -> PortResult<Event> {
        let event_type = EventType::from_str(&self.event_type)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Event {
            event_id: self.event_id,
            session_id: self.session_id,
            event_type,
            event_data: self.event_data.0,
            triggered_by: self.triggered_by,
            idempotency_key: self.idempotency_key,
            timestamp: self.created_at,
        })
    }
}

//=========================================================================================
// `SessionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionStore for PgStore {
    async fn create(&self, session: RenewalSession) -> PortResult<CreateOutcome> {
        // The partial unique index renewal_sessions_one_active makes this
        // insert lose quietly when the employee already has an active session.
        let inserted = sqlx::query(
            "INSERT INTO renewal_sessions (session_id, employee_id, license_id, status, \
             current_step, completed_steps, pending_actions, conversation_history, \
             submission_package, metadata, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (employee_id) \
             WHERE status NOT IN ('completed', 'escalated', 'failed', 'cancelled') \
             DO NOTHING",
        )
        .bind(session.session_id)
        .bind(&session.employee_id)
        .bind(&session.license_id)
        .bind(session.status.as_str())
        .bind(&session.current_step)
        .bind(Json(&session.completed_steps))
        .bind(Json(&session.pending_actions))
        .bind(Json(&session.conversation_history))
        .bind(session.submission_package.as_ref().map(Json))
        .bind(Json(&session.metadata))
        .bind(session.version)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        if inserted.rows_affected() == 1 {
            return Ok(CreateOutcome::Created(session));
        }
        match self.find_active_by_employee(&session.employee_id).await? {
            Some(existing) => Ok(CreateOutcome::AlreadyActive(existing)),
            // The blocking session turned terminal between the insert and the
            // lookup; let the caller retry.
            None => Err(PortError::Conflict(format!(
                "create for employee {} raced a terminating session",
                session.employee_id
            ))),
        }
    }

    async fn get(&self, session_id: Uuid) -> PortResult<RenewalSession> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM renewal_sessions WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?
        .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))?;
        record.to_domain()
    }

    async fn update(&self, session: RenewalSession) -> PortResult<RenewalSession> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "UPDATE renewal_sessions SET status = $2, current_step = $3, completed_steps = $4, \
             pending_actions = $5, conversation_history = $6, submission_package = $7, \
             metadata = $8, version = version + 1, updated_at = $9 \
             WHERE session_id = $1 AND version = $10 \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(session.session_id)
        .bind(session.status.as_str())
        .bind(&session.current_step)
        .bind(Json(&session.completed_steps))
        .bind(Json(&session.pending_actions))
        .bind(Json(&session.conversation_history))
        .bind(session.submission_package.as_ref().map(Json))
        .bind(Json(&session.metadata))
        .bind(session.updated_at)
        .bind(session.version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        match record {
            Some(record) => record.to_domain(),
            None => {
                // Distinguish a vanished row from a lost version race.
                let exists = sqlx::query("SELECT 1 FROM renewal_sessions WHERE session_id = $1")
                    .bind(session.session_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| PortError::Unexpected(e.to_string()))?;
                if exists.is_some() {
                    Err(PortError::Conflict(format!(
                        "session {} was modified concurrently",
                        session.session_id
                    )))
                } else {
                    Err(PortError::NotFound(format!(
                        "Session {} not found",
                        session.session_id
                    )))
                }
            }
        }
    }

    async fn find_active_by_employee(
        &self,
        employee_id: &str,
    ) -> PortResult<Option<RenewalSession>> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM renewal_sessions \
             WHERE employee_id = $1 \
             AND status NOT IN ('completed', 'escalated', 'failed', 'cancelled')"
        ))
        .bind(employee_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        record.map(SessionRecord::to_domain).transpose()
    }

    async fn find_stale(
        &self,
        statuses: &[SessionStatus],
        older_than: Duration,
    ) -> PortResult<Vec<RenewalSession>> {
        let status_names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let cutoff = Utc::now() - older_than;
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM renewal_sessions \
             WHERE status = ANY($1) AND updated_at < $2 \
             ORDER BY updated_at ASC"
        ))
        .bind(&status_names)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        records.into_iter().map(SessionRecord::to_domain).collect()
    }
}

//=========================================================================================
// `EventLog` Trait Implementation
//=========================================================================================

#[async_trait]
impl EventLog for PgStore {
    async fn append(&self, event: Event) -> PortResult<AppendOutcome> {
        // Append-only; the partial unique index on (session_id,
        // idempotency_key) absorbs webhook redeliveries.
        let inserted = sqlx::query(
            "INSERT INTO renewal_events (event_id, session_id, event_type, event_data, \
             triggered_by, idempotency_key, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (session_id, idempotency_key) \
             WHERE idempotency_key IS NOT NULL \
             DO NOTHING",
        )
        .bind(event.event_id)
        .bind(event.session_id)
        .bind(event.event_type.as_str())
        .bind(Json(&event.event_data))
        .bind(&event.triggered_by)
        .bind(&event.idempotency_key)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        if inserted.rows_affected() == 1 {
            Ok(AppendOutcome::Appended)
        } else {
            Ok(AppendOutcome::Duplicate)
        }
    }

    async fn list_by_session(&self, session_id: Uuid) -> PortResult<Vec<Event>> {
        let records = sqlx::query_as::<_, EventRecord>(&format!(
            "SELECT {EVENT_COLUMNS} FROM renewal_events \
             WHERE session_id = $1 ORDER BY created_at ASC"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        records.into_iter().map(EventRecord::to_domain).collect()
    }
}
