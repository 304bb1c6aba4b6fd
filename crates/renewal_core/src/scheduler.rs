//! crates/renewal_core/src/scheduler.rs
//!
//! The periodic reminder/escalation sweep. Sessions stuck in a waiting status
//! past the staleness threshold get a synthetic timeout event routed through
//! the engine; sessions silent past the hard ceiling are escalated directly,
//! bypassing the Decision Oracle. A silent employee at that point is a
//! supervisory problem, not a conversational one.

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{Event, EventType, RenewalSession, SessionStatus, SweepSummary};
use crate::engine::{EngineError, EventInput, WorkflowEngine};
use crate::ports::{EventLog, SessionStore};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// A waiting session untouched for this long gets a reminder.
    pub stale_after: Duration,
    /// A waiting session untouched for this long is escalated, no oracle
    /// consulted.
    pub escalate_after: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::hours(72),
            escalate_after: Duration::days(7),
        }
    }
}

pub struct ReminderScheduler {
    engine: Arc<WorkflowEngine>,
    config: SchedulerConfig,
}

impl ReminderScheduler {
    pub fn new(engine: Arc<WorkflowEngine>, config: SchedulerConfig) -> Self {
        Self { engine, config }
    }

    /// One full sweep over every waiting status. A failure on one session is
    /// collected into the summary and never aborts the rest.
    pub async fn run_sweep(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();

        let stale = match self
            .engine
            .store()
            .find_stale(SessionStatus::WAITING, self.config.stale_after)
            .await
        {
            Ok(sessions) => sessions,
            Err(e) => {
                summary.errors.push(format!("stale query failed: {e}"));
                return summary;
            }
        };

        for session in stale {
            summary.checked += 1;
            let age = Utc::now() - session.updated_at;
            let session_id = session.session_id;

            let result = if age >= self.config.escalate_after {
                self.escalate(session, age).await.map(|()| {
                    summary.escalated += 1;
                })
            } else {
                match self.remind(session, age).await {
                    Ok(true) => {
                        summary.reminded += 1;
                        Ok(())
                    }
                    Ok(false) => Ok(()),
                    Err(e) => Err(e),
                }
            };
            if let Err(e) = result {
                warn!(session_id = %session_id, error = %e, "sweep failed for session");
                summary.errors.push(format!("{session_id}: {e}"));
            }
        }

        info!(
            checked = summary.checked,
            reminded = summary.reminded,
            escalated = summary.escalated,
            errors = summary.errors.len(),
            "reminder sweep finished"
        );
        summary
    }

    /// Nudges a stale session by handing the engine a timeout event; the
    /// Decision Oracle chooses how to follow up. The idempotency key keeps
    /// overlapping sweeps from double-reminding off the same stale state;
    /// hitting that key is a skip (`Ok(false)`), not a failure.
    async fn remind(&self, session: RenewalSession, age: Duration) -> Result<bool, String> {
        let days = age.num_days();
        let session_id = session.session_id;
        let key = format!("timeout-{}-{}", session_id, session.updated_at.timestamp());
        match self
            .engine
            .run_step(
                session_id,
                Some(EventInput {
                    event_type: EventType::TimeoutReminder,
                    event_data: json!({ "days_since_update": days }),
                    triggered_by: "scheduler".to_string(),
                    idempotency_key: Some(key),
                }),
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(EngineError::DuplicateEvent) => {
                info!(session_id = %session_id, "reminder for this stale window already delivered");
                Ok(false)
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Hard ceiling: terminal transition to `escalated` with the reason on
    /// the event log, regardless of what an oracle might have decided.
    async fn escalate(&self, mut session: RenewalSession, age: Duration) -> Result<(), String> {
        let days = age.num_days();
        let event = Event::new(
            session.session_id,
            EventType::SupervisorIntervention,
            json!({
                "reason": format!("no activity for {days} days in status '{}'", session.status),
                "days_since_update": days,
            }),
            "scheduler".to_string(),
            Some(format!(
                "escalate-{}-{}",
                session.session_id,
                session.updated_at.timestamp()
            )),
        );
        self.engine
            .event_log()
            .append(event)
            .await
            .map_err(|e| e.to_string())?;

        session.status = SessionStatus::Escalated;
        session.updated_at = Utc::now();
        self.engine
            .store()
            .update(session)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{decision, harness, Harness};
    use serde_json::{json, Value};

    fn stale_session(employee_id: &str, status: SessionStatus, days_old: i64) -> RenewalSession {
        let mut session =
            RenewalSession::new(employee_id.to_string(), Some("L-1".to_string()), Value::Null);
        session.status = status;
        session.updated_at = Utc::now() - Duration::days(days_old);
        session
    }

    #[tokio::test]
    async fn eight_day_sessions_escalate_without_the_oracle() {
        let Harness {
            engine,
            store,
            events,
            oracle,
            ..
        } = harness(vec![]);
        let session = stale_session("E1", SessionStatus::AwaitingPhoto, 8);
        let session_id = session.session_id;
        store.seed(session);

        let scheduler = ReminderScheduler::new(Arc::new(engine), SchedulerConfig::default());
        let summary = scheduler.run_sweep().await;

        assert_eq!(summary.checked, 1);
        assert_eq!(summary.escalated, 1);
        assert_eq!(summary.reminded, 0);
        assert!(summary.errors.is_empty());
        assert_eq!(oracle.calls(), 0);

        let session = store.get(session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Escalated);

        let log = events.list_by_session(session_id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].event_type, EventType::SupervisorIntervention);
        assert!(log[0].event_data["reason"]
            .as_str()
            .unwrap()
            .contains("no activity"));
    }

    #[tokio::test]
    async fn three_day_sessions_get_a_timeout_reminder_through_the_engine() {
        let Harness {
            engine,
            store,
            events,
            oracle,
            ..
        } = harness(vec![Ok(decision("awaiting_photo", "collect license photo"))]);
        let session = stale_session("E1", SessionStatus::AwaitingPhoto, 3);
        let session_id = session.session_id;
        store.seed(session);

        let scheduler = ReminderScheduler::new(Arc::new(engine), SchedulerConfig::default());
        let summary = scheduler.run_sweep().await;

        assert_eq!(summary.checked, 1);
        assert_eq!(summary.reminded, 1);
        assert_eq!(summary.escalated, 0);
        assert_eq!(oracle.calls(), 1);

        let log = events.list_by_session(session_id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].event_type, EventType::TimeoutReminder);
        assert_eq!(log[0].event_data, json!({ "days_since_update": 3 }));
        assert_eq!(log[0].triggered_by, "scheduler");
    }

    #[tokio::test]
    async fn fresh_sessions_are_left_alone() {
        let Harness { engine, store, oracle, .. } = harness(vec![]);
        store.seed(stale_session("E1", SessionStatus::AwaitingPhoto, 1));
        // active-but-not-waiting sessions are out of scope for the sweep
        store.seed(stale_session("E2", SessionStatus::PhotoValidated, 10));

        let scheduler = ReminderScheduler::new(Arc::new(engine), SchedulerConfig::default());
        let summary = scheduler.run_sweep().await;

        assert_eq!(summary.checked, 0);
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn redelivered_reminders_are_skipped_not_errors() {
        let Harness {
            engine,
            store,
            events,
            oracle,
            ..
        } = harness(vec![Err("oracle down".to_string())]);
        let session = stale_session("E1", SessionStatus::AwaitingPhoto, 3);
        let session_id = session.session_id;
        store.seed(session);

        let scheduler = ReminderScheduler::new(Arc::new(engine), SchedulerConfig::default());

        // First sweep appends the timeout event, then the step fails, leaving
        // the session (and so its stale window and idempotency key) unchanged.
        let first = scheduler.run_sweep().await;
        assert_eq!(first.errors.len(), 1);

        // The retry hits the same key; that is a quiet skip, not a failure.
        let second = scheduler.run_sweep().await;
        assert_eq!(second.checked, 1);
        assert_eq!(second.reminded, 0);
        assert!(second.errors.is_empty());
        assert_eq!(oracle.calls(), 1);

        let log = events.list_by_session(session_id).await.unwrap();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn one_failing_session_does_not_abort_the_sweep() {
        let Harness { engine, store, .. } = harness(vec![
            Err("oracle down".to_string()),
            Err("oracle down".to_string()),
        ]);
        store.seed(stale_session("E1", SessionStatus::AwaitingPhoto, 3));
        store.seed(stale_session("E2", SessionStatus::AwaitingTraining, 4));

        let scheduler = ReminderScheduler::new(Arc::new(engine), SchedulerConfig::default());
        let summary = scheduler.run_sweep().await;

        assert_eq!(summary.checked, 2);
        assert_eq!(summary.reminded, 0);
        assert_eq!(summary.errors.len(), 2);
    }
}
