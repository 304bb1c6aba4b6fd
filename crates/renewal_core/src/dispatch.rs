//! crates/renewal_core/src/dispatch.rs
//!
//! Executes the action list of a decision against the side-effecting
//! collaborator ports and collects one `ActionResult` per action. Messaging
//! and sync failures are recorded, never thrown: a lost SMS must not strand
//! the rest of the step.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{Action, ActionResult, RenewalSession, SubmissionPackage};
use crate::ports::{DocumentValidationService, HrSyncService, MessagingService, PortResult};

//=========================================================================================
// Canonical Action Types
//=========================================================================================

pub const REQUEST_DOCUMENT: &str = "request_document";
pub const VALIDATE_DOCUMENT: &str = "validate_document";
pub const SEND_EMAIL: &str = "send_email";
pub const SEND_SMS: &str = "send_sms";
pub const GENERATE_SUBMISSION_PACKAGE: &str = "generate_submission_package";
pub const COMPLETE_WORKFLOW: &str = "complete_workflow";

//=========================================================================================
// Step Effects
//=========================================================================================

/// Session mutations accumulated while dispatching one decision's actions.
/// The engine folds these into the session it persists; the dispatcher itself
/// never writes to the store.
#[derive(Debug, Default)]
pub struct StepEffects {
    /// Outstanding asks added by `request_document`.
    pub add_pending: Vec<String>,
    /// A freshly generated submission package, if this step produced one.
    pub package: Option<SubmissionPackage>,
    /// Set by `complete_workflow`, the only action allowed to force a
    /// terminal status.
    pub complete: bool,
}

//=========================================================================================
// The Dispatcher
//=========================================================================================

#[derive(Clone)]
pub struct DispatcherConfig {
    /// Base URL used when a generated package has no caller-supplied portal
    /// link; the package reference is appended as the final path segment.
    pub portal_base_url: String,
    /// Ceiling on each outbound collaborator call. A timeout is an action
    /// failure, not an engine failure.
    pub action_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            portal_base_url: "https://renewals.portal.example/submit".to_string(),
            action_timeout: Duration::from_secs(10),
        }
    }
}

/// Maps each action type to exactly one handler. Unknown action types are
/// logged and skipped so the rest of the decision still executes.
pub struct ActionDispatcher {
    validator: Arc<dyn DocumentValidationService>,
    messaging: Arc<dyn MessagingService>,
    hr_sync: Arc<dyn HrSyncService>,
    config: DispatcherConfig,
}

impl ActionDispatcher {
    pub fn new(
        validator: Arc<dyn DocumentValidationService>,
        messaging: Arc<dyn MessagingService>,
        hr_sync: Arc<dyn HrSyncService>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            validator,
            messaging,
            hr_sync,
            config,
        }
    }

    /// Executes `actions` in order against `session`, returning one result per
    /// action plus the accumulated session effects. Never fails as a whole.
    pub async fn dispatch(
        &self,
        session: &RenewalSession,
        actions: &[Action],
    ) -> (Vec<ActionResult>, StepEffects) {
        let mut results = Vec::with_capacity(actions.len());
        let mut effects = StepEffects::default();

        for action in actions {
            let result = match action.action_type.as_str() {
                REQUEST_DOCUMENT => self.request_document(session, action, &mut effects).await,
                VALIDATE_DOCUMENT => self.validate_document(action).await,
                SEND_SMS => self.send_sms(session, action).await,
                SEND_EMAIL => self.send_email(session, action).await,
                GENERATE_SUBMISSION_PACKAGE => {
                    self.generate_submission_package(session, action, &mut effects)
                }
                COMPLETE_WORKFLOW => self.complete_workflow(session, &mut effects).await,
                other => {
                    warn!(session_id = %session.session_id, action_type = other,
                          "skipping unknown action type");
                    ActionResult::failed(other, "unknown action type, skipped".to_string())
                }
            };
            results.push(result);
        }

        (results, effects)
    }

    //-------------------------------------------------------------------------------------
    // Handlers
    //-------------------------------------------------------------------------------------

    /// Records an outstanding ask on the employee and, best-effort, nudges
    /// them over SMS when instructions and a phone number are available.
    async fn request_document(
        &self,
        session: &RenewalSession,
        action: &Action,
        effects: &mut StepEffects,
    ) -> ActionResult {
        let Some(document_type) = str_field(&action.data, "document_type") else {
            return ActionResult::failed(REQUEST_DOCUMENT, "missing document_type".to_string());
        };

        let pending = format!("upload_{document_type}");
        if !effects.add_pending.contains(&pending) {
            effects.add_pending.push(pending.clone());
        }

        let mut detail = json!({ "pending_action": pending });

        // Message send is best-effort; the ask is recorded either way.
        if let (Some(instructions), Some(phone)) = (
            str_field(&action.data, "instructions"),
            str_field(&session.metadata, "phone"),
        ) {
            if let Err(e) = self
                .bounded(self.messaging.send_sms(phone, instructions))
                .await
            {
                warn!(session_id = %session.session_id, error = %e,
                      "document request notification failed");
                detail["notification_error"] = json!(e);
            }
        }

        ActionResult::ok(REQUEST_DOCUMENT, Some(detail))
    }

    /// Invokes the extraction/validation collaborator. The report is recorded
    /// for the Decision Oracle to reason about on its next invocation; it does
    /// not itself advance the workflow.
    async fn validate_document(&self, action: &Action) -> ActionResult {
        let Some(document_type) = str_field(&action.data, "document_type") else {
            return ActionResult::failed(VALIDATE_DOCUMENT, "missing document_type".to_string());
        };
        let reference = str_field(&action.data, "reference").unwrap_or_default();

        match self
            .bounded(self.validator.validate(document_type, reference))
            .await
        {
            Ok(report) => {
                let detail = serde_json::to_value(&report).unwrap_or(Value::Null);
                ActionResult::ok(VALIDATE_DOCUMENT, Some(detail))
            }
            Err(e) => ActionResult::failed(VALIDATE_DOCUMENT, e),
        }
    }

    async fn send_sms(&self, session: &RenewalSession, action: &Action) -> ActionResult {
        let to = str_field(&action.data, "to").or(str_field(&session.metadata, "phone"));
        let Some(to) = to else {
            return ActionResult::failed(SEND_SMS, "no recipient phone number".to_string());
        };
        let body = str_field(&action.data, "body").unwrap_or_default();

        match self.bounded(self.messaging.send_sms(to, body)).await {
            Ok(receipt) => ActionResult::ok(SEND_SMS, Some(json!({ "message_id": receipt.message_id }))),
            Err(e) => ActionResult::failed(SEND_SMS, e),
        }
    }

    async fn send_email(&self, session: &RenewalSession, action: &Action) -> ActionResult {
        let to = str_field(&action.data, "to").or(str_field(&session.metadata, "email"));
        let Some(to) = to else {
            return ActionResult::failed(SEND_EMAIL, "no recipient email address".to_string());
        };
        let subject = str_field(&action.data, "subject").unwrap_or_default();
        let body = str_field(&action.data, "body").unwrap_or_default();
        let attachments: Vec<String> = action
            .data
            .get("attachments")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        match self
            .bounded(self.messaging.send_email(to, subject, body, &attachments))
            .await
        {
            Ok(receipt) => {
                ActionResult::ok(SEND_EMAIL, Some(json!({ "message_id": receipt.message_id })))
            }
            Err(e) => ActionResult::failed(SEND_EMAIL, e),
        }
    }

    /// Idempotent: a package already on the session, or already generated
    /// earlier in this same step, is returned untouched so a portal link the
    /// employee already received never changes under them.
    fn generate_submission_package(
        &self,
        session: &RenewalSession,
        action: &Action,
        effects: &mut StepEffects,
    ) -> ActionResult {
        if let Some(existing) = effects
            .package
            .as_ref()
            .or(session.submission_package.as_ref())
        {
            let detail = serde_json::to_value(existing).unwrap_or(Value::Null);
            return ActionResult::ok(GENERATE_SUBMISSION_PACKAGE, Some(detail));
        }

        let reference = Uuid::new_v4().to_string();
        let portal_url = str_field(&action.data, "portal_url")
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!(
                    "{}/{}",
                    self.config.portal_base_url.trim_end_matches('/'),
                    reference
                )
            });
        let checklist = string_list(&action.data, "checklist");
        let documents = string_list(&action.data, "documents");

        let package = SubmissionPackage {
            portal_url,
            reference,
            checklist,
            documents,
            generated_at: Utc::now(),
        };
        let detail = serde_json::to_value(&package).unwrap_or(Value::Null);
        effects.package = Some(package);

        ActionResult::ok(GENERATE_SUBMISSION_PACKAGE, Some(detail))
    }

    /// Marks the session for terminal completion and pushes the renewal to the
    /// third-party HR record. The sync is best-effort: the workflow completes
    /// even if the HR system is down, and the failure stays on the audit turn.
    async fn complete_workflow(
        &self,
        session: &RenewalSession,
        effects: &mut StepEffects,
    ) -> ActionResult {
        effects.complete = true;

        let fields = json!({
            "renewal_status": "completed",
            "license_id": session.license_id,
            "completed_at": Utc::now(),
        });
        match self
            .bounded(self.hr_sync.update_record(&session.employee_id, &fields))
            .await
        {
            Ok(()) => ActionResult::ok(COMPLETE_WORKFLOW, Some(json!({ "hr_synced": true }))),
            Err(e) => {
                warn!(session_id = %session.session_id, error = %e, "HR sync failed on completion");
                ActionResult {
                    action_type: COMPLETE_WORKFLOW.to_string(),
                    success: true,
                    detail: Some(json!({ "hr_synced": false })),
                    error: Some(e),
                }
            }
        }
    }

    /// Runs a collaborator call under the configured per-action timeout,
    /// flattening both the timeout and the port error into a plain message.
    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = PortResult<T>>,
    ) -> Result<T, String> {
        match tokio::time::timeout(self.config.action_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "timed out after {}s",
                self.config.action_timeout.as_secs()
            )),
        }
    }
}

//=========================================================================================
// Payload Helpers
//=========================================================================================

fn str_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}

fn string_list(data: &Value, key: &str) -> Vec<String> {
    data.get(key)
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RenewalSession;
    use crate::ports::ValidationReport;
    use crate::testing::{NullHrSync, RecordingMessenger, RecordingValidator};
    use serde_json::json;

    struct SlowValidator;

    #[async_trait::async_trait]
    impl DocumentValidationService for SlowValidator {
        async fn validate(&self, _: &str, _: &str) -> PortResult<ValidationReport> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ValidationReport {
                valid: true,
                extracted_fields: Value::Null,
                issues: Vec::new(),
            })
        }
    }

    fn dispatcher(messenger: Arc<RecordingMessenger>) -> ActionDispatcher {
        ActionDispatcher::new(
            Arc::new(RecordingValidator::default()),
            messenger,
            Arc::new(NullHrSync),
            DispatcherConfig::default(),
        )
    }

    fn session_with_phone() -> RenewalSession {
        RenewalSession::new(
            "E1".to_string(),
            Some("L-1".to_string()),
            json!({ "phone": "+15550001111" }),
        )
    }

    #[tokio::test]
    async fn request_document_records_the_ask_and_nudges_by_sms() {
        let messenger = Arc::new(RecordingMessenger::new(false));
        let dispatcher = dispatcher(messenger.clone());
        let session = session_with_phone();

        let actions = vec![Action {
            action_type: REQUEST_DOCUMENT.to_string(),
            data: json!({
                "document_type": "training_certificate",
                "instructions": "Please upload your certificate.",
            }),
        }];
        let (results, effects) = dispatcher.dispatch(&session, &actions).await;

        assert!(results[0].success);
        assert_eq!(effects.add_pending, vec!["upload_training_certificate"]);
        let sent = messenger.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "+15550001111");
    }

    #[tokio::test]
    async fn existing_package_is_returned_not_replaced() {
        let dispatcher = dispatcher(Arc::new(RecordingMessenger::new(false)));
        let mut session = session_with_phone();
        session.submission_package = Some(SubmissionPackage {
            portal_url: "https://renew.ca.example.gov/abc".to_string(),
            reference: "abc".to_string(),
            checklist: Vec::new(),
            documents: Vec::new(),
            generated_at: Utc::now(),
        });

        let actions = vec![Action {
            action_type: GENERATE_SUBMISSION_PACKAGE.to_string(),
            data: json!({}),
        }];
        let (results, effects) = dispatcher.dispatch(&session, &actions).await;

        assert!(results[0].success);
        assert!(effects.package.is_none());
        assert_eq!(
            results[0].detail.as_ref().unwrap()["reference"],
            json!("abc")
        );
    }

    #[tokio::test]
    async fn repeated_generates_in_one_step_share_one_package() {
        let dispatcher = dispatcher(Arc::new(RecordingMessenger::new(false)));
        let session = session_with_phone();

        let generate = Action {
            action_type: GENERATE_SUBMISSION_PACKAGE.to_string(),
            data: json!({ "checklist": ["license photo"] }),
        };
        let (results, effects) = dispatcher
            .dispatch(&session, &[generate.clone(), generate])
            .await;

        assert!(results[0].success && results[1].success);
        let first = results[0].detail.as_ref().unwrap()["reference"].clone();
        let second = results[1].detail.as_ref().unwrap()["reference"].clone();
        assert_eq!(first, second);
        // the persisted package is the one both results advertised
        assert_eq!(
            effects.package.as_ref().unwrap().reference,
            first.as_str().unwrap()
        );
    }

    #[tokio::test]
    async fn slow_collaborator_degrades_to_a_failed_action() {
        let dispatcher = ActionDispatcher::new(
            Arc::new(SlowValidator),
            Arc::new(RecordingMessenger::new(false)),
            Arc::new(NullHrSync),
            DispatcherConfig {
                action_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );
        let session = session_with_phone();

        let actions = vec![
            Action {
                action_type: VALIDATE_DOCUMENT.to_string(),
                data: json!({ "document_type": "license_photo", "reference": "s3://p.jpg" }),
            },
            Action {
                action_type: COMPLETE_WORKFLOW.to_string(),
                data: json!({}),
            },
        ];
        let (results, effects) = dispatcher.dispatch(&session, &actions).await;

        assert!(!results[0].success);
        assert!(results[0].error.as_ref().unwrap().contains("timed out"));
        // the step kept going past the timed-out action
        assert!(results[1].success);
        assert!(effects.complete);
    }

    #[tokio::test]
    async fn unknown_actions_are_skipped_without_aborting() {
        let dispatcher = dispatcher(Arc::new(RecordingMessenger::new(false)));
        let session = session_with_phone();

        let actions = vec![
            Action {
                action_type: "teleport_employee".to_string(),
                data: json!({}),
            },
            Action {
                action_type: COMPLETE_WORKFLOW.to_string(),
                data: json!({}),
            },
        ];
        let (results, effects) = dispatcher.dispatch(&session, &actions).await;

        assert!(!results[0].success);
        assert!(results[1].success);
        assert!(effects.complete);
    }
}
