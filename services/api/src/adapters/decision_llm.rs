//! services/api/src/adapters/decision_llm.rs
//!
//! This module contains the adapter for the Decision Oracle LLM.
//! It implements the `DecisionOracle` port from the `core` crate.

const SYSTEM_INSTRUCTIONS: &str = r#"You are the decision engine for a license-renewal workflow.

An employee must renew a professional license. The full workflow is:
1. Collect a photo of the renewed license credential.
2. Validate the photo.
3. Collect a training certificate.
4. Validate the certificate.
5. Generate a pre-filled submission package for the regulatory portal.
6. Wait for the employee to confirm they submitted on the portal.
7. Complete the workflow.

You receive the current session state as JSON: status, current step, completed
steps, pending asks on the employee, reference data about the employee and
their license, and the recent conversation. The final user turn is the event
that just arrived (an upload, a message, or a timeout notice).

Decide the single next move and respond with ONLY a JSON object:

{
  "response": "<friendly message for the employee>",
  "next_status": "<one of the statuses below>",
  "next_step": "<short human-readable label of the step now in progress>",
  "actions": [ { "type": "<action type>", "data": { ... } } ],
  "pending_actions": [ "<outstanding asks on the employee>" ]
}

Valid values for next_status:
active, awaiting_photo, photo_uploaded, photo_validated, awaiting_training,
training_uploaded, training_validated, ready_for_portal_submission,
awaiting_portal_submission, portal_submitted, completed, escalated, failed,
cancelled

Valid action types and their data:
- request_document: { "document_type": "...", "instructions": "...", "urgency": "normal|high" }
- validate_document: { "document_type": "...", "reference": "<upload reference>" }
- send_sms: { "to": "...", "body": "..." }
- send_email: { "to": "...", "subject": "...", "body": "...", "attachments": [] }
- generate_submission_package: { "portal_url": "...", "checklist": [], "documents": [] }
- complete_workflow: {}

Rules:
- Never invent a status outside the list; never skip validation of an uploaded
  document.
- When an upload event arrives, dispatch validate_document with the upload's
  reference and move to the matching *_uploaded or *_validated status.
- When a timeout notice arrives, send a short, kind nudge about whatever is in
  pending_actions.
- Use complete_workflow only after the employee has confirmed portal
  submission.
- pending_actions must always reflect the complete set of things you are still
  waiting on from the employee.
- Keep "response" warm, short, and concrete about the next thing the employee
  should do."#;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ResponseFormat,
    },
    error::OpenAIError,
    Client,
};
use async_trait::async_trait;
use renewal_core::{
    domain::{Decision, SessionContext},
    ports::{DecisionOracle, PortError, PortResult},
};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `DecisionOracle` port using an
/// OpenAI-compatible LLM in JSON mode.
#[derive(Clone)]
pub struct OpenAiDecisionAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiDecisionAdapter {
    /// Creates a new `OpenAiDecisionAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    /// Strips a markdown code fence if the model wrapped its JSON in one.
    fn extract_json(raw: &str) -> &str {
        let trimmed = raw.trim();
        trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|s| s.strip_suffix("```"))
            .map(str::trim)
            .unwrap_or(trimmed)
    }
}

//=========================================================================================
// `DecisionOracle` Trait Implementation
//=========================================================================================

#[async_trait]
impl DecisionOracle for OpenAiDecisionAdapter {
    async fn decide(&self, context: &SessionContext) -> PortResult<Decision> {
        let context_json = serde_json::to_string_pretty(context)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(format!("SESSION CONTEXT:\n{context_json}"))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .response_format(ResponseFormat::JsonObject)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| PortError::Unexpected("decision model returned no content".to_string()))?;

        let decision: Decision = serde_json::from_str(Self::extract_json(&content))
            .map_err(|e| PortError::Unexpected(format!("unparseable decision: {e}")))?;
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_unwraps_code_fences() {
        let fenced = "```json\n{\"response\":\"hi\"}\n```";
        assert_eq!(
            OpenAiDecisionAdapter::extract_json(fenced),
            "{\"response\":\"hi\"}"
        );
        let bare = "{\"response\":\"hi\"}";
        assert_eq!(OpenAiDecisionAdapter::extract_json(bare), bare);
    }
}
