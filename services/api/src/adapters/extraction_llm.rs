//! services/api/src/adapters/extraction_llm.rs
//!
//! This module contains the adapter for the document extraction/validation
//! LLM. It implements the `DocumentValidationService` port from the `core`
//! crate.

const SYSTEM_INSTRUCTIONS: &str = r#"You validate documents for a license-renewal workflow.

You receive a document type and a storage reference for an uploaded document.
Judge whether the referenced document plausibly satisfies the requirement and
respond with ONLY a JSON object:

{
  "valid": true or false,
  "extracted_fields": { "<field>": "<value>", ... },
  "issues": [ "<each problem found, empty when valid>" ]
}

For a license photo, extract the license number, holder name, and expiry date
when visible. For a training certificate, extract the course name, completion
date, and credit hours. If the reference cannot be read at all, return valid
false with one issue explaining why."#;

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
use renewal_core::ports::{DocumentValidationService, PortError, PortResult, ValidationReport};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `DocumentValidationService` using an
/// OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiExtractionAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiExtractionAdapter {
    /// Creates a new `OpenAiExtractionAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// `DocumentValidationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentValidationService for OpenAiExtractionAdapter {
    async fn validate(
        &self,
        document_type: &str,
        reference: &str,
    ) -> PortResult<ValidationReport> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(format!(
                    "DOCUMENT TYPE: {document_type}\nREFERENCE: {reference}"
                ))
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
            .ok_or_else(|| {
                PortError::Unexpected("extraction model returned no content".to_string())
            })?;

        let report: ValidationReport = serde_json::from_str(content.trim())
            .map_err(|e| PortError::Unexpected(format!("unparseable validation report: {e}")))?;
        Ok(report)
    }
}
