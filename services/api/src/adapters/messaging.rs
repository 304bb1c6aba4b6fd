//! services/api/src/adapters/messaging.rs
//!
//! This module contains the messaging adapter, which implements the
//! `MessagingService` port against an HTTP SMS/email gateway. Delivery is
//! best-effort by contract: the engine records failures on the audit turn and
//! moves on.

use async_trait::async_trait;
use renewal_core::ports::{DeliveryReceipt, MessagingService, PortError, PortResult};
use serde_json::{json, Value};
use tracing::info;

//=========================================================================================
// Gateway-backed Adapter
//=========================================================================================

/// Sends SMS and email through an HTTP messaging gateway.
#[derive(Clone)]
pub struct WebhookMessagingAdapter {
    http: reqwest::Client,
    gateway_url: String,
    api_key: Option<String>,
}

impl WebhookMessagingAdapter {
    pub fn new(http: reqwest::Client, gateway_url: String, api_key: Option<String>) -> Self {
        Self {
            http,
            gateway_url,
            api_key,
        }
    }

    async fn post(&self, path: &str, payload: Value) -> PortResult<DeliveryReceipt> {
        let url = format!("{}/{path}", self.gateway_url.trim_end_matches('/'));
        let mut request = self.http.post(&url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PortError::Unexpected(format!(
                "messaging gateway returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(DeliveryReceipt {
            message_id: body
                .get("message_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

#[async_trait]
impl MessagingService for WebhookMessagingAdapter {
    async fn send_sms(&self, to: &str, body: &str) -> PortResult<DeliveryReceipt> {
        self.post("sms", json!({ "to": to, "body": body })).await
    }

    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        attachments: &[String],
    ) -> PortResult<DeliveryReceipt> {
        self.post(
            "email",
            json!({
                "to": to,
                "subject": subject,
                "body": body,
                "attachments": attachments,
            }),
        )
        .await
    }
}

//=========================================================================================
// Log-only Adapter
//=========================================================================================

/// Used when no gateway is configured (local development): messages are
/// logged, never sent.
pub struct LogOnlyMessagingAdapter;

#[async_trait]
impl MessagingService for LogOnlyMessagingAdapter {
    async fn send_sms(&self, to: &str, body: &str) -> PortResult<DeliveryReceipt> {
        info!(to, body, "sms suppressed (no messaging gateway configured)");
        Ok(DeliveryReceipt { message_id: None })
    }

    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        _body: &str,
        _attachments: &[String],
    ) -> PortResult<DeliveryReceipt> {
        info!(to, subject, "email suppressed (no messaging gateway configured)");
        Ok(DeliveryReceipt { message_id: None })
    }
}
