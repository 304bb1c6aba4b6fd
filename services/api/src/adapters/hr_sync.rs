//! services/api/src/adapters/hr_sync.rs
//!
//! This module contains the third-party HR sync adapter, which implements the
//! `HrSyncService` port. Invoked when a workflow completes to push the renewal
//! back onto the employee's HR record.

use async_trait::async_trait;
use renewal_core::ports::{HrSyncService, PortError, PortResult};
use serde_json::Value;
use tracing::info;

/// Pushes record updates to the third-party HR system over HTTP.
#[derive(Clone)]
pub struct HttpHrSyncAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpHrSyncAdapter {
    pub fn new(http: reqwest::Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl HrSyncService for HttpHrSyncAdapter {
    async fn update_record(&self, subject_ref: &str, fields: &Value) -> PortResult<()> {
        let url = format!(
            "{}/records/{subject_ref}",
            self.base_url.trim_end_matches('/')
        );
        let mut request = self.http.patch(&url).json(fields);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PortError::Unexpected(format!(
                "HR system returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Used when no HR system is configured: updates are logged, never sent.
pub struct LogOnlyHrSyncAdapter;

#[async_trait]
impl HrSyncService for LogOnlyHrSyncAdapter {
    async fn update_record(&self, subject_ref: &str, fields: &Value) -> PortResult<()> {
        info!(subject_ref, %fields, "HR sync suppressed (no HR system configured)");
        Ok(())
    }
}
