//! services/api/src/adapters/reference.rs
//!
//! This module contains the reference-data adapter, which implements the
//! `ReferenceDataService` port. Employee and license display data come from
//! the HR system over HTTP when one is configured; jurisdiction-specific
//! renewal requirements ship as an embedded table.

use async_trait::async_trait;
use renewal_core::ports::{PortError, PortResult, ReferenceDataService};
use serde_json::{json, Value};
use std::sync::OnceLock;

/// Jurisdiction-specific renewal requirements, keyed by jurisdiction code.
fn requirements_table() -> &'static Value {
    static TABLE: OnceLock<Value> = OnceLock::new();
    TABLE.get_or_init(|| {
        json!({
            "CA": { "training_hours": 4, "renewal_cycle_months": 24, "portal": "https://renew.ca.example.gov" },
            "NY": { "training_hours": 6, "renewal_cycle_months": 36, "portal": "https://renew.ny.example.gov" },
            "TX": { "training_hours": 2, "renewal_cycle_months": 24, "portal": "https://renew.tx.example.gov" },
            "WA": { "training_hours": 4, "renewal_cycle_months": 12, "portal": "https://renew.wa.example.gov" }
        })
    })
}

/// Reference-data lookups backed by the HR system (when configured) and the
/// embedded jurisdiction table. Lookups are read-only; a missing backend
/// yields `None`, never an error.
#[derive(Clone)]
pub struct HttpReferenceAdapter {
    http: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
}

impl HttpReferenceAdapter {
    pub fn new(http: reqwest::Client, base_url: Option<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url,
            api_key,
        }
    }

    async fn fetch(&self, path: &str) -> PortResult<Option<Value>> {
        let Some(base) = &self.base_url else {
            return Ok(None);
        };
        let url = format!("{}/{path}", base.trim_end_matches('/'));
        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(PortError::Unexpected(format!(
                "reference lookup returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Some(body))
    }
}

#[async_trait]
impl ReferenceDataService for HttpReferenceAdapter {
    async fn employee_profile(&self, employee_id: &str) -> PortResult<Option<Value>> {
        self.fetch(&format!("employees/{employee_id}")).await
    }

    async fn license_record(&self, license_id: &str) -> PortResult<Option<Value>> {
        self.fetch(&format!("licenses/{license_id}")).await
    }

    async fn jurisdiction_requirements(&self, jurisdiction: &str) -> PortResult<Option<Value>> {
        Ok(requirements_table().get(jurisdiction).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn jurisdiction_table_resolves_known_codes() {
        let adapter = HttpReferenceAdapter::new(reqwest::Client::new(), None, None);
        let ca = adapter.jurisdiction_requirements("CA").await.unwrap();
        assert_eq!(ca.unwrap()["training_hours"], 4);
        assert!(adapter
            .jurisdiction_requirements("ZZ")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn lookups_without_a_backend_yield_none() {
        let adapter = HttpReferenceAdapter::new(reqwest::Client::new(), None, None);
        assert!(adapter.employee_profile("E1").await.unwrap().is_none());
        assert!(adapter.license_record("L1").await.unwrap().is_none());
    }
}
