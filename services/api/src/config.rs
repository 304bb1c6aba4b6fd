//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub decision_model: String,
    pub extraction_model: String,
    pub messaging_gateway_url: Option<String>,
    pub messaging_api_key: Option<String>,
    pub hr_sync_url: Option<String>,
    pub hr_sync_api_key: Option<String>,
    /// Shared secret expected in the `x-cron-secret` header of the
    /// reminder-sweep route.
    pub cron_secret: String,
    pub portal_base_url: String,
    /// How many recent conversation turns the decision model sees.
    pub history_window: usize,
    pub oracle_timeout_secs: u64,
    pub action_timeout_secs: u64,
    pub stale_after_hours: i64,
    pub escalate_after_days: i64,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load API Keys and Collaborator Endpoints (as optional) ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let messaging_gateway_url = std::env::var("MESSAGING_GATEWAY_URL").ok();
        let messaging_api_key = std::env::var("MESSAGING_API_KEY").ok();
        let hr_sync_url = std::env::var("HR_SYNC_URL").ok();
        let hr_sync_api_key = std::env::var("HR_SYNC_API_KEY").ok();

        let cron_secret = std::env::var("CRON_SECRET")
            .map_err(|_| ConfigError::MissingVar("CRON_SECRET".to_string()))?;

        // --- Load Orchestrator Settings ---
        let decision_model =
            std::env::var("DECISION_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let extraction_model =
            std::env::var("EXTRACTION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let portal_base_url = std::env::var("PORTAL_BASE_URL")
            .unwrap_or_else(|_| "https://renewals.portal.example/submit".to_string());

        let history_window = parse_var("HISTORY_WINDOW", 20usize)?;
        let oracle_timeout_secs = parse_var("ORACLE_TIMEOUT_SECS", 60u64)?;
        let action_timeout_secs = parse_var("ACTION_TIMEOUT_SECS", 10u64)?;
        let stale_after_hours = parse_var("STALE_AFTER_HOURS", 72i64)?;
        let escalate_after_days = parse_var("ESCALATE_AFTER_DAYS", 7i64)?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            decision_model,
            extraction_model,
            messaging_gateway_url,
            messaging_api_key,
            hr_sync_url,
            hr_sync_api_key,
            cron_secret,
            portal_base_url,
            history_window,
            oracle_timeout_secs,
            action_timeout_secs,
            stale_after_hours,
            escalate_after_days,
        })
    }
}

/// Parses an optional numeric environment variable, falling back to a default.
fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        Err(_) => Ok(default),
    }
}
