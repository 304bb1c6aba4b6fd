//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        db::PgStore,
        decision_llm::OpenAiDecisionAdapter,
        extraction_llm::OpenAiExtractionAdapter,
        hr_sync::{HttpHrSyncAdapter, LogOnlyHrSyncAdapter},
        messaging::{LogOnlyMessagingAdapter, WebhookMessagingAdapter},
        reference::HttpReferenceAdapter,
    },
    config::Config,
    error::ApiError,
    web::{api_router, rest::ApiDoc, AppState},
};
use async_openai::{config::OpenAIConfig, Client};
use axum::Router;
use renewal_core::dispatch::{ActionDispatcher, DispatcherConfig};
use renewal_core::engine::{EngineConfig, WorkflowEngine};
use renewal_core::ports::{
    EventLog, HrSyncService, MessagingService, SessionStore,
};
use renewal_core::scheduler::{ReminderScheduler, SchedulerConfig};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgStore::new(db_pool.clone()));
    info!("Running database migrations...");
    store
        .run_migrations()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);

    let decision_adapter = Arc::new(OpenAiDecisionAdapter::new(
        openai_client.clone(),
        config.decision_model.clone(),
    ));
    let extraction_adapter = Arc::new(OpenAiExtractionAdapter::new(
        openai_client.clone(),
        config.extraction_model.clone(),
    ));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.action_timeout_secs))
        .build()
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let messaging: Arc<dyn MessagingService> = match &config.messaging_gateway_url {
        Some(url) => Arc::new(WebhookMessagingAdapter::new(
            http.clone(),
            url.clone(),
            config.messaging_api_key.clone(),
        )),
        None => Arc::new(LogOnlyMessagingAdapter),
    };
    let hr_sync: Arc<dyn HrSyncService> = match &config.hr_sync_url {
        Some(url) => Arc::new(HttpHrSyncAdapter::new(
            http.clone(),
            url.clone(),
            config.hr_sync_api_key.clone(),
        )),
        None => Arc::new(LogOnlyHrSyncAdapter),
    };
    let reference = Arc::new(HttpReferenceAdapter::new(
        http,
        config.hr_sync_url.clone(),
        config.hr_sync_api_key.clone(),
    ));

    // --- 4. Assemble the Workflow Engine and Scheduler ---
    let dispatcher = ActionDispatcher::new(
        extraction_adapter,
        messaging,
        hr_sync,
        DispatcherConfig {
            portal_base_url: config.portal_base_url.clone(),
            action_timeout: Duration::from_secs(config.action_timeout_secs),
        },
    );
    let session_store: Arc<dyn SessionStore> = store.clone();
    let event_log: Arc<dyn EventLog> = store.clone();
    let engine = Arc::new(WorkflowEngine::new(
        session_store,
        event_log,
        decision_adapter,
        reference,
        dispatcher,
        EngineConfig {
            history_window: config.history_window,
            oracle_timeout: Duration::from_secs(config.oracle_timeout_secs),
        },
    ));
    let scheduler = Arc::new(ReminderScheduler::new(
        engine.clone(),
        SchedulerConfig {
            stale_after: chrono::Duration::hours(config.stale_after_hours),
            escalate_after: chrono::Duration::days(config.escalate_after_days),
        },
    ));

    // --- 5. Build the Shared AppState and Router ---
    let app_state = Arc::new(AppState {
        engine,
        scheduler,
        config: config.clone(),
    });

    let app = Router::new()
        .merge(api_router(app_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
