//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        DbAdapter, OfflineExplainer, OfflineTextExtractor, OpenAiExplanationAdapter,
        OpenAiOcrAdapter,
    },
    config::Config,
    error::ApiError,
    web::{self, ApiDoc, AppState},
};
use async_openai::{config::OpenAIConfig, Client};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use axum::Router;
use exam_pilot_core::ports::{DatabaseService, ExplanationService, TextExtractionService};
use exam_pilot_core::{InMemoryStore, TutoringService};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
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

    // --- 2. Connect to the Store & Run Migrations ---
    let db: Arc<dyn DatabaseService> = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        None => {
            warn!("DATABASE_URL is not set; all state is kept in memory and lost on restart.");
            Arc::new(InMemoryStore::new())
        }
    };

    // --- 3. Initialize Service Adapters ---
    let (explainer, extractor): (Arc<dyn ExplanationService>, Arc<dyn TextExtractionService>) =
        match &config.openai_api_key {
            Some(api_key) => {
                let openai_client =
                    Client::with_config(OpenAIConfig::new().with_api_key(api_key.as_str()));
                (
                    Arc::new(OpenAiExplanationAdapter::new(
                        openai_client.clone(),
                        config.explain_model.clone(),
                    )),
                    Arc::new(OpenAiOcrAdapter::new(
                        openai_client,
                        config.ocr_model.clone(),
                    )),
                )
            }
            None => {
                warn!("OPENAI_API_KEY is not set; every answer uses the fallback explanation.");
                (Arc::new(OfflineExplainer), Arc::new(OfflineTextExtractor))
            }
        };

    let tutoring = TutoringService::new(db.clone(), explainer, extractor)
        .with_external_timeout(config.generation_timeout);

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        tutoring: Arc::new(tutoring),
        db,
        config: config.clone(),
    });

    let cors_origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            ACCEPT,
            HeaderName::from_static("x-admin-token"),
        ]);

    // --- 5. Create the Web Router ---
    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(web::router(app_state).layer(cors))
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
