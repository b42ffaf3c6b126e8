// Relay API server: the chat orchestrator's HTTP surface.

mod chat;
mod config;
mod error;
mod tool_catalogue;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use config::AppConfig;
use relay_core::llm::LlmProvider;
use relay_core::openai::OpenAiProvider;
use relay_core::quota::{InProcessQuotaStore, QuotaStore};
use relay_storage::{Database, EncryptionService};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// App state shared across routes.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<AppConfig>,
    pub llm_provider: Arc<dyn LlmProvider>,
    pub quota_store: Arc<dyn QuotaStore>,
    pub encryption: Arc<EncryptionService>,
}

#[derive(Serialize, utoipa::ToSchema)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(OpenApi)]
#[openapi(
    paths(chat::chat),
    components(schemas(
        chat::ChatRequest,
        chat::IncomingMessage,
        relay_contracts::events::ChatEvent,
    )),
    tags((name = "chat", description = "Conversation orchestrator endpoint")),
    info(
        title = "Relay API",
        version = "0.1.0",
        description = "Multi-tenant AI assistant backend: the conversation orchestrator",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

/// Builds the full route tree. Extracted for testing so routes can be
/// exercised with `tower::ServiceExt::oneshot` against a fake state.
fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/chat", axum::routing::post(chat::chat))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_filter.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("relay-api starting...");

    let db = Database::from_url(&config.database_url)
        .await
        .context("failed to connect to database")?;
    tracing::info!("connected to database");

    let llm_provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(
        config.llm_api_key.clone(),
        config.llm_api_base_url.clone(),
    ));
    let quota_store: Arc<dyn QuotaStore> = Arc::new(InProcessQuotaStore::new());
    let encryption =
        Arc::new(EncryptionService::from_env().context("failed to load encryption keys")?);

    let state = AppState {
        db: Arc::new(db),
        config: Arc::new(config.clone()),
        llm_provider,
        quota_store,
        encryption,
    };

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .context("failed to bind to address")?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use uuid::Uuid;

    /// `connect_lazy` builds a pool without establishing a connection, which
    /// is enough for routes that reject before touching the database.
    fn test_state() -> AppState {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/relay_test")
            .expect("lazy pool construction should not touch the network");
        AppState {
            db: Arc::new(Database::new(pool)),
            config: Arc::new(AppConfig {
                database_url: String::new(),
                bind_addr: "0.0.0.0:0".to_string(),
                log_filter: String::new(),
                llm_api_key: "test-key".to_string(),
                llm_api_base_url: "http://localhost".to_string(),
                default_model: "gpt-4o-mini".to_string(),
                max_tool_rounds: 10,
                history_size: 20,
                memory_recall_timeout: std::time::Duration::from_secs(3),
                remote_tool_discovery_timeout: std::time::Duration::from_secs(15),
                remote_tool_call_timeout: std::time::Duration::from_secs(30),
            }),
            llm_provider: Arc::new(OpenAiProvider::new(
                "test-key".to_string(),
                "http://localhost".to_string(),
            )),
            quota_store: Arc::new(InProcessQuotaStore::new()),
            encryption: Arc::new(
                EncryptionService::new("k1:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=", &[])
                    .expect("test encryption key should be valid"),
            ),
        }
    }

    #[tokio::test]
    async fn test_health_endpoint_returns_ok() {
        let app = build_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_chat_without_user_id_header_returns_400() {
        let app = build_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_vec(&serde_json::json!({
                            "messages": [{"role": "user", "content": "hi"}]
                        }))
                        .unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_chat_with_empty_message_returns_400() {
        let app = build_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/chat")
                    .header("content-type", "application/json")
                    .header("x-user-id", Uuid::now_v7().to_string())
                    .body(Body::from(
                        serde_json::to_vec(&serde_json::json!({
                            "messages": [{"role": "user", "content": "   "}]
                        }))
                        .unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
