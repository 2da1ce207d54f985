//! HTTP API for the chat frontend

use axum::{
    extract::{Query, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use aqar_chat::{CacheStats, ChatReply, ChatService};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Database connection failed")]
    Database(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::EmptyMessage => StatusCode::BAD_REQUEST,
            ApiError::Database(e) => {
                tracing::error!(error = %e, "Database check failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "Chat turn aborted");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default = "default_session")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    #[serde(default = "default_session")]
    session_id: String,
}

fn default_session() -> String {
    "default".to_string()
}

#[derive(Debug, Serialize)]
struct StatusMessage {
    status: &'static str,
    message: &'static str,
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    pub title: String,
    pub version: String,
}

async fn health_check(AxumState(state): AxumState<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": state.title,
        "version": state.version,
    }))
}

async fn handle_chat(
    AxumState(state): AxumState<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(ApiError::EmptyMessage);
    }

    tracing::info!(session = %payload.session_id, "Chat request");
    let service = state.service.clone();
    let ChatRequest { message, session_id } = payload;
    let reply = tokio::spawn(async move { service.process_message(&session_id, &message).await })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(reply))
}

async fn clear_session(
    AxumState(state): AxumState<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<StatusMessage> {
    state.service.clear_session(&query.session_id);
    Json(StatusMessage {
        status: "success",
        message: "Session cleared",
    })
}

async fn test_database(AxumState(state): AxumState<AppState>) -> Result<Json<StatusMessage>, ApiError> {
    state
        .service
        .test_database()
        .await
        .map_err(|e| ApiError::Database(e.to_string()))?;
    Ok(Json(StatusMessage {
        status: "success",
        message: "Database connection successful",
    }))
}

async fn cache_stats(AxumState(state): AxumState<AppState>) -> Json<CacheStats> {
    Json(state.service.cache_stats())
}

async fn clear_cache(AxumState(state): AxumState<AppState>) -> Json<StatusMessage> {
    state.service.clear_cache();
    Json(StatusMessage {
        status: "success",
        message: "Cache cleared",
    })
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat", post(handle_chat))
        .route("/api/clear-session", post(clear_session))
        .route("/api/test-db", get(test_database))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache/clear", post(clear_cache))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Chat API listening on http://{}/api/chat", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
