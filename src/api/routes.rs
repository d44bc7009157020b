//! REST endpoints for the dialogue engine.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::dialogue::{DialogueEngine, InboundTurn};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<DialogueEngine>,
}

/// Build the Axum router with chat and thread routes.
pub fn api_routes(engine: Arc<DialogueEngine>) -> Router {
    let state = ApiState { engine };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/v1/chat", post(chat))
        .route("/api/v1/threads/{thread_id}", get(get_thread))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "taxi-agent"
    }))
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "service": "taxi-agent",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/api/v1/chat", "/api/v1/threads/{thread_id}", "/health"]
    }))
}

// ── Conversation ────────────────────────────────────────────────────────

async fn chat(State(state): State<ApiState>, Json(inbound): Json<InboundTurn>) -> impl IntoResponse {
    if inbound.message.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": "message must not be empty"})),
        );
    }

    match state.engine.handle_turn(inbound).await {
        Ok(result) => {
            info!(
                thread_id = %result.thread_id,
                transfer_to_human = result.transfer_to_human,
                conversation_ended = result.conversation_ended,
                "Turn handled"
            );
            (StatusCode::OK, Json(json!(result)))
        }
        Err(e) => {
            error!("Turn failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "No pudimos procesar tu mensaje. Intenta de nuevo en un momento."})),
            )
        }
    }
}

async fn get_thread(
    State(state): State<ApiState>,
    Path(thread_id): Path<String>,
) -> impl IntoResponse {
    match state.engine.get_thread(&thread_id).await {
        Ok(Some(thread)) => (
            StatusCode::OK,
            Json(json!({
                "thread_id": thread.thread_id,
                "client_id": thread.client_id,
                "stage": thread.stage(),
                "booking": thread.booking,
                "transfer": thread.transfer,
                "usage": thread.usage,
                "conversation_ended": thread.conversation_ended(),
                "updated_at": thread.updated_at,
            })),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Thread not found"})),
        ),
        Err(e) => {
            error!(%thread_id, "Thread lookup failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "Thread store unavailable"})),
            )
        }
    }
}
