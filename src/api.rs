//! REST API server for the FinGPT agent
//!
//! Thin transport wrapper over `QueryHandler::handle_query`. Auth and chat
//! persistence belong to the external collaborators; this layer only adapts
//! JSON to the inbound boundary contract.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::handler::QueryHandler;
use crate::models::{Turn, TurnRole};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: Option<String>,
    pub query: String,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub handler: Arc<QueryHandler>,
}

/// =============================
/// Helpers — opaque ids → UUID
/// =============================

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

fn parse_or_stable_uuid(value: Option<&str>, fallback_seed: &str) -> uuid::Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            uuid::Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => stable_uuid_from_string(fallback_seed),
    }
}

fn parse_history(entries: &[HistoryEntry]) -> Vec<Turn> {
    entries
        .iter()
        .map(|entry| Turn {
            role: if entry.role.eq_ignore_ascii_case("assistant")
                || entry.role.eq_ignore_ascii_case("model")
            {
                TurnRole::Assistant
            } else {
                TurnRole::User
            },
            text: entry.text.clone(),
            timestamp: chrono::Utc::now(),
        })
        .collect()
}

/// =============================
/// Endpoints
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Query must not be empty".into())),
        );
    }

    let user_id = parse_or_stable_uuid(req.user_id.as_deref(), "anonymous-user");
    let history = parse_history(&req.history);

    info!(user_id = %user_id, "Received chat request");

    let outcome = state.handler.handle_query(user_id, &req.query, &history).await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "intent": outcome.intent,
            "answer": outcome.answer,
            "user_id": user_id.to_string(),
        }))),
    )
}

/// =============================
/// Router / Server Startup
/// =============================

pub fn create_router(handler: Arc<QueryHandler>) -> Router {
    let state = ApiState { handler };

    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/api/chat", post(chat_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

pub async fn start_server(
    handler: Arc<QueryHandler>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(handler);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_uuid_is_deterministic() {
        let a = stable_uuid_from_string("user-42");
        let b = stable_uuid_from_string("user-42");
        assert_eq!(a, b);
        assert_ne!(a, stable_uuid_from_string("user-43"));
    }

    #[test]
    fn valid_uuid_strings_pass_through() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(parse_or_stable_uuid(Some(&id.to_string()), "seed"), id);
    }

    #[test]
    fn history_roles_are_mapped() {
        let turns = parse_history(&[
            HistoryEntry {
                role: "user".into(),
                text: "hi".into(),
            },
            HistoryEntry {
                role: "model".into(),
                text: "hello".into(),
            },
        ]);

        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[1].role, TurnRole::Assistant);
    }
}
