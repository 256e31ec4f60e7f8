use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use shared::models::{HealthResponse, ReadinessResponse};

use super::AppState;

pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (status, agent) = if state.chat.is_some() {
        ("healthy", "ready")
    } else {
        ("degraded", "unavailable")
    };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        agent: agent.to_string(),
    })
}

pub(super) async fn ready(State(state): State<AppState>) -> Response {
    if state.chat.is_some() {
        return (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready".to_string(),
                reason: None,
            }),
        )
            .into_response();
    }

    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ReadinessResponse {
            status: "not_ready".to_string(),
            reason: Some("chat gateway not initialized".to_string()),
        }),
    )
        .into_response()
}
