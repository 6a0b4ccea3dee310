//! JSON API handlers for inspecting live sessions.

use crate::session::{SessionSnapshot, SessionSummary};
use crate::AppState;
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// API error type.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

/// Handler for `GET /api/sessions`.
pub async fn list_sessions_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: state.sessions.list().await,
    })
}

/// Handler for `GET /api/sessions/{callId}`.
pub async fn get_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let handle = state
        .sessions
        .get(&call_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no active session for call {}", call_id)))?;

    // The session may tear down between the lookup and the snapshot request.
    let snapshot = handle
        .snapshot()
        .await
        .ok_or_else(|| ApiError::NotFound(format!("session for call {} has ended", call_id)))?;
    Ok(Json(snapshot))
}
