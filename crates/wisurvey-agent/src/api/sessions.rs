//! Session endpoints.
//!
//! GET    /api/sessions           — list session ids
//! POST   /api/sessions           — create a session (optional map image)
//! GET    /api/sessions/{id}      — metadata, point summaries, `has_map`
//! DELETE /api/sessions/{id}      — delete a session and its points
//! GET    /api/sessions/{id}/map  — the session's map image

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use wisurvey_core::service::{NewSession, SessionDetail};

use super::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/map", get(get_map))
}

#[derive(Debug, Serialize)]
pub struct SessionList {
    pub sessions: Vec<String>,
}

async fn list_sessions(State(state): State<AppState>) -> Result<Json<SessionList>, ApiError> {
    let sessions = state.service().list_sessions().await?;
    Ok(Json(SessionList { sessions }))
}

// ── Create ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub id: String,
    pub name: String,
    pub success: bool,
}

async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<NewSession>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let meta = state.service().create_session(body).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            id: meta.id,
            name: meta.name,
            success: true,
        }),
    ))
}

// ── Read / delete ───────────────────────────────────────────────────

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    Ok(Json(state.service().session(&id).await?))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.service().delete_session(&id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn get_map(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state.service().map_path(&id).await?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ApiError::not_found("map not found"),
            _ => ApiError::internal(e.to_string()),
        })?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}
