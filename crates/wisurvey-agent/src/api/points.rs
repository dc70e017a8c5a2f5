//! Point endpoints.
//!
//! GET  /api/sessions/{sid}/points/{pid}                    — full status record
//! GET  /api/sessions/{sid}/points/{pid}/status             — lifecycle state
//! POST /api/sessions/{sid}/points/{pid}/scan               — start a capture
//! GET  /api/sessions/{sid}/points/{pid}/results            — results record
//! POST /api/sessions/{sid}/points/{pid}/results/recompute  — rescore from artifacts

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use wisurvey_core::lifecycle::ScanState;
use wisurvey_core::scoring::ResultsRecord;
use wisurvey_core::service::PointRequest;
use wisurvey_core::store::PointStatus;

use super::ApiError;
use crate::state::AppState;

const POINT: &str = "/sessions/{session_id}/points/{point_id}";

pub fn router() -> Router<AppState> {
    Router::new()
        .route(POINT, get(get_point))
        .route(&format!("{POINT}/status"), get(get_status))
        .route(&format!("{POINT}/scan"), post(start_scan))
        .route(&format!("{POINT}/results"), get(get_results))
        .route(&format!("{POINT}/results/recompute"), post(recompute_results))
}

async fn get_point(
    State(state): State<AppState>,
    Path((session_id, point_id)): Path<(String, String)>,
) -> Result<Json<PointStatus>, ApiError> {
    state
        .service()
        .point_status(&session_id, &point_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("point not found"))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: ScanState,
}

async fn get_status(
    State(state): State<AppState>,
    Path((session_id, point_id)): Path<(String, String)>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = state.service().status(&session_id, &point_id).await?;
    Ok(Json(StatusResponse { status }))
}

// ── Capture ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub success: bool,
    pub status: ScanState,
    /// `false` when the point already had a capture running.
    pub started: bool,
}

async fn start_scan(
    State(state): State<AppState>,
    Path((session_id, point_id)): Path<(String, String)>,
    Json(body): Json<PointRequest>,
) -> Result<(StatusCode, Json<ScanResponse>), ApiError> {
    let ack = state
        .service()
        .request_capture(&session_id, &point_id, body)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ScanResponse {
            success: true,
            status: ack.status,
            started: ack.started,
        }),
    ))
}

// ── Results ─────────────────────────────────────────────────────────

async fn get_results(
    State(state): State<AppState>,
    Path((session_id, point_id)): Path<(String, String)>,
) -> Result<Json<ResultsRecord>, ApiError> {
    Ok(Json(state.service().results(&session_id, &point_id).await?))
}

async fn recompute_results(
    State(state): State<AppState>,
    Path((session_id, point_id)): Path<(String, String)>,
) -> Result<Json<ResultsRecord>, ApiError> {
    let record = state
        .service()
        .recompute_results(&session_id, &point_id)
        .await?;
    tracing::info!(%session_id, %point_id, "results recomputed");
    Ok(Json(record))
}
