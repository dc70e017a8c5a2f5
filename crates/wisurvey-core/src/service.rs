//! Survey service, the entry point the HTTP façade talks to.
//!
//! - **Captures**: `request_capture` claims a point, then runs the capture
//!   plan on a spawned task and returns immediately.
//! - **Reads**: `status`, `point_status`, `results` (cached or computed on
//!   first request), `recompute_results`.
//! - **Sessions**: list, create (with optional map image), describe, delete.

use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::CaptureOrchestrator;
use crate::config::CaptureConfig;
use crate::ids;
use crate::lifecycle::{Begin, InvalidTransition, LifecycleError, LifecycleTracker, ScanState};
use crate::scoring::{self, ResultsRecord};
use crate::store::{PointStatus, SessionMeta, StoreError, SurveyStore};

pub use crate::lifecycle::PointRequest;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidId(id) => ServiceError::InvalidInput(format!("invalid id {id:?}")),
            other => ServiceError::Store(other),
        }
    }
}

impl From<LifecycleError> for ServiceError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Store(e) => e.into(),
            LifecycleError::Transition(e) => ServiceError::Transition(e),
            LifecycleError::NotInFlight(p) => {
                ServiceError::Conflict(format!("no capture in flight for point {p}"))
            }
        }
    }
}

/// Reply to a capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureAck {
    pub status: ScanState,
    /// `false` when a run was already in flight and nothing new started.
    pub started: bool,
}

/// Body of a session creation request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSession {
    pub id: Option<String>,
    pub name: Option<String>,
    /// `data:image/...;base64,...` URL.
    pub map_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointSummary {
    pub id: String,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub status: ScanState,
}

impl From<PointStatus> for PointSummary {
    fn from(s: PointStatus) -> Self {
        Self {
            id: s.id,
            name: s.name,
            x: s.x,
            y: s.y,
            status: s.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionDetail {
    pub id: String,
    pub metadata: SessionMeta,
    pub points: Vec<PointSummary>,
    pub has_map: bool,
}

fn check_id(id: &str) -> Result<(), ServiceError> {
    if ids::is_valid_id(id) {
        Ok(())
    } else {
        Err(ServiceError::InvalidInput(format!("invalid id {id:?}")))
    }
}

fn check_coordinate(axis: &str, value: f64) -> Result<(), ServiceError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ServiceError::InvalidInput(format!(
            "{axis} must be within [0, 1], got {value}"
        )))
    }
}

/// Decode a `data:image/...;base64,<payload>` URL.
///
/// `Ok(None)` for values that are not image data URLs.
fn decode_map_image(value: &str) -> Result<Option<Vec<u8>>, ServiceError> {
    if !value.starts_with("data:image") {
        return Ok(None);
    }
    let (_, payload) = value
        .split_once(',')
        .ok_or_else(|| ServiceError::InvalidInput("map_image has no payload".into()))?;
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| ServiceError::InvalidInput(format!("map_image is not valid base64: {e}")))?;
    Ok(Some(bytes))
}

pub struct SurveyService {
    store: SurveyStore,
    tracker: Arc<LifecycleTracker>,
    orchestrator: CaptureOrchestrator,
}

impl SurveyService {
    pub fn new(store: SurveyStore, config: CaptureConfig) -> Self {
        let tracker = Arc::new(LifecycleTracker::new(store.clone()));
        let orchestrator = CaptureOrchestrator::new(store.clone(), Arc::new(config));
        Self {
            store,
            tracker,
            orchestrator,
        }
    }

    pub fn store(&self) -> &SurveyStore {
        &self.store
    }

    pub fn tracker(&self) -> &LifecycleTracker {
        &self.tracker
    }

    /// Reset points a previous process left `ACTIVE`. Call before serving.
    pub async fn recover_stale(&self) -> Result<usize, ServiceError> {
        Ok(self.tracker.recover_stale().await?)
    }

    // ── Captures ────────────────────────────────────────────────────

    /// Start a capture for the point unless one is already in flight.
    ///
    /// Returns as soon as the point is `ACTIVE`; the capture itself runs on
    /// a spawned task and ends in `DONE` or `INACTIVE` with an error.
    pub async fn request_capture(
        &self,
        session_id: &str,
        point_id: &str,
        request: PointRequest,
    ) -> Result<CaptureAck, ServiceError> {
        check_id(session_id)?;
        check_id(point_id)?;
        check_coordinate("x", request.x)?;
        check_coordinate("y", request.y)?;
        if !self.store.session_exists(session_id).await? {
            return Err(ServiceError::NotFound(format!("session {session_id}")));
        }

        match self.tracker.begin(session_id, point_id, &request).await? {
            Begin::AlreadyActive => {
                tracing::debug!(session_id, point_id, "capture already in flight");
                Ok(CaptureAck {
                    status: ScanState::Active,
                    started: false,
                })
            }
            Begin::Started(_) => {
                // A stale record must not be served while the new run is going.
                if let Err(e) = self.store.remove_results(session_id, point_id).await {
                    let _ = self.tracker.fail(session_id, point_id, &e.to_string()).await;
                    return Err(e.into());
                }
                self.spawn_capture(session_id, point_id);
                Ok(CaptureAck {
                    status: ScanState::Active,
                    started: true,
                })
            }
        }
    }

    fn spawn_capture(&self, session_id: &str, point_id: &str) {
        let tracker = self.tracker.clone();
        let orchestrator = self.orchestrator.clone();
        let session_id = session_id.to_string();
        let point_id = point_id.to_string();

        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let outcome = match orchestrator.run(&session_id, &point_id).await {
                Ok(_) => {
                    tracing::info!(
                        %session_id,
                        %point_id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "capture complete"
                    );
                    tracker.complete(&session_id, &point_id).await
                }
                Err(e) => {
                    tracing::error!(%session_id, %point_id, error = %e, "capture failed");
                    tracker.fail(&session_id, &point_id, &e.to_string()).await
                }
            };
            if let Err(e) = outcome {
                tracing::error!(%session_id, %point_id, error = %e, "failed to record capture outcome");
            }
        });
    }

    // ── Point reads ─────────────────────────────────────────────────

    /// Current state; `INACTIVE` when the point has no record.
    pub async fn status(&self, session_id: &str, point_id: &str) -> Result<ScanState, ServiceError> {
        Ok(self
            .point_status(session_id, point_id)
            .await?
            .map_or(ScanState::Inactive, |s| s.status))
    }

    pub async fn point_status(
        &self,
        session_id: &str,
        point_id: &str,
    ) -> Result<Option<PointStatus>, ServiceError> {
        check_id(session_id)?;
        check_id(point_id)?;
        Ok(self.store.load_status(session_id, point_id).await?)
    }

    /// The cached results record, or one computed from the stored artifacts.
    ///
    /// A computed record is persisted unless a capture is still writing
    /// artifacts for the point, or one started while it was being scored.
    pub async fn results(&self, session_id: &str, point_id: &str) -> Result<ResultsRecord, ServiceError> {
        check_id(session_id)?;
        check_id(point_id)?;
        match self.store.load_results(session_id, point_id).await {
            Ok(Some(record)) => return Ok(record),
            Ok(None) => {}
            Err(e @ StoreError::Malformed { .. }) => {
                tracing::warn!(session_id, point_id, error = %e, "discarding unreadable results");
            }
            Err(e) => return Err(e.into()),
        }
        let runs_seen = self.tracker.runs_started(session_id, point_id);
        let persist = !self.tracker.is_in_flight(session_id, point_id);
        let record = self.score_point(session_id, point_id, false).await?;
        if persist {
            self.cache_lazy_results(session_id, point_id, &record, runs_seen)
                .await?;
        }
        Ok(record)
    }

    /// Write a lazily scored record, then take it back if a run was claimed
    /// after `runs_seen`. A run clears `results.json` right after claiming the
    /// point, so whichever side writes last, no stale record survives.
    async fn cache_lazy_results(
        &self,
        session_id: &str,
        point_id: &str,
        record: &ResultsRecord,
        runs_seen: u64,
    ) -> Result<(), ServiceError> {
        self.store.save_results(session_id, point_id, record).await?;
        if self.tracker.runs_started(session_id, point_id) != runs_seen {
            // Rebuilt from the artifacts on the next read.
            tracing::debug!(session_id, point_id, "capture started while scoring, dropping cached results");
            self.store.remove_results(session_id, point_id).await?;
        }
        Ok(())
    }

    /// Rescore the point from its artifacts and replace the cached record.
    pub async fn recompute_results(
        &self,
        session_id: &str,
        point_id: &str,
    ) -> Result<ResultsRecord, ServiceError> {
        check_id(session_id)?;
        check_id(point_id)?;
        if self.tracker.is_in_flight(session_id, point_id) {
            return Err(ServiceError::Conflict(format!(
                "capture in flight for point {point_id}"
            )));
        }
        self.score_point(session_id, point_id, true).await
    }

    async fn score_point(
        &self,
        session_id: &str,
        point_id: &str,
        persist: bool,
    ) -> Result<ResultsRecord, ServiceError> {
        let artifacts = self.store.load_artifacts(session_id, point_id).await?;
        if artifacts.is_empty() {
            return Err(ServiceError::NotFound(format!("results for point {point_id}")));
        }
        let marker = &self.orchestrator.config().sample_marker;
        let record = scoring::score_artifacts(&artifacts, marker);
        if persist {
            self.store.save_results(session_id, point_id, &record).await?;
        }
        tracing::debug!(session_id, point_id, artifacts = artifacts.len(), persist, "scored point");
        Ok(record)
    }

    // ── Sessions ────────────────────────────────────────────────────

    pub async fn list_sessions(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self.store.list_sessions().await?)
    }

    pub async fn create_session(&self, new: NewSession) -> Result<SessionMeta, ServiceError> {
        let id = match new.id.filter(|id| !id.is_empty()) {
            Some(id) => {
                check_id(&id)?;
                id
            }
            None => ids::session_id(),
        };
        let map = match new.map_image.as_deref() {
            Some(value) => decode_map_image(value)?,
            None => None,
        };
        let meta = SessionMeta {
            name: new
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("Session {id}")),
            id,
            created_at: chrono::Utc::now().timestamp(),
        };
        self.store.create_session(&meta, map.as_deref()).await?;
        tracing::info!(session_id = %meta.id, has_map = map.is_some(), "session created");
        Ok(meta)
    }

    pub async fn session(&self, session_id: &str) -> Result<SessionDetail, ServiceError> {
        check_id(session_id)?;
        let metadata = self
            .store
            .load_session(session_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("session {session_id}")))?;

        let mut points = Vec::new();
        for point_id in self.store.list_point_ids(session_id).await? {
            match self.store.load_status(session_id, &point_id).await {
                Ok(Some(status)) => points.push(PointSummary::from(status)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(session_id, %point_id, error = %e, "skipping unreadable point");
                }
            }
        }

        Ok(SessionDetail {
            id: session_id.to_string(),
            metadata,
            points,
            has_map: self.store.has_map(session_id).await?,
        })
    }

    /// Delete a session with all its points. Refused while a capture runs.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), ServiceError> {
        check_id(session_id)?;
        if self.tracker.session_busy(session_id) {
            return Err(ServiceError::Conflict(format!(
                "session {session_id} has a capture in flight"
            )));
        }
        if !self.store.delete_session(session_id).await? {
            return Err(ServiceError::NotFound(format!("session {session_id}")));
        }
        tracing::info!(session_id, "session deleted");
        Ok(())
    }

    /// Path of the session's map image, if it has one.
    pub async fn map_path(&self, session_id: &str) -> Result<PathBuf, ServiceError> {
        check_id(session_id)?;
        if !self.store.has_map(session_id).await? {
            return Err(ServiceError::NotFound(format!("map for session {session_id}")));
        }
        Ok(self.store.map_path(session_id)?)
    }
}
