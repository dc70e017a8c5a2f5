//! Point lifecycle: `INACTIVE → ACTIVE → DONE`, with `ACTIVE → INACTIVE` on
//! failure and `DONE → ACTIVE` for a re-survey.
//!
//! The persisted `status.json` is the durable record. Exclusion between runs
//! is held in memory: a point is in flight while its `(session, point)` pair
//! sits in the tracker's set, and only the caller that inserted it may
//! complete or fail the run.

use std::fmt;

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{PointStatus, StoreError, SurveyStore};

/// Error text attached to points found `ACTIVE` with no run behind them.
pub const INTERRUPTED_ERROR: &str = "capture interrupted: service restarted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanState {
    #[serde(rename = "SCAN_INACTIVE")]
    Inactive,
    #[serde(rename = "SCAN_ACTIVE")]
    Active,
    #[serde(rename = "SCAN_DONE")]
    Done,
}

impl ScanState {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanState::Inactive => "SCAN_INACTIVE",
            ScanState::Active => "SCAN_ACTIVE",
            ScanState::Done => "SCAN_DONE",
        }
    }

    pub fn can_transition_to(self, next: ScanState) -> bool {
        matches!(
            (self, next),
            (ScanState::Inactive, ScanState::Active)
                | (ScanState::Done, ScanState::Active)
                | (ScanState::Active, ScanState::Done)
                | (ScanState::Active, ScanState::Inactive)
        )
    }

    pub fn transition(self, next: ScanState) -> Result<ScanState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid point transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ScanState,
    pub to: ScanState,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
    #[error("no capture in flight for point {0}")]
    NotInFlight(String),
}

/// Operator-supplied attributes of a point.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PointRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub x: f64,
    pub y: f64,
}

/// Outcome of [`LifecycleTracker::begin`].
#[derive(Debug, Clone, PartialEq)]
pub enum Begin {
    /// The point moved to `ACTIVE`; the caller owns the run.
    Started(PointStatus),
    /// A run is already in flight; nothing changed.
    AlreadyActive,
}

type PointRef = (String, String);

fn point_ref(session_id: &str, point_id: &str) -> PointRef {
    (session_id.to_string(), point_id.to_string())
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Owns point state transitions and the in-flight set.
#[derive(Debug)]
pub struct LifecycleTracker {
    store: SurveyStore,
    in_flight: DashSet<PointRef>,
    runs_started: DashMap<PointRef, u64>,
}

impl LifecycleTracker {
    pub fn new(store: SurveyStore) -> Self {
        Self {
            store,
            in_flight: DashSet::new(),
            runs_started: DashMap::new(),
        }
    }

    pub fn store(&self) -> &SurveyStore {
        &self.store
    }

    pub fn is_in_flight(&self, session_id: &str, point_id: &str) -> bool {
        self.in_flight.contains(&point_ref(session_id, point_id))
    }

    /// Whether any point of the session has a run in flight.
    pub fn session_busy(&self, session_id: &str) -> bool {
        self.in_flight.iter().any(|entry| entry.key().0 == session_id)
    }

    /// Runs claimed for the point since this tracker was created.
    pub fn runs_started(&self, session_id: &str, point_id: &str) -> u64 {
        self.runs_started
            .get(&point_ref(session_id, point_id))
            .map_or(0, |n| *n)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Claim the point and persist it as `ACTIVE`.
    ///
    /// The claim is an atomic set insert, so two concurrent callers can never
    /// both get [`Begin::Started`].
    pub async fn begin(
        &self,
        session_id: &str,
        point_id: &str,
        request: &PointRequest,
    ) -> Result<Begin, LifecycleError> {
        let key = point_ref(session_id, point_id);
        if !self.in_flight.insert(key.clone()) {
            return Ok(Begin::AlreadyActive);
        }
        *self.runs_started.entry(key.clone()).or_insert(0) += 1;

        match self.persist_begin(session_id, point_id, request).await {
            Ok(status) => Ok(Begin::Started(status)),
            Err(e) => {
                self.in_flight.remove(&key);
                Err(e)
            }
        }
    }

    async fn persist_begin(
        &self,
        session_id: &str,
        point_id: &str,
        request: &PointRequest,
    ) -> Result<PointStatus, LifecycleError> {
        let previous = self.store.load_status(session_id, point_id).await?;
        let mut from = previous.as_ref().map_or(ScanState::Inactive, |s| s.status);
        if from == ScanState::Active {
            // Left behind by a run that no longer exists.
            tracing::warn!(session_id, point_id, "resetting stale ACTIVE status");
            from = ScanState::Inactive;
        }
        let status = from.transition(ScanState::Active)?;

        let started = now();
        let record = PointStatus {
            id: point_id.to_string(),
            name: request
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("Point {point_id}")),
            x: request.x,
            y: request.y,
            status,
            created_at: previous.as_ref().map_or(started, |s| s.created_at),
            started_at: Some(started),
            completed_at: None,
            error: None,
        };
        self.store.save_status(session_id, &record).await?;
        tracing::info!(session_id, point_id, from = %from, "point capture started");
        Ok(record)
    }

    /// `ACTIVE → DONE`. Releases the point.
    pub async fn complete(
        &self,
        session_id: &str,
        point_id: &str,
    ) -> Result<PointStatus, LifecycleError> {
        self.finish(session_id, point_id, ScanState::Done, None).await
    }

    /// `ACTIVE → INACTIVE` with `error` attached. Releases the point.
    pub async fn fail(
        &self,
        session_id: &str,
        point_id: &str,
        error: &str,
    ) -> Result<PointStatus, LifecycleError> {
        self.finish(session_id, point_id, ScanState::Inactive, Some(error))
            .await
    }

    async fn finish(
        &self,
        session_id: &str,
        point_id: &str,
        to: ScanState,
        error: Option<&str>,
    ) -> Result<PointStatus, LifecycleError> {
        let key = point_ref(session_id, point_id);
        if !self.in_flight.contains(&key) {
            return Err(LifecycleError::NotInFlight(point_id.to_string()));
        }
        let result = self.persist_finish(session_id, point_id, to, error).await;
        self.in_flight.remove(&key);
        result
    }

    async fn persist_finish(
        &self,
        session_id: &str,
        point_id: &str,
        to: ScanState,
        error: Option<&str>,
    ) -> Result<PointStatus, LifecycleError> {
        let mut record = self
            .store
            .load_status(session_id, point_id)
            .await?
            .ok_or_else(|| LifecycleError::NotInFlight(point_id.to_string()))?;
        record.status = record.status.transition(to)?;
        match to {
            ScanState::Done => {
                record.completed_at = Some(now());
                record.error = None;
            }
            _ => record.error = error.map(str::to_string),
        }
        self.store.save_status(session_id, &record).await?;
        Ok(record)
    }

    /// Reset points persisted as `ACTIVE` that have no run in this process.
    ///
    /// Run once at startup. Returns how many points were reset.
    pub async fn recover_stale(&self) -> Result<usize, StoreError> {
        let mut reset = 0;
        for session_id in self.store.list_sessions().await? {
            for point_id in self.store.list_point_ids(&session_id).await? {
                if self.is_in_flight(&session_id, &point_id) {
                    continue;
                }
                let mut record = match self.store.load_status(&session_id, &point_id).await {
                    Ok(Some(record)) if record.status == ScanState::Active => record,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(%session_id, %point_id, error = %e, "skipping unreadable status");
                        continue;
                    }
                };
                record.status = ScanState::Inactive;
                record.error = Some(INTERRUPTED_ERROR.to_string());
                self.store.save_status(&session_id, &record).await?;
                tracing::warn!(%session_id, %point_id, "reset interrupted capture");
                reset += 1;
            }
        }
        Ok(reset)
    }
}
