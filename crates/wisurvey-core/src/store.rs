//! On-disk survey store.
//!
//! ```text
//! <root>/<session_id>/metadata.json
//! <root>/<session_id>/map.png
//! <root>/<session_id>/points/<point_id>/status.json
//! <root>/<session_id>/points/<point_id>/results.json
//! <root>/<session_id>/points/<point_id>/<artifact>_<n>.txt
//! ```
//!
//! JSON records are replaced atomically (temp file, then rename). Artifacts
//! are write-once: publishing onto an existing name fails.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::artifact::{Artifact, ArtifactKind};
use crate::ids;
use crate::lifecycle::ScanState;
use crate::scoring::ResultsRecord;

const METADATA_FILE: &str = "metadata.json";
const MAP_FILE: &str = "map.png";
const POINTS_DIR: &str = "points";
const STATUS_FILE: &str = "status.json";
const RESULTS_FILE: &str = "results.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid id: {0:?}")]
    InvalidId(String),
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: malformed record: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} already exists")]
    AlreadyExists(String),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == ErrorKind::AlreadyExists {
            return StoreError::AlreadyExists(path.display().to_string());
        }
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Reject IDs that are not a single safe path component.
pub fn validate_id(id: &str) -> Result<(), StoreError> {
    if ids::is_valid_id(id) {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

// ── Records ─────────────────────────────────────────────────────────

/// `metadata.json` of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: i64,
}

/// `status.json` of a point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointStatus {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    pub status: ScanState,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// An artifact file found on disk, not yet read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEntry {
    pub kind: ArtifactKind,
    pub ordinal: u32,
    pub path: PathBuf,
}

// ── Store ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SurveyStore {
    root: PathBuf,
}

impl SurveyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        validate_id(session_id)?;
        Ok(self.root.join(session_id))
    }

    pub fn point_dir(&self, session_id: &str, point_id: &str) -> Result<PathBuf, StoreError> {
        validate_id(point_id)?;
        Ok(self.session_dir(session_id)?.join(POINTS_DIR).join(point_id))
    }

    pub fn map_path(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.session_dir(session_id)?.join(MAP_FILE))
    }

    // ── Sessions ────────────────────────────────────────────────────

    pub async fn session_exists(&self, session_id: &str) -> Result<bool, StoreError> {
        is_dir(&self.session_dir(session_id)?).await
    }

    /// Create the session folder, its metadata and optional map image.
    ///
    /// Recreating an existing session rewrites its metadata and map, like a
    /// plain `mkdir -p` followed by writes.
    pub async fn create_session(
        &self,
        meta: &SessionMeta,
        map_png: Option<&[u8]>,
    ) -> Result<(), StoreError> {
        let dir = self.session_dir(&meta.id)?;
        create_dir_all(&dir.join(POINTS_DIR)).await?;
        if let Some(bytes) = map_png {
            write_atomic(&dir.join(MAP_FILE), bytes).await?;
        }
        write_json(&dir.join(METADATA_FILE), meta).await
    }

    /// Session metadata, `None` if the session does not exist.
    ///
    /// A session folder without a readable `metadata.json` still exists; its
    /// metadata is synthesized from the folder name.
    pub async fn load_session(&self, session_id: &str) -> Result<Option<SessionMeta>, StoreError> {
        let dir = self.session_dir(session_id)?;
        if !is_dir(&dir).await? {
            return Ok(None);
        }
        let meta = match read_json::<SessionMeta>(&dir.join(METADATA_FILE)).await {
            Ok(Some(meta)) => meta,
            Ok(None) => fallback_meta(session_id),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "unreadable session metadata");
                fallback_meta(session_id)
            }
        };
        Ok(Some(meta))
    }

    /// IDs of every session folder, sorted.
    pub async fn list_sessions(&self) -> Result<Vec<String>, StoreError> {
        let mut names = subdirectories(&self.root).await?;
        names.retain(|id| ids::is_valid_id(id));
        names.sort();
        Ok(names)
    }

    /// Remove a session and everything under it. `false` if it did not exist.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, StoreError> {
        let dir = self.session_dir(session_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&dir, e)),
        }
    }

    pub async fn has_map(&self, session_id: &str) -> Result<bool, StoreError> {
        let path = self.map_path(session_id)?;
        match tokio::fs::metadata(&path).await {
            Ok(m) => Ok(m.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    // ── Points ──────────────────────────────────────────────────────

    /// Point IDs of a session, sorted. Empty if the session has none.
    pub async fn list_point_ids(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.session_dir(session_id)?.join(POINTS_DIR);
        let mut names = subdirectories(&dir).await?;
        names.retain(|id| ids::is_valid_id(id));
        names.sort();
        Ok(names)
    }

    pub async fn ensure_point_dir(&self, session_id: &str, point_id: &str) -> Result<PathBuf, StoreError> {
        let dir = self.point_dir(session_id, point_id)?;
        create_dir_all(&dir).await?;
        Ok(dir)
    }

    pub async fn load_status(
        &self,
        session_id: &str,
        point_id: &str,
    ) -> Result<Option<PointStatus>, StoreError> {
        read_json(&self.point_dir(session_id, point_id)?.join(STATUS_FILE)).await
    }

    pub async fn save_status(&self, session_id: &str, status: &PointStatus) -> Result<(), StoreError> {
        let dir = self.ensure_point_dir(session_id, &status.id).await?;
        write_json(&dir.join(STATUS_FILE), status).await
    }

    pub async fn load_results(
        &self,
        session_id: &str,
        point_id: &str,
    ) -> Result<Option<ResultsRecord>, StoreError> {
        read_json(&self.point_dir(session_id, point_id)?.join(RESULTS_FILE)).await
    }

    pub async fn save_results(
        &self,
        session_id: &str,
        point_id: &str,
        results: &ResultsRecord,
    ) -> Result<(), StoreError> {
        let dir = self.ensure_point_dir(session_id, point_id).await?;
        write_json(&dir.join(RESULTS_FILE), results).await
    }

    /// Drop a cached results record; missing is fine.
    pub async fn remove_results(&self, session_id: &str, point_id: &str) -> Result<(), StoreError> {
        let path = self.point_dir(session_id, point_id)?.join(RESULTS_FILE);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    // ── Artifacts ───────────────────────────────────────────────────

    /// Artifact files of a point, ordered by kind then ordinal.
    pub async fn list_artifacts(
        &self,
        session_id: &str,
        point_id: &str,
    ) -> Result<Vec<ArtifactEntry>, StoreError> {
        let dir = self.point_dir(session_id, point_id)?;
        let mut entries = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| StoreError::io(&dir, e))? {
            let name = entry.file_name();
            let Some((kind, ordinal)) = name.to_str().and_then(ArtifactKind::parse_file_name) else {
                continue;
            };
            entries.push(ArtifactEntry {
                kind,
                ordinal,
                path: entry.path(),
            });
        }
        entries.sort_by_key(|e| (e.kind, e.ordinal));
        Ok(entries)
    }

    /// Read every artifact of a point. Non-UTF-8 bytes are replaced.
    pub async fn load_artifacts(
        &self,
        session_id: &str,
        point_id: &str,
    ) -> Result<Vec<Artifact>, StoreError> {
        let entries = self.list_artifacts(session_id, point_id).await?;
        let mut artifacts = Vec::with_capacity(entries.len());
        for entry in entries {
            let bytes = tokio::fs::read(&entry.path)
                .await
                .map_err(|e| StoreError::io(&entry.path, e))?;
            artifacts.push(Artifact {
                kind: entry.kind,
                ordinal: entry.ordinal,
                text: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(artifacts)
    }

    /// One past the highest ordinal of `kind` already on disk (1 if none).
    pub async fn next_ordinal(
        &self,
        session_id: &str,
        point_id: &str,
        kind: ArtifactKind,
    ) -> Result<u32, StoreError> {
        let highest = self
            .list_artifacts(session_id, point_id)
            .await?
            .into_iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.ordinal)
            .max()
            .unwrap_or(0);
        Ok(highest + 1)
    }

    /// Publish a new artifact. Fails with [`StoreError::AlreadyExists`] if the
    /// name is taken; existing artifacts are never rewritten.
    pub async fn write_artifact(
        &self,
        session_id: &str,
        point_id: &str,
        kind: ArtifactKind,
        ordinal: u32,
        bytes: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let dir = self.ensure_point_dir(session_id, point_id).await?;
        let path = dir.join(kind.file_name(ordinal));
        let tmp = temp_path(&path);
        if let Err(e) = write_file(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        // hard_link refuses to replace an existing target.
        let linked = tokio::fs::hard_link(&tmp, &path).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        linked.map_err(|e| StoreError::io(&path, e))?;
        Ok(path)
    }
}

fn fallback_meta(session_id: &str) -> SessionMeta {
    SessionMeta {
        id: session_id.to_string(),
        name: format!("Session {session_id}"),
        created_at: 0,
    }
}

// ── File helpers ────────────────────────────────────────────────────

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::now_v7().as_simple()))
}

async fn create_dir_all(dir: &Path) -> Result<(), StoreError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| StoreError::io(dir, e))
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    file.write_all(bytes).await.map_err(|e| StoreError::io(path, e))?;
    file.sync_all().await.map_err(|e| StoreError::io(path, e))
}

/// Replace `path` with `bytes` so readers see either the old or the new
/// content, never a partial write.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = temp_path(path);
    if let Err(e) = write_file(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Malformed {
        path: path.display().to_string(),
        source,
    })?;
    write_atomic(path, &bytes).await
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Malformed {
            path: path.display().to_string(),
            source,
        })
}

async fn is_dir(path: &Path) -> Result<bool, StoreError> {
    match tokio::fs::metadata(path).await {
        Ok(m) => Ok(m.is_dir()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

async fn subdirectories(dir: &Path) -> Result<Vec<String>, StoreError> {
    let mut names = Vec::new();
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    while let Some(entry) = read_dir.next_entry().await.map_err(|e| StoreError::io(dir, e))? {
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Band;

    fn status(id: &str, state: ScanState) -> PointStatus {
        PointStatus {
            id: id.into(),
            name: format!("Point {id}"),
            x: 0.25,
            y: 0.75,
            status: state,
            created_at: 1_700_000_000,
            started_at: Some(1_700_000_000),
            completed_at: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn session_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SurveyStore::new(dir.path());
        let meta = SessionMeta {
            id: "ses_a".into(),
            name: "Office".into(),
            created_at: 42,
        };
        store.create_session(&meta, Some(b"\x89PNG")).await.unwrap();

        assert!(store.session_exists("ses_a").await.unwrap());
        assert_eq!(store.load_session("ses_a").await.unwrap(), Some(meta));
        assert!(store.has_map("ses_a").await.unwrap());
        assert_eq!(store.list_sessions().await.unwrap(), vec!["ses_a".to_string()]);

        assert!(store.delete_session("ses_a").await.unwrap());
        assert!(!store.delete_session("ses_a").await.unwrap());
        assert_eq!(store.load_session("ses_a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn session_without_metadata_gets_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("legacy")).unwrap();
        let store = SurveyStore::new(dir.path());
        let meta = store.load_session("legacy").await.unwrap().unwrap();
        assert_eq!(meta.id, "legacy");
        assert_eq!(meta.name, "Session legacy");
        assert!(!store.has_map("legacy").await.unwrap());
    }

    #[tokio::test]
    async fn status_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = SurveyStore::new(dir.path());
        store
            .save_status("s1", &status("p1", ScanState::Active))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("s1/points/p1/status.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["status"], "SCAN_ACTIVE");
        assert_eq!(value["x"], 0.25);
        assert!(value["completed_at"].is_null());

        let loaded = store.load_status("s1", "p1").await.unwrap().unwrap();
        assert_eq!(loaded, status("p1", ScanState::Active));
        assert_eq!(store.list_point_ids("s1").await.unwrap(), vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn legacy_status_without_optional_fields_loads() {
        let dir = tempfile::tempdir().unwrap();
        let point = dir.path().join("s1/points/p1");
        std::fs::create_dir_all(&point).unwrap();
        std::fs::write(
            point.join("status.json"),
            r#"{"id":"p1","name":"Point p1","x":0.5,"y":0.5,"status":"SCAN_DONE","started_at":1}"#,
        )
        .unwrap();

        let store = SurveyStore::new(dir.path());
        let loaded = store.load_status("s1", "p1").await.unwrap().unwrap();
        assert_eq!(loaded.status, ScanState::Done);
        assert_eq!(loaded.completed_at, None);
        assert_eq!(loaded.error, None);
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        write_atomic(&path, b"one").await.unwrap();
        write_atomic(&path, b"two").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
        let names: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn artifacts_are_write_once_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let store = SurveyStore::new(dir.path());
        let spectrum = ArtifactKind::Spectrum(Band::Ghz5);

        assert_eq!(store.next_ordinal("s1", "p1", spectrum).await.unwrap(), 1);
        store.write_artifact("s1", "p1", spectrum, 1, b"a").await.unwrap();
        store
            .write_artifact("s1", "p1", ArtifactKind::ChannelScan, 2, b"scan")
            .await
            .unwrap();
        assert_eq!(store.next_ordinal("s1", "p1", spectrum).await.unwrap(), 2);
        assert_eq!(
            store
                .next_ordinal("s1", "p1", ArtifactKind::ChannelScan)
                .await
                .unwrap(),
            3
        );

        let err = store
            .write_artifact("s1", "p1", spectrum, 1, b"b")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));

        let artifacts = store.load_artifacts("s1", "p1").await.unwrap();
        let kinds: Vec<_> = artifacts.iter().map(|a| (a.kind, a.ordinal)).collect();
        assert_eq!(kinds, vec![(ArtifactKind::ChannelScan, 2), (spectrum, 1)]);
        assert_eq!(artifacts[1].text, "a");
    }

    #[tokio::test]
    async fn results_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SurveyStore::new(dir.path());
        assert_eq!(store.load_results("s1", "p1").await.unwrap(), None);

        let record = ResultsRecord::neutral();
        store.save_results("s1", "p1", &record).await.unwrap();
        assert_eq!(store.load_results("s1", "p1").await.unwrap(), Some(record));

        store.remove_results("s1", "p1").await.unwrap();
        store.remove_results("s1", "p1").await.unwrap();
        assert_eq!(store.load_results("s1", "p1").await.unwrap(), None);
    }

    #[test]
    fn traversal_ids_are_rejected() {
        let store = SurveyStore::new("/tmp/data");
        assert!(matches!(
            store.point_dir("..", "p1"),
            Err(StoreError::InvalidId(_))
        ));
        assert!(matches!(
            store.point_dir("s1", "../../etc"),
            Err(StoreError::InvalidId(_))
        ));
    }
}
