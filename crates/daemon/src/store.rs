//! Metadata-store collaborator contract.
//!
//! The registry uses exactly two operations of the external store: read the
//! last known spawn configuration for a session id, and record a status
//! transition whenever a process is spawned, exits, or is killed. No other
//! persistent state is touched by this crate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{SessionId, SpawnConfig};

/// Errors raised by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store document could not be parsed or written.
    #[error("store document error: {0}")]
    Document(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Document(err.to_string())
    }
}

/// External status of a session as recorded in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    /// A live process exists.
    Running {
        /// Pid of the live process.
        pid: u32,
    },
    /// The process exited or was killed.
    Stopped,
}

/// The two store operations this daemon performs.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Reads the last known spawn configuration for a session id.
    async fn load_config(&self, id: &SessionId) -> Result<Option<SpawnConfig>, StoreError>;

    /// Records a status transition for a session id.
    async fn set_status(&self, id: &SessionId, status: SessionStatus) -> Result<(), StoreError>;
}

/// In-memory store, used in tests and as a collaborator stand-in.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<SessionId, MemoryEntry>>,
}

#[derive(Default, Clone)]
struct MemoryEntry {
    config: Option<SpawnConfig>,
    status: Option<SessionStatus>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the stored configuration for a session id.
    pub fn insert_config(&self, id: impl Into<SessionId>, config: SpawnConfig) {
        let mut inner = self.inner.lock().expect("store lock");
        inner.entry(id.into()).or_default().config = Some(config);
    }

    /// Returns the last recorded status for a session id.
    pub fn status(&self, id: &str) -> Option<SessionStatus> {
        let inner = self.inner.lock().expect("store lock");
        inner.get(id).and_then(|e| e.status.clone())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load_config(&self, id: &SessionId) -> Result<Option<SpawnConfig>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner.get(id).and_then(|e| e.config.clone()))
    }

    async fn set_status(&self, id: &SessionId, status: SessionStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        inner.entry(id.clone()).or_default().status = Some(status);
        Ok(())
    }
}

/// One session's entry in the JSON store document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoreEntry {
    config: Option<SpawnConfig>,
    status: Option<SessionStatus>,
}

/// File-backed store keeping one JSON document of session metadata.
///
/// The document is re-read on every operation so external collaborators
/// (the management API) can update configurations between attaches.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Creates a store over the given document path. The parent directory is
    /// created eagerly; the document itself appears on first write.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    fn read_document(path: &Path) -> Result<HashMap<SessionId, StoreEntry>, StoreError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_document(
        path: &Path,
        document: &HashMap<SessionId, StoreEntry>,
    ) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(document)?;
        // Write-then-rename so a crash never leaves a torn document.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn load_config(&self, id: &SessionId) -> Result<Option<SpawnConfig>, StoreError> {
        let path = self.path.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || {
            let document = Self::read_document(&path)?;
            Ok(document.get(&id).and_then(|e| e.config.clone()))
        })
        .await
        .map_err(|e| StoreError::Document(e.to_string()))?
    }

    async fn set_status(&self, id: &SessionId, status: SessionStatus) -> Result<(), StoreError> {
        let path = self.path.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || {
            let mut document = Self::read_document(&path)?;
            document.entry(id).or_default().status = Some(status);
            Self::write_document(&path, &document)
        })
        .await
        .map_err(|e| StoreError::Document(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> SpawnConfig {
        SpawnConfig {
            command: "claude".to_string(),
            cols: 80,
            rows: 24,
            resume: Some("tok-9".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let id = "s1".to_string();

        assert!(store.load_config(&id).await.unwrap().is_none());

        store.insert_config("s1", sample_config());
        assert_eq!(store.load_config(&id).await.unwrap(), Some(sample_config()));

        store
            .set_status(&id, SessionStatus::Running { pid: 42 })
            .await
            .unwrap();
        assert_eq!(store.status("s1"), Some(SessionStatus::Running { pid: 42 }));
    }

    #[tokio::test]
    async fn test_json_file_store_missing_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("sessions.json")).unwrap();
        assert!(store
            .load_config(&"absent".to_string())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_json_file_store_status_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let id = "s1".to_string();

        let store = JsonFileStore::new(&path).unwrap();
        store
            .set_status(&id, SessionStatus::Running { pid: 7 })
            .await
            .unwrap();
        store.set_status(&id, SessionStatus::Stopped).await.unwrap();

        // A fresh handle sees the last transition.
        let reopened = JsonFileStore::new(&path).unwrap();
        let document = JsonFileStore::read_document(&path).unwrap();
        assert_eq!(document["s1"].status, Some(SessionStatus::Stopped));
        drop(reopened);
    }

    #[tokio::test]
    async fn test_json_file_store_reads_externally_written_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        // Simulate the management API writing a config between attaches.
        let contents = r#"{"s1":{"config":{"command":"claude","cols":100,"rows":30}}}"#;
        std::fs::write(&path, contents).unwrap();

        let store = JsonFileStore::new(&path).unwrap();
        let config = store.load_config(&"s1".to_string()).await.unwrap().unwrap();
        assert_eq!(config.command, "claude");
        assert_eq!((config.cols, config.rows), (100, 30));
    }
}
