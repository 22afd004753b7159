//! Snapshot persistence for the current state and its data
//!
//! The store keeps the authoritative copy in memory. Disk writes are best
//! effort: a failed save is logged and the in-memory value wins.

use crate::state_machine::{StateData, WorkflowState};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid snapshot: {0}")]
    Invalid(String),
}

/// On-disk layout
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    current_state: String,
    #[serde(default)]
    state_data: StateData,
}

// ============================================================================
// Backends
// ============================================================================

/// Raw byte storage for one snapshot
pub trait SnapshotBackend: Send + Sync {
    /// `Ok(None)` when no snapshot exists
    fn read(&self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the snapshot atomically
    fn write(&self, bytes: &[u8]) -> Result<(), StoreError>;

    /// Delete the snapshot; deleting a missing snapshot is not an error
    fn remove(&self) -> Result<(), StoreError>;

    /// Where the snapshot lives, for logs and status output
    fn describe(&self) -> String;
}

impl<T: SnapshotBackend + ?Sized> SnapshotBackend for Arc<T> {
    fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).read()
    }

    fn write(&self, bytes: &[u8]) -> Result<(), StoreError> {
        (**self).write(bytes)
    }

    fn remove(&self) -> Result<(), StoreError> {
        (**self).remove()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// JSON file on disk, replaced via temp file + rename
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map_or_else(|| "snapshot".into(), |n| n.to_string_lossy().into_owned());
        let temp_name = format!(".{name}.{}.tmp", uuid::Uuid::new_v4());
        self.path.with_file_name(temp_name)
    }
}

impl SnapshotBackend for FileBackend {
    fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<(), StoreError> {
        use std::io::Write;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let temp = self.temp_path();
        let result = (|| {
            let mut file = std::fs::File::create(&temp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            std::fs::rename(&temp, &self.path)
        })();

        if let Err(e) = result {
            let _ = std::fs::remove_file(&temp);
            return Err(self.io_error(e));
        }
        Ok(())
    }

    fn remove(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Process-local backend for ephemeral sessions and tests
#[derive(Debug, Default)]
pub struct MemoryBackend {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing snapshot
    pub fn with_contents(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes.into())),
        }
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SnapshotBackend for MemoryBackend {
    fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.contents())
    }

    fn write(&self, bytes: &[u8]) -> Result<(), StoreError> {
        *self.bytes.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes.to_vec());
        Ok(())
    }

    fn remove(&self) -> Result<(), StoreError> {
        *self.bytes.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}

// ============================================================================
// State Store
// ============================================================================

/// Current state plus session data, mirrored to a snapshot backend
pub struct StateStore<S: WorkflowState> {
    backend: Box<dyn SnapshotBackend>,
    initial: S,
    current: S,
    data: StateData,
}

impl<S: WorkflowState> StateStore<S> {
    /// Store at the initial state without touching the backend
    pub fn new(backend: impl SnapshotBackend + 'static, initial: S) -> Self {
        Self {
            backend: Box::new(backend),
            initial,
            current: initial,
            data: StateData::new(),
        }
    }

    /// Open a store, either discarding any prior snapshot (`fresh`) or
    /// resuming from it
    pub fn open(backend: impl SnapshotBackend + 'static, initial: S, fresh: bool) -> Self {
        let mut store = Self::new(backend, initial);
        if fresh {
            store.force_fresh_start();
        } else {
            store.load();
        }
        store
    }

    /// Restore from the backend. Any read, parse or validation failure falls
    /// back to the initial state with empty data.
    pub fn load(&mut self) -> (S, &StateData) {
        let (state, data) = match self.read_snapshot() {
            Ok(Some(pair)) => pair,
            Ok(None) => (self.initial, StateData::new()),
            Err(e) => {
                tracing::warn!(
                    location = %self.backend.describe(),
                    error = %e,
                    "Discarding unreadable state snapshot"
                );
                (self.initial, StateData::new())
            }
        };

        tracing::debug!(state = state.name(), "Loaded state");
        self.current = state;
        self.data = data;
        (self.current, &self.data)
    }

    fn read_snapshot(&self) -> Result<Option<(S, StateData)>, StoreError> {
        let Some(bytes) = self.backend.read()? else {
            return Ok(None);
        };
        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Invalid(e.to_string()))?;
        let state = S::from_name(&snapshot.current_state).ok_or_else(|| {
            StoreError::Invalid(format!("unknown state {:?}", snapshot.current_state))
        })?;
        Ok(Some((state, snapshot.state_data)))
    }

    /// Record `(state, data)` and persist it. The in-memory copy is updated
    /// even when the write fails.
    pub fn save(&mut self, state: S, data: StateData) -> Result<(), StoreError> {
        self.current = state;
        self.data = data;
        self.persist()
    }

    fn persist(&self) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            current_state: self.current.name().to_string(),
            state_data: self.data.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        self.backend.write(&bytes)
    }

    /// Delete the snapshot and return to the initial state. Idempotent.
    pub fn clear(&mut self) {
        if let Err(e) = self.backend.remove() {
            tracing::error!(
                location = %self.backend.describe(),
                error = %e,
                "Failed to delete state snapshot"
            );
        }
        self.current = self.initial;
        self.data = StateData::new();
    }

    /// `clear`, then persist the fresh initial snapshot
    pub fn force_fresh_start(&mut self) {
        self.clear();
        if let Err(e) = self.persist() {
            tracing::error!(error = %e, "Failed to persist fresh state");
        }
        tracing::info!(state = self.initial.name(), "Started fresh");
    }

    /// Back to the initial state with empty data, keeping the snapshot file
    pub fn reset(&mut self) -> Result<(), StoreError> {
        self.save(self.initial, StateData::new())
    }

    pub fn current(&self) -> S {
        self.current
    }

    pub fn data(&self) -> &StateData {
        &self.data
    }

    pub fn initial(&self) -> S {
        self.initial
    }

    pub fn location(&self) -> String {
        self.backend.describe()
    }
}
