//! Multi-user host
//!
//! Each user gets a private controller and a private snapshot. Turns for one
//! user are serialized by that controller's mutex; different users never share
//! mutable state.

use crate::config::ConfigError;
use crate::controller::ConversationController;
use crate::state_machine::WorkflowState;
use crate::store::{FileBackend, MemoryBackend, StateStore};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Builds a controller around a per-user store
pub type ControllerFactory<S> =
    Box<dyn Fn(StateStore<S>) -> Result<ConversationController<S>, ConfigError> + Send + Sync>;

pub struct SessionManager<S: WorkflowState> {
    initial: S,
    /// `None` keeps snapshots in memory
    state_dir: Option<PathBuf>,
    fresh_start: bool,
    factory: ControllerFactory<S>,
    sessions: RwLock<HashMap<String, Arc<Mutex<ConversationController<S>>>>>,
}

impl<S: WorkflowState> SessionManager<S> {
    pub fn new(
        initial: S,
        state_dir: Option<PathBuf>,
        fresh_start: bool,
        factory: ControllerFactory<S>,
    ) -> Self {
        Self {
            initial,
            state_dir,
            fresh_start,
            factory,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Where `user_id`'s snapshot lives, if snapshots go to disk
    pub fn snapshot_path(&self, user_id: &str) -> Option<PathBuf> {
        self.state_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", sanitize_user_id(user_id))))
    }

    /// Get or create the controller for a user
    pub async fn controller(
        &self,
        user_id: &str,
    ) -> Result<Arc<Mutex<ConversationController<S>>>, ConfigError> {
        {
            let sessions = self.sessions.read().await;
            if let Some(controller) = sessions.get(user_id) {
                return Ok(controller.clone());
            }
        }

        let mut sessions = self.sessions.write().await;
        // Another task may have created it while we waited for the write lock
        if let Some(controller) = sessions.get(user_id) {
            return Ok(controller.clone());
        }

        let store = match self.snapshot_path(user_id) {
            Some(path) => StateStore::open(FileBackend::new(path), self.initial, self.fresh_start),
            None => StateStore::open(MemoryBackend::new(), self.initial, self.fresh_start),
        };
        let controller = Arc::new(Mutex::new((self.factory)(store)?));
        sessions.insert(user_id.to_string(), controller.clone());
        tracing::info!(user_id = %user_id, "Created user session");
        Ok(controller)
    }

    pub async fn process_turn(&self, user_id: &str, message: &str) -> Result<String, ConfigError> {
        let controller = self.controller(user_id).await?;
        let mut controller = controller.lock().await;
        Ok(controller.process_turn(message).await)
    }

    /// Drop a user's controller, closing its handler session. The snapshot
    /// stays on disk. Returns whether the user had a session.
    pub async fn end_session(&self, user_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(user_id);
        match removed {
            Some(controller) => {
                controller.lock().await.shutdown().await;
                tracing::info!(user_id = %user_id, "Ended user session");
                true
            }
            None => false,
        }
    }

    pub async fn active_users(&self) -> Vec<String> {
        let mut users: Vec<_> = self.sessions.read().await.keys().cloned().collect();
        users.sort();
        users
    }
}

/// Injective mapping to a safe file stem: ASCII alphanumerics and `_` pass
/// through, every other byte becomes `-xx`
fn sanitize_user_id(user_id: &str) -> String {
    let mut out = String::with_capacity(user_id.len());
    for byte in user_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "-{byte:02x}");
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}
