//! Handler port
//!
//! A handler owns the content of one workflow step. The controller only sees
//! it through [`Handler`] and the live [`HandlerSession`] it opens:
//!
//! - `open_session` is called lazily, the first time a state is used
//! - `invoke` produces the reply for one user turn
//! - `hand_off` feeds recent history to a freshly activated handler; its
//!   output is consumed and never recorded
//! - `acquire`/`release` bracket every call; `release` runs on every exit path
//! - `close` runs once when the controller drops the session

mod close_restart;
mod llm;

pub use close_restart::CloseRestartHandler;
pub use llm::{LlmHandler, DEFAULT_HANDLER_MAX_TOKENS};

use crate::config::ConfigError;
use crate::llm::LlmError;
use crate::state_machine::WorkflowState;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Data change requested by a handler alongside its reply
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// The step's work is done (`agent_completed`)
    AgentCompleted,
    /// The user approved the step's output (`user_approved`)
    UserApproved,
    /// Set an arbitrary state data key
    Set { key: String, value: Value },
    /// Go back to the workflow's initial state, keeping history
    ReturnToStart,
}

/// Handler output for one turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub text: String,
    pub signals: Vec<Signal>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            signals: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signals.push(signal);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerErrorKind {
    /// The session could not be opened or acquired
    SessionUnavailable,
    /// The backend (model, tool server) failed
    Backend,
    /// The call exceeded the turn timeout
    Timeout,
}

impl fmt::Display for HandlerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::SessionUnavailable => "session unavailable",
            Self::Backend => "backend failure",
            Self::Timeout => "timeout",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    pub kind: HandlerErrorKind,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: HandlerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn session_unavailable(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::SessionUnavailable, message)
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::Backend, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            HandlerErrorKind::Timeout,
            format!("no reply within {}s", after.as_secs_f32()),
        )
    }
}

impl From<LlmError> for HandlerError {
    fn from(e: LlmError) -> Self {
        Self::backend(e.message)
    }
}

/// A live conversation with one handler
#[async_trait]
pub trait HandlerSession: Send {
    /// Identifier for logs
    fn id(&self) -> &str;

    /// Claim per-call resources
    async fn acquire(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn invoke(&mut self, prompt: &str) -> Result<Reply, HandlerError>;

    /// Replay context into a new session; the reply is discarded
    async fn hand_off(&mut self, context: &str) -> Result<(), HandlerError> {
        self.invoke(context).await.map(|_| ())
    }

    /// Return per-call resources; must not fail
    async fn release(&mut self) {}

    /// The controller is done with this session
    async fn close(&mut self) {}
}

/// Factory for sessions of one workflow step
#[async_trait]
pub trait Handler: Send + Sync {
    /// Name shown in history and handoff context
    fn name(&self) -> &str;

    async fn open_session(&self) -> Result<Box<dyn HandlerSession>, HandlerError>;
}

#[async_trait]
impl<T: Handler + ?Sized> Handler for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn open_session(&self) -> Result<Box<dyn HandlerSession>, HandlerError> {
        (**self).open_session().await
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Total mapping from workflow state to handler
pub struct HandlerRegistry<S: WorkflowState> {
    handlers: Vec<Arc<dyn Handler>>,
    _state: std::marker::PhantomData<S>,
}

impl<S: WorkflowState> HandlerRegistry<S> {
    /// Total by construction: `factory` is called once per state
    pub fn build(mut factory: impl FnMut(S) -> Arc<dyn Handler>) -> Self {
        Self {
            handlers: S::ALL.iter().map(|state| factory(*state)).collect(),
            _state: std::marker::PhantomData,
        }
    }

    /// Build from a partial map, failing on the first state without a handler
    pub fn from_map(mut map: HashMap<S, Arc<dyn Handler>>) -> Result<Self, ConfigError> {
        let handlers = S::ALL
            .iter()
            .map(|state| {
                map.remove(state).ok_or_else(|| ConfigError::MissingHandler {
                    state: state.name().to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            handlers,
            _state: std::marker::PhantomData,
        })
    }

    pub fn handler(&self, state: S) -> &Arc<dyn Handler> {
        // `handlers` has exactly one entry per element of `S::ALL`
        &self.handlers[state.ordinal()]
    }
}
