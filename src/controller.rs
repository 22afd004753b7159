//! Per-turn control loop
//!
//! The controller owns everything mutable about one conversation: the state
//! store, the history window and the live handler session. A turn runs:
//!
//! 1. restart phrases short-circuit everything
//! 2. the current state's handler is invoked with the history-prefixed prompt
//! 3. the turn is recorded (also when the handler failed)
//! 4. the router picks a transition; on a transition the session is replaced
//!    and recent history is handed to the new handler
//!
//! A handler failure yields a degraded reply and leaves state and data alone.

mod phrases;

pub use phrases::{is_restart_command, PhraseMatcher, DEFAULT_APPROVAL_PHRASES, RESTART_PHRASES};

use crate::config::ConfigError;
use crate::handler::{HandlerError, HandlerErrorKind, HandlerRegistry, HandlerSession, Reply, Signal};
use crate::history::{ConversationHistory, ConversationTurn, DEFAULT_HISTORY_LIMIT};
use crate::router::{RoutingDecision, TransitionRouter};
use crate::state_machine::{
    StateData, StateGraph, WorkflowState, AGENT_COMPLETED, ITERATION_COUNT, USER_APPROVED,
};
use crate::store::StateStore;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Turns replayed into a newly activated handler
pub const DEFAULT_HANDOFF_TURNS: usize = 3;

pub const EMPTY_RESPONSE_FALLBACK: &str =
    "I'm sorry, I couldn't generate a response. Please try again.";

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub history_limit: usize,
    /// Bound on each handler call (invoke and hand-off)
    pub call_timeout: Option<Duration>,
    /// Regexes that count as the user approving the current step
    pub approval_phrases: Vec<String>,
    pub handoff_turns: usize,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            call_timeout: None,
            approval_phrases: DEFAULT_APPROVAL_PHRASES
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            handoff_turns: DEFAULT_HANDOFF_TURNS,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("{from} cannot transition to {to}")]
    NotAllowed {
        from: &'static str,
        to: &'static str,
    },
}

struct LiveSession<S> {
    state: S,
    session: Box<dyn HandlerSession>,
}

pub struct ConversationController<S: WorkflowState> {
    store: StateStore<S>,
    graph: StateGraph<S>,
    history: ConversationHistory,
    router: TransitionRouter,
    handlers: HandlerRegistry<S>,
    live: Option<LiveSession<S>>,
    approval: PhraseMatcher,
    options: ControllerOptions,
}

impl<S: WorkflowState> ConversationController<S> {
    pub fn new(
        store: StateStore<S>,
        graph: StateGraph<S>,
        router: TransitionRouter,
        handlers: HandlerRegistry<S>,
        options: ControllerOptions,
    ) -> Result<Self, ConfigError> {
        if store.initial() != graph.initial() {
            return Err(ConfigError::InitialStateMismatch {
                store: store.initial().name(),
                graph: graph.initial().name(),
            });
        }
        let approval = PhraseMatcher::new(&options.approval_phrases)?;

        Ok(Self {
            store,
            graph,
            history: ConversationHistory::new(options.history_limit),
            router,
            handlers,
            live: None,
            approval,
            options,
        })
    }

    pub fn current_state(&self) -> S {
        self.store.current()
    }

    pub fn state_data(&self) -> &StateData {
        self.store.data()
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn graph(&self) -> &StateGraph<S> {
        &self.graph
    }

    pub fn has_live_session(&self) -> bool {
        self.live.is_some()
    }

    /// Run one user turn and return the reply to show
    pub async fn process_turn(&mut self, message: &str) -> String {
        if is_restart_command(message) {
            return self.restart().await;
        }

        let start = Instant::now();
        let state = self.store.current();
        let handler_name = self.handlers.handler(state).name().to_string();
        let prompt = self.history.build_context(message);

        let rule = self.graph.rule(state);
        let approved = rule.depends_on(USER_APPROVED) && self.approval.is_match(message);
        let counts_iterations = rule.depends_on(ITERATION_COUNT);

        let reply = match self.dispatch(state, &prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(
                    state = state.name(),
                    handler = %handler_name,
                    error = %e,
                    "Handler failed"
                );
                let response = degraded_response(&e);
                self.history.append(ConversationTurn::new(
                    message,
                    response.as_str(),
                    handler_name,
                    state.name(),
                ));
                return response;
            }
        };

        let Reply { text, signals } = reply;
        let response = if text.trim().is_empty() {
            EMPTY_RESPONSE_FALLBACK.to_string()
        } else {
            text
        };

        let mut data = self.store.data().clone();
        let mut dirty = false;
        let mut return_to_start = false;

        if approved && !data.flag(USER_APPROVED) {
            tracing::info!(state = state.name(), "User approval detected");
            data.set_flag(USER_APPROVED, true);
            dirty = true;
        }
        for signal in signals {
            tracing::debug!(state = state.name(), signal = ?signal, "Handler signal");
            match signal {
                Signal::AgentCompleted => data.set_flag(AGENT_COMPLETED, true),
                Signal::UserApproved => data.set_flag(USER_APPROVED, true),
                Signal::Set { key, value } => data.set(key, value),
                Signal::ReturnToStart => return_to_start = true,
            }
            dirty = true;
        }
        if counts_iterations {
            let count = data.increment(ITERATION_COUNT);
            tracing::debug!(state = state.name(), iteration = count, "Iteration recorded");
            dirty = true;
        }

        self.history.append(ConversationTurn::new(
            message,
            response.as_str(),
            handler_name.as_str(),
            state.name(),
        ));

        if return_to_start {
            tracing::info!(
                from = state.name(),
                to = self.store.initial().name(),
                "Returning to start"
            );
            self.invalidate_session().await;
            if let Err(e) = self.store.reset() {
                tracing::error!(error = %e, "Failed to persist reset state");
            }
        } else {
            let decision = self
                .router
                .decide(&self.graph, state, &data, message, &prompt)
                .await;
            match decision {
                RoutingDecision::Transition(target) => self.transition(state, target, data).await,
                RoutingDecision::Stay if dirty => self.commit(state, data),
                RoutingDecision::Stay => {}
            }
        }

        tracing::info!(
            state = state.name(),
            handler = %handler_name,
            next_state = self.store.current().name(),
            duration_ms = %start.elapsed().as_millis(),
            "Turn processed"
        );
        response
    }

    /// Wipe state, data and history; back to the initial state
    pub async fn restart(&mut self) -> String {
        tracing::info!(from = self.store.current().name(), "Restart requested");
        self.invalidate_session().await;
        self.store.force_fresh_start();
        self.history.clear();

        let initial = self.store.initial();
        format!(
            "System reset complete.\n\nReturned to {}: {}.\n\nAll previous state has been cleared.",
            initial.name(),
            initial.description()
        )
    }

    /// Admin move to a legal target without asking the classifier
    pub async fn force_transition(&mut self, target: S) -> Result<(), TransitionError> {
        let current = self.store.current();
        if !self.graph.can_transition(current, target) {
            return Err(TransitionError::NotAllowed {
                from: current.name(),
                to: target.name(),
            });
        }

        tracing::info!(from = current.name(), to = target.name(), "Forced transition");
        self.invalidate_session().await;
        let data = self.carry_over(current, target, self.store.data().clone());
        self.commit(target, data);
        Ok(())
    }

    pub fn status(&self) -> StatusReport {
        let state = self.store.current();
        StatusReport {
            state: state.name(),
            number: state.ordinal() + 1,
            description: state.description(),
            completion_criteria: state.completion_criteria(),
            complete: self.graph.is_complete(state, self.store.data()),
            next_states: self
                .graph
                .legal_targets(state)
                .iter()
                .map(|s| s.name())
                .collect(),
            state_data: self.store.data().clone(),
            history_len: self.history.len(),
            session_id: self.live.as_ref().map(|live| live.session.id().to_string()),
            snapshot: self.store.location(),
        }
    }

    /// `status()` as CLI text
    pub fn render_status(&self) -> String {
        self.status().to_string()
    }

    /// Close the live session, if any
    pub async fn shutdown(&mut self) {
        self.invalidate_session().await;
    }

    async fn transition(&mut self, from: S, to: S, data: StateData) {
        tracing::info!(from = from.name(), to = to.name(), "State transition");
        self.invalidate_session().await;
        let data = self.carry_over(from, to, data);
        self.commit(to, data);

        if let Err(e) = self.ensure_session(to).await {
            tracing::warn!(state = to.name(), error = %e, "Could not open session after transition");
            return;
        }
        let Some(context) = self
            .history
            .handoff_context(to.name(), self.options.handoff_turns)
        else {
            return;
        };
        let timeout = self.options.call_timeout;
        let Some(live) = self.live.as_mut() else {
            return;
        };
        let session_id = live.session.id().to_string();
        match run_scoped(live.session.as_mut(), ScopedCall::HandOff(&context), timeout).await {
            Ok(_) => tracing::debug!(
                state = to.name(),
                session_id = %session_id,
                chars = context.len(),
                "Handed off context"
            ),
            Err(e) => tracing::warn!(
                state = to.name(),
                session_id = %session_id,
                error = %e,
                "Context handoff failed"
            ),
        }
    }

    /// Completion flags never carry into a new state. Entering a different
    /// state also drops the iteration count and every key its completion rule
    /// reads, so an earlier visit cannot leave it already complete.
    fn carry_over(&self, from: S, to: S, mut data: StateData) -> StateData {
        data.clear_completion_flags();
        if from != to {
            data.remove(ITERATION_COUNT);
            for key in self.graph.rule(to).keys() {
                data.remove(key);
            }
        }
        data
    }

    fn commit(&mut self, state: S, data: StateData) {
        if let Err(e) = self.store.save(state, data) {
            tracing::error!(
                state = state.name(),
                location = %self.store.location(),
                error = %e,
                "Failed to save state; continuing with in-memory copy"
            );
        }
    }

    async fn dispatch(&mut self, state: S, prompt: &str) -> Result<Reply, HandlerError> {
        self.ensure_session(state).await?;
        let timeout = self.options.call_timeout;
        let live = self
            .live
            .as_mut()
            .ok_or_else(|| HandlerError::session_unavailable("no live session"))?;

        let result = run_scoped(live.session.as_mut(), ScopedCall::Invoke(prompt), timeout)
            .await
            .and_then(|reply| {
                reply.ok_or_else(|| HandlerError::backend("handler returned no reply"))
            });

        // An abandoned call may leave the session mid-exchange
        if matches!(&result, Err(e) if e.kind == HandlerErrorKind::Timeout) {
            self.invalidate_session().await;
        }
        result
    }

    async fn ensure_session(&mut self, state: S) -> Result<(), HandlerError> {
        if self.live.as_ref().is_some_and(|live| live.state == state) {
            return Ok(());
        }
        self.invalidate_session().await;

        let handler = self.handlers.handler(state);
        let session = handler.open_session().await?;
        tracing::info!(
            state = state.name(),
            handler = %handler.name(),
            session_id = %session.id(),
            "Opened handler session"
        );
        self.live = Some(LiveSession { state, session });
        Ok(())
    }

    async fn invalidate_session(&mut self) {
        if let Some(mut live) = self.live.take() {
            tracing::debug!(
                state = live.state.name(),
                session_id = %live.session.id(),
                "Closing handler session"
            );
            live.session.close().await;
        }
    }
}

enum ScopedCall<'a> {
    Invoke(&'a str),
    HandOff(&'a str),
}

/// Run one call between `acquire` and `release`. `release` runs whether the
/// call succeeds, fails or times out.
async fn run_scoped(
    session: &mut dyn HandlerSession,
    call: ScopedCall<'_>,
    timeout: Option<Duration>,
) -> Result<Option<Reply>, HandlerError> {
    session.acquire().await?;

    let result = {
        let work = async {
            match call {
                ScopedCall::Invoke(prompt) => session.invoke(prompt).await.map(Some),
                ScopedCall::HandOff(context) => session.hand_off(context).await.map(|()| None),
            }
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .unwrap_or_else(|_| Err(HandlerError::timeout(limit))),
            None => work.await,
        }
    };

    session.release().await;
    result
}

fn degraded_response(error: &HandlerError) -> String {
    format!(
        "I encountered an error while processing your request. Error: {}\n\n\
         Please try rephrasing your request, or type 'restart' to start fresh.",
        error.message
    )
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: &'static str,
    /// 1-based position in the workflow
    pub number: usize,
    pub description: &'static str,
    pub completion_criteria: &'static str,
    pub complete: bool,
    pub next_states: Vec<&'static str>,
    pub state_data: StateData,
    pub history_len: usize,
    pub session_id: Option<String>,
    pub snapshot: String,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current State: {} (State-{})", self.state, self.number)?;
        writeln!(f, "Description: {}", self.description)?;
        writeln!(f, "Completion Criteria: {}", self.completion_criteria)?;
        writeln!(f, "Complete: {}", if self.complete { "yes" } else { "no" })?;
        if self.next_states.is_empty() {
            writeln!(f, "Next States: None")?;
        } else {
            writeln!(f, "Next States: {}", self.next_states.join(", "))?;
        }
        let data = serde_json::to_string(&self.state_data).map_err(|_| fmt::Error)?;
        writeln!(f, "State Data: {data}")?;
        writeln!(f, "History: {} turns", self.history_len)?;
        match &self.session_id {
            Some(id) => writeln!(f, "Session: {id}")?,
            None => writeln!(f, "Session: none")?,
        }
        write!(f, "Snapshot: {}", self.snapshot)
    }
}
