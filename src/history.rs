//! Bounded conversation history
//!
//! Turns survive state transitions. The window is rendered into the prompt of
//! every handler call and replayed (shortened) when a new handler takes over.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;

/// Default number of turns rendered into a handler prompt
pub const DEFAULT_HISTORY_LIMIT: usize = 8;

/// One completed exchange
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub timestamp: DateTime<Utc>,
    pub user_message: String,
    pub response: String,
    pub handler_name: String,
    pub state_name: String,
}

impl ConversationTurn {
    pub fn new(
        user_message: impl Into<String>,
        response: impl Into<String>,
        handler_name: impl Into<String>,
        state_name: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user_message: user_message.into(),
            response: response.into(),
            handler_name: handler_name.into(),
            state_name: state_name.into(),
        }
    }
}

/// Ordered turn log.
///
/// `limit` turns are rendered into context; up to `2 * limit` are retained so
/// that status output can show a little more than the model sees.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
    limit: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl ConversationHistory {
    /// A zero limit is bumped to one
    pub fn new(limit: usize) -> Self {
        Self {
            turns: Vec::new(),
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn capacity(&self) -> usize {
        self.limit.saturating_mul(2)
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
        let capacity = self.capacity();
        if self.turns.len() > capacity {
            let excess = self.turns.len() - capacity;
            self.turns.drain(..excess);
        }
    }

    /// Last `min(n, len)` turns, oldest first
    pub fn recent(&self, n: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(n);
        self.turns.get(start..).unwrap_or_default()
    }

    /// Prefix `message` with the recent window. Empty history returns the
    /// message unchanged.
    pub fn build_context(&self, message: &str) -> String {
        if self.turns.is_empty() {
            return message.to_string();
        }

        let mut out = String::from("Previous conversation context:\n");
        for turn in self.recent(self.limit) {
            let _ = writeln!(out, "User: {}", turn.user_message);
            let _ = writeln!(out, "Agent({}): {}", turn.handler_name, turn.response);
        }
        out.push_str("Current message:\n");
        let _ = write!(out, "User: {message}");
        out
    }

    /// Context message for a handler that just took over `state_name`.
    /// Returns `None` when there is nothing to replay.
    pub fn handoff_context(&self, state_name: &str, n: usize) -> Option<String> {
        let turns = self.recent(n);
        if turns.is_empty() {
            return None;
        }

        let mut out = String::new();
        let _ = writeln!(
            out,
            "[SYSTEM CONTEXT] You are now handling the conversation in {state_name} state."
        );
        out.push_str("[SYSTEM CONTEXT] Here is the recent conversation context:\n\n");
        for turn in turns {
            let _ = writeln!(out, "User: {}", turn.user_message);
            let _ = writeln!(
                out,
                "Previous Agent({}): {}\n",
                turn.handler_name, turn.response
            );
        }
        out.push_str("[SYSTEM CONTEXT] Please continue the conversation based on this context.");
        Some(out)
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }
}
