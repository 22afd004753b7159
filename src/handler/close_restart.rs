//! Keyword-driven handler for the end of a pipeline
//!
//! No model call: the user either starts another cycle or closes the session.

use super::{Handler, HandlerError, HandlerSession, Reply, Signal};
use async_trait::async_trait;

const RESTART_KEYWORDS: &[&str] = &["restart", "start over", "new", "begin"];
const CLOSE_KEYWORDS: &[&str] = &["close", "exit", "quit", "done"];

pub struct CloseRestartHandler {
    name: String,
    /// Name of the step a restart returns to, for the acknowledgment
    start_label: String,
}

impl CloseRestartHandler {
    pub fn new(name: impl Into<String>, start_label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_label: start_label.into(),
        }
    }
}

#[async_trait]
impl Handler for CloseRestartHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open_session(&self) -> Result<Box<dyn HandlerSession>, HandlerError> {
        Ok(Box::new(CloseRestartSession {
            id: uuid::Uuid::new_v4().to_string(),
            start_label: self.start_label.clone(),
        }))
    }
}

struct CloseRestartSession {
    id: String,
    start_label: String,
}

impl CloseRestartSession {
    fn respond(&self, message: &str) -> Reply {
        let lower = message.trim().to_lowercase();
        let mentions = |keywords: &[&str]| keywords.iter().any(|k| contains_word(&lower, k));

        if mentions(RESTART_KEYWORDS) {
            Reply::text(format!(
                "Starting a new cycle. Returning to {}.\n\nDescribe the data you need and we'll begin again.",
                self.start_label
            ))
            .with_signal(Signal::ReturnToStart)
        } else if mentions(CLOSE_KEYWORDS) {
            Reply::text("Session closed. Thanks for using the data generation pipeline.")
        } else {
            Reply::text(
                "Data generation is complete. What next?\n\
                 - Type 'restart' or 'start over' to begin a new generation cycle\n\
                 - Type 'close' or 'exit' to end the session",
            )
        }
    }
}

/// Whole-word (or whole-phrase) containment
fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before = haystack.get(..start).and_then(|s| s.chars().next_back());
        let after = haystack.get(end..).and_then(|s| s.chars().next());
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

#[async_trait]
impl HandlerSession for CloseRestartSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&mut self, prompt: &str) -> Result<Reply, HandlerError> {
        // Only the newest user line matters; earlier context is history
        let message = prompt
            .rsplit_once("User: ")
            .map_or(prompt, |(_, last)| last);
        Ok(self.respond(message))
    }

    async fn hand_off(&mut self, _context: &str) -> Result<(), HandlerError> {
        Ok(())
    }
}
