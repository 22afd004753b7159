//! LLM-backed handler
//!
//! Each session keeps its own transcript. Completion signals travel in-band as
//! bracketed markers that are stripped before the reply reaches the user.

use super::{Handler, HandlerError, HandlerSession, Reply, Signal};
use crate::llm::{LlmMessage, LlmRequest, LlmService};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};

pub const DEFAULT_HANDLER_MAX_TOKENS: u32 = 4096;

/// Oldest messages beyond this are dropped, a user/assistant pair at a time
const MAX_TRANSCRIPT_MESSAGES: usize = 24;

const SIGNAL_GUIDE: &str = "\n\nSignals: when the work of this step is finished, include \
[[STEP_COMPLETE]] in your reply. When the user explicitly approves your output, include \
[[USER_APPROVED]]. To record a decision, include [[SET key=value]] (for example \
[[SET user_decision=accept]]). Signals are removed before the user sees your reply.";

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[\s*(STEP_COMPLETE|USER_APPROVED|SET\s+([A-Za-z0-9_]+)\s*=\s*([^\]]*?))\s*\]\]")
        .unwrap()
});

pub struct LlmHandler {
    name: String,
    instruction: String,
    llm: Arc<dyn LlmService>,
    max_tokens: u32,
}

impl LlmHandler {
    pub fn new(
        name: impl Into<String>,
        instruction: impl Into<String>,
        llm: Arc<dyn LlmService>,
    ) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            llm,
            max_tokens: DEFAULT_HANDLER_MAX_TOKENS,
        }
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl Handler for LlmHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open_session(&self) -> Result<Box<dyn HandlerSession>, HandlerError> {
        let session = LlmSession {
            id: uuid::Uuid::new_v4().to_string(),
            system: format!("{}{SIGNAL_GUIDE}", self.instruction),
            llm: self.llm.clone(),
            max_tokens: self.max_tokens,
            transcript: Vec::new(),
        };
        tracing::debug!(handler = %self.name, session_id = %session.id, "Opened LLM session");
        Ok(Box::new(session))
    }
}

struct LlmSession {
    id: String,
    system: String,
    llm: Arc<dyn LlmService>,
    max_tokens: u32,
    transcript: Vec<LlmMessage>,
}

impl LlmSession {
    fn trim_transcript(&mut self) {
        while self.transcript.len() > MAX_TRANSCRIPT_MESSAGES {
            let drop = 2.min(self.transcript.len());
            self.transcript.drain(..drop);
        }
    }
}

#[async_trait]
impl HandlerSession for LlmSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&mut self, prompt: &str) -> Result<Reply, HandlerError> {
        self.transcript.push(LlmMessage::user(prompt));
        let request = LlmRequest {
            system: Some(self.system.clone()),
            messages: self.transcript.clone(),
            max_tokens: Some(self.max_tokens),
        };

        match self.llm.complete(&request).await {
            Ok(response) => {
                self.transcript.push(LlmMessage::assistant(response.text.clone()));
                self.trim_transcript();
                Ok(parse_signals(&response.text))
            }
            Err(e) => {
                // The failed prompt must not linger as an unanswered user turn
                self.transcript.pop();
                Err(e.into())
            }
        }
    }
}

/// Split raw model output into user-facing text and signals
pub(crate) fn parse_signals(raw: &str) -> Reply {
    let mut signals = Vec::new();
    for caps in MARKER.captures_iter(raw) {
        let Some(body) = caps.get(1) else { continue };
        let signal = match body.as_str() {
            "STEP_COMPLETE" => Signal::AgentCompleted,
            "USER_APPROVED" => Signal::UserApproved,
            _ => {
                let (Some(key), Some(value)) = (caps.get(2), caps.get(3)) else {
                    continue;
                };
                let value = value.as_str().trim();
                Signal::Set {
                    key: key.as_str().to_string(),
                    value: serde_json::from_str(value)
                        .unwrap_or_else(|_| Value::String(value.to_string())),
                }
            }
        };
        if !signals.contains(&signal) {
            signals.push(signal);
        }
    }

    let text = MARKER.replace_all(raw, "").trim().to_string();
    Reply { text, signals }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MessageRole};
    use crate::testing::MockLlm;
    use serde_json::json;

    #[test]
    fn test_plain_text_has_no_signals() {
        let reply = parse_signals("  Here is your seed data.  ");
        assert_eq!(reply.text, "Here is your seed data.");
        assert!(reply.signals.is_empty());
    }

    #[test]
    fn test_markers_are_parsed_and_stripped() {
        let reply = parse_signals(
            "Saved seed_data.json. [[STEP_COMPLETE]]\n[[SET has_seed_data=true]] [[SET user_decision=accept]]",
        );
        assert_eq!(reply.text, "Saved seed_data.json.");
        assert_eq!(
            reply.signals,
            vec![
                Signal::AgentCompleted,
                Signal::Set {
                    key: "has_seed_data".to_string(),
                    value: json!(true)
                },
                Signal::Set {
                    key: "user_decision".to_string(),
                    value: json!("accept")
                },
            ]
        );
    }

    #[test]
    fn test_repeated_markers_collapse() {
        let reply = parse_signals("[[USER_APPROVED]] ok [[ USER_APPROVED ]]");
        assert_eq!(reply.text, "ok");
        assert_eq!(reply.signals, vec![Signal::UserApproved]);
    }

    #[tokio::test]
    async fn test_session_keeps_transcript() {
        let llm = Arc::new(MockLlm::new("mock"));
        llm.queue_text("first");
        llm.queue_text("second [[STEP_COMPLETE]]");
        let handler = LlmHandler::new("seed_creator", "Create seed data.", llm.clone());

        let mut session = handler.open_session().await.unwrap();
        assert_eq!(session.invoke("hello").await.unwrap().text, "first");
        let reply = session.invoke("more").await.unwrap();
        assert_eq!(reply.signals, vec![Signal::AgentCompleted]);

        let requests = llm.recorded_requests();
        let last = requests.last().unwrap();
        assert!(last.system.as_deref().unwrap().starts_with("Create seed data."));
        assert_eq!(last.messages.len(), 3);
        assert_eq!(last.messages[1].role, MessageRole::Assistant);
        assert_eq!(last.messages[1].content, "first");
    }

    #[tokio::test]
    async fn test_failed_call_is_not_left_in_transcript() {
        let llm = Arc::new(MockLlm::new("mock"));
        llm.queue_error(LlmError::server_error("overloaded"));
        llm.queue_text("recovered");
        let handler = LlmHandler::new("qa", "Answer questions.", llm.clone());

        let mut session = handler.open_session().await.unwrap();
        assert!(session.invoke("first try").await.is_err());
        session.invoke("second try").await.unwrap();

        let requests = llm.recorded_requests();
        assert_eq!(requests[1].messages.len(), 1);
        assert_eq!(requests[1].messages[0].content, "second try");
    }

    #[tokio::test]
    async fn test_transcript_is_bounded() {
        let llm = Arc::new(MockLlm::new("mock"));
        let handler = LlmHandler::new("qa", "Answer questions.", llm.clone());
        let mut session = handler.open_session().await.unwrap();

        for i in 0..20 {
            llm.queue_text(format!("answer {i}"));
            session.invoke(&format!("question {i}")).await.unwrap();
        }

        let requests = llm.recorded_requests();
        let last = requests.last().unwrap();
        assert!(last.messages.len() <= MAX_TRANSCRIPT_MESSAGES + 1);
        assert_eq!(last.messages[0].role, MessageRole::User);
    }
}
