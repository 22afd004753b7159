//! Classifier port

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Reply meaning "no transition"
pub const STAY: &str = "STAY";

/// Which tier of the routing policy is asking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingScope {
    /// The current state is complete; candidates are its legal targets
    Gated,
    /// Free navigation; candidates are every state
    Global,
}

impl fmt::Display for RoutingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gated => "gated",
            Self::Global => "global",
        })
    }
}

/// Everything a classifier may look at
#[derive(Debug, Clone)]
pub struct ClassificationRequest<'a> {
    pub current: &'static str,
    pub candidates: Vec<&'static str>,
    pub scope: RoutingScope,
    /// The raw user message
    pub message: &'a str,
    /// Message with recent history, as given to the handler
    pub context: &'a str,
}

impl ClassificationRequest<'_> {
    /// Text form for an LLM oracle
    pub fn prompt(&self) -> String {
        format!(
            "Current State: {current}\n\
             Legal Next States: {candidates}\n\n\
             {context}\n\n\
             Analyze the user's intent and respond with a JSON object containing the target state keyword, \
             for example {{\"target_state\": \"{example}\"}}.\n\
             Only choose from the legal next states listed above, or use \"{STAY}\" if no transition is appropriate.",
            current = self.current,
            candidates = self.candidates.join(", "),
            context = self.context,
            example = self.candidates.first().copied().unwrap_or(STAY),
        )
    }
}

/// Classifier verdict: a state name or [`STAY`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(alias = "target_state")]
    pub target: String,
}

impl Classification {
    pub fn target(name: impl Into<String>) -> Self {
        Self {
            target: name.into(),
        }
    }

    pub fn stay() -> Self {
        Self::target(STAY)
    }

    pub fn is_stay(&self) -> bool {
        self.target.trim().eq_ignore_ascii_case(STAY)
    }
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier backend failed: {0}")]
    Backend(String),

    #[error("malformed classifier reply: {0}")]
    Malformed(String),

    #[error("classifier gave no answer within {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        request: &ClassificationRequest<'_>,
    ) -> Result<Classification, ClassifyError>;

    /// Strategy name for logs
    fn name(&self) -> &'static str;
}

#[async_trait]
impl<T: Classifier + ?Sized> Classifier for Arc<T> {
    async fn classify(
        &self,
        request: &ClassificationRequest<'_>,
    ) -> Result<Classification, ClassifyError> {
        (**self).classify(request).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_candidates() {
        let request = ClassificationRequest {
            current: "GREETING_INTENT",
            candidates: vec!["GENERAL_QA", "KNOWLEDGE_FLOW"],
            scope: RoutingScope::Gated,
            message: "what is sdg?",
            context: "User: what is sdg?",
        };

        let prompt = request.prompt();
        assert!(prompt.starts_with("Current State: GREETING_INTENT\n"));
        assert!(prompt.contains("Legal Next States: GENERAL_QA, KNOWLEDGE_FLOW\n"));
        assert!(prompt.contains("User: what is sdg?"));
        assert!(prompt.contains(r#"{"target_state": "GENERAL_QA"}"#));
    }

    #[test]
    fn test_classification_accepts_both_field_names() {
        let a: Classification = serde_json::from_str(r#"{"target_state": "STAY"}"#).unwrap();
        let b: Classification = serde_json::from_str(r#"{"target": "GENERAL_QA"}"#).unwrap();
        assert!(a.is_stay());
        assert_eq!(b, Classification::target("GENERAL_QA"));
        assert!(Classification::target(" stay ").is_stay());
    }
}
