//! LLM oracle classifier

use super::classifier::{Classification, ClassificationRequest, Classifier, ClassifyError, STAY};
use crate::llm::{LlmRequest, LlmService};
use crate::state_machine::WorkflowState;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;

const ROUTING_MAX_TOKENS: u32 = 200;

pub struct LlmClassifier {
    llm: Arc<dyn LlmService>,
    instruction: String,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmService>, instruction: impl Into<String>) -> Self {
        Self {
            llm,
            instruction: instruction.into(),
        }
    }

    /// Routing instruction listing every state of `S` with its description
    pub fn for_workflow<S: WorkflowState>(llm: Arc<dyn LlmService>) -> Self {
        let mut instruction = String::from(
            "You route a multi-step conversation between specialized assistants. \
             Decide which step the user wants to be in next.\n\nSTATES:\n",
        );
        for state in S::ALL {
            let _ = writeln!(instruction, "- {}: {}", state.name(), state.description());
        }
        let _ = write!(
            instruction,
            "\nYou are given the current state, the states you may choose from and the \
             conversation. Respond with ONLY a JSON object such as \
             {{\"target_state\": \"STATE_NAME\"}}. Use \"{STAY}\" when the user is not asking \
             to move or the intent is unclear."
        );
        Self::new(llm, instruction)
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest<'_>,
    ) -> Result<Classification, ClassifyError> {
        let llm_request = LlmRequest::new(self.instruction.clone(), request.prompt())
            .with_max_tokens(ROUTING_MAX_TOKENS);
        let response = self
            .llm
            .complete(&llm_request)
            .await
            .map_err(|e| ClassifyError::Backend(e.message))?;
        parse_reply(&response.text)
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// Extract `{"target_state": ...}` from a reply that may carry code fences or prose
pub(crate) fn parse_reply(reply: &str) -> Result<Classification, ClassifyError> {
    let trimmed = reply.trim();
    if trimmed.eq_ignore_ascii_case(STAY) {
        return Ok(Classification::stay());
    }

    let json = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => trimmed.get(start..=end),
        _ => None,
    }
    .ok_or_else(|| ClassifyError::Malformed(trimmed.to_string()))?;

    serde_json::from_str(json).map_err(|e| ClassifyError::Malformed(format!("{e}: {json}")))
}
