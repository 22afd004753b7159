//! Anthropic Messages API provider

use super::types::{LlmRequest, LlmResponse, Usage};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_MAX_TOKENS: u32 = 4096;
const API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnthropicModel {
    Claude45Sonnet,
    Claude45Haiku,
}

impl AnthropicModel {
    pub const ALL: &'static [AnthropicModel] = &[Self::Claude45Sonnet, Self::Claude45Haiku];

    pub fn api_name(self) -> &'static str {
        match self {
            Self::Claude45Sonnet => "claude-sonnet-4-5",
            Self::Claude45Haiku => "claude-haiku-4-5",
        }
    }

    /// Registry identifier
    pub fn model_id(self) -> &'static str {
        match self {
            Self::Claude45Sonnet => "claude-4.5-sonnet",
            Self::Claude45Haiku => "claude-4.5-haiku",
        }
    }
}

pub struct AnthropicService {
    client: Client,
    api_key: String,
    model: AnthropicModel,
    base_url: String,
}

impl AnthropicService {
    /// `gateway` routes requests through an LLM gateway instead of the public API
    pub fn new(
        api_key: impl Into<String>,
        model: AnthropicModel,
        gateway: Option<&str>,
    ) -> Result<Self, LlmError> {
        let base_url = match gateway {
            Some(gw) => format!("{}/_/gateway/anthropic/v1/messages", gw.trim_end_matches('/')),
            None => API_URL.to_string(),
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model,
            base_url,
        })
    }

    fn translate_request<'a>(&self, request: &'a LlmRequest) -> AnthropicRequest<'a> {
        AnthropicRequest {
            model: self.model.api_name(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: request.system.as_deref(),
            messages: request
                .messages
                .iter()
                .map(|m| AnthropicMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
        }
    }

    fn normalize_response(resp: AnthropicResponse) -> LlmResponse {
        let text = resp
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        LlmResponse {
            text,
            end_turn: resp.stop_reason.as_deref() == Some("end_turn"),
            usage: Usage {
                input_tokens: resp.usage.input_tokens,
                output_tokens: resp.usage.output_tokens,
            },
        }
    }
}

#[async_trait]
impl LlmService for AnthropicService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = self.translate_request(request);

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), &text));
        }

        let parsed: AnthropicResponse = serde_json::from_str(&text)
            .map_err(|e| LlmError::unknown(format!("Failed to parse response: {e}")))?;

        Ok(Self::normalize_response(parsed))
    }

    fn model_id(&self) -> &str {
        self.model.model_id()
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'static str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmMessage;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let service = AnthropicService::new("key", AnthropicModel::Claude45Haiku, None).unwrap();
        let mut request = LlmRequest::new("route things", "hello").with_max_tokens(50);
        request.messages.push(LlmMessage::assistant("hi"));

        let wire = serde_json::to_value(service.translate_request(&request)).unwrap();
        assert_eq!(
            wire,
            json!({
                "model": "claude-haiku-4-5",
                "max_tokens": 50,
                "system": "route things",
                "messages": [
                    { "role": "user", "content": "hello" },
                    { "role": "assistant", "content": "hi" }
                ]
            })
        );
    }

    #[test]
    fn test_response_joins_text_blocks() {
        let parsed: AnthropicResponse = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "Hello " },
                { "type": "tool_use", "id": "t1", "name": "x", "input": {} },
                { "type": "text", "text": "there" }
            ],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 10, "output_tokens": 3 }
        }))
        .unwrap();

        let response = AnthropicService::normalize_response(parsed);
        assert_eq!(response.text, "Hello there");
        assert!(response.end_turn);
        assert_eq!(response.usage.output_tokens, 3);
    }

    #[test]
    fn test_gateway_url() {
        let service = AnthropicService::new(
            "implicit",
            AnthropicModel::Claude45Sonnet,
            Some("http://gateway.local/"),
        )
        .unwrap();
        assert_eq!(
            service.base_url,
            "http://gateway.local/_/gateway/anthropic/v1/messages"
        );
    }
}
