//! Provider construction from environment configuration

use super::{AnthropicModel, AnthropicService, LlmError, LlmService, LoggingService};
use std::collections::HashMap;
use std::sync::Arc;

const PREFERRED_DEFAULT: AnthropicModel = AnthropicModel::Claude45Sonnet;
const PREFERRED_CHEAP: AnthropicModel = AnthropicModel::Claude45Haiku;

#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub anthropic_api_key: Option<String>,
    /// Gateway base URL; the gateway handles authentication
    pub gateway: Option<String>,
    pub default_model: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            gateway: std::env::var("LLM_GATEWAY").ok(),
            default_model: std::env::var("DEFAULT_MODEL").ok(),
        }
    }

    fn api_key(&self) -> Option<String> {
        if self.gateway.is_some() {
            return Some("implicit".to_string());
        }
        self.anthropic_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Available models, each wrapped in a [`LoggingService`]
pub struct ModelRegistry {
    services: HashMap<String, Arc<dyn LlmService>>,
    default_model: String,
}

impl ModelRegistry {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let mut services: HashMap<String, Arc<dyn LlmService>> = HashMap::new();

        if let Some(api_key) = config.api_key() {
            for model in AnthropicModel::ALL {
                let service =
                    AnthropicService::new(api_key.clone(), *model, config.gateway.as_deref())?;
                services.insert(
                    model.model_id().to_string(),
                    Arc::new(LoggingService::new(Arc::new(service))),
                );
            }
        }

        let default_model = config
            .default_model
            .clone()
            .unwrap_or_else(|| PREFERRED_DEFAULT.model_id().to_string());

        Ok(Self {
            services,
            default_model,
        })
    }

    pub fn get(&self, model_id: &str) -> Option<Arc<dyn LlmService>> {
        self.services.get(model_id).cloned()
    }

    pub fn default(&self) -> Option<Arc<dyn LlmService>> {
        self.get(&self.default_model)
    }

    pub fn default_model_id(&self) -> &str {
        &self.default_model
    }

    pub fn available_models(&self) -> Vec<String> {
        let mut models: Vec<_> = self.services.keys().cloned().collect();
        models.sort();
        models
    }

    pub fn has_models(&self) -> bool {
        !self.services.is_empty()
    }

    /// Fast model for routing decisions; falls back to the default
    pub fn cheap(&self) -> Option<Arc<dyn LlmService>> {
        self.get(PREFERRED_CHEAP.model_id()).or_else(|| self.default())
    }
}
