//! The provider registry: built once per session and passed in.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::info;

use mender_contracts::error::{MenderError, MenderResult};

use crate::{
    backend::ModelBackend,
    chat::ChatCompletionsBackend,
    provider::{ProviderKind, ProviderProfile, ProviderSettings},
};

/// The active provider and how to reach it.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    settings: ProviderSettings,
    request_timeout: Duration,
}

impl ProviderRegistry {
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            settings,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Every known provider with its defaults, in display order.
    pub fn profiles() -> Vec<(ProviderKind, ProviderProfile)> {
        ProviderKind::ALL.iter().map(|k| (*k, k.profile())).collect()
    }

    /// Build the backend for the active provider.
    pub fn create_backend(&self) -> MenderResult<Arc<dyn ModelBackend>> {
        let client = Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| MenderError::ConfigError {
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        let s = &self.settings;
        let api_key = match s.kind {
            ProviderKind::Ollama => None,
            ProviderKind::Gemini | ProviderKind::OpenAi | ProviderKind::Xai | ProviderKind::OpenRouter => {
                let key = s.api_key.clone().ok_or_else(|| MenderError::ConfigError {
                    reason: format!("provider '{}' needs an API key", s.kind),
                })?;
                Some(key)
            }
        };

        info!(provider = %s.kind, model = %s.model, base_url = %s.base_url, "model backend selected");
        Ok(Arc::new(ChatCompletionsBackend::new(
            s.kind.as_str(),
            client,
            &s.base_url,
            s.model.clone(),
            api_key,
        )))
    }
}
