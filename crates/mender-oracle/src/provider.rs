//! Provider profiles and per-session provider settings.
//!
//! The set of providers is closed: adding one means adding a
//! `ProviderKind` variant and its profile, nothing else.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use mender_contracts::error::{MenderError, MenderResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenAi,
    Xai,
    OpenRouter,
    Ollama,
}

/// Defaults for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderProfile {
    pub base_url: &'static str,
    pub model: &'static str,
    /// Environment variable holding the API key; `None` for keyless local
    /// providers.
    pub key_env: Option<&'static str>,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Gemini,
        ProviderKind::OpenAi,
        ProviderKind::Xai,
        ProviderKind::OpenRouter,
        ProviderKind::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Xai => "xai",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn profile(&self) -> ProviderProfile {
        match self {
            ProviderKind::Gemini => ProviderProfile {
                base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
                model: "gemini-2.5-flash",
                key_env: Some("GEMINI_API_KEY"),
            },
            ProviderKind::OpenAi => ProviderProfile {
                base_url: "https://api.openai.com/v1",
                model: "gpt-4o-mini",
                key_env: Some("OPENAI_API_KEY"),
            },
            ProviderKind::Xai => ProviderProfile {
                base_url: "https://api.x.ai/v1",
                model: "grok-beta",
                key_env: Some("XAI_API_KEY"),
            },
            ProviderKind::OpenRouter => ProviderProfile {
                base_url: "https://openrouter.ai/api/v1",
                model: "openai/gpt-4o-mini",
                key_env: Some("OPENROUTER_API_KEY"),
            },
            ProviderKind::Ollama => ProviderProfile {
                base_url: "http://localhost:11434/v1",
                model: "llama3.2",
                key_env: None,
            },
        }
    }

    pub fn requires_key(&self) -> bool {
        self.profile().key_env.is_some()
    }

    /// `GEMINI`, `OPENAI`, ... used for the `<KIND>_MODEL` and
    /// `<KIND>_BASE_URL` overrides.
    fn env_prefix(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = MenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| MenderError::ConfigError {
                reason: format!(
                    "unknown provider '{}'; expected one of: {}",
                    s,
                    ProviderKind::ALL.map(|k| k.as_str()).join(", ")
                ),
            })
    }
}

/// Explicit values that take precedence over the environment.
#[derive(Debug, Clone, Default)]
pub struct ProviderOverrides {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// The resolved provider for one session.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.masked_key())
            .finish()
    }
}

impl ProviderSettings {
    /// Resolve settings from overrides, then `env`, then the profile.
    ///
    /// Key lookup order: override, the provider's key variable, `API_KEY`,
    /// `OPENAI_API_KEY`. A provider that needs a key and has none is a
    /// `ConfigError`.
    pub fn resolve(
        kind: ProviderKind,
        overrides: ProviderOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> MenderResult<Self> {
        let profile = kind.profile();
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let api_key = non_empty(overrides.api_key)
            .or_else(|| profile.key_env.and_then(|var| non_empty(env(var))))
            .or_else(|| non_empty(env("API_KEY")))
            .or_else(|| non_empty(env("OPENAI_API_KEY")));

        if api_key.is_none() && kind.requires_key() {
            return Err(MenderError::ConfigError {
                reason: format!(
                    "no API key for provider '{}'; set {}",
                    kind,
                    profile.key_env.unwrap_or("API_KEY")
                ),
            });
        }

        let prefix = kind.env_prefix();
        let model = non_empty(overrides.model)
            .or_else(|| non_empty(env(&format!("{prefix}_MODEL"))))
            .unwrap_or_else(|| profile.model.to_string());
        let base_url = non_empty(overrides.base_url)
            .or_else(|| non_empty(env(&format!("{prefix}_BASE_URL"))))
            .unwrap_or_else(|| profile.base_url.to_string());

        Ok(Self {
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key: if kind.requires_key() { api_key } else { None },
        })
    }

    /// Resolve from the process environment.
    pub fn from_env(kind: ProviderKind, overrides: ProviderOverrides) -> MenderResult<Self> {
        Self::resolve(kind, overrides, |var| std::env::var(var).ok())
    }

    /// The key with all but its edges hidden, for display.
    pub fn masked_key(&self) -> String {
        match &self.api_key {
            None => "(none)".to_string(),
            Some(key) if key.chars().count() > 12 => {
                let head: String = key.chars().take(8).collect();
                let tail: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
                format!("{head}...{tail}")
            }
            Some(_) => "***".to_string(),
        }
    }
}
