//! The model backend interface and its request/response types.
//!
//! A backend performs exactly one network exchange per call and reports
//! failures as a `BackendFailure` whose `category` is plain text, so retry
//! classification works the same against a real backend or a test double.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One request to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system: String,
    pub user: String,
    /// Earlier turns, oldest first, sent between the system and user prompt.
    pub history: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ModelRequest {
    pub const DEFAULT_MAX_TOKENS: u32 = 3000;
    pub const DEFAULT_TEMPERATURE: f32 = 0.3;

    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            history: Vec::new(),
            max_tokens: Self::DEFAULT_MAX_TOKENS,
            temperature: Self::DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// The full message list in wire order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage {
            role: Role::System,
            content: self.system.clone(),
        });
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(self.user.clone()));
        messages
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown,
}

impl FinishReason {
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw.unwrap_or("") {
            r if r.contains("stop") => FinishReason::Stop,
            r if r.contains("length") => FinishReason::Length,
            r if r.contains("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReply {
    pub text: String,
    pub finish_reason: FinishReason,
}

/// A failed backend exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    /// `timeout`, `rate_limit`, `connection`, `server_error`,
    /// `malformed_response`, `auth`, `not_found`, `invalid_request`, ...
    pub category: String,
    pub message: String,
    /// Server-suggested wait before retrying, when one was given.
    pub retry_after: Option<Duration>,
}

impl BackendFailure {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new("timeout", message)
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new("rate_limit", "rate limited by the provider")
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new("connection", message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new("malformed_response", message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new("auth", message)
    }
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

/// Incremental reply text. Ends after the last chunk or the first error.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, BackendFailure>> + Send>>;

/// One model provider.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    async fn send(&self, request: &ModelRequest) -> Result<ModelReply, BackendFailure>;

    /// Start a streamed reply. Failures before the first byte are returned
    /// here; later ones arrive on the stream.
    async fn send_streaming(&self, request: &ModelRequest) -> Result<ChunkStream, BackendFailure>;
}
