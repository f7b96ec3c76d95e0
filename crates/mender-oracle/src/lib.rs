//! # mender-oracle
//!
//! The model oracle of a remediation session.
//!
//! - `provider` : the closed set of providers and settings resolution
//! - `registry` : builds the backend for the active provider
//! - `backend`  : the `ModelBackend` trait and request/reply types
//! - `chat`     : the OpenAI-compatible HTTP backend, with SSE streaming
//! - `retry`    : failure classification and backoff
//! - `client`   : `OracleClient`, retry and deadline handling around a backend
//! - `scripted` : a backend that replays a script, for driving sessions offline

pub mod backend;
pub mod chat;
pub mod client;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod scripted;

pub use backend::{BackendFailure, ChatMessage, FinishReason, ModelBackend, ModelReply, ModelRequest, Role};
pub use client::OracleClient;
pub use provider::{ProviderKind, ProviderOverrides, ProviderSettings};
pub use registry::ProviderRegistry;
pub use retry::{classify, FailureClass, RetryPolicy};
pub use scripted::{ScriptStep, ScriptedBackend};

// ── Tests ─────────────────────────────────────────────────────────────────────
