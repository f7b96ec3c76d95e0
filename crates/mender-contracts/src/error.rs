//! Runtime error types for the mender remediation pipeline.
//!
//! All fallible operations return `MenderResult<T>`. A command that exits
//! nonzero is NOT an error: it is an `ExecutionResult` that did not succeed,
//! and it flows back into the conversation as context.

use thiserror::Error;

/// The unified error type for the mender runtime.
#[derive(Debug, Clone, Error)]
pub enum MenderError {
    /// A model backend failed in a way that may succeed on retry
    /// (timeout, rate limit, connection reset, garbled response body).
    ///
    /// Surfaced only after the retry budget is exhausted.
    #[error("transient provider failure ({category}) after {attempts} attempt(s): {message}")]
    TransientProvider {
        category: String,
        message: String,
        attempts: u32,
    },

    /// A model backend failed in a way no retry can fix (bad credentials,
    /// unknown model, invalid endpoint). The session aborts.
    #[error("fatal provider failure ({category}): {message}")]
    FatalProvider { category: String, message: String },

    /// The command matched a forbidden pattern and was never executed.
    #[error("forbidden command '{command}': {reason}")]
    ForbiddenCommand { command: String, reason: String },

    /// The model kept producing decisions that fail the wire-format contract.
    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    /// The session deadline fired. No further action may start.
    #[error("session deadline elapsed")]
    SessionTimeout,

    /// The ordering rules produced a cycle; the named problems fell back to
    /// severity ordering.
    #[error("ordering cycle among problems: {}", nodes.join(", "))]
    GraphCycle { nodes: Vec<String> },

    /// The fact collector could not produce a fact set.
    #[error("fact collection failed: {reason}")]
    Collection { reason: String },

    /// The execution log could not record a result.
    ///
    /// Fatal: an execution that cannot be recorded cannot be reported.
    #[error("execution log write failed: {reason}")]
    ExecutionLogFailed { reason: String },

    /// A knowledge source failed or timed out.
    #[error("knowledge source '{source_name}' failed: {reason}")]
    Knowledge { source_name: String, reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// A JSON Schema document could not be compiled or applied.
    #[error("schema validation error: {reason}")]
    SchemaValidation { reason: String },
}

impl MenderError {
    /// True for errors that end the session rather than being fed back to
    /// the loop as context.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            MenderError::TransientProvider { .. }
                | MenderError::FatalProvider { .. }
                | MenderError::ProtocolViolation { .. }
                | MenderError::SessionTimeout
                | MenderError::ExecutionLogFailed { .. }
                | MenderError::ConfigError { .. }
        )
    }
}

/// Convenience alias used throughout the mender crates.
pub type MenderResult<T> = Result<T, MenderError>;
