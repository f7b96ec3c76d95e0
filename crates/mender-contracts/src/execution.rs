//! Command execution results and executor outcomes.
//!
//! `ExecutionOutcome` is what the executor returns to the agent loop.
//! `ExecutionResult` is what gets appended to the execution log, one per
//! subprocess actually spawned.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Characters of stdout kept when a result is fed back to the model.
pub const CONTEXT_STDOUT_CHARS: usize = 2000;
/// Characters of stderr kept when a result is fed back to the model.
pub const CONTEXT_STDERR_CHARS: usize = 1000;

/// A command after the executor's normalization steps, ready to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedCommand {
    /// The command as the model or operator wrote it.
    pub original: String,
    /// The command that will actually be run.
    pub command: String,
    /// Whether `command` runs with system privileges.
    pub elevated: bool,
    /// Whether a non-interactive confirmation flag was injected.
    pub non_interactive_injected: bool,
}

/// The captured result of one subprocess.
///
/// Appended to the session's execution log and never edited afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub command: String,
    /// Process exit code. `None` when the process was killed by a signal,
    /// timed out, or could not be spawned.
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub elevated: bool,
    /// The per-command timeout or the session deadline cut the process short.
    #[serde(default)]
    pub timed_out: bool,
    pub started_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.exit_status == Some(0) && !self.timed_out
    }

    /// Render the result for inclusion in a model prompt, with output
    /// truncated to the context limits.
    pub fn to_context(&self) -> String {
        let status = match (self.exit_status, self.timed_out) {
            (_, true) => "timed out".to_string(),
            (Some(code), false) => format!("exit {code}"),
            (None, false) => "terminated".to_string(),
        };
        let mut out = format!("$ {}\n[{}, {} ms]\n", self.command, status, self.duration.as_millis());
        let stdout = truncate_chars(self.stdout.trim_end(), CONTEXT_STDOUT_CHARS);
        if !stdout.is_empty() {
            out.push_str("stdout:\n");
            out.push_str(stdout);
            out.push('\n');
        }
        let stderr = truncate_chars(self.stderr.trim_end(), CONTEXT_STDERR_CHARS);
        if !stderr.is_empty() {
            out.push_str("stderr:\n");
            out.push_str(stderr);
            out.push('\n');
        }
        out
    }
}

/// The outcome of one call to the command executor.
///
/// Callers pattern-match on this to decide what to do next:
/// - `Executed` → a subprocess ran; inspect `succeeded()` and feed it back
/// - `Declined` → authorization was refused, nothing ran
/// - `AlreadySatisfied` → the read-only probe showed the change is in place
/// - `DryRun` → the command passed every gate but was not spawned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    Executed(ExecutionResult),
    Declined { command: String },
    AlreadySatisfied { command: String, probe: String },
    DryRun(PreparedCommand),
}

impl ExecutionOutcome {
    /// True when the outcome counts against the consecutive-failure counter.
    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionOutcome::Executed(r) if !r.succeeded())
    }

    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            ExecutionOutcome::Executed(r) => Some(r),
            _ => None,
        }
    }

    /// One-paragraph description for the model's next prompt.
    pub fn to_context(&self) -> String {
        match self {
            ExecutionOutcome::Executed(r) => r.to_context(),
            ExecutionOutcome::Declined { command } => {
                format!("$ {command}\n[not run: the operator declined]\n")
            }
            ExecutionOutcome::AlreadySatisfied { command, probe } => {
                format!("$ {command}\n[not run: already satisfied, `{probe}` succeeded]\n")
            }
            ExecutionOutcome::DryRun(prepared) => {
                format!("$ {}\n[dry run: not executed]\n", prepared.command)
            }
        }
    }
}

/// Truncate `s` to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
