//! Session identity, invocation configuration, and the end-of-run summary.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    anonymize::AnonymizationReport,
    error::{MenderError, MenderResult},
    execution::ExecutionResult,
    knowledge::SearchRecord,
    problem::Problem,
};

/// Unique identifier for one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    /// Every action needs the operator's confirmation.
    HumanInTheLoop,
    /// One upfront consent covers the whole session.
    Autonomous,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionMode::HumanInTheLoop => "human-in-the-loop",
            SessionMode::Autonomous => "autonomous",
        })
    }
}

/// Which fact modules take part in the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleFilter {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl ModuleFilter {
    /// Parse a comma-separated module list. An empty list or `all` means
    /// every module.
    pub fn parse(spec: &str) -> Self {
        let modules: BTreeSet<String> = spec
            .split(',')
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        if modules.is_empty() || modules.contains("all") {
            ModuleFilter::All
        } else {
            ModuleFilter::Only(modules)
        }
    }

    pub fn allows(&self, module: &str) -> bool {
        match self {
            ModuleFilter::All => true,
            ModuleFilter::Only(set) => set.contains(module),
        }
    }
}

/// Read-only invocation configuration consumed by the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub mode: SessionMode,
    /// Maximum number of EXEC actions in the session.
    pub max_fixes: u32,
    /// Wall-clock budget from session start to deadline.
    pub session_timeout: Duration,
    /// Upper bound for one subprocess.
    pub command_timeout: Duration,
    /// How long an in-flight subprocess may keep running after the deadline
    /// fires before it is killed.
    pub grace_period: Duration,
    pub modules: ModuleFilter,
    pub dry_run: bool,
    /// Knowledge searches allowed per session.
    pub max_searches: u32,
    /// Number of recent results included in each decision prompt.
    pub history_window: usize,
    /// Hard cap on loop turns of any kind. `None` derives it from `max_fixes`.
    pub max_turns: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::HumanInTheLoop,
            max_fixes: 10,
            session_timeout: Duration::from_secs(3600),
            command_timeout: Duration::from_secs(120),
            grace_period: Duration::from_secs(5),
            modules: ModuleFilter::All,
            dry_run: false,
            max_searches: 3,
            history_window: 5,
            max_turns: None,
        }
    }
}

impl SessionConfig {
    pub fn effective_max_turns(&self) -> u32 {
        self.max_turns
            .unwrap_or_else(|| self.max_fixes.saturating_mul(3).saturating_add(5))
    }

    /// Reject configurations the loop cannot honor.
    pub fn validate(&self) -> MenderResult<()> {
        if self.max_fixes == 0 {
            return Err(MenderError::ConfigError {
                reason: "max_fixes must be at least 1".to_string(),
            });
        }
        if self.session_timeout.is_zero() {
            return Err(MenderError::ConfigError {
                reason: "session timeout must be positive".to_string(),
            });
        }
        if self.command_timeout.is_zero() {
            return Err(MenderError::ConfigError {
                reason: "command timeout must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Why a session ended abnormally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AbortReason {
    ConsecutiveFailures { count: u32 },
    ProtocolViolation { reason: String },
    Provider { reason: String },
    ExecutionLog { reason: String },
    Collection { reason: String },
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Termination {
    /// The oracle answered DONE.
    Completed,
    /// The EXEC budget was used up.
    BudgetExhausted,
    /// The turn cap was reached without DONE.
    TurnLimit,
    /// The session deadline elapsed.
    TimedOut,
    /// The operator quit (human-in-the-loop only).
    OperatorQuit,
    Aborted { reason: AbortReason },
}

impl Termination {
    pub fn is_abort(&self) -> bool {
        matches!(self, Termination::Aborted { .. })
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Completed => f.write_str("completed"),
            Termination::BudgetExhausted => f.write_str("action budget exhausted"),
            Termination::TurnLimit => f.write_str("turn limit reached"),
            Termination::TimedOut => f.write_str("session deadline elapsed"),
            Termination::OperatorQuit => f.write_str("operator quit"),
            Termination::Aborted { reason } => match reason {
                AbortReason::ConsecutiveFailures { count } => {
                    write!(f, "aborted after {count} consecutive failed commands")
                }
                AbortReason::ProtocolViolation { reason } => {
                    write!(f, "aborted: protocol violation: {reason}")
                }
                AbortReason::Provider { reason } => write!(f, "aborted: provider failure: {reason}"),
                AbortReason::ExecutionLog { reason } => {
                    write!(f, "aborted: execution log failure: {reason}")
                }
                AbortReason::Collection { reason } => {
                    write!(f, "aborted: fact collection failure: {reason}")
                }
            },
        }
    }
}

/// A command the forbidden-pattern gate refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedCommand {
    pub command: String,
    pub reason: String,
}

/// Everything a caller needs to report on a finished session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub mode: SessionMode,
    pub termination: Termination,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// EXEC actions attempted, whether or not they succeeded.
    pub actions_taken: u32,
    pub executions: Vec<ExecutionResult>,
    pub resolved: Vec<Problem>,
    pub pending: Vec<Problem>,
    pub blocked: Vec<BlockedCommand>,
    pub searches: Vec<SearchRecord>,
    /// Non-fatal errors recorded along the way, in order.
    pub errors: Vec<String>,
    pub anonymization: AnonymizationReport,
    /// Terminal hash of the execution log; empty when nothing ran.
    pub log_terminal_hash: String,
}
