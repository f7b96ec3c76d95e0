//! The oracle's structured output for one autonomous turn.
//!
//! Wire format:
//!
//! ```json
//! {"action": "EXEC", "command": "systemctl --user restart pipewire", "reason": "..."}
//! ```
//!
//! `command` is required and non-empty for `EXEC` and ignored otherwise.
//! `query` is optional and only read for `SEARCH`.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionAction {
    Exec,
    Search,
    Skip,
    Done,
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DecisionAction::Exec => "EXEC",
            DecisionAction::Search => "SEARCH",
            DecisionAction::Skip => "SKIP",
            DecisionAction::Done => "DONE",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    pub command: Option<String>,
    pub reason: String,
    #[serde(default, alias = "search_query", skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl Decision {
    pub fn exec(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Exec,
            command: Some(command.into()),
            reason: reason.into(),
            query: None,
        }
    }

    pub fn search(query: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Search,
            command: None,
            reason: reason.into(),
            query: Some(query.into()),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Skip,
            command: None,
            reason: reason.into(),
            query: None,
        }
    }

    pub fn done(reason: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Done,
            command: None,
            reason: reason.into(),
            query: None,
        }
    }

    /// The query to run for a SEARCH decision: the explicit `query` when
    /// present and non-blank, the reason otherwise.
    pub fn search_query(&self) -> &str {
        match self.query.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => q,
            _ => self.reason.trim(),
        }
    }
}
