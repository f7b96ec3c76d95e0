//! The operator seam of the human-in-the-loop session.

use async_trait::async_trait;

use mender_contracts::execution::PreparedCommand;
use mender_core::traits::Approver;

use crate::prompts::ProposedFix;

/// One line typed at the session prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorInput {
    /// Run the proposed fix with this 1-based number.
    Fix(usize),
    /// Run every proposed fix in order.
    All,
    /// Skip the current proposal.
    Skip,
    /// `!<cmd>`: run a command of the operator's own.
    Direct(String),
    /// `search <query>`
    Search(String),
    /// `d <text>` or free text: describe a problem. Blank asks for one.
    Describe(String),
    Quit,
    /// Nothing typed; show the prompt again.
    Empty,
}

impl OperatorInput {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let lower = line.to_lowercase();

        if line.is_empty() {
            return OperatorInput::Empty;
        }
        if let Some(command) = line.strip_prefix('!') {
            let command = command.trim();
            return if command.is_empty() {
                OperatorInput::Empty
            } else {
                OperatorInput::Direct(command.to_string())
            };
        }
        match lower.as_str() {
            "q" | "quit" | "exit" => return OperatorInput::Quit,
            "a" | "all" => return OperatorInput::All,
            "s" | "skip" => return OperatorInput::Skip,
            "d" => return OperatorInput::Describe(String::new()),
            _ => {}
        }
        if let Ok(n) = line.parse::<usize>() {
            return OperatorInput::Fix(n);
        }
        if let Some((head, rest)) = line.split_once(char::is_whitespace) {
            match head.to_lowercase().as_str() {
                "search" => return OperatorInput::Search(rest.trim().to_string()),
                "d" => return OperatorInput::Describe(rest.trim().to_string()),
                _ => {}
            }
        }
        OperatorInput::Describe(line.to_string())
    }
}

/// The person driving a human-in-the-loop session.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Read the next command line, with `fixes` on offer. `None` on end of
    /// input.
    async fn next_input(&self, fixes: &[ProposedFix]) -> Option<String>;

    /// Ask for a free-text problem description.
    async fn describe_problem(&self) -> Option<String>;

    /// Confirm one normalized command before it runs.
    async fn confirm(&self, command: &PreparedCommand) -> bool;
}

/// Routes the executor's per-command approval to the operator.
pub struct OperatorApproval<'a>(pub &'a dyn Operator);

#[async_trait]
impl Approver for OperatorApproval<'_> {
    async fn approve(&self, command: &PreparedCommand) -> bool {
        self.0.confirm(command).await
    }
}
