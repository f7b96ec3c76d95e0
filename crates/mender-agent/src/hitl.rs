//! The human-in-the-loop session machine.
//!
//! ```text
//! Proposing ──▶ AwaitingInput ──n / all / !cmd──▶ Executing ──▶ Proposing
//!                    │ ├──search <q>─▶ Searching ──────────────▶ Proposing
//!                    │ ├──d <text>───▶ Describing ─────────────▶ Proposing
//!                    │ └──skip───────▶ Skipping ───────────────▶ Proposing
//!                    └──quit / EOF / budget / deadline ──▶ Terminated
//! ```
//!
//! The model proposes fixes in free form; the operator picks. Every command
//! is confirmed again by the operator after normalization.

use tracing::{debug, info};

use mender_contracts::{
    error::MenderError,
    execution::ExecutionOutcome,
    session::{SessionSummary, Termination},
};
use mender_core::Authorization;
use mender_oracle::ModelRequest;

use crate::{
    autonomous::initial_failure,
    events::SessionEvent,
    operator::{Operator, OperatorApproval, OperatorInput},
    prompts::{extract_fixes, proposal_prompt, ProposedFix, HITL_SYSTEM_PROMPT},
    session::Session,
};

enum HitlState {
    Proposing,
    AwaitingInput,
    Executing(Vec<String>),
    Searching(String),
    Describing(String),
    Skipping,
    Terminated(Termination),
}

impl Session {
    /// Run the human-in-the-loop machine until the operator quits or the
    /// session ends for another reason.
    pub async fn run_hitl(mut self, operator: &dyn Operator) -> SessionSummary {
        info!(session_id = %self.id, "human-in-the-loop session starting");

        if let Err(e) = self.diagnose().await {
            return self.finish(initial_failure(e));
        }

        let mut fixes: Vec<ProposedFix> = Vec::new();
        let mut state = HitlState::Proposing;
        loop {
            state = match state {
                HitlState::Terminated(termination) => return self.finish(termination),
                HitlState::Proposing => self.propose(&mut fixes).await,
                HitlState::AwaitingInput => self.await_input(operator, &fixes).await,
                HitlState::Executing(commands) => self.run_commands(commands, operator).await,
                HitlState::Searching(query) => match self.search(&query).await {
                    Ok(()) => HitlState::Proposing,
                    Err(e) => HitlState::Terminated(Session::termination_for(&e)),
                },
                HitlState::Describing(text) => self.describe(text, operator).await,
                HitlState::Skipping => {
                    self.note("the operator skipped the last proposal; offer different fixes");
                    HitlState::Proposing
                }
            };
        }
    }

    async fn propose(&mut self, fixes: &mut Vec<ProposedFix>) -> HitlState {
        if self.deadline.is_expired() {
            return HitlState::Terminated(Termination::TimedOut);
        }
        if self.turn_limit_reached() {
            return HitlState::Terminated(Termination::TurnLimit);
        }
        self.turns += 1;

        let prompt = self.outbound(&proposal_prompt(&self.turn_context()));
        let reply = match self.ask(&ModelRequest::new(HITL_SYSTEM_PROMPT, prompt)).await {
            Ok(reply) => reply,
            Err(e) => return HitlState::Terminated(Session::termination_for(&e)),
        };

        *fixes = extract_fixes(&reply.text);
        debug!(session_id = %self.id, fixes = fixes.len(), "proposal received");
        if fixes.is_empty() {
            self.emit(SessionEvent::Notice(
                "no runnable command found in the proposal; describe the problem or run one with !<cmd>".to_string(),
            ));
        }
        self.emit(SessionEvent::Proposal {
            reply: reply.text,
            fixes: fixes.clone(),
        });
        HitlState::AwaitingInput
    }

    async fn await_input(&mut self, operator: &dyn Operator, fixes: &[ProposedFix]) -> HitlState {
        if self.deadline.is_expired() {
            return HitlState::Terminated(Termination::TimedOut);
        }
        if self.budget_exhausted() {
            return HitlState::Terminated(Termination::BudgetExhausted);
        }

        let line = match self.deadline.bound(operator.next_input(fixes)).await {
            Ok(Some(line)) => line,
            Ok(None) => return HitlState::Terminated(Termination::OperatorQuit),
            Err(e) => return HitlState::Terminated(Session::termination_for(&e)),
        };

        match OperatorInput::parse(&line) {
            OperatorInput::Empty => HitlState::AwaitingInput,
            OperatorInput::Quit => HitlState::Terminated(Termination::OperatorQuit),
            OperatorInput::Skip => HitlState::Skipping,
            OperatorInput::Direct(command) => HitlState::Executing(vec![command]),
            OperatorInput::Describe(text) => HitlState::Describing(text),
            OperatorInput::All if fixes.is_empty() => {
                self.emit(SessionEvent::Notice("there are no proposed fixes to run".to_string()));
                HitlState::AwaitingInput
            }
            OperatorInput::All => HitlState::Executing(fixes.iter().map(|f| f.command.clone()).collect()),
            OperatorInput::Fix(n) => match n.checked_sub(1).and_then(|i| fixes.get(i)) {
                Some(fix) => HitlState::Executing(vec![fix.command.clone()]),
                None => {
                    self.emit(SessionEvent::Notice(format!(
                        "no fix numbered {n}; choose 1-{}",
                        fixes.len()
                    )));
                    HitlState::AwaitingInput
                }
            },
            OperatorInput::Search(query) if query.is_empty() => {
                self.emit(SessionEvent::Notice("usage: search <query>".to_string()));
                HitlState::AwaitingInput
            }
            OperatorInput::Search(query) => HitlState::Searching(query),
        }
    }

    async fn run_commands(&mut self, commands: Vec<String>, operator: &dyn Operator) -> HitlState {
        let approval = OperatorApproval(operator);
        let total = commands.len();

        for (i, command) in commands.into_iter().enumerate() {
            if self.budget_exhausted() {
                self.emit(SessionEvent::Notice(format!(
                    "action budget of {} used up; `{command}` not run",
                    self.config.max_fixes
                )));
                break;
            }

            let outcome = self
                .executor
                .execute(&command, Authorization::PerCommand(&approval), &self.deadline)
                .await;
            let executed = match outcome {
                Ok(outcome) => {
                    let executed = matches!(outcome, ExecutionOutcome::Executed(_));
                    if !matches!(outcome, ExecutionOutcome::Declined { .. }) {
                        self.actions_taken += 1;
                    }
                    self.record_outcome(&outcome);
                    executed
                }
                Err(MenderError::ForbiddenCommand { command, reason }) => {
                    self.record_blocked(&command, &reason);
                    false
                }
                Err(e) => return HitlState::Terminated(Session::termination_for(&e)),
            };
            if !executed {
                continue;
            }

            // The rest of the batch was approved against the old graph.
            let resolved = match self.rediagnose().await {
                Ok(resolved) => resolved,
                Err(e) => return HitlState::Terminated(Session::termination_for(&e)),
            };
            let remaining = total - i - 1;
            if remaining > 0 && resolved > 0 && self.graph.is_empty() {
                self.emit(SessionEvent::Notice(format!(
                    "every detected problem is resolved; {remaining} remaining fixes not run"
                )));
                break;
            }
        }
        HitlState::Proposing
    }

    async fn describe(&mut self, text: String, operator: &dyn Operator) -> HitlState {
        let text = if text.trim().is_empty() {
            match self.deadline.bound(operator.describe_problem()).await {
                Ok(Some(text)) if !text.trim().is_empty() => text,
                Ok(_) => return HitlState::AwaitingInput,
                Err(e) => return HitlState::Terminated(Session::termination_for(&e)),
            }
        } else {
            text
        };
        self.note(format!("the operator reports: {}", text.trim()));
        HitlState::Proposing
    }
}
