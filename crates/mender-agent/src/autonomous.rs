//! The autonomous session machine.
//!
//! ```text
//! Deciding ──EXEC──▶ Executing ──▶ Verifying ──▶ Deciding
//!    │  └──SEARCH──▶ Searching ─────────────────▶ Deciding
//!    │  └──SKIP────▶ Skipping ──────────────────▶ Deciding
//!    └──DONE / budget / turn cap / deadline / abort ──▶ Finished
//! ```
//!
//! One consent, given before the session starts, covers every command; the
//! executor's gates still apply to each one.

use tracing::{info, warn};

use mender_contracts::{
    decision::{Decision, DecisionAction},
    error::{MenderError, MenderResult},
    execution::ExecutionOutcome,
    problem::Fingerprint,
    session::{AbortReason, SessionSummary, Termination},
};
use mender_core::{Authorization, SessionConsent};
use mender_oracle::{ChatMessage, ModelRequest};
use mender_verify::DecisionCheck;

use crate::{
    events::SessionEvent,
    prompts::{correction_prompt, decision_prompt, AUTONOMOUS_SYSTEM_PROMPT},
    session::Session,
};

/// Failed commands in a row that end the session.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

enum AutoState {
    Deciding,
    Executing(Decision),
    Searching(Decision),
    Skipping(Decision),
    Verifying {
        outcome: ExecutionOutcome,
        focus: Option<Fingerprint>,
    },
    Finished(Termination),
}

impl Session {
    /// Run the autonomous machine to completion.
    ///
    /// Never fails: every way the session can end is a `Termination` in the
    /// returned summary.
    pub async fn run_autonomous(mut self, consent: SessionConsent) -> SessionSummary {
        info!(session_id = %self.id, consent_granted_at = %consent.granted_at(), "autonomous session starting");

        if let Err(e) = self.diagnose().await {
            return self.finish(initial_failure(e));
        }

        let mut consecutive_failures = 0;
        let mut state = AutoState::Deciding;
        loop {
            state = match state {
                AutoState::Finished(termination) => return self.finish(termination),
                AutoState::Deciding => self.decide().await,
                AutoState::Executing(decision) => self.execute_decision(decision, &consent).await,
                AutoState::Searching(decision) => match self.search(decision.search_query()).await {
                    Ok(()) => AutoState::Deciding,
                    Err(e) => AutoState::Finished(Session::termination_for(&e)),
                },
                AutoState::Skipping(decision) => {
                    self.skip_focus(&decision.reason);
                    AutoState::Deciding
                }
                AutoState::Verifying { outcome, focus } => {
                    self.verify(outcome, focus, &mut consecutive_failures).await
                }
            };
        }
    }

    async fn decide(&mut self) -> AutoState {
        if self.deadline.is_expired() {
            return AutoState::Finished(Termination::TimedOut);
        }
        if self.budget_exhausted() {
            return AutoState::Finished(Termination::BudgetExhausted);
        }
        if self.turn_limit_reached() {
            warn!(session_id = %self.id, turns = self.turns, "turn limit reached without DONE");
            return AutoState::Finished(Termination::TurnLimit);
        }
        self.turns += 1;

        let decision = match self.next_decision().await {
            Ok(decision) => decision,
            Err(e) => return AutoState::Finished(Session::termination_for(&e)),
        };
        info!(
            session_id = %self.id,
            turn = self.turns,
            action = %decision.action,
            command = decision.command.as_deref().unwrap_or(""),
            "decision received"
        );
        self.emit(SessionEvent::Decided(decision.clone()));

        match decision.action {
            DecisionAction::Exec => AutoState::Executing(decision),
            DecisionAction::Search => AutoState::Searching(decision),
            DecisionAction::Skip => AutoState::Skipping(decision),
            DecisionAction::Done => AutoState::Finished(Termination::Completed),
        }
    }

    /// Ask for one decision, with at most one corrective re-prompt.
    async fn next_decision(&mut self) -> MenderResult<Decision> {
        let prompt = self.outbound(&decision_prompt(&self.turn_context()));
        let request = ModelRequest::new(AUTONOMOUS_SYSTEM_PROMPT, prompt.clone());
        let reply = self.ask(&request).await?;

        let reason = match self.verifier.check(&reply.text) {
            DecisionCheck::Valid(decision) => return Ok(decision),
            DecisionCheck::NeedsCorrection { reason } => reason,
        };
        self.record_error(format!("malformed decision: {reason}"));

        let retry = ModelRequest::new(AUTONOMOUS_SYSTEM_PROMPT, correction_prompt(&reason))
            .with_history(vec![ChatMessage::user(prompt), ChatMessage::assistant(reply.text)]);
        let reply = self.ask(&retry).await?;

        match self.verifier.check(&reply.text) {
            DecisionCheck::Valid(decision) => Ok(decision),
            DecisionCheck::NeedsCorrection { reason } => Err(MenderError::ProtocolViolation {
                reason: format!("second malformed decision: {reason}"),
            }),
        }
    }

    async fn execute_decision(&mut self, decision: Decision, consent: &SessionConsent) -> AutoState {
        let command = decision.command.unwrap_or_default();
        let focus = self.graph.next_actionable().map(|p| p.fingerprint.clone());

        let outcome = self
            .executor
            .execute(&command, Authorization::Session(consent), &self.deadline)
            .await;
        match outcome {
            Ok(outcome) => {
                self.actions_taken += 1;
                if let Some(fingerprint) = &focus {
                    self.graph.begin_attempt(fingerprint);
                }
                AutoState::Verifying { outcome, focus }
            }
            Err(MenderError::ForbiddenCommand { command, reason }) => {
                self.record_blocked(&command, &reason);
                AutoState::Deciding
            }
            Err(e) => AutoState::Finished(Session::termination_for(&e)),
        }
    }

    async fn verify(
        &mut self,
        outcome: ExecutionOutcome,
        focus: Option<Fingerprint>,
        consecutive_failures: &mut u32,
    ) -> AutoState {
        self.record_outcome(&outcome);

        if outcome.is_failure() {
            *consecutive_failures += 1;
            if let Some(fingerprint) = &focus {
                self.graph.record_failure(fingerprint);
            }
            if *consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                warn!(session_id = %self.id, count = *consecutive_failures, "too many consecutive failures");
                return AutoState::Finished(Termination::Aborted {
                    reason: AbortReason::ConsecutiveFailures {
                        count: *consecutive_failures,
                    },
                });
            }
        } else {
            *consecutive_failures = 0;
            if let Some(fingerprint) = &focus {
                self.graph.record_success(fingerprint);
            }
        }

        if matches!(outcome, ExecutionOutcome::Executed(_)) {
            if let Err(e) = self.rediagnose().await {
                return AutoState::Finished(Session::termination_for(&e));
            }
        }
        AutoState::Deciding
    }

    /// Give up on the current focus problem for the rest of the session.
    fn skip_focus(&mut self, reason: &str) {
        match self.graph.next_actionable().cloned() {
            Some(problem) => {
                self.graph.block(&problem.fingerprint);
                info!(session_id = %self.id, fingerprint = %problem.fingerprint, %reason, "problem skipped");
                self.note(format!("skipped {}/{}: {reason}", problem.module, problem.check));
            }
            None => self.note(format!("skip requested with no problem in focus: {reason}")),
        }
    }
}

/// The termination for a failed first diagnosis.
pub(crate) fn initial_failure(error: MenderError) -> Termination {
    match error {
        MenderError::SessionTimeout => Termination::TimedOut,
        other => Termination::Aborted {
            reason: AbortReason::Collection {
                reason: other.to_string(),
            },
        },
    }
}
