//! The mender command executor: the only path from a suggestion to a process.
//!
//! Every command goes through the same pipeline:
//!
//!   Guard → Policy → Guard → Deadline → Authorization → [dry run] → Probe → Deadline → Run → Log
//!
//! The safety invariant is absolute: a command matching a built-in forbidden
//! pattern never reaches `ProcessRunner::run()`, whatever the mode, policy or
//! authorization. Only one command is in flight per executor; the executor is
//! constructed once per session.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use mender_contracts::{
    error::{MenderError, MenderResult},
    execution::{ExecutionOutcome, PreparedCommand},
};

use crate::{
    deadline::Deadline,
    guard,
    traits::{Approver, CommandPolicy, CommandVerdict, ExecutionLog, ProcessRunner, RunLimits},
};

/// Upper bound for a read-only idempotence probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Proof that the operator consented to autonomous execution for this
/// session. Obtain it once, at session start, after asking.
#[derive(Debug, Clone)]
pub struct SessionConsent {
    granted_at: chrono::DateTime<Utc>,
}

impl SessionConsent {
    /// Record that the operator has just agreed to autonomous execution.
    pub fn granted() -> Self {
        Self { granted_at: Utc::now() }
    }

    pub fn granted_at(&self) -> chrono::DateTime<Utc> {
        self.granted_at
    }
}

/// How a command is authorized to run.
#[derive(Clone, Copy)]
pub enum Authorization<'a> {
    /// Ask this approver about this exact command.
    PerCommand(&'a dyn Approver),
    /// Covered by the blanket consent given at session start.
    Session(&'a SessionConsent),
}

/// Tunables for one session's executor.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub command_timeout: Duration,
    pub grace_period: Duration,
    pub dry_run: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(120),
            grace_period: Duration::from_secs(5),
            dry_run: false,
        }
    }
}

/// The central executor that gates and runs commands for one session.
pub struct CommandExecutor {
    policy: Box<dyn CommandPolicy>,
    runner: Box<dyn ProcessRunner>,
    log: Arc<dyn ExecutionLog>,
    settings: ExecutorSettings,
    in_flight: Mutex<()>,
}

impl CommandExecutor {
    pub fn new(
        policy: Box<dyn CommandPolicy>,
        runner: Box<dyn ProcessRunner>,
        log: Arc<dyn ExecutionLog>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            policy,
            runner,
            log,
            settings,
            in_flight: Mutex::new(()),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.settings.dry_run
    }

    /// Run the gate checks only: return the normalized command or the
    /// forbidden-command error, without authorization or execution.
    pub fn prepare(&self, raw: &str) -> MenderResult<PreparedCommand> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MenderError::ForbiddenCommand {
                command: String::new(),
                reason: "empty command".to_string(),
            });
        }

        if let Some(pattern) = guard::check(raw) {
            return Err(forbidden(raw, pattern.id, pattern.reason));
        }

        let prepared = match self.policy.evaluate(raw) {
            CommandVerdict::Forbidden { rule_id, reason } => {
                return Err(forbidden(raw, &rule_id, &reason));
            }
            CommandVerdict::Permitted(prepared) => prepared,
        };

        // The policy rewrote the command; the rewrite gets the same scrutiny.
        if let Some(pattern) = guard::check(&prepared.command) {
            return Err(forbidden(&prepared.command, pattern.id, pattern.reason));
        }

        Ok(prepared)
    }

    /// Gate, authorize and run one command.
    ///
    /// # Pipeline
    ///
    /// 1. Built-in forbidden list, policy evaluation, built-in list again on
    ///    the normalized command → `ForbiddenCommand`
    /// 2. Deadline check → `SessionTimeout`
    /// 3. Authorization: per-command approval or session consent
    ///    → `Declined` when refused
    /// 4. Dry run → `DryRun`, nothing spawned
    /// 5. Idempotence probe → `AlreadySatisfied` when it succeeds
    /// 6. Deadline check, immediately before spawning → `SessionTimeout`
    /// 7. Run under the per-command timeout and the session deadline
    /// 8. Append to the execution log → `Executed`
    ///
    /// # Errors
    ///
    /// Only `ForbiddenCommand`, `SessionTimeout` and `ExecutionLogFailed`.
    /// A nonzero exit is a normal `Executed` outcome.
    pub async fn execute(
        &self,
        raw: &str,
        authorization: Authorization<'_>,
        deadline: &Deadline,
    ) -> MenderResult<ExecutionOutcome> {
        // One execution in flight per session; held across the whole pipeline.
        let _slot = self.in_flight.lock().await;

        // ── Step 1: Forbidden patterns and normalization ─────────────────────
        let prepared = match self.prepare(raw) {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!(command = %raw, error = %err, "command blocked before execution");
                return Err(err);
            }
        };

        debug!(
            original = %prepared.original,
            command = %prepared.command,
            elevated = prepared.elevated,
            non_interactive_injected = prepared.non_interactive_injected,
            "command normalized"
        );

        // ── Step 2: Deadline ─────────────────────────────────────────────────
        if deadline.is_expired() {
            warn!(command = %prepared.command, "deadline elapsed before authorization");
            return Err(MenderError::SessionTimeout);
        }

        // ── Step 3: Authorization ────────────────────────────────────────────
        let approved = match authorization {
            Authorization::PerCommand(approver) => {
                deadline.bound(approver.approve(&prepared)).await?
            }
            Authorization::Session(consent) => {
                debug!(
                    command = %prepared.command,
                    consent_granted_at = %consent.granted_at(),
                    "covered by session consent"
                );
                true
            }
        };
        if !approved {
            info!(command = %prepared.command, "command declined by operator");
            return Ok(ExecutionOutcome::Declined { command: prepared.command });
        }

        // ── Step 4: Dry run ──────────────────────────────────────────────────
        if self.settings.dry_run {
            info!(command = %prepared.command, "dry run, not executing");
            return Ok(ExecutionOutcome::DryRun(prepared));
        }

        // ── Step 5: Idempotence probe ────────────────────────────────────────
        if let Some(probe) = self.policy.precheck(&prepared.command) {
            if let Some(outcome) = self.probe(&prepared, probe, deadline).await? {
                return Ok(outcome);
            }
        }

        // ── Step 6: Deadline, race-free ──────────────────────────────────────
        //
        // Nothing awaits between this check and the spawn inside run(), and
        // the in-flight slot is held, so no command starts after expiry.
        if deadline.is_expired() {
            warn!(command = %prepared.command, "deadline elapsed, command not started");
            return Err(MenderError::SessionTimeout);
        }

        // ── Step 7: Run ──────────────────────────────────────────────────────
        let limits = RunLimits {
            timeout: self.settings.command_timeout,
            deadline,
            grace_period: self.settings.grace_period,
        };
        let result = self.runner.run(&prepared, limits).await;

        info!(
            command = %result.command,
            exit_status = ?result.exit_status,
            timed_out = result.timed_out,
            duration_ms = result.duration.as_millis() as u64,
            "command finished"
        );

        // ── Step 8: Log ──────────────────────────────────────────────────────
        //
        // Appended even when the deadline cut the process short.
        self.log.append(&result)?;

        Ok(ExecutionOutcome::Executed(result))
    }

    /// Run the idempotence probe. `Some` short-circuits the pipeline.
    async fn probe(
        &self,
        prepared: &PreparedCommand,
        probe: String,
        deadline: &Deadline,
    ) -> MenderResult<Option<ExecutionOutcome>> {
        if deadline.is_expired() {
            return Err(MenderError::SessionTimeout);
        }
        let probe_command = PreparedCommand {
            original: probe.clone(),
            command: probe.clone(),
            elevated: false,
            non_interactive_injected: false,
        };
        let limits = RunLimits {
            timeout: PROBE_TIMEOUT,
            deadline,
            grace_period: Duration::ZERO,
        };
        let result = self.runner.run(&probe_command, limits).await;
        if result.succeeded() {
            info!(command = %prepared.command, probe = %probe, "already satisfied, skipping");
            return Ok(Some(ExecutionOutcome::AlreadySatisfied {
                command: prepared.command.clone(),
                probe,
            }));
        }
        debug!(probe = %probe, exit_status = ?result.exit_status, "probe did not match");
        Ok(None)
    }
}

fn forbidden(command: &str, rule_id: &str, reason: &str) -> MenderError {
    MenderError::ForbiddenCommand {
        command: command.to_string(),
        reason: format!("{reason} [{rule_id}]"),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
