//! Core trait definitions for the mender remediation pipeline.
//!
//! These traits mark the trust boundary of a session:
//!
//! - `FactCollector` : untrusted probe of the machine's state
//! - `CommandPolicy` : trusted gate (elevation, interactivity, extra bans)
//! - `Approver`      : the human who confirms a specific command
//! - `ProcessRunner` : the only thing that spawns processes
//! - `ExecutionLog`  : trusted sink (records every spawned command)
//! - `KnowledgeSource` : untrusted external search
//!
//! The executor wires policy, approver, runner and log together in a fixed
//! order. Nothing else in the workspace spawns a process.

use std::time::Duration;

use async_trait::async_trait;

use mender_contracts::{
    error::MenderResult,
    execution::{ExecutionResult, PreparedCommand},
    fact::FactSet,
    knowledge::SearchHit,
    session::ModuleFilter,
};

use crate::deadline::Deadline;

/// Produces a fresh fact snapshot of the machine.
///
/// Called once at session start and once after every executed action.
#[async_trait]
pub trait FactCollector: Send + Sync {
    async fn collect(&self, modules: &ModuleFilter) -> MenderResult<FactSet>;
}

/// The verdict a command policy returns for one raw command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandVerdict {
    /// The command must never run.
    Forbidden { rule_id: String, reason: String },
    /// The command may run in this normalized form, subject to authorization.
    Permitted(PreparedCommand),
}

/// Decides how a raw command is allowed to run.
///
/// Implementations are **trusted** and must be deterministic and fast: no
/// I/O. The built-in forbidden list in `crate::guard` is checked by the
/// executor before and after the policy, so a policy can only add bans.
pub trait CommandPolicy: Send + Sync {
    fn evaluate(&self, command: &str) -> CommandVerdict;

    /// A read-only probe whose success means `command` has nothing left to
    /// do (e.g. `rpm -q foo` for `dnf install foo`).
    fn precheck(&self, _command: &str) -> Option<String> {
        None
    }
}

/// Confirms individual commands on the operator's behalf.
#[async_trait]
pub trait Approver: Send + Sync {
    /// Return true to allow exactly this command to run once.
    async fn approve(&self, command: &PreparedCommand) -> bool;
}

/// Bounds applied to a single subprocess.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits<'a> {
    /// Per-command timeout.
    pub timeout: Duration,
    /// The session deadline.
    pub deadline: &'a Deadline,
    /// Time a running process is given after the deadline fires.
    pub grace_period: Duration,
}

/// Spawns one process and captures its result.
///
/// A runner never returns an error: spawn failures, timeouts and signals are
/// all represented in the returned `ExecutionResult`.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &PreparedCommand, limits: RunLimits<'_>) -> ExecutionResult;
}

/// The append-only record of every command a session spawned.
///
/// The executor is the only writer. A failed append is fatal to the session.
pub trait ExecutionLog: Send + Sync {
    /// Append one result. Entries are never modified or removed.
    fn append(&self, result: &ExecutionResult) -> MenderResult<()>;

    /// Seal the log at the end of a session, flushing any buffered entries.
    fn flush(&self, session_id: &str) -> MenderResult<()>;
}

/// An external knowledge base queried on SEARCH decisions.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a non-empty answer from this source is good enough to stop
    /// waiting for lower-priority sources.
    fn is_definitive(&self) -> bool {
        true
    }

    async fn search(&self, query: &str) -> MenderResult<Vec<SearchHit>>;
}
