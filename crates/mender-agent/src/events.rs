//! Progress events a session reports while it runs.
//!
//! The session never prints. A front end implements `SessionObserver` to
//! render events; tests use it to watch the loop.

use mender_contracts::{
    anonymize::AnonymizationReport,
    decision::Decision,
    execution::ExecutionOutcome,
    knowledge::SearchRecord,
    problem::Problem,
};
use mender_graph::CycleReport;

use crate::prompts::ProposedFix;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A diagnosis pass finished.
    Diagnosed {
        problems: Vec<Problem>,
        report: AnonymizationReport,
    },
    /// The ordering rules contradict each other for some problems.
    OrderingCycle(CycleReport),
    /// Incremental model output.
    ModelChunk(String),
    /// A complete free-form model reply (human-in-the-loop).
    Proposal {
        reply: String,
        fixes: Vec<ProposedFix>,
    },
    /// A verified autonomous decision.
    Decided(Decision),
    /// The executor finished with a command.
    Outcome(ExecutionOutcome),
    /// The gate refused a command.
    Blocked { command: String, reason: String },
    Searched(SearchRecord),
    /// Re-diagnosis changed the problem set.
    GraphUpdated {
        resolved: Vec<Problem>,
        added: Vec<Problem>,
    },
    /// Anything else worth showing the operator.
    Notice(String),
}

pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_event(&self, _event: &SessionEvent) {}
}
