//! State shared by both session machines.
//!
//! A `Session` owns everything one invocation needs: the deadline, the
//! executor and its log, the problem graph, the conversation history and the
//! running tallies that end up in the `SessionSummary`. The machines in
//! `autonomous` and `hitl` drive it; nothing here decides what to do next.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use mender_audit::InMemoryExecutionLog;
use mender_contracts::{
    anonymize::AnonymizationReport,
    error::{MenderError, MenderResult},
    execution::ExecutionOutcome,
    knowledge::SearchRecord,
    problem::Problem,
    session::{AbortReason, BlockedCommand, SessionConfig, SessionId, SessionSummary, Termination},
};
use mender_core::{
    traits::{CommandPolicy, ExecutionLog, FactCollector, KnowledgeSource, ProcessRunner},
    CommandExecutor, Deadline, ExecutorSettings,
};
use mender_graph::{infer, InferenceRule, OrderingTable, ProblemGraph};
use mender_oracle::{ModelReply, ModelRequest, OracleClient};
use mender_sanitize::{Sanitizer, SensitiveContext};
use mender_verify::DecisionVerifier;

use crate::{
    events::{SessionEvent, SessionObserver},
    knowledge::KnowledgeFanout,
    prompts::TurnContext,
};

/// Everything a session is wired from.
pub struct SessionDeps {
    pub collector: Arc<dyn FactCollector>,
    pub oracle: OracleClient,
    pub policy: Box<dyn CommandPolicy>,
    pub runner: Box<dyn ProcessRunner>,
    /// Knowledge sources in priority order.
    pub knowledge: Vec<Arc<dyn KnowledgeSource>>,
    pub sensitive: SensitiveContext,
    pub observer: Arc<dyn SessionObserver>,
    pub ordering: OrderingTable,
    pub rules: Vec<InferenceRule>,
    /// Consume model replies as a stream, reporting each chunk.
    pub stream: bool,
}

/// One remediation session.
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) config: SessionConfig,
    pub(crate) deadline: Deadline,
    started_at: DateTime<Utc>,

    collector: Arc<dyn FactCollector>,
    pub(crate) oracle: OracleClient,
    pub(crate) executor: CommandExecutor,
    log: InMemoryExecutionLog,
    pub(crate) verifier: DecisionVerifier,
    sanitizer: Sanitizer,
    knowledge: KnowledgeFanout,
    observer: Arc<dyn SessionObserver>,
    rules: Vec<InferenceRule>,
    stream: bool,

    pub(crate) graph: ProblemGraph,
    facts_text: String,
    history: Vec<String>,
    pub(crate) notes: Vec<String>,

    pub(crate) actions_taken: u32,
    pub(crate) turns: u32,
    searches: Vec<SearchRecord>,
    blocked: Vec<BlockedCommand>,
    errors: Vec<String>,
    anonymization: AnonymizationReport,
}

impl Session {
    /// Validate `config` and wire a session. The deadline starts now.
    pub fn new(config: SessionConfig, deps: SessionDeps) -> MenderResult<Self> {
        config.validate()?;

        let id = SessionId::new();
        let log = InMemoryExecutionLog::new(id.to_string());
        let executor = CommandExecutor::new(
            deps.policy,
            deps.runner,
            Arc::new(log.clone()),
            ExecutorSettings {
                command_timeout: config.command_timeout,
                grace_period: config.grace_period,
                dry_run: config.dry_run,
            },
        );

        info!(
            session_id = %id,
            mode = %config.mode,
            max_fixes = config.max_fixes,
            dry_run = config.dry_run,
            backend = %deps.oracle.backend_name(),
            "session created"
        );

        Ok(Self {
            deadline: Deadline::after(config.session_timeout),
            started_at: Utc::now(),
            collector: deps.collector,
            oracle: deps.oracle,
            executor,
            log,
            verifier: DecisionVerifier::new()?,
            sanitizer: Sanitizer::new(&deps.sensitive),
            knowledge: KnowledgeFanout::new(deps.knowledge),
            observer: deps.observer,
            rules: deps.rules,
            stream: deps.stream,
            graph: ProblemGraph::build(Vec::new(), deps.ordering),
            facts_text: String::new(),
            history: Vec::new(),
            notes: Vec::new(),
            actions_taken: 0,
            turns: 0,
            searches: Vec::new(),
            blocked: Vec::new(),
            errors: Vec::new(),
            anonymization: AnonymizationReport::default(),
            id,
            config,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// A handle on the session deadline, e.g. for a Ctrl+C handler to call
    /// `expire_now()`.
    pub fn deadline(&self) -> Deadline {
        self.deadline.clone()
    }

    pub fn graph(&self) -> &ProblemGraph {
        &self.graph
    }

    /// The execution log; clones share its entries.
    pub fn execution_log(&self) -> &InMemoryExecutionLog {
        &self.log
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        self.observer.on_event(&event);
    }

    /// Record a non-fatal error for the summary.
    pub(crate) fn record_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        warn!(session_id = %self.id, %error, "session error recorded");
        self.errors.push(error);
    }

    pub(crate) fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub(crate) fn budget_exhausted(&self) -> bool {
        self.actions_taken >= self.config.max_fixes
    }

    pub(crate) fn turn_limit_reached(&self) -> bool {
        self.turns >= self.config.effective_max_turns()
    }

    // ── Diagnosis ─────────────────────────────────────────────────────────────

    /// Collect, sanitize and infer. Updates the fact text the model sees.
    async fn observe(&mut self) -> MenderResult<Vec<Problem>> {
        let collected = self
            .deadline
            .bound(self.collector.collect(&self.config.modules))
            .await??;
        let modules = &self.config.modules;
        let facts = collected.retain_modules(|m| modules.allows(m));

        let sanitized = self.sanitizer.sanitize(&facts);
        self.anonymization.absorb(&sanitized.report);
        self.facts_text = sanitized.text;

        let problems = infer(&facts, &self.rules);
        debug!(session_id = %self.id, problems = problems.len(), "facts collected");
        self.emit(SessionEvent::Diagnosed {
            problems: problems.clone(),
            report: sanitized.report,
        });
        Ok(problems)
    }

    /// The first diagnosis. A failure here ends the session.
    pub(crate) async fn diagnose(&mut self) -> MenderResult<()> {
        let problems = self.observe().await?;
        self.graph = ProblemGraph::build(problems, self.graph.table().clone());
        self.report_cycle();
        info!(session_id = %self.id, problems = self.graph.len(), "initial diagnosis complete");
        Ok(())
    }

    /// Re-diagnose after an executed action and fold the result into the
    /// graph, returning how many problems were resolved. Only the deadline
    /// is fatal; a collection failure is recorded and the old graph kept.
    pub(crate) async fn rediagnose(&mut self) -> MenderResult<usize> {
        let problems = match self.observe().await {
            Ok(problems) => problems,
            Err(MenderError::SessionTimeout) => return Err(MenderError::SessionTimeout),
            Err(e) => {
                self.record_error(format!("re-diagnosis failed: {e}"));
                return Ok(0);
            }
        };
        let delta = self.graph.reconcile(problems);
        let resolved = delta.resolved.len();
        if !delta.is_empty() {
            info!(
                session_id = %self.id,
                resolved,
                added = delta.added.len(),
                "problem graph updated"
            );
            self.emit(SessionEvent::GraphUpdated {
                resolved: delta.resolved,
                added: delta.added,
            });
        }
        self.report_cycle();
        Ok(resolved)
    }

    fn report_cycle(&mut self) {
        if let Some(cycle) = self.graph.schedule().cycle.clone() {
            self.record_error(cycle.to_error().to_string());
            self.emit(SessionEvent::OrderingCycle(cycle));
        }
    }

    // ── Model ─────────────────────────────────────────────────────────────────

    pub(crate) fn turn_context(&self) -> TurnContext<'_> {
        TurnContext {
            facts: &self.facts_text,
            graph: &self.graph,
            history: &self.history,
            notes: &self.notes,
            actions_taken: self.actions_taken,
            max_fixes: self.config.max_fixes,
            remaining: self.deadline.remaining(),
        }
    }

    /// Final masking pass over anything about to leave the machine.
    pub(crate) fn outbound(&self, text: &str) -> String {
        self.sanitizer.sanitize_text(text).text
    }

    /// Ask the oracle, streaming when configured.
    pub(crate) async fn ask(&self, request: &ModelRequest) -> MenderResult<ModelReply> {
        if !self.stream {
            return self.oracle.ask(request, &self.deadline).await;
        }
        let observer = Arc::clone(&self.observer);
        let mut on_chunk = move |chunk: &str| observer.on_event(&SessionEvent::ModelChunk(chunk.to_string()));
        self.oracle.ask_streaming(request, &self.deadline, &mut on_chunk).await
    }

    // ── Outcomes ──────────────────────────────────────────────────────────────

    /// Add an outcome to the conversation history, sanitized.
    pub(crate) fn record_outcome(&mut self, outcome: &ExecutionOutcome) {
        let sanitized = self.sanitizer.sanitize_text(&outcome.to_context());
        self.anonymization.absorb(&sanitized.report);
        self.history.push(sanitized.text);
        let window = self.config.history_window.max(1);
        if self.history.len() > window {
            let excess = self.history.len() - window;
            self.history.drain(..excess);
        }
        self.emit(SessionEvent::Outcome(outcome.clone()));
    }

    /// A command the gate refused. The session continues.
    pub(crate) fn record_blocked(&mut self, command: &str, reason: &str) {
        warn!(session_id = %self.id, %command, %reason, "forbidden command blocked");
        self.note(format!("BLOCKED `{command}`: {reason}. Do not propose it again."));
        self.blocked.push(BlockedCommand {
            command: command.to_string(),
            reason: reason.to_string(),
        });
        self.emit(SessionEvent::Blocked {
            command: command.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Query the knowledge sources and keep the hits as notes.
    ///
    /// Only `SessionTimeout` is returned as an error; source failures and an
    /// exhausted search budget become notes and recorded errors.
    pub(crate) async fn search(&mut self, query: &str) -> MenderResult<()> {
        if self.searches.len() as u32 >= self.config.max_searches {
            self.note(format!("search for '{query}' refused: search budget used up"));
            return Ok(());
        }
        if self.knowledge.is_empty() {
            self.note(format!("search for '{query}' not possible: no knowledge sources configured"));
            return Ok(());
        }

        let query = self.outbound(query);
        let outcome = self.knowledge.search(&query, &self.deadline).await?;
        for failure in outcome.failures {
            self.record_error(failure);
        }

        let record = outcome.record;
        if record.hits.is_empty() {
            self.note(format!("search '{}' found nothing", record.query));
        } else {
            let mut note = format!("search '{}' results:\n", record.query);
            for hit in &record.hits {
                note.push_str(&hit.to_context());
            }
            self.note(note);
        }
        self.emit(SessionEvent::Searched(record.clone()));
        self.searches.push(record);
        Ok(())
    }

    // ── Termination ───────────────────────────────────────────────────────────

    /// The termination a session-fatal error leads to.
    pub(crate) fn termination_for(error: &MenderError) -> Termination {
        let reason = match error {
            MenderError::SessionTimeout => return Termination::TimedOut,
            MenderError::ExecutionLogFailed { reason } => AbortReason::ExecutionLog {
                reason: reason.clone(),
            },
            MenderError::ProtocolViolation { reason } => AbortReason::ProtocolViolation {
                reason: reason.clone(),
            },
            MenderError::Collection { reason } => AbortReason::Collection {
                reason: reason.clone(),
            },
            // The remaining variants reach the loop only through the oracle.
            other => AbortReason::Provider {
                reason: other.to_string(),
            },
        };
        Termination::Aborted { reason }
    }

    /// Seal the execution log and build the summary.
    pub(crate) fn finish(mut self, termination: Termination) -> SessionSummary {
        if termination.is_abort() || termination == Termination::TimedOut {
            warn!(session_id = %self.id, %termination, "session ended early");
        } else {
            info!(session_id = %self.id, %termination, "session finished");
        }

        if let Err(e) = self.log.flush(&self.id.to_string()) {
            self.record_error(e.to_string());
        }
        if !self.log.verify_integrity() {
            self.record_error("execution log failed its integrity check");
        }

        SessionSummary {
            session_id: self.id,
            mode: self.config.mode,
            termination,
            started_at: self.started_at,
            finished_at: Utc::now(),
            actions_taken: self.actions_taken,
            executions: self.log.results(),
            resolved: self.graph.resolved_problems().to_vec(),
            pending: self.graph.open_problems(),
            blocked: self.blocked,
            searches: self.searches,
            errors: self.errors,
            anonymization: self.anonymization,
            log_terminal_hash: self.log.terminal_hash(),
        }
    }
}
