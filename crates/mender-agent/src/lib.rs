//! # mender-agent
//!
//! The remediation session: diagnose, ask the oracle, act through the
//! executor, re-diagnose. Two state machines share one `Session`:
//!
//! - `Session::run_hitl` proposes fixes and lets an `Operator` choose and
//!   confirm each command.
//! - `Session::run_autonomous` asks for one structured `Decision` per turn
//!   and runs it under a single upfront `SessionConsent`.
//!
//! Both end with a `SessionSummary`; neither returns an error.

pub mod autonomous;
pub mod events;
pub mod hitl;
pub mod knowledge;
pub mod operator;
pub mod prompts;
pub mod session;

pub use autonomous::MAX_CONSECUTIVE_FAILURES;
pub use events::{NullObserver, SessionEvent, SessionObserver};
pub use knowledge::{KnowledgeFanout, SearchOutcome};
pub use operator::{Operator, OperatorApproval, OperatorInput};
pub use prompts::{extract_fixes, ProposedFix};
pub use session::{Session, SessionDeps};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use mender_contracts::{
        error::{MenderError, MenderResult},
        execution::{ExecutionOutcome, ExecutionResult, PreparedCommand},
        fact::FactSet,
        knowledge::SearchHit,
        session::{AbortReason, ModuleFilter, SessionConfig, SessionMode, Termination},
    };
    use mender_core::{
        traits::{FactCollector, KnowledgeSource, ProcessRunner, RunLimits},
        Deadline, SessionConsent,
    };
    use mender_graph::{builtin_rules, OrderingTable};
    use mender_oracle::{OracleClient, RetryPolicy, ScriptStep, ScriptedBackend};
    use mender_policy::SafetyPolicy;
    use mender_sanitize::SensitiveContext;

    use super::*;

    // ── Test doubles ──────────────────────────────────────────────────────────

    /// Plays back fact snapshots; the last one repeats.
    struct FakeCollector {
        snapshots: Mutex<VecDeque<FactSet>>,
        last: Mutex<Option<FactSet>>,
        fail: bool,
        collections: AtomicUsize,
    }

    impl FakeCollector {
        fn sequence(snapshots: Vec<FactSet>) -> Self {
            Self {
                snapshots: Mutex::new(snapshots.into()),
                last: Mutex::new(None),
                fail: false,
                collections: AtomicUsize::new(0),
            }
        }

        fn collections(&self) -> usize {
            self.collections.load(Ordering::SeqCst)
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::sequence(Vec::new())
            }
        }
    }

    #[async_trait]
    impl FactCollector for FakeCollector {
        async fn collect(&self, _modules: &ModuleFilter) -> MenderResult<FactSet> {
            self.collections.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(MenderError::Collection {
                    reason: "probe exploded".to_string(),
                });
            }
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.snapshots.lock().unwrap().pop_front() {
                *last = Some(next);
            }
            Ok(last.clone().unwrap_or_else(|| FactSet::builder().build()))
        }
    }

    /// Records every command and answers with scripted exit codes (0 once
    /// the script runs out).
    #[derive(Clone, Default)]
    struct FakeRunner {
        commands: Arc<Mutex<Vec<String>>>,
        exits: Arc<Mutex<VecDeque<i32>>>,
    }

    impl FakeRunner {
        fn with_exits(exits: &[i32]) -> Self {
            let runner = Self::default();
            runner.exits.lock().unwrap().extend(exits.iter().copied());
            runner
        }

        fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessRunner for FakeRunner {
        async fn run(&self, command: &PreparedCommand, _limits: RunLimits<'_>) -> ExecutionResult {
            self.commands.lock().unwrap().push(command.command.clone());
            let code = self.exits.lock().unwrap().pop_front().unwrap_or(0);
            ExecutionResult {
                command: command.command.clone(),
                exit_status: Some(code),
                stdout: "done".to_string(),
                stderr: if code == 0 { String::new() } else { "it broke".to_string() },
                duration: Duration::from_millis(5),
                elevated: command.elevated,
                timed_out: false,
                started_at: Utc::now(),
            }
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<SessionEvent>>,
    }

    impl RecordingObserver {
        fn events(&self) -> Vec<SessionEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl SessionObserver for RecordingObserver {
        fn on_event(&self, event: &SessionEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    /// Types scripted lines, then hits end of input.
    struct ScriptedOperator {
        inputs: Mutex<VecDeque<String>>,
        approve: bool,
        confirmed: Mutex<Vec<String>>,
    }

    impl ScriptedOperator {
        fn new(inputs: &[&str], approve: bool) -> Self {
            Self {
                inputs: Mutex::new(inputs.iter().map(|s| s.to_string()).collect()),
                approve,
                confirmed: Mutex::new(Vec::new()),
            }
        }

        fn confirmations(&self) -> Vec<String> {
            self.confirmed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Operator for ScriptedOperator {
        async fn next_input(&self, _fixes: &[ProposedFix]) -> Option<String> {
            self.inputs.lock().unwrap().pop_front()
        }

        async fn describe_problem(&self) -> Option<String> {
            self.inputs.lock().unwrap().pop_front()
        }

        async fn confirm(&self, command: &PreparedCommand) -> bool {
            self.confirmed.lock().unwrap().push(command.command.clone());
            self.approve
        }
    }

    struct FakeSource {
        name: &'static str,
        definitive: bool,
        delay: Duration,
        result: Result<usize, &'static str>,
    }

    impl FakeSource {
        fn hits(name: &'static str, definitive: bool, count: usize, delay_ms: u64) -> Arc<dyn KnowledgeSource> {
            Arc::new(Self {
                name,
                definitive,
                delay: Duration::from_millis(delay_ms),
                result: Ok(count),
            })
        }

        fn failing(name: &'static str) -> Arc<dyn KnowledgeSource> {
            Arc::new(Self {
                name,
                definitive: true,
                delay: Duration::ZERO,
                result: Err("HTTP 503"),
            })
        }
    }

    #[async_trait]
    impl KnowledgeSource for FakeSource {
        fn name(&self) -> &str {
            self.name
        }

        fn is_definitive(&self) -> bool {
            self.definitive
        }

        async fn search(&self, query: &str) -> MenderResult<Vec<SearchHit>> {
            tokio::time::sleep(self.delay).await;
            match self.result {
                Ok(count) => Ok((0..count)
                    .map(|i| SearchHit {
                        source: self.name.to_string(),
                        title: format!("{} result {i} for {query}", self.name),
                        url: format!("https://example.org/{}/{i}", self.name),
                        snippet: "try restarting it".to_string(),
                    })
                    .collect()),
                Err(reason) => Err(MenderError::Knowledge {
                    source_name: self.name.to_string(),
                    reason: reason.to_string(),
                }),
            }
        }
    }

    // ── Fixtures ──────────────────────────────────────────────────────────────

    const RESTART_AUDIO: &str = "systemctl --user restart pipewire";
    const VACUUM: &str = "journalctl --vacuum-size=200M";
    const RESTART_SESSION: &str = "systemctl --user restart wireplumber";
    const DONE: &str = r#"{"action": "DONE", "command": null, "reason": "nothing left"}"#;

    fn exec(command: &str) -> String {
        format!(r#"{{"action": "EXEC", "command": "{command}", "reason": "fix it"}}"#)
    }

    /// PipeWire down (warning) and an oversized journal (minor).
    fn broken_facts() -> FactSet {
        FactSet::builder()
            .fact("audio", "pipewire_active", false)
            .fact("audio", "sink_count", 1u64)
            .fact("logs", "journal_size_mb", 2048u64)
            .build()
    }

    fn healthy_facts() -> FactSet {
        FactSet::builder()
            .fact("audio", "pipewire_active", true)
            .fact("audio", "sink_count", 1u64)
            .fact("logs", "journal_size_mb", 120u64)
            .build()
    }

    fn config(mode: SessionMode, max_fixes: u32) -> SessionConfig {
        SessionConfig {
            mode,
            max_fixes,
            ..SessionConfig::default()
        }
    }

    struct Harness {
        collector: Arc<dyn FactCollector>,
        runner: FakeRunner,
        observer: Arc<RecordingObserver>,
        knowledge: Vec<Arc<dyn KnowledgeSource>>,
        stream: bool,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                collector: Arc::new(FakeCollector::sequence(vec![broken_facts()])),
                runner: FakeRunner::default(),
                observer: Arc::new(RecordingObserver::default()),
                knowledge: Vec::new(),
                stream: false,
            }
        }

        fn session(&self, config: SessionConfig, backend: &Arc<ScriptedBackend>) -> Session {
            Session::new(
                config,
                SessionDeps {
                    collector: Arc::clone(&self.collector),
                    oracle: OracleClient::new(backend.clone(), RetryPolicy::immediate()),
                    policy: Box::new(SafetyPolicy::builtin()),
                    runner: Box::new(self.runner.clone()),
                    knowledge: self.knowledge.clone(),
                    sensitive: SensitiveContext::none(),
                    observer: self.observer.clone(),
                    ordering: OrderingTable::default(),
                    rules: builtin_rules().to_vec(),
                    stream: self.stream,
                },
            )
            .expect("session must build")
        }
    }

    fn script<S: AsRef<str>>(replies: &[S]) -> Arc<ScriptedBackend> {
        Arc::new(ScriptedBackend::replies(replies.iter().map(|r| r.as_ref().to_string())))
    }

    // ── Autonomous: termination ───────────────────────────────────────────────

    /// [EXEC, EXEC, EXEC, DONE] with a budget of 5 ends on DONE with three
    /// log entries.
    #[tokio::test]
    async fn test_three_execs_then_done() {
        let harness = Harness::new();
        let backend = script(&[exec(RESTART_AUDIO), exec(VACUUM), exec(RESTART_SESSION), DONE.to_string()]);
        let session = harness.session(config(SessionMode::Autonomous, 5), &backend);
        let log = session.execution_log().clone();

        let summary = session.run_autonomous(SessionConsent::granted()).await;

        assert_eq!(summary.termination, Termination::Completed);
        assert_eq!(summary.executions.len(), 3);
        assert_eq!(log.len(), 3);
        assert!(log.verify_integrity());
        assert_eq!(summary.actions_taken, 3);
        assert_eq!(harness.runner.commands().len(), 3);
        assert_eq!(backend.request_count(), 4);
        assert!(!summary.log_terminal_hash.is_empty());
    }

    /// The loop stops at the action budget without asking again.
    #[tokio::test]
    async fn test_budget_exhausted() {
        let harness = Harness::new();
        let backend = script(&[exec(RESTART_AUDIO), exec(VACUUM), exec(RESTART_SESSION), DONE.to_string()]);
        let summary = harness
            .session(config(SessionMode::Autonomous, 2), &backend)
            .run_autonomous(SessionConsent::granted())
            .await;

        assert_eq!(summary.termination, Termination::BudgetExhausted);
        assert_eq!(summary.executions.len(), 2);
        assert_eq!(backend.request_count(), 2);
    }

    /// Without DONE the turn cap ends the session.
    #[tokio::test]
    async fn test_turn_limit() {
        let harness = Harness::new();
        let skip = r#"{"action": "SKIP", "reason": "not sure"}"#;
        let backend = script(&[skip, skip, skip, skip]);
        let summary = harness
            .session(
                SessionConfig {
                    max_turns: Some(3),
                    ..config(SessionMode::Autonomous, 5)
                },
                &backend,
            )
            .run_autonomous(SessionConsent::granted())
            .await;

        assert_eq!(summary.termination, Termination::TurnLimit);
        assert_eq!(backend.request_count(), 3);
    }

    // ── Autonomous: malformed decisions ───────────────────────────────────────

    /// Two malformed decisions in a row abort with a protocol violation.
    #[tokio::test]
    async fn test_second_malformed_decision_aborts() {
        let harness = Harness::new();
        let backend = script(&["I would restart pipewire.", "Really, just restart it."]);
        let summary = harness
            .session(config(SessionMode::Autonomous, 5), &backend)
            .run_autonomous(SessionConsent::granted())
            .await;

        match &summary.termination {
            Termination::Aborted {
                reason: AbortReason::ProtocolViolation { reason },
            } => assert!(reason.contains("JSON object")),
            other => panic!("expected a protocol violation, got {:?}", other),
        }
        assert!(harness.runner.commands().is_empty());

        // The correction carries the rejected exchange.
        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].history.len(), 2);
        assert!(requests[1].user.contains("rejected"));
    }

    /// One malformed decision is corrected and the session goes on.
    #[tokio::test]
    async fn test_single_malformed_decision_is_corrected() {
        let harness = Harness::new();
        let backend = script(&["no idea".to_string(), exec(RESTART_AUDIO), DONE.to_string()]);
        let summary = harness
            .session(config(SessionMode::Autonomous, 5), &backend)
            .run_autonomous(SessionConsent::granted())
            .await;

        assert_eq!(summary.termination, Termination::Completed);
        assert_eq!(summary.executions.len(), 1);
        assert!(summary.errors.iter().any(|e| e.contains("malformed decision")));
    }

    // ── Autonomous: execution outcomes ────────────────────────────────────────

    /// Three failed commands in a row are fatal.
    #[tokio::test]
    async fn test_three_consecutive_failures_abort() {
        let harness = Harness {
            runner: FakeRunner::with_exits(&[1, 1, 1]),
            ..Harness::new()
        };
        let backend = script(&[exec(RESTART_AUDIO), exec(VACUUM), exec(RESTART_SESSION), DONE.to_string()]);
        let summary = harness
            .session(config(SessionMode::Autonomous, 10), &backend)
            .run_autonomous(SessionConsent::granted())
            .await;

        assert_eq!(
            summary.termination,
            Termination::Aborted {
                reason: AbortReason::ConsecutiveFailures { count: 3 }
            }
        );
        assert_eq!(summary.executions.len(), 3);
    }

    /// A success between failures resets the streak.
    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let harness = Harness {
            runner: FakeRunner::with_exits(&[1, 1, 0, 1, 1]),
            ..Harness::new()
        };
        let backend = script(&[
            exec(RESTART_AUDIO),
            exec(VACUUM),
            exec(RESTART_SESSION),
            exec(RESTART_AUDIO),
            exec(VACUUM),
            DONE.to_string(),
        ]);
        let summary = harness
            .session(config(SessionMode::Autonomous, 10), &backend)
            .run_autonomous(SessionConsent::granted())
            .await;

        assert_eq!(summary.termination, Termination::Completed);
        assert_eq!(summary.executions.len(), 5);
    }

    /// A forbidden command is blocked and reported, and the session goes on.
    #[tokio::test]
    async fn test_forbidden_command_does_not_end_session() {
        let harness = Harness::new();
        let backend = script(&[exec("rm -rf /"), exec(RESTART_AUDIO), DONE.to_string()]);
        let summary = harness
            .session(config(SessionMode::Autonomous, 5), &backend)
            .run_autonomous(SessionConsent::granted())
            .await;

        assert_eq!(summary.termination, Termination::Completed);
        assert_eq!(summary.blocked.len(), 1);
        assert_eq!(summary.blocked[0].command, "rm -rf /");
        assert_eq!(summary.actions_taken, 1);
        assert_eq!(harness.runner.commands(), vec![RESTART_AUDIO.to_string()]);

        assert!(backend.requests()[1].user.contains("BLOCKED"));
        assert!(harness
            .observer
            .events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Blocked { .. })));
    }

    /// Dry run counts actions but spawns nothing.
    #[tokio::test]
    async fn test_dry_run_spawns_nothing() {
        let harness = Harness::new();
        let backend = script(&[exec(RESTART_AUDIO), DONE.to_string()]);
        let summary = harness
            .session(
                SessionConfig {
                    dry_run: true,
                    ..config(SessionMode::Autonomous, 5)
                },
                &backend,
            )
            .run_autonomous(SessionConsent::granted())
            .await;

        assert_eq!(summary.termination, Termination::Completed);
        assert_eq!(summary.actions_taken, 1);
        assert!(summary.executions.is_empty());
        assert!(harness.runner.commands().is_empty());
        assert!(harness
            .observer
            .events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Outcome(ExecutionOutcome::DryRun(_)))));
    }

    /// A fix that clears the problem shows up as resolved after
    /// re-diagnosis.
    #[tokio::test]
    async fn test_rediagnosis_resolves_problems() {
        let harness = Harness {
            collector: Arc::new(FakeCollector::sequence(vec![broken_facts(), healthy_facts()])),
            ..Harness::new()
        };
        let backend = script(&[exec(RESTART_AUDIO), DONE.to_string()]);
        let summary = harness
            .session(config(SessionMode::Autonomous, 5), &backend)
            .run_autonomous(SessionConsent::granted())
            .await;

        assert_eq!(summary.resolved.len(), 2);
        assert!(summary.pending.is_empty());
        assert!(harness
            .observer
            .events()
            .iter()
            .any(|e| matches!(e, SessionEvent::GraphUpdated { resolved, .. } if resolved.len() == 2)));
    }

    // ── Autonomous: deadline ──────────────────────────────────────────────────

    /// The deadline fires while a decision is in flight: nothing runs after.
    #[tokio::test]
    async fn test_deadline_during_decision_blocks_execution() {
        let harness = Harness::new();
        let slot: Arc<Mutex<Option<Deadline>>> = Arc::new(Mutex::new(None));
        let trigger = Arc::clone(&slot);
        let backend = Arc::new(ScriptedBackend::new([ScriptStep::ReplyAfter {
            before: Box::new(move || {
                if let Some(deadline) = trigger.lock().unwrap().as_ref() {
                    deadline.expire_now();
                }
            }),
            text: exec(RESTART_AUDIO),
        }]));
        let session = harness.session(config(SessionMode::Autonomous, 5), &backend);
        *slot.lock().unwrap() = Some(session.deadline());

        let summary = session.run_autonomous(SessionConsent::granted()).await;

        assert_eq!(summary.termination, Termination::TimedOut);
        assert!(harness.runner.commands().is_empty());
        assert!(summary.executions.is_empty());
    }

    /// A model that never answers is cut off by the session deadline.
    #[tokio::test]
    async fn test_hanging_model_times_out() {
        let harness = Harness::new();
        let backend = Arc::new(ScriptedBackend::new([ScriptStep::Hang]));
        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            harness
                .session(
                    SessionConfig {
                        session_timeout: Duration::from_millis(100),
                        ..config(SessionMode::Autonomous, 5)
                    },
                    &backend,
                )
                .run_autonomous(SessionConsent::granted()),
        )
        .await
        .expect("the deadline must end the session");

        assert_eq!(summary.termination, Termination::TimedOut);
    }

    // ── Autonomous: other aborts ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_fatal_provider_aborts() {
        let harness = Harness::new();
        let backend = Arc::new(ScriptedBackend::new([ScriptStep::fail("auth")]));
        let summary = harness
            .session(config(SessionMode::Autonomous, 5), &backend)
            .run_autonomous(SessionConsent::granted())
            .await;

        match summary.termination {
            Termination::Aborted {
                reason: AbortReason::Provider { .. },
            } => {}
            other => panic!("expected a provider abort, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initial_collection_failure_aborts() {
        let harness = Harness {
            collector: Arc::new(FakeCollector::failing()),
            ..Harness::new()
        };
        let backend = script(&[DONE]);
        let summary = harness
            .session(config(SessionMode::Autonomous, 5), &backend)
            .run_autonomous(SessionConsent::granted())
            .await;

        match summary.termination {
            Termination::Aborted {
                reason: AbortReason::Collection { .. },
            } => {}
            other => panic!("expected a collection abort, got {:?}", other),
        }
        assert_eq!(backend.request_count(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let harness = Harness::new();
        let backend = script(&[DONE]);
        let result = Session::new(
            config(SessionMode::Autonomous, 0),
            SessionDeps {
                collector: Arc::clone(&harness.collector),
                oracle: OracleClient::new(backend, RetryPolicy::immediate()),
                policy: Box::new(SafetyPolicy::builtin()),
                runner: Box::new(harness.runner.clone()),
                knowledge: Vec::new(),
                sensitive: SensitiveContext::none(),
                observer: Arc::new(NullObserver),
                ordering: OrderingTable::default(),
                rules: Vec::new(),
                stream: false,
            },
        );
        assert!(matches!(result, Err(MenderError::ConfigError { .. })));
    }

    // ── Autonomous: SEARCH and SKIP ───────────────────────────────────────────

    /// Search hits reach the next prompt; the search budget is enforced.
    #[tokio::test]
    async fn test_search_results_feed_next_decision() {
        let harness = Harness {
            knowledge: vec![FakeSource::hits("wiki", true, 1, 0)],
            ..Harness::new()
        };
        let search = r#"{"action": "SEARCH", "query": "pipewire silent", "reason": "unknown cause"}"#;
        let backend = script(&[search, search, DONE]);
        let summary = harness
            .session(
                SessionConfig {
                    max_searches: 1,
                    ..config(SessionMode::Autonomous, 5)
                },
                &backend,
            )
            .run_autonomous(SessionConsent::granted())
            .await;

        assert_eq!(summary.termination, Termination::Completed);
        assert_eq!(summary.searches.len(), 1);
        assert_eq!(summary.searches[0].query, "pipewire silent");

        let requests = backend.requests();
        assert!(requests[1].user.contains("wiki result 0 for pipewire silent"));
        assert!(requests[2].user.contains("search budget used up"));
    }

    /// SKIP blocks the focus problem for the rest of the session.
    #[tokio::test]
    async fn test_skip_blocks_focus_problem() {
        let harness = Harness::new();
        let backend = script(&[r#"{"action": "SKIP", "reason": "needs a reboot"}"#, DONE]);
        let summary = harness
            .session(config(SessionMode::Autonomous, 5), &backend)
            .run_autonomous(SessionConsent::granted())
            .await;

        assert_eq!(summary.termination, Termination::Completed);
        let second = &backend.requests()[1].user;
        assert!(second.contains("skipped audio/pipewire_inactive"));
        assert!(second.contains("(blocked, attempts 0/3)"));
        // The next focus is the journal.
        assert!(second.contains("Focus problem: logs/journal_size"));
    }

    // ── Autonomous: streaming ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_streamed_decision_reports_chunks() {
        let harness = Harness {
            stream: true,
            ..Harness::new()
        };
        let backend = Arc::new(ScriptedBackend::new([ScriptStep::Stream {
            chunks: vec![r#"{"action": "DONE", "#.to_string(), r#""reason": "all good"}"#.to_string()],
            then: None,
        }]));
        let summary = harness
            .session(config(SessionMode::Autonomous, 5), &backend)
            .run_autonomous(SessionConsent::granted())
            .await;

        assert_eq!(summary.termination, Termination::Completed);
        let chunks = harness
            .observer
            .events()
            .iter()
            .filter(|e| matches!(e, SessionEvent::ModelChunk(_)))
            .count();
        assert_eq!(chunks, 2);
    }

    // ── Human in the loop ─────────────────────────────────────────────────────

    const PROPOSAL: &str = "Problem 1: PipeWire is down\n   Command: `systemctl --user restart pipewire`\n   Why: restarts the audio server\n\nProblem 2: journal too large\n   Command: `journalctl --vacuum-size=200M`\n   Why: trims old logs\n";

    fn hitl_config(max_fixes: u32) -> SessionConfig {
        config(SessionMode::HumanInTheLoop, max_fixes)
    }

    /// Picking a fix by number runs it after confirmation; end of input
    /// quits.
    #[tokio::test]
    async fn test_hitl_runs_selected_fix() {
        let harness = Harness::new();
        let backend = script(&[PROPOSAL, "Nothing else to do."]);
        let operator = ScriptedOperator::new(&["1"], true);
        let summary = harness.session(hitl_config(5), &backend).run_hitl(&operator).await;

        assert_eq!(summary.termination, Termination::OperatorQuit);
        assert_eq!(summary.executions.len(), 1);
        assert_eq!(operator.confirmations(), vec![RESTART_AUDIO.to_string()]);
        assert_eq!(harness.runner.commands(), vec![RESTART_AUDIO.to_string()]);
        assert_eq!(backend.request_count(), 2);
    }

    /// A declined command never runs and does not count.
    #[tokio::test]
    async fn test_hitl_declined_command() {
        let harness = Harness::new();
        let backend = script(&[PROPOSAL, PROPOSAL]);
        let operator = ScriptedOperator::new(&["2", "quit"], false);
        let summary = harness.session(hitl_config(5), &backend).run_hitl(&operator).await;

        assert_eq!(summary.termination, Termination::OperatorQuit);
        assert_eq!(summary.actions_taken, 0);
        assert!(summary.executions.is_empty());
        assert!(harness.runner.commands().is_empty());
        assert_eq!(operator.confirmations().len(), 1);
    }

    /// `!cmd` runs the operator's own command through the same gate.
    #[tokio::test]
    async fn test_hitl_direct_command() {
        let harness = Harness::new();
        let backend = script(&[PROPOSAL, PROPOSAL]);
        let operator = ScriptedOperator::new(&["!systemctl --user restart wireplumber", "q"], true);
        let summary = harness.session(hitl_config(5), &backend).run_hitl(&operator).await;

        assert_eq!(harness.runner.commands(), vec![RESTART_SESSION.to_string()]);
        assert_eq!(summary.executions.len(), 1);
    }

    /// A forbidden direct command is refused before the operator is asked.
    #[tokio::test]
    async fn test_hitl_forbidden_direct_command() {
        let harness = Harness::new();
        let backend = script(&[PROPOSAL, PROPOSAL]);
        let operator = ScriptedOperator::new(&["!rm -rf /", "q"], true);
        let summary = harness.session(hitl_config(5), &backend).run_hitl(&operator).await;

        assert_eq!(summary.blocked.len(), 1);
        assert!(operator.confirmations().is_empty());
        assert!(harness.runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_hitl_unknown_fix_number() {
        let harness = Harness::new();
        let backend = script(&[PROPOSAL]);
        let operator = ScriptedOperator::new(&["7", "", "q"], true);
        let summary = harness.session(hitl_config(5), &backend).run_hitl(&operator).await;

        assert_eq!(summary.termination, Termination::OperatorQuit);
        assert_eq!(backend.request_count(), 1);
        assert!(harness
            .observer
            .events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Notice(n) if n.contains("no fix numbered 7"))));
    }

    /// `all` stops at the budget, and the session ends there.
    #[tokio::test]
    async fn test_hitl_all_respects_budget() {
        let harness = Harness::new();
        let backend = script(&[PROPOSAL, PROPOSAL]);
        let operator = ScriptedOperator::new(&["a"], true);
        let summary = harness.session(hitl_config(1), &backend).run_hitl(&operator).await;

        assert_eq!(summary.termination, Termination::BudgetExhausted);
        assert_eq!(harness.runner.commands(), vec![RESTART_AUDIO.to_string()]);
    }

    /// `all` re-collects facts after every command it runs.
    #[tokio::test]
    async fn test_hitl_all_rediagnoses_after_each_command() {
        let collector = Arc::new(FakeCollector::sequence(vec![broken_facts()]));
        let harness = Harness {
            collector: collector.clone(),
            ..Harness::new()
        };
        let backend = script(&[PROPOSAL, PROPOSAL]);
        let operator = ScriptedOperator::new(&["a"], true);
        let summary = harness.session(hitl_config(5), &backend).run_hitl(&operator).await;

        assert_eq!(summary.executions.len(), 2);
        // One initial diagnosis plus one per executed command.
        assert_eq!(collector.collections(), 3);
    }

    /// Once the machine looks healthy, the rest of the batch is dropped.
    #[tokio::test]
    async fn test_hitl_all_stops_when_everything_resolved() {
        let collector = Arc::new(FakeCollector::sequence(vec![broken_facts(), healthy_facts()]));
        let harness = Harness {
            collector: collector.clone(),
            ..Harness::new()
        };
        let backend = script(&[PROPOSAL, "All good now."]);
        let operator = ScriptedOperator::new(&["all"], true);
        let summary = harness.session(hitl_config(5), &backend).run_hitl(&operator).await;

        assert_eq!(harness.runner.commands(), vec![RESTART_AUDIO.to_string()]);
        assert_eq!(collector.collections(), 2);
        assert!(summary.pending.is_empty());
        assert!(harness
            .observer
            .events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Notice(n) if n.contains("1 remaining fixes not run"))));
    }

    /// A description goes into the next proposal prompt.
    #[tokio::test]
    async fn test_hitl_description_reaches_model() {
        let harness = Harness::new();
        let backend = script(&[PROPOSAL, PROPOSAL]);
        let operator = ScriptedOperator::new(&["d my wifi drops every hour", "q"], true);
        harness.session(hitl_config(5), &backend).run_hitl(&operator).await;

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].user.contains("the operator reports: my wifi drops every hour"));
    }

    // ── Knowledge fan-out ─────────────────────────────────────────────────────

    fn far_deadline() -> Deadline {
        Deadline::after(Duration::from_secs(30))
    }

    /// A faster lower-priority source does not beat a definitive higher one.
    #[tokio::test]
    async fn test_fanout_priority_wins() {
        let fanout = KnowledgeFanout::new(vec![
            FakeSource::hits("bugzilla", true, 1, 50),
            FakeSource::hits("wiki", true, 2, 0),
        ]);
        let outcome = fanout.search("no sound", &far_deadline()).await.unwrap();

        assert_eq!(outcome.record.hits.len(), 1);
        assert_eq!(outcome.record.hits[0].source, "bugzilla");
    }

    /// A failed source falls through to the next, and the failure is kept.
    #[tokio::test]
    async fn test_fanout_failure_falls_through() {
        let fanout = KnowledgeFanout::new(vec![FakeSource::failing("bugzilla"), FakeSource::hits("wiki", true, 2, 0)]);
        let outcome = fanout.search("no sound", &far_deadline()).await.unwrap();

        assert_eq!(outcome.record.hits.len(), 2);
        assert!(outcome.record.hits.iter().all(|h| h.source == "wiki"));
        assert_eq!(outcome.failures.len(), 1);
    }

    /// Without a definitive answer, hits merge in priority order up to the
    /// cap.
    #[tokio::test]
    async fn test_fanout_merges_up_to_cap() {
        let fanout = KnowledgeFanout::new(vec![
            FakeSource::hits("github", false, 4, 20),
            FakeSource::hits("duckduckgo", false, 4, 0),
        ]);
        let outcome = fanout.search("no sound", &far_deadline()).await.unwrap();

        let sources: Vec<&str> = outcome.record.hits.iter().map(|h| h.source.as_str()).collect();
        assert_eq!(sources, vec!["github", "github", "github", "github", "duckduckgo"]);
    }

    /// Once a winner is known, slower sources are not awaited.
    #[tokio::test]
    async fn test_fanout_does_not_wait_for_losers() {
        let fanout = KnowledgeFanout::new(vec![
            FakeSource::hits("bugzilla", true, 1, 0),
            FakeSource::hits("slow", true, 1, 10_000),
        ]);
        let outcome = tokio::time::timeout(Duration::from_secs(2), fanout.search("x", &far_deadline()))
            .await
            .expect("the winner must not wait for the slow source")
            .unwrap();
        assert_eq!(outcome.record.hits[0].source, "bugzilla");
    }

    #[tokio::test]
    async fn test_fanout_source_timeout() {
        let fanout = KnowledgeFanout::new(vec![FakeSource::hits("stuck", true, 1, 10_000)])
            .with_source_timeout(Duration::from_millis(50));
        let outcome = fanout.search("x", &far_deadline()).await.unwrap();

        assert!(outcome.record.hits.is_empty());
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].contains("stuck"));
    }

    #[tokio::test]
    async fn test_fanout_respects_deadline() {
        let fanout = KnowledgeFanout::new(vec![FakeSource::hits("stuck", true, 1, 10_000)]);
        let deadline = Deadline::after(Duration::from_millis(50));
        let result = fanout.search("x", &deadline).await;
        assert!(matches!(result, Err(MenderError::SessionTimeout)));
    }

    // ── Operator input ────────────────────────────────────────────────────────

    #[test]
    fn test_operator_input_grammar() {
        assert_eq!(OperatorInput::parse("  "), OperatorInput::Empty);
        assert_eq!(OperatorInput::parse("3"), OperatorInput::Fix(3));
        assert_eq!(OperatorInput::parse("A"), OperatorInput::All);
        assert_eq!(OperatorInput::parse("all"), OperatorInput::All);
        assert_eq!(OperatorInput::parse("s"), OperatorInput::Skip);
        assert_eq!(OperatorInput::parse("Quit"), OperatorInput::Quit);
        assert_eq!(
            OperatorInput::parse("!df -h"),
            OperatorInput::Direct("df -h".to_string())
        );
        assert_eq!(OperatorInput::parse("!"), OperatorInput::Empty);
        assert_eq!(
            OperatorInput::parse("search pipewire crackling"),
            OperatorInput::Search("pipewire crackling".to_string())
        );
        assert_eq!(OperatorInput::parse("d"), OperatorInput::Describe(String::new()));
        assert_eq!(
            OperatorInput::parse("d bluetooth headset not found"),
            OperatorInput::Describe("bluetooth headset not found".to_string())
        );
        assert_eq!(
            OperatorInput::parse("my screen flickers"),
            OperatorInput::Describe("my screen flickers".to_string())
        );
    }

    // ── Fix extraction ────────────────────────────────────────────────────────

    #[test]
    fn test_extract_command_lines() {
        let fixes = extract_fixes(PROPOSAL);
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[0].command, RESTART_AUDIO);
        assert_eq!(fixes[0].comment, "restarts the audio server");
        assert_eq!(fixes[1].command, VACUUM);
    }

    /// Bold markdown labels and duplicates.
    #[test]
    fn test_extract_markdown_and_duplicates() {
        let reply = "- **Command:** `df -h`\n- **Why:** check space\n- **Command:** `df -h`\n";
        let fixes = extract_fixes(reply);
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].comment, "check space");
    }

    #[test]
    fn test_extract_fallback_formats() {
        let numbered = extract_fixes("[1] Restart audio: `systemctl --user restart pipewire`");
        assert_eq!(numbered[0].command, RESTART_AUDIO);
        assert_eq!(numbered[0].comment, "fix #1");

        let marked = extract_fixes("EXEC: `journalctl --vacuum-size=200M`");
        assert_eq!(marked[0].command, VACUUM);

        assert!(extract_fixes("Everything looks fine.").is_empty());
    }
}
