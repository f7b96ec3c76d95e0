//! # mender-graph
//!
//! From facts to an ordered work list.
//!
//! - `infer`    : declarative rules turning a `FactSet` into `Problem`s
//! - `ordering` : the inspectable table of "category A before category B" rules
//! - `graph`    : `ProblemGraph`, its topological schedule with cycle
//!   fallback, incremental updates and per-problem status

pub mod graph;
pub mod infer;
pub mod ordering;

pub use graph::{CycleReport, GraphDelta, GraphSummary, ProblemGraph, Schedule, MAX_ATTEMPTS};
pub use infer::{builtin_rules, infer, InferenceRule, Trigger};
pub use ordering::{OrderingRule, OrderingTable};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use mender_contracts::{
        error::MenderError,
        fact::FactSet,
        problem::{Fingerprint, Problem, ProblemStatus, Severity},
    };

    use super::*;

    fn problem(module: &str, check: &str, severity: Severity) -> Problem {
        Problem::new(module, check, severity, format!("{module} {check}"))
    }

    fn position(schedule: &Schedule, p: &Problem) -> usize {
        schedule
            .sequence
            .iter()
            .position(|q| q.fingerprint == p.fingerprint)
            .unwrap_or_else(|| panic!("{} missing from schedule", p.check))
    }

    /// Every edge of the graph points forward in the schedule.
    fn assert_topological(graph: &ProblemGraph) {
        let schedule = graph.schedule();
        for a in &schedule.sequence {
            for b in &schedule.sequence {
                if graph.has_edge(&a.fingerprint, &b.fingerprint) && schedule.cycle.is_none() {
                    assert!(position(schedule, a) < position(schedule, b), "{} must precede {}", a.check, b.check);
                }
            }
        }
    }

    fn cyclic_table() -> OrderingTable {
        OrderingTable::from_toml_str(
            r#"
            [[rules]]
            before = "audio"
            after = "services"
            reason = "a"

            [[rules]]
            before = "services"
            after = "packages"
            reason = "b"

            [[rules]]
            before = "packages"
            after = "audio"
            reason = "c"

            [[rules]]
            before = "network"
            after = "packages"
            reason = "d"
            "#,
        )
        .unwrap()
    }

    // ── Ordering table ────────────────────────────────────────────────────────

    #[test]
    fn test_default_table_rules() {
        let table = OrderingTable::default();
        assert!(table.requires("network", "packages").is_some());
        assert!(table.requires("disk", "logs").is_some());
        assert!(table.requires("packages", "network").is_none());
    }

    #[test]
    fn test_table_rejects_self_rule() {
        let result = OrderingTable::from_toml_str("[[rules]]\nbefore = \"disk\"\nafter = \"disk\"\nreason = \"x\"\n");
        match result {
            Err(MenderError::ConfigError { reason }) => assert!(reason.contains("before itself")),
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn test_table_rejects_malformed_toml() {
        match OrderingTable::from_toml_str("[[rules]]\nbefore = 3") {
            Err(MenderError::ConfigError { reason }) => assert!(reason.contains("ordering rules TOML")),
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    // ── Inference ─────────────────────────────────────────────────────────────

    #[test]
    fn test_infer_fires_on_thresholds_and_flags() {
        let facts = FactSet::builder()
            .fact("disk", "root_used_percent", 96.0)
            .fact("network", "default_route", true)
            .fact("network", "dns_ok", false)
            .fact("audio", "pipewire_active", false)
            .fact("services", "failed_units", "  ")
            .fact("logs", "journal_size_mb", 300.0)
            .build();
        let problems = infer(&facts, builtin_rules());
        let checks: Vec<&str> = problems.iter().map(|p| p.check.as_str()).collect();
        assert_eq!(checks, vec!["root_space", "dns_failure", "pipewire_inactive"]);

        let disk = &problems[0];
        assert_eq!(disk.severity, Severity::Critical);
        assert_eq!(disk.description, "root filesystem is 96% full");
        assert!(!disk.suggested_commands.is_empty());
    }

    /// Below the critical threshold the rule keeps its base severity.
    #[test]
    fn test_infer_severity_tiers() {
        let warning = FactSet::builder().fact("disk", "root_used_percent", 88.0).build();
        let calm = FactSet::builder().fact("disk", "root_used_percent", 40.0).build();
        assert_eq!(infer(&warning, builtin_rules())[0].severity, Severity::Warning);
        assert!(infer(&calm, builtin_rules()).is_empty());
    }

    /// Missing or mistyped facts never trigger.
    #[test]
    fn test_infer_ignores_missing_and_mistyped_facts() {
        let facts = FactSet::builder()
            .fact("network", "default_route", "unknown")
            .fact("audio", "sink_count", "n/a")
            .build();
        assert!(infer(&facts, builtin_rules()).is_empty());
    }

    #[test]
    fn test_infer_is_deterministic() {
        let facts = FactSet::builder()
            .fact("services", "failed_units", "bluetooth.service")
            .fact("thumbnails", "fail_count", 12.0)
            .build();
        assert_eq!(infer(&facts, builtin_rules()), infer(&facts, builtin_rules()));
    }

    // ── Ordering ──────────────────────────────────────────────────────────────

    /// Category rules beat severity; severity breaks ties.
    #[test]
    fn test_order_follows_rules_then_severity() {
        let packages = problem("packages", "lock_held", Severity::Critical);
        let network = problem("network", "dns_failure", Severity::Minor);
        let logs = problem("logs", "journal_size", Severity::Minor);
        let disk = problem("disk", "root_space", Severity::Warning);
        let memory = problem("memory", "ram_pressure", Severity::Critical);

        let graph = ProblemGraph::build(
            vec![packages.clone(), network.clone(), logs.clone(), disk.clone(), memory.clone()],
            OrderingTable::default(),
        );
        let schedule = graph.schedule();
        assert!(schedule.cycle.is_none());
        assert_eq!(schedule.sequence.len(), 5);
        assert!(position(schedule, &network) < position(schedule, &packages));
        assert!(position(schedule, &disk) < position(schedule, &packages));
        assert!(position(schedule, &disk) < position(schedule, &logs));
        // The unconstrained critical problem comes first.
        assert_eq!(schedule.sequence[0], memory);
        assert_topological(&graph);
    }

    /// Equal severity and no rules: fingerprint order.
    #[test]
    fn test_order_ties_by_fingerprint() {
        let problems: Vec<Problem> = ["a", "b", "c", "d"]
            .iter()
            .map(|c| problem("misc", c, Severity::Warning))
            .collect();
        let graph = ProblemGraph::build(problems.clone(), OrderingTable::empty());
        let mut expected: Vec<Fingerprint> = problems.iter().map(|p| p.fingerprint.clone()).collect();
        expected.sort();
        let actual: Vec<Fingerprint> = graph.schedule().sequence.iter().map(|p| p.fingerprint.clone()).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_duplicate_fingerprints_are_merged() {
        let a = problem("disk", "root_space", Severity::Warning);
        let graph = ProblemGraph::build(vec![a.clone(), a.clone()], OrderingTable::default());
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_empty_graph() {
        let graph = ProblemGraph::build(Vec::new(), OrderingTable::default());
        assert!(graph.is_empty());
        assert!(graph.next_actionable().is_none());
        assert!(graph.all_done());
    }

    // ── Cycles ────────────────────────────────────────────────────────────────

    /// A cyclic rule set terminates with a severity-ordered fallback for the
    /// problems on the cycle; edges into the cycle still hold.
    #[test]
    fn test_cycle_falls_back_to_severity() {
        let audio = problem("audio", "pipewire_inactive", Severity::Minor);
        let services = problem("services", "failed_units", Severity::Critical);
        let packages = problem("packages", "lock_held", Severity::Warning);
        let network = problem("network", "no_default_route", Severity::Minor);

        let graph = ProblemGraph::build(
            vec![audio.clone(), services.clone(), packages.clone(), network.clone()],
            cyclic_table(),
        );
        let schedule = graph.schedule();
        let cycle = schedule.cycle.as_ref().expect("cycle must be reported");
        assert_eq!(cycle.nodes.len(), 3);
        assert!(!cycle.nodes.contains(&network.fingerprint));
        assert_eq!(cycle.dropped_edges.len(), 3);
        assert_eq!(schedule.sequence.len(), 4);

        // network → packages survives; the cycle members go by severity.
        assert!(position(schedule, &network) < position(schedule, &packages));
        assert_eq!(schedule.sequence[0], services);

        match cycle.to_error() {
            MenderError::GraphCycle { nodes } => assert_eq!(nodes.len(), 3),
            other => panic!("expected GraphCycle, got {:?}", other),
        }
    }

    #[test]
    fn test_two_node_cycle() {
        let table = OrderingTable::from_rules(vec![
            OrderingRule {
                before: "x".into(),
                after: "y".into(),
                reason: String::new(),
            },
            OrderingRule {
                before: "y".into(),
                after: "x".into(),
                reason: String::new(),
            },
        ])
        .unwrap();
        let x = problem("x", "one", Severity::Minor);
        let y = problem("y", "two", Severity::Critical);
        let graph = ProblemGraph::build(vec![x.clone(), y.clone()], table);
        assert_eq!(graph.schedule().sequence, vec![y, x]);
    }

    // ── Incremental update ────────────────────────────────────────────────────

    #[test]
    fn test_update_removes_and_adds() {
        let network = problem("network", "dns_failure", Severity::Warning);
        let packages = problem("packages", "lock_held", Severity::Warning);
        let mut graph = ProblemGraph::build(vec![network.clone(), packages.clone()], OrderingTable::default());
        assert!(graph.has_edge(&network.fingerprint, &packages.fingerprint));

        let disk = problem("disk", "root_space", Severity::Critical);
        let delta = graph.update(&[network.fingerprint.clone()], vec![disk.clone()]);

        assert_eq!(delta.resolved, vec![network.clone()]);
        assert_eq!(delta.added, vec![disk.clone()]);
        assert!(!graph.has_edge(&network.fingerprint, &packages.fingerprint));
        assert!(graph.has_edge(&disk.fingerprint, &packages.fingerprint));
        assert_eq!(graph.status(&network.fingerprint), Some(ProblemStatus::Resolved));
        assert_eq!(graph.schedule().sequence, vec![disk, packages]);
    }

    /// Untouched nodes keep their relative order across updates.
    #[test]
    fn test_update_preserves_untouched_order() {
        let a = problem("disk", "root_space", Severity::Warning);
        let b = problem("logs", "journal_size", Severity::Critical);
        let c = problem("misc", "other", Severity::Minor);
        let mut graph = ProblemGraph::build(vec![a.clone(), b.clone(), c.clone()], OrderingTable::default());
        let before: Vec<Problem> = graph.schedule().sequence.clone();
        assert_eq!(before, vec![a.clone(), b.clone(), c.clone()]);

        let d = problem("audio", "no_output_device", Severity::Warning);
        graph.update(&[c.fingerprint.clone()], vec![d.clone()]);
        let after: Vec<&Problem> = graph
            .schedule()
            .sequence
            .iter()
            .filter(|p| p.fingerprint != d.fingerprint)
            .collect();
        assert_eq!(after, vec![&a, &b]);
    }

    #[test]
    fn test_reconcile_keeps_state_of_persisting_problems() {
        let a = problem("audio", "pipewire_inactive", Severity::Warning);
        let b = problem("disk", "root_space", Severity::Warning);
        let mut graph = ProblemGraph::build(vec![a.clone(), b.clone()], OrderingTable::default());
        graph.begin_attempt(&a.fingerprint);
        graph.record_failure(&a.fingerprint);

        let delta = graph.reconcile(vec![a.clone()]);
        assert_eq!(delta.resolved, vec![b]);
        assert!(delta.added.is_empty());
        assert_eq!(graph.attempts(&a.fingerprint), 1);
    }

    #[test]
    fn test_update_without_changes_is_empty() {
        let a = problem("disk", "root_space", Severity::Warning);
        let mut graph = ProblemGraph::build(vec![a.clone()], OrderingTable::default());
        assert!(graph.update(&[], vec![a]).is_empty());
    }

    // ── Status and attempts ───────────────────────────────────────────────────

    /// A problem gets at most three attempts before it is marked failed.
    #[test]
    fn test_attempts_are_capped() {
        let a = problem("audio", "pipewire_inactive", Severity::Critical);
        let b = problem("thumbnails", "failed_thumbnails", Severity::Minor);
        let mut graph = ProblemGraph::build(vec![a.clone(), b.clone()], OrderingTable::default());

        for attempt in 1..=MAX_ATTEMPTS {
            assert_eq!(graph.next_actionable(), Some(&a));
            assert_eq!(graph.begin_attempt(&a.fingerprint), Some(attempt));
            assert_eq!(graph.status(&a.fingerprint), Some(ProblemStatus::InProgress));
            graph.record_failure(&a.fingerprint);
        }
        assert_eq!(graph.status(&a.fingerprint), Some(ProblemStatus::Failed));
        assert_eq!(graph.next_actionable(), Some(&b));

        graph.block(&b.fingerprint);
        assert!(graph.next_actionable().is_none());
        assert!(graph.all_done());

        let summary = graph.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.pending, 0);
    }

    #[test]
    fn test_next_actionable_follows_schedule() {
        let network = problem("network", "dns_failure", Severity::Minor);
        let packages = problem("packages", "lock_held", Severity::Critical);
        let mut graph = ProblemGraph::build(vec![packages.clone(), network.clone()], OrderingTable::default());
        assert_eq!(graph.next_actionable(), Some(&network));
        assert_eq!(graph.actionable().len(), 2);

        graph.begin_attempt(&network.fingerprint);
        graph.record_success(&network.fingerprint);
        assert_eq!(graph.status(&network.fingerprint), Some(ProblemStatus::Pending));
        graph.reconcile(vec![packages.clone()]);
        assert_eq!(graph.next_actionable(), Some(&packages));
        assert_eq!(graph.summary().resolved, 1);
    }
}
