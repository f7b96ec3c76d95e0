//! The problem graph and its scheduler.
//!
//! Nodes are problems keyed by fingerprint; an edge `a → b` means "attempt
//! `a` before `b`" and exists exactly when the ordering table has a rule
//! from `a`'s category to `b`'s. The agent loop is the only writer and
//! touches the graph between turns only.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use mender_contracts::{
    error::MenderError,
    problem::{Fingerprint, Problem, ProblemStatus, Severity},
};

use crate::ordering::OrderingTable;

/// Attempts allowed per problem before it is marked failed.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
struct Node {
    problem: Problem,
    status: ProblemStatus,
    attempts: u32,
}

impl Node {
    fn new(problem: Problem) -> Self {
        Self {
            problem,
            status: ProblemStatus::Pending,
            attempts: 0,
        }
    }

    fn is_actionable(&self) -> bool {
        self.status == ProblemStatus::Pending && self.attempts < MAX_ATTEMPTS
    }
}

/// Problems whose ordering rules contradict each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Every problem on a detected cycle; ordered by severity among
    /// themselves.
    pub nodes: Vec<Fingerprint>,
    /// Edges ignored to break the cycles, as `(before, after)`.
    pub dropped_edges: Vec<(Fingerprint, Fingerprint)>,
}

impl CycleReport {
    pub fn to_error(&self) -> MenderError {
        MenderError::GraphCycle {
            nodes: self.nodes.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// The result of ordering a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub sequence: Vec<Problem>,
    pub cycle: Option<CycleReport>,
}

impl Schedule {
    pub fn fingerprints(&self) -> Vec<&Fingerprint> {
        self.sequence.iter().map(|p| &p.fingerprint).collect()
    }
}

/// What an update changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphDelta {
    pub resolved: Vec<Problem>,
    pub added: Vec<Problem>,
}

impl GraphDelta {
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty() && self.added.is_empty()
    }
}

/// Node counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphSummary {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub resolved: usize,
    pub failed: usize,
    pub blocked: usize,
}

#[derive(Debug, Clone)]
pub struct ProblemGraph {
    table: OrderingTable,
    nodes: BTreeMap<Fingerprint, Node>,
    /// `(before, after)` pairs.
    edges: BTreeSet<(Fingerprint, Fingerprint)>,
    resolved: Vec<Problem>,
    schedule: Schedule,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

impl ProblemGraph {
    /// Build a graph over `problems`. Duplicate fingerprints keep the first
    /// problem.
    pub fn build(problems: impl IntoIterator<Item = Problem>, table: OrderingTable) -> Self {
        let mut graph = Self {
            table,
            nodes: BTreeMap::new(),
            edges: BTreeSet::new(),
            resolved: Vec::new(),
            schedule: Schedule::default(),
        };
        for problem in problems {
            graph.insert(problem);
        }
        graph.schedule = graph.order();
        info!(
            problems = graph.nodes.len(),
            edges = graph.edges.len(),
            "problem graph built"
        );
        graph
    }

    /// Add a node and the edges between it and every existing node.
    fn insert(&mut self, problem: Problem) -> bool {
        if self.nodes.contains_key(&problem.fingerprint) {
            return false;
        }
        for other in self.nodes.values() {
            let (new, old) = (&problem, &other.problem);
            if self.table.requires(new.category(), old.category()).is_some() {
                self.edges.insert((new.fingerprint.clone(), old.fingerprint.clone()));
            }
            if self.table.requires(old.category(), new.category()).is_some() {
                self.edges.insert((old.fingerprint.clone(), new.fingerprint.clone()));
            }
        }
        self.nodes.insert(problem.fingerprint.clone(), Node::new(problem));
        true
    }

    fn remove(&mut self, fingerprint: &Fingerprint) -> Option<Problem> {
        let node = self.nodes.remove(fingerprint)?;
        self.edges.retain(|(a, b)| a != fingerprint && b != fingerprint);
        Some(node.problem)
    }

    /// Remove `resolved` problems and add `new_problems`. Only edges touching
    /// removed or added nodes change; untouched nodes keep their relative
    /// order.
    pub fn update(&mut self, resolved: &[Fingerprint], new_problems: impl IntoIterator<Item = Problem>) -> GraphDelta {
        let mut delta = GraphDelta::default();
        for fingerprint in resolved {
            if let Some(problem) = self.remove(fingerprint) {
                debug!(fingerprint = %fingerprint, check = %problem.check, "problem resolved");
                self.resolved.push(problem.clone());
                delta.resolved.push(problem);
            }
        }
        for problem in new_problems {
            if self.insert(problem.clone()) {
                debug!(fingerprint = %problem.fingerprint, check = %problem.check, "problem added");
                delta.added.push(problem);
            }
        }
        if !delta.is_empty() {
            self.schedule = self.order();
            info!(
                resolved = delta.resolved.len(),
                added = delta.added.len(),
                remaining = self.nodes.len(),
                "problem graph updated"
            );
        }
        delta
    }

    /// Reconcile with a fresh diagnosis: problems no longer observed are
    /// resolved, newly observed ones are added, the rest keep their state.
    pub fn reconcile(&mut self, observed: Vec<Problem>) -> GraphDelta {
        let seen: BTreeSet<&Fingerprint> = observed.iter().map(|p| &p.fingerprint).collect();
        let gone: Vec<Fingerprint> = self.nodes.keys().filter(|f| !seen.contains(f)).cloned().collect();
        self.update(&gone, observed)
    }

    /// Topologically order every node.
    ///
    /// Ready nodes are taken by descending severity, then ascending
    /// fingerprint. Cycles are found with a DFS colouring pass; the edges
    /// among problems on a cycle are ignored, so those problems fall back to
    /// severity order while their edges to the rest of the graph still hold.
    pub fn order(&self) -> Schedule {
        let cycle_nodes = self.cycle_nodes();
        let dropped: BTreeSet<&(Fingerprint, Fingerprint)> = self
            .edges
            .iter()
            .filter(|(a, b)| cycle_nodes.contains(a) && cycle_nodes.contains(b))
            .collect();

        let mut in_degree: BTreeMap<&Fingerprint, usize> = self.nodes.keys().map(|f| (f, 0)).collect();
        let mut successors: BTreeMap<&Fingerprint, Vec<&Fingerprint>> = BTreeMap::new();
        for edge in self.edges.iter().filter(|e| !dropped.contains(e)) {
            let (before, after) = edge;
            successors.entry(before).or_default().push(after);
            if let Some(d) = in_degree.get_mut(after) {
                *d += 1;
            }
        }

        let key = |f: &Fingerprint| -> (Reverse<Severity>, Fingerprint) {
            let severity = self.nodes.get(f).map_or(Severity::Minor, |n| n.problem.severity);
            (Reverse(severity), f.clone())
        };
        let mut ready: BTreeSet<(Reverse<Severity>, Fingerprint)> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(f, _)| key(*f))
            .collect();

        let mut sequence = Vec::with_capacity(self.nodes.len());
        while let Some((_, fingerprint)) = ready.pop_first() {
            if let Some(next) = successors.get(&fingerprint) {
                for after in next {
                    if let Some(d) = in_degree.get_mut(*after) {
                        *d -= 1;
                        if *d == 0 {
                            ready.insert(key(*after));
                        }
                    }
                }
            }
            if let Some(node) = self.nodes.get(&fingerprint) {
                sequence.push(node.problem.clone());
            }
        }

        let cycle = if cycle_nodes.is_empty() {
            None
        } else {
            let report = CycleReport {
                nodes: cycle_nodes.iter().cloned().collect(),
                dropped_edges: dropped.into_iter().cloned().collect(),
            };
            warn!(
                nodes = ?report.nodes,
                dropped_edges = report.dropped_edges.len(),
                "ordering cycle detected, falling back to severity order for the affected problems"
            );
            Some(report)
        };

        Schedule { sequence, cycle }
    }

    /// Every node lying on a cycle reached by a back edge.
    fn cycle_nodes(&self) -> BTreeSet<Fingerprint> {
        let mut successors: BTreeMap<&Fingerprint, Vec<&Fingerprint>> = BTreeMap::new();
        for (before, after) in &self.edges {
            successors.entry(before).or_default().push(after);
        }

        let mut color: BTreeMap<&Fingerprint, Color> = self.nodes.keys().map(|f| (f, Color::White)).collect();
        let mut on_cycle = BTreeSet::new();

        for root in self.nodes.keys() {
            if color.get(root) != Some(&Color::White) {
                continue;
            }
            // Iterative DFS: (node, index of the next successor to visit).
            let mut stack: Vec<(&Fingerprint, usize)> = vec![(root, 0)];
            color.insert(root, Color::Grey);

            while let Some((node, next)) = stack.last().copied() {
                let children = successors.get(node).map(Vec::as_slice).unwrap_or(&[]);
                if let Some(child) = children.get(next) {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    match color.get(*child).copied().unwrap_or(Color::Black) {
                        Color::White => {
                            color.insert(*child, Color::Grey);
                            stack.push((*child, 0));
                        }
                        Color::Grey => {
                            // Back edge: the stack from `child` to `node` is a cycle.
                            let start = stack.iter().position(|(f, _)| *f == *child).unwrap_or(0);
                            on_cycle.extend(stack[start..].iter().map(|(f, _)| (*f).clone()));
                        }
                        Color::Black => {}
                    }
                } else {
                    color.insert(node, Color::Black);
                    stack.pop();
                }
            }
        }
        on_cycle
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// The current schedule, recomputed on every change.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn table(&self) -> &OrderingTable {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&Problem> {
        self.nodes.get(fingerprint).map(|n| &n.problem)
    }

    pub fn status(&self, fingerprint: &Fingerprint) -> Option<ProblemStatus> {
        if self.resolved.iter().any(|p| &p.fingerprint == fingerprint) {
            return Some(ProblemStatus::Resolved);
        }
        self.nodes.get(fingerprint).map(|n| n.status)
    }

    pub fn attempts(&self, fingerprint: &Fingerprint) -> u32 {
        self.nodes.get(fingerprint).map_or(0, |n| n.attempts)
    }

    pub fn has_edge(&self, before: &Fingerprint, after: &Fingerprint) -> bool {
        self.edges.contains(&(before.clone(), after.clone()))
    }

    /// The first problem in schedule order that is pending with attempts
    /// left.
    pub fn next_actionable(&self) -> Option<&Problem> {
        self.schedule
            .sequence
            .iter()
            .filter_map(|p| self.nodes.get(&p.fingerprint))
            .find(|n| n.is_actionable())
            .map(|n| &n.problem)
    }

    /// Actionable problems in schedule order.
    pub fn actionable(&self) -> Vec<&Problem> {
        self.schedule
            .sequence
            .iter()
            .filter_map(|p| self.nodes.get(&p.fingerprint))
            .filter(|n| n.is_actionable())
            .map(|n| &n.problem)
            .collect()
    }

    /// Problems still in the graph, in schedule order.
    pub fn open_problems(&self) -> Vec<Problem> {
        self.schedule.sequence.clone()
    }

    pub fn resolved_problems(&self) -> &[Problem] {
        &self.resolved
    }

    /// True when nothing is left to attempt.
    pub fn all_done(&self) -> bool {
        self.nodes.values().all(|n| !n.is_actionable())
    }

    pub fn summary(&self) -> GraphSummary {
        let mut summary = GraphSummary {
            total: self.nodes.len() + self.resolved.len(),
            resolved: self.resolved.len(),
            ..GraphSummary::default()
        };
        for node in self.nodes.values() {
            match node.status {
                ProblemStatus::Pending => summary.pending += 1,
                ProblemStatus::InProgress => summary.in_progress += 1,
                ProblemStatus::Resolved => summary.resolved += 1,
                ProblemStatus::Failed => summary.failed += 1,
                ProblemStatus::Blocked => summary.blocked += 1,
            }
        }
        summary
    }

    // ── Status transitions ────────────────────────────────────────────────────

    /// Count one attempt and mark the problem in progress. Returns the new
    /// attempt count.
    pub fn begin_attempt(&mut self, fingerprint: &Fingerprint) -> Option<u32> {
        let node = self.nodes.get_mut(fingerprint)?;
        node.attempts += 1;
        node.status = ProblemStatus::InProgress;
        Some(node.attempts)
    }

    /// An attempt failed: back to pending, or failed once attempts run out.
    pub fn record_failure(&mut self, fingerprint: &Fingerprint) -> Option<ProblemStatus> {
        let node = self.nodes.get_mut(fingerprint)?;
        node.status = if node.attempts >= MAX_ATTEMPTS {
            warn!(fingerprint = %fingerprint, attempts = node.attempts, "problem failed after maximum attempts");
            ProblemStatus::Failed
        } else {
            ProblemStatus::Pending
        };
        Some(node.status)
    }

    /// An attempt finished without error; the next diagnosis decides whether
    /// the problem is gone.
    pub fn record_success(&mut self, fingerprint: &Fingerprint) -> Option<ProblemStatus> {
        let node = self.nodes.get_mut(fingerprint)?;
        node.status = ProblemStatus::Pending;
        Some(node.status)
    }

    /// The problem cannot be fixed in this session (forbidden fix, operator
    /// skip).
    pub fn block(&mut self, fingerprint: &Fingerprint) -> Option<ProblemStatus> {
        let node = self.nodes.get_mut(fingerprint)?;
        node.status = ProblemStatus::Blocked;
        Some(node.status)
    }
}
