//! Terminal rendering of session events and the interactive operator.

use std::io::Write;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use mender_agent::{Operator, ProposedFix, SessionEvent, SessionObserver};
use mender_contracts::{
    execution::{ExecutionOutcome, PreparedCommand},
    problem::Problem,
};

// ── Operator ──────────────────────────────────────────────────────────────────

/// Reads operator input from stdin.
pub struct TerminalOperator {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl TerminalOperator {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    async fn read_line(&self, prompt: &str) -> Option<String> {
        print!("{prompt}");
        let _ = std::io::stdout().flush();
        self.lines.lock().await.next_line().await.ok().flatten()
    }
}

#[async_trait]
impl Operator for TerminalOperator {
    async fn next_input(&self, fixes: &[ProposedFix]) -> Option<String> {
        if !fixes.is_empty() {
            println!();
            for (i, fix) in fixes.iter().enumerate() {
                println!("  [{}] {}", i + 1, fix.command);
                if !fix.comment.is_empty() {
                    println!("      {}", fix.comment);
                }
            }
        }
        println!();
        println!("  <n> run fix | a run all | !<cmd> own command | search <q> | d <text> describe | s skip | q quit");
        self.read_line("mender> ").await
    }

    async fn describe_problem(&self) -> Option<String> {
        self.read_line("describe the problem: ").await
    }

    async fn confirm(&self, command: &PreparedCommand) -> bool {
        println!();
        println!("  about to run: {}", command.command);
        if command.command != command.original {
            println!("  (proposed as: {})", command.original);
        }
        if command.elevated {
            println!("  this command runs with sudo");
        }
        matches!(
            self.read_line("  run it? [y/N] ").await.as_deref().map(str::trim),
            Some("y" | "Y" | "yes")
        )
    }
}

// ── Observer ──────────────────────────────────────────────────────────────────

/// Prints session events as they happen.
pub struct TerminalObserver {
    /// Proposals already appeared chunk by chunk.
    streamed: bool,
}

impl TerminalObserver {
    pub fn new(streamed: bool) -> Self {
        Self { streamed }
    }
}

pub fn print_problems(problems: &[Problem]) {
    if problems.is_empty() {
        println!("  no problems detected");
        return;
    }
    for (i, p) in problems.iter().enumerate() {
        println!("  {:>2}. [{}] {}/{}: {}", i + 1, p.severity, p.module, p.check, p.description);
    }
}

impl SessionObserver for TerminalObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Diagnosed { problems, report } => {
                println!();
                println!("Diagnosis ({} problems):", problems.len());
                print_problems(problems);
                if !report.is_clean() {
                    println!("  {} identifying values masked before leaving this machine", report.total());
                }
            }
            SessionEvent::OrderingCycle(cycle) => {
                let nodes: Vec<String> = cycle.nodes.iter().map(|f| f.to_string()).collect();
                println!("  ordering rules conflict for: {}", nodes.join(", "));
            }
            SessionEvent::ModelChunk(text) => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            SessionEvent::Proposal { reply, .. } => {
                if self.streamed {
                    println!();
                } else {
                    println!();
                    println!("{reply}");
                }
            }
            SessionEvent::Decided(decision) => {
                if self.streamed {
                    println!();
                }
                match &decision.command {
                    Some(command) => println!("> {} `{}`: {}", decision.action, command, decision.reason),
                    None => println!("> {}: {}", decision.action, decision.reason),
                }
            }
            SessionEvent::Outcome(outcome) => match outcome {
                ExecutionOutcome::Executed(result) => {
                    let status = if result.succeeded() { "ok" } else { "FAILED" };
                    println!(
                        "  [{status}] {} ({:.1}s, exit {})",
                        result.command,
                        result.duration.as_secs_f64(),
                        result.exit_status.map_or("none".to_string(), |c| c.to_string())
                    );
                    if !result.succeeded() && !result.stderr.trim().is_empty() {
                        for line in result.stderr.trim().lines().take(5) {
                            println!("      {line}");
                        }
                    }
                }
                ExecutionOutcome::Declined { command } => println!("  [declined] {command}"),
                ExecutionOutcome::AlreadySatisfied { command, probe } => {
                    println!("  [already done] {command} (`{probe}` succeeded)")
                }
                ExecutionOutcome::DryRun(prepared) => println!("  [dry run] would run: {}", prepared.command),
            },
            SessionEvent::Blocked { command, reason } => {
                println!("  [BLOCKED] {command}: {reason}");
            }
            SessionEvent::Searched(record) => {
                println!("  searched '{}': {} results", record.query, record.hits.len());
                for hit in &record.hits {
                    println!("    - [{}] {} {}", hit.source, hit.title, hit.url);
                }
            }
            SessionEvent::GraphUpdated { resolved, added } => {
                for p in resolved {
                    println!("  resolved: {}/{}", p.module, p.check);
                }
                for p in added {
                    println!("  new problem: [{}] {}/{}: {}", p.severity, p.module, p.check, p.description);
                }
            }
            SessionEvent::Notice(text) => println!("  {text}"),
        }
    }
}

/// Ask once, before an autonomous session starts.
pub fn ask_consent(max_fixes: u32, dry_run: bool) -> bool {
    println!();
    println!("Autonomous mode runs up to {max_fixes} commands without asking for each one.");
    if dry_run {
        println!("Dry run: nothing will actually be executed.");
    }
    println!("Forbidden commands are still refused.");
    print!("Continue? [y/N] ");
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}
