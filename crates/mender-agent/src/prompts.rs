//! Prompt text for both session modes, and fix extraction from free-form
//! proposals.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use mender_graph::ProblemGraph;

pub const AUTONOMOUS_SYSTEM_PROMPT: &str = "\
You are an autonomous Linux remediation agent working in a loop: observe, decide, act, verify.

Reply with exactly one JSON object and nothing else:
{\"action\": \"EXEC\" | \"SEARCH\" | \"SKIP\" | \"DONE\", \"command\": string or null, \"query\": string or null, \"reason\": string}

- EXEC runs `command` in a shell. One command per turn; check its result before the next.
- SEARCH looks `query` up in external knowledge sources.
- SKIP gives up on the current focus problem.
- DONE ends the session when nothing fixable remains.

Rules:
1. Prefer read-only checks before changes.
2. Never propose destructive operations (recursive deletion of system paths, formatting, partitioning, raw disk writes). They are blocked.
3. Do not add sudo or confirmation flags yourself; the executor does that.
4. After a fix, verify it with a checking command.
5. When unsure, SEARCH or SKIP instead of guessing.";

pub const HITL_SYSTEM_PROMPT: &str = "\
You are a Linux diagnostics assistant. You receive anonymized diagnostic data, a prioritized problem list \
and the results of commands already run. A human reviews and confirms every command.

For every problem you can fix, use exactly this format:

Problem 1: <description>
   Command: `<one shell command>`
   Why: <one sentence>

List the most urgent problem first and keep to the given problem order unless the results say otherwise. \
Do not add sudo or confirmation flags; the executor does that. Never propose destructive operations.";

/// A command offered in a free-form proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedFix {
    pub command: String,
    pub comment: String,
}

/// Everything the model sees about the machine on one turn.
pub struct TurnContext<'a> {
    pub facts: &'a str,
    pub graph: &'a ProblemGraph,
    /// Sanitized results of recent commands, oldest first.
    pub history: &'a [String],
    /// Blocked commands, search results, skipped problems, operator text.
    pub notes: &'a [String],
    pub actions_taken: u32,
    pub max_fixes: u32,
    pub remaining: Duration,
}

/// The schedule with per-problem status, most urgent first.
pub fn render_problems(graph: &ProblemGraph) -> String {
    let schedule = graph.schedule();
    if schedule.sequence.is_empty() {
        return "(no problems detected)\n".to_string();
    }
    let mut out = String::new();
    for (i, problem) in schedule.sequence.iter().enumerate() {
        let status = graph.status(&problem.fingerprint).map(|s| s.as_str()).unwrap_or("pending");
        out.push_str(&format!(
            "{}. [{}] {}/{}: {} ({}, attempts {}/{})\n",
            i + 1,
            problem.severity,
            problem.module,
            problem.check,
            problem.description,
            status,
            graph.attempts(&problem.fingerprint),
            mender_graph::MAX_ATTEMPTS,
        ));
        for command in &problem.suggested_commands {
            out.push_str(&format!("   suggested: `{command}`\n"));
        }
    }
    out
}

fn render_context(ctx: &TurnContext<'_>, out: &mut String) {
    out.push_str("Diagnostic data (anonymized):\n```\n");
    out.push_str(ctx.facts.trim_end());
    out.push_str("\n```\n\nProblems in remediation order:\n");
    out.push_str(&render_problems(ctx.graph));

    if !ctx.history.is_empty() {
        out.push_str("\nRecent commands:\n");
        for entry in ctx.history {
            out.push_str(entry.trim_end());
            out.push('\n');
        }
    }
    if !ctx.notes.is_empty() {
        out.push_str("\nNotes:\n");
        for note in ctx.notes {
            out.push_str("- ");
            out.push_str(note.trim_end());
            out.push('\n');
        }
    }
    out.push_str(&format!(
        "\nActions used: {}/{}. Time left: {} s.\n",
        ctx.actions_taken,
        ctx.max_fixes,
        ctx.remaining.as_secs()
    ));
}

/// The user prompt of one autonomous decision.
pub fn decision_prompt(ctx: &TurnContext<'_>) -> String {
    let mut out = String::new();
    render_context(ctx, &mut out);
    match ctx.graph.next_actionable() {
        Some(focus) => out.push_str(&format!(
            "\nFocus problem: {}/{}: {}\n",
            focus.module, focus.check, focus.description
        )),
        None => out.push_str("\nNo actionable problem is left.\n"),
    }
    out.push_str("\nDecide the next action. Reply with the JSON object only.");
    out
}

/// The single corrective re-prompt after a malformed decision.
pub fn correction_prompt(reason: &str) -> String {
    format!(
        "Your previous reply was rejected: {reason}.\n\
         Reply again with exactly one JSON object of the form \
         {{\"action\": \"EXEC\"|\"SEARCH\"|\"SKIP\"|\"DONE\", \"command\": string or null, \"reason\": string}}. \
         EXEC needs a non-empty command."
    )
}

/// The user prompt of one human-in-the-loop proposal.
pub fn proposal_prompt(ctx: &TurnContext<'_>) -> String {
    let mut out = String::new();
    render_context(ctx, &mut out);
    out.push_str("\nPropose the next fixes in the required format.");
    out
}

// ── Fix extraction ────────────────────────────────────────────────────────────

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in proposal pattern must compile")
}

static COMMAND_LINE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)^\s*(?:[-*]\s*)?(?:\*\*)?command:(?:\*\*)?\s*`([^`]+)`"));
static WHY_LINE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)^\s*(?:[-*]\s*)?(?:\*\*)?(?:why|what it does):(?:\*\*)?\s*(.+)$"));
static NUMBERED: LazyLock<Regex> = LazyLock::new(|| compile(r"\[(\d+)\][^`\n]*`([^`]+)`"));
static EXEC_LINE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)EXEC:\s*`([^`]+)`"));

/// Pull the offered commands out of a free-form proposal.
///
/// `Command:` lines (with an optional `Why:` on the next line) are
/// preferred; `[n] ... `cmd`` menus and `EXEC: `cmd`` markers are the
/// fallbacks. Duplicates keep their first position.
pub fn extract_fixes(reply: &str) -> Vec<ProposedFix> {
    let mut fixes: Vec<ProposedFix> = Vec::new();

    let lines: Vec<&str> = reply.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = COMMAND_LINE.captures(line) {
            let comment = lines
                .get(i + 1)
                .and_then(|next| WHY_LINE.captures(next))
                .map(|c| c[1].to_string())
                .unwrap_or_default();
            push_fix(&mut fixes, &caps[1], &comment);
        }
    }
    if fixes.is_empty() {
        for caps in NUMBERED.captures_iter(reply) {
            push_fix(&mut fixes, &caps[2], &format!("fix #{}", &caps[1]));
        }
    }
    if fixes.is_empty() {
        for caps in EXEC_LINE.captures_iter(reply) {
            push_fix(&mut fixes, &caps[1], "");
        }
    }
    fixes
}

fn push_fix(fixes: &mut Vec<ProposedFix>, command: &str, comment: &str) {
    let command = command.trim();
    if !command.is_empty() && !fixes.iter().any(|f| f.command == command) {
        fixes.push(ProposedFix {
            command: command.to_string(),
            comment: comment.trim().to_string(),
        });
    }
}
