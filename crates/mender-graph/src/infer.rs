//! Rule-based problem inference over a fact snapshot.
//!
//! Each `InferenceRule` watches one fact. When its trigger fires the rule
//! yields a `Problem` with the rule's module, check, severity and suggested
//! commands. Facts that are missing never trigger anything.

use std::collections::BTreeSet;

use tracing::debug;

use mender_contracts::{
    fact::{FactSet, FactValue},
    problem::{Problem, Severity},
};

/// When a rule fires.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    /// Numeric fact at or above `warning_at`; escalated to critical at or
    /// above `critical_at`.
    AtLeast {
        warning_at: f64,
        critical_at: Option<f64>,
    },
    /// Numeric fact strictly below `threshold`.
    Below { threshold: f64 },
    /// Boolean fact equal to `when`.
    Flag { when: bool },
    /// Text fact that is not blank.
    Present,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceRule {
    pub module: &'static str,
    pub fact: &'static str,
    pub check: &'static str,
    /// Severity when the trigger does not escalate.
    pub severity: Severity,
    pub trigger: Trigger,
    /// `{value}` is replaced with the fact value.
    pub description: &'static str,
    pub commands: &'static [&'static str],
}

static BUILTIN_RULES: &[InferenceRule] = &[
    InferenceRule {
        module: "disk",
        fact: "root_used_percent",
        check: "root_space",
        severity: Severity::Warning,
        trigger: Trigger::AtLeast {
            warning_at: 85.0,
            critical_at: Some(95.0),
        },
        description: "root filesystem is {value}% full",
        commands: &["journalctl --vacuum-size=200M", "dnf clean packages"],
    },
    InferenceRule {
        module: "disk",
        fact: "home_used_percent",
        check: "home_space",
        severity: Severity::Warning,
        trigger: Trigger::AtLeast {
            warning_at: 90.0,
            critical_at: Some(98.0),
        },
        description: "home filesystem is {value}% full",
        commands: &["rm -rf ~/.cache/thumbnails/fail"],
    },
    InferenceRule {
        module: "memory",
        fact: "ram_used_percent",
        check: "ram_pressure",
        severity: Severity::Warning,
        trigger: Trigger::AtLeast {
            warning_at: 90.0,
            critical_at: Some(97.0),
        },
        description: "RAM usage is at {value}%",
        commands: &[],
    },
    InferenceRule {
        module: "memory",
        fact: "swap_used_percent",
        check: "swap_pressure",
        severity: Severity::Minor,
        trigger: Trigger::AtLeast {
            warning_at: 80.0,
            critical_at: None,
        },
        description: "swap usage is at {value}%",
        commands: &[],
    },
    InferenceRule {
        module: "logs",
        fact: "journal_size_mb",
        check: "journal_size",
        severity: Severity::Minor,
        trigger: Trigger::AtLeast {
            warning_at: 1024.0,
            critical_at: None,
        },
        description: "systemd journal uses {value} MB",
        commands: &["journalctl --vacuum-size=200M"],
    },
    InferenceRule {
        module: "network",
        fact: "default_route",
        check: "no_default_route",
        severity: Severity::Critical,
        trigger: Trigger::Flag { when: false },
        description: "no default network route",
        commands: &["systemctl restart NetworkManager"],
    },
    InferenceRule {
        module: "network",
        fact: "dns_ok",
        check: "dns_failure",
        severity: Severity::Warning,
        trigger: Trigger::Flag { when: false },
        description: "DNS resolution fails",
        commands: &["systemctl restart systemd-resolved"],
    },
    InferenceRule {
        module: "packages",
        fact: "manager_locked",
        check: "lock_held",
        severity: Severity::Warning,
        trigger: Trigger::Flag { when: true },
        description: "the package manager lock is held by another process",
        commands: &[],
    },
    InferenceRule {
        module: "services",
        fact: "failed_units",
        check: "failed_units",
        severity: Severity::Warning,
        trigger: Trigger::Present,
        description: "failed systemd units: {value}",
        commands: &["systemctl reset-failed"],
    },
    InferenceRule {
        module: "audio",
        fact: "pipewire_active",
        check: "pipewire_inactive",
        severity: Severity::Warning,
        trigger: Trigger::Flag { when: false },
        description: "the PipeWire audio server is not running",
        commands: &["systemctl --user restart pipewire pipewire-pulse wireplumber"],
    },
    InferenceRule {
        module: "audio",
        fact: "sink_count",
        check: "no_output_device",
        severity: Severity::Warning,
        trigger: Trigger::Below { threshold: 1.0 },
        description: "no audio output device is available",
        commands: &["dnf install sof-firmware", "systemctl --user restart wireplumber"],
    },
    InferenceRule {
        module: "thumbnails",
        fact: "fail_count",
        check: "failed_thumbnails",
        severity: Severity::Minor,
        trigger: Trigger::AtLeast {
            warning_at: 1.0,
            critical_at: None,
        },
        description: "{value} thumbnails are marked as failed",
        commands: &["rm -rf ~/.cache/thumbnails/fail"],
    },
    InferenceRule {
        module: "thumbnails",
        fact: "thumbnailer_count",
        check: "no_thumbnailers",
        severity: Severity::Minor,
        trigger: Trigger::Below { threshold: 1.0 },
        description: "no thumbnailers are installed",
        commands: &["dnf install ffmpegthumbnailer"],
    },
];

/// The built-in rule list.
pub fn builtin_rules() -> &'static [InferenceRule] {
    BUILTIN_RULES
}

impl InferenceRule {
    /// The problem this rule yields for `facts`, if it fires.
    pub fn evaluate(&self, facts: &FactSet) -> Option<Problem> {
        let value = facts.get(self.module, self.fact)?;
        let severity = self.fire(value)?;
        let description = self.description.replace("{value}", &display(value));
        Some(Problem::new(self.module, self.check, severity, description).with_commands(self.commands.iter().copied()))
    }

    fn fire(&self, value: &FactValue) -> Option<Severity> {
        match self.trigger {
            Trigger::AtLeast {
                warning_at,
                critical_at,
            } => {
                let n = value.as_f64()?;
                match critical_at {
                    Some(c) if n >= c => Some(Severity::Critical),
                    _ if n >= warning_at => Some(self.severity),
                    _ => None,
                }
            }
            Trigger::Below { threshold } => (value.as_f64()? < threshold).then_some(self.severity),
            Trigger::Flag { when } => (value.as_bool()? == when).then_some(self.severity),
            Trigger::Present => {
                let text = value.as_str()?.trim();
                (!text.is_empty()).then_some(self.severity)
            }
        }
    }
}

fn display(value: &FactValue) -> String {
    match value {
        FactValue::Number(n) if n.fract() == 0.0 => format!("{}", *n as i64),
        FactValue::Number(n) => format!("{n:.1}"),
        other => other.to_string(),
    }
}

/// Evaluate `rules` against `facts`. The result is deduplicated by
/// fingerprint and keeps rule order.
pub fn infer(facts: &FactSet, rules: &[InferenceRule]) -> Vec<Problem> {
    let mut seen = BTreeSet::new();
    let problems: Vec<Problem> = rules
        .iter()
        .filter_map(|rule| rule.evaluate(facts))
        .filter(|p| seen.insert(p.fingerprint.clone()))
        .collect();
    debug!(count = problems.len(), "problems inferred");
    problems
}
