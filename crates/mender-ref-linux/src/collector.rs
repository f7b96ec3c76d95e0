//! Fact collection for a Linux desktop.
//!
//! Host metrics (disk, memory, processes) come from `sysinfo`. Everything
//! else comes from a fixed table of read-only shell probes, run through a
//! `ProcessRunner` with a short per-probe timeout. A probe that fails or
//! prints something unexpected contributes no fact; the inference rules
//! treat a missing fact as "nothing to report".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use sysinfo::{Disks, System};
use tracing::{debug, warn};

use mender_contracts::{
    error::{MenderError, MenderResult},
    execution::{ExecutionResult, PreparedCommand},
    fact::{FactSet, FactSetBuilder, FactValue},
    session::ModuleFilter,
};
use mender_core::{
    traits::{FactCollector, ProcessRunner, RunLimits},
    Deadline, ShellRunner,
};

/// Per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on one whole collection pass.
pub const DEFAULT_COLLECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Process names that hold the package database lock while they run.
const PACKAGE_MANAGERS: &[&str] = &[
    "dnf", "dnf5", "yum", "rpm", "packagekitd", "apt", "apt-get", "dpkg", "pacman", "zypper",
];

// ── Shell probes ──────────────────────────────────────────────────────────────

/// One read-only command and the parser that turns its output into a fact.
pub struct ShellProbe {
    pub module: &'static str,
    pub fact: &'static str,
    pub command: &'static str,
    pub parse: fn(&ExecutionResult) -> Option<FactValue>,
}

/// The built-in probe table.
pub const PROBES: &[ShellProbe] = &[
    ShellProbe {
        module: "logs",
        fact: "journal_size_mb",
        command: "journalctl --disk-usage",
        parse: parse_journal_usage,
    },
    ShellProbe {
        module: "network",
        fact: "default_route",
        command: "ip route show default",
        parse: parse_nonempty_output,
    },
    ShellProbe {
        module: "network",
        fact: "dns_ok",
        command: "getent hosts fedoraproject.org",
        parse: parse_exit_ok,
    },
    ShellProbe {
        module: "services",
        fact: "failed_units",
        command: "systemctl --failed --no-legend --plain",
        parse: parse_failed_units,
    },
    ShellProbe {
        module: "audio",
        fact: "pipewire_active",
        command: "systemctl --user is-active pipewire.service",
        parse: parse_is_active,
    },
    ShellProbe {
        module: "audio",
        fact: "sink_count",
        command: "pactl list short sinks",
        parse: parse_line_count,
    },
    ShellProbe {
        module: "thumbnails",
        fact: "fail_count",
        command: "find ~/.cache/thumbnails/fail -type f 2>/dev/null | wc -l",
        parse: parse_count,
    },
    ShellProbe {
        module: "thumbnails",
        fact: "thumbnailer_count",
        command: "ls /usr/share/thumbnailers 2>/dev/null | wc -l",
        parse: parse_count,
    },
];

/// `journalctl --disk-usage` prints
/// "Archived and active journals take up 1.2G in the file system."
pub fn parse_journal_usage(result: &ExecutionResult) -> Option<FactValue> {
    if !result.succeeded() {
        return None;
    }
    let size = result.stdout.split("take up").nth(1)?.split_whitespace().next()?;
    size_to_mb(size).map(FactValue::Number)
}

/// Convert a systemd-style size ("512.0M", "1.2G", "800K") to megabytes.
fn size_to_mb(size: &str) -> Option<f64> {
    let split = size.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(size.len());
    let (number, unit) = size.split_at(split);
    let number: f64 = number.parse().ok()?;
    let factor = match unit.trim_end_matches('B') {
        "" => 1.0 / (1024.0 * 1024.0),
        "K" => 1.0 / 1024.0,
        "M" => 1.0,
        "G" => 1024.0,
        "T" => 1024.0 * 1024.0,
        _ => return None,
    };
    Some((number * factor * 10.0).round() / 10.0)
}

fn parse_nonempty_output(result: &ExecutionResult) -> Option<FactValue> {
    result.exit_status?;
    Some(FactValue::Flag(result.succeeded() && !result.stdout.trim().is_empty()))
}

fn parse_exit_ok(result: &ExecutionResult) -> Option<FactValue> {
    if result.timed_out {
        return Some(FactValue::Flag(false));
    }
    result.exit_status.map(|code| FactValue::Flag(code == 0))
}

/// First column of each `systemctl --failed --plain` line, comma-joined.
/// An empty string when nothing failed.
pub fn parse_failed_units(result: &ExecutionResult) -> Option<FactValue> {
    result.exit_status?;
    let units: Vec<&str> = result
        .stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect();
    Some(FactValue::Text(units.join(", ")))
}

/// `is-active` exits nonzero for inactive units but still prints the state.
fn parse_is_active(result: &ExecutionResult) -> Option<FactValue> {
    let state = result.stdout.trim();
    if result.exit_status.is_none() || state.is_empty() {
        return None;
    }
    Some(FactValue::Flag(state == "active"))
}

fn parse_line_count(result: &ExecutionResult) -> Option<FactValue> {
    if !result.succeeded() {
        return None;
    }
    let lines = result.stdout.lines().filter(|l| !l.trim().is_empty()).count();
    Some(FactValue::Number(lines as f64))
}

fn parse_count(result: &ExecutionResult) -> Option<FactValue> {
    if !result.succeeded() {
        return None;
    }
    result.stdout.trim().parse::<u64>().ok().map(|n| FactValue::Number(n as f64))
}

// ── Host metrics ──────────────────────────────────────────────────────────────

fn used_percent(total: u64, available: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(available) as f64 / total as f64 * 100.0;
    Some((used * 10.0).round() / 10.0)
}

/// Blocking sysinfo reads. Run on the blocking pool.
fn host_facts(modules: &ModuleFilter) -> FactSetBuilder {
    let mut facts = FactSet::builder();

    if modules.allows("disk") {
        let disks = Disks::new_with_refreshed_list();
        for disk in disks.list() {
            let fact = match disk.mount_point().to_str() {
                Some("/") => "root_used_percent",
                Some("/home") => "home_used_percent",
                _ => continue,
            };
            if let Some(percent) = used_percent(disk.total_space(), disk.available_space()) {
                facts.insert("disk", fact, percent);
            }
        }
    }

    let wants_processes = modules.allows("packages");
    if modules.allows("memory") || wants_processes {
        let mut sys = System::new();
        if modules.allows("memory") {
            sys.refresh_memory();
            if let Some(percent) = used_percent(sys.total_memory(), sys.available_memory()) {
                facts.insert("memory", "ram_used_percent", percent);
            }
            if sys.total_swap() > 0 {
                let free = sys.total_swap().saturating_sub(sys.used_swap());
                if let Some(percent) = used_percent(sys.total_swap(), free) {
                    facts.insert("memory", "swap_used_percent", percent);
                }
            }
        }
        if wants_processes {
            sys.refresh_processes();
            let locked = sys.processes().values().any(|p| PACKAGE_MANAGERS.contains(&p.name()));
            facts.insert("packages", "manager_locked", locked);
        }
    }

    if modules.allows("system") {
        if let Some(kernel) = System::kernel_version() {
            facts.insert("system", "kernel", kernel);
        }
        if let Some(os) = System::long_os_version() {
            facts.insert("system", "os", os);
        }
        facts.insert("system", "uptime_hours", System::uptime() / 3600);
    }

    facts
}

// ── Collector ─────────────────────────────────────────────────────────────────

/// Collects facts from the local machine.
pub struct LinuxCollector {
    runner: Arc<dyn ProcessRunner>,
    probes: &'static [ShellProbe],
    probe_timeout: Duration,
    collection_timeout: Duration,
    host_metrics: bool,
}

impl LinuxCollector {
    pub fn new() -> Self {
        Self::with_runner(Arc::new(ShellRunner::new()))
    }

    pub fn with_runner(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            probes: PROBES,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            collection_timeout: DEFAULT_COLLECTION_TIMEOUT,
            host_metrics: true,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Skip the sysinfo readings and collect shell facts only.
    pub fn without_host_metrics(mut self) -> Self {
        self.host_metrics = false;
        self
    }

    async fn run_probe(&self, probe: &ShellProbe, deadline: &Deadline) -> Option<FactValue> {
        let prepared = PreparedCommand {
            original: probe.command.to_string(),
            command: probe.command.to_string(),
            elevated: false,
            non_interactive_injected: false,
        };
        let limits = RunLimits {
            timeout: self.probe_timeout,
            deadline,
            grace_period: Duration::ZERO,
        };
        let result = self.runner.run(&prepared, limits).await;
        let value = (probe.parse)(&result);
        if value.is_none() {
            debug!(module = probe.module, fact = probe.fact, exit = ?result.exit_status, "probe produced no fact");
        }
        value
    }
}

impl Default for LinuxCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FactCollector for LinuxCollector {
    async fn collect(&self, modules: &ModuleFilter) -> MenderResult<FactSet> {
        let mut facts = if self.host_metrics {
            let filter = modules.clone();
            tokio::task::spawn_blocking(move || host_facts(&filter))
                .await
                .map_err(|e| MenderError::Collection {
                    reason: format!("host metrics task failed: {e}"),
                })?
        } else {
            FactSet::builder()
        };

        let deadline = Deadline::after(self.collection_timeout);
        let deadline = &deadline;
        let selected = self.probes.iter().filter(|p| modules.allows(p.module));
        let results = join_all(selected.map(|probe| async move {
            (probe, self.run_probe(probe, deadline).await)
        }))
        .await;

        for (probe, value) in results {
            if let Some(value) = value {
                facts.insert(probe.module, probe.fact, value);
            }
        }
        if deadline.is_expired() {
            warn!("fact collection hit its time limit; some facts are missing");
        }

        let facts = facts.build();
        debug!(modules = facts.module_names().count(), "facts collected");
        Ok(facts)
    }
}
