//! Command normalization: privilege elevation, non-interactive flags and
//! idempotence probes.
//!
//! Compound commands joined by `&&`, `||` or `;` are normalized segment by
//! segment. Commands containing quotes or substitutions are treated as one
//! opaque segment, since splitting them would need a shell parser.

use std::sync::LazyLock;

use regex::Regex;

use crate::rule::{ElevationConfig, UserScope};

// ── Built-in tables ───────────────────────────────────────────────────────────

/// Command prefixes that operate on system scope.
///
/// A prefix ending in a non-alphanumeric character matches any continuation
/// (`grub2-` matches `grub2-mkconfig`); otherwise the next character must be
/// whitespace or the end of the command.
const SYSTEM_PREFIXES: &[&str] = &[
    "dnf",
    "yum",
    "apt",
    "apt-get",
    "pacman",
    "zypper",
    "rpm",
    "systemctl",
    "firewall-cmd",
    "setenforce",
    "modprobe",
    "rmmod",
    "alsactl",
    "grub2-",
    "update-grub",
    "chown",
    "mount",
    "umount",
    "useradd",
    "usermod",
    "snap install",
    "snap remove",
    "snap refresh",
    "flatpak install",
    "flatpak uninstall",
    "flatpak update",
    "journalctl --vacuum-",
    "sysctl -w",
    "timedatectl set-",
    "hostnamectl set-",
];

const USER_SCOPED: &[(&str, &str)] = &[
    ("systemctl", "--user"),
    ("journalctl", "--user"),
    ("flatpak", "--user"),
    ("busctl", "--user"),
];

/// Subcommands and flags that only read state.
const READ_ONLY: &[(&str, &[&str])] = &[
    (
        "systemctl",
        &[
            "status", "is-active", "is-enabled", "is-failed", "list-units", "list-unit-files",
            "list-timers", "show", "cat", "--failed",
        ],
    ),
    ("rpm", &["-q", "-qa", "-qi", "-ql", "-qf", "--query", "-V", "--verify"]),
    ("dnf", &["list", "info", "search", "check-update", "repolist", "history", "provides"]),
    ("yum", &["list", "info", "search", "check-update", "repolist", "history", "provides"]),
    ("apt", &["list", "show", "search", "policy"]),
    ("pacman", &["-Q", "-Qi", "-Qs", "-Ss", "-Si"]),
    ("zypper", &["search", "se", "info", "if", "repos", "lr"]),
    ("firewall-cmd", &["--state", "--list-all", "--get-active-zones"]),
];

const CONFIRM_FLAGS: &[&str] = &[
    "-y",
    "--yes",
    "--assumeyes",
    "--assume-yes",
    "--noconfirm",
    "--no-confirm",
    "--non-interactive",
];

/// Package managers whose global `-n` means "answer every prompt". For the
/// others `-n` is unrelated and the command still needs `-y`.
const SHORT_NON_INTERACTIVE: &[&str] = &["zypper"];

static SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*(&&|\|\||;)\s*").expect("separator pattern must compile"));

static PKG_MUTATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:apt-get|apt|dnf|yum|zypper)(?:\s+-\S+)*\s+(?:install|reinstall|upgrade|update|dist-upgrade|full-upgrade|remove|autoremove|erase|in|up|rm)\b",
    )
    .expect("package-manager pattern must compile")
});

static PACMAN_MUTATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^pacman\s+(?:-\S+\s+)*-[SRU]\S*").expect("pacman pattern must compile")
});

static PACKAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._+:-]*$").expect("package name pattern must compile")
});

// ── Segments ──────────────────────────────────────────────────────────────────

/// One simple command of a compound command and the separator after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Segment {
    pub text: String,
    pub separator: Option<String>,
}

pub(crate) fn split_segments(command: &str) -> Vec<Segment> {
    let command = command.trim();
    let opaque = command.contains(['\'', '"', '`']) || command.contains("$(");
    if opaque {
        return vec![Segment {
            text: command.to_string(),
            separator: None,
        }];
    }

    let mut segments = Vec::new();
    let mut last = 0;
    for caps in SEPARATOR.captures_iter(command) {
        let (Some(whole), Some(sep)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        segments.push(Segment {
            text: command[last..whole.start()].to_string(),
            separator: Some(sep.as_str().to_string()),
        });
        last = whole.end();
    }
    segments.push(Segment {
        text: command[last..].to_string(),
        separator: None,
    });
    segments.retain(|s| !s.text.trim().is_empty() || s.separator.is_some());
    segments
}

pub(crate) fn join_segments(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        out.push_str(&segment.text);
        match segment.separator.as_deref() {
            Some(";") => out.push_str("; "),
            Some(sep) => {
                out.push(' ');
                out.push_str(sep);
                out.push(' ');
            }
            None => {}
        }
    }
    out.trim_end().to_string()
}

// ── sudo handling ─────────────────────────────────────────────────────────────

/// How a segment already relates to `sudo`.
enum SudoForm<'a> {
    /// No sudo; the whole segment is the body.
    Plain(&'a str),
    /// `sudo <body>` with no sudo options.
    Simple(&'a str),
    /// `sudo -u … …`: elevated, but too custom to rewrite.
    Opaque,
}

fn sudo_form(segment: &str) -> SudoForm<'_> {
    match segment.strip_prefix("sudo") {
        Some(rest) if rest.starts_with(char::is_whitespace) => {
            let body = rest.trim_start();
            if body.starts_with('-') {
                SudoForm::Opaque
            } else {
                SudoForm::Simple(body)
            }
        }
        _ => SudoForm::Plain(segment),
    }
}

// ── Elevation ─────────────────────────────────────────────────────────────────

/// Elevation rules: built-in tables plus configured extras.
#[derive(Debug, Clone)]
pub struct Elevation {
    prefixes: Vec<String>,
    user_scoped: Vec<UserScope>,
}

impl Elevation {
    pub fn builtin() -> Self {
        Self::with_config(&ElevationConfig::default())
    }

    pub fn with_config(config: &ElevationConfig) -> Self {
        let mut prefixes: Vec<String> = SYSTEM_PREFIXES.iter().map(|p| p.to_string()).collect();
        prefixes.extend(config.extra_prefixes.iter().cloned());

        let mut user_scoped: Vec<UserScope> = USER_SCOPED
            .iter()
            .map(|(tool, marker)| UserScope {
                tool: tool.to_string(),
                marker: marker.to_string(),
            })
            .collect();
        user_scoped.extend(config.user_scoped.iter().cloned());

        Self { prefixes, user_scoped }
    }

    /// Whether a segment without a `sudo` prefix needs one.
    pub fn needs_elevation(&self, body: &str) -> bool {
        let body = body.trim();
        if self.is_user_scoped(body) || is_read_only(body) {
            return false;
        }
        self.prefixes.iter().any(|p| prefix_matches(body, p))
    }

    fn is_user_scoped(&self, body: &str) -> bool {
        let mut tokens = body.split_whitespace();
        let Some(tool) = tokens.next() else {
            return false;
        };
        let rest: Vec<&str> = tokens.collect();
        self.user_scoped
            .iter()
            .any(|scope| scope.tool == tool && rest.contains(&scope.marker.as_str()))
    }
}

fn prefix_matches(body: &str, prefix: &str) -> bool {
    if !body.starts_with(prefix) {
        return false;
    }
    if prefix.ends_with(|c: char| !c.is_alphanumeric()) {
        return true;
    }
    body[prefix.len()..]
        .chars()
        .next()
        .map_or(true, char::is_whitespace)
}

fn is_read_only(body: &str) -> bool {
    let mut tokens = body.split_whitespace();
    let Some(tool) = tokens.next() else {
        return false;
    };
    let Some((_, queries)) = READ_ONLY.iter().find(|(t, _)| *t == tool) else {
        return false;
    };
    for token in tokens {
        if queries.contains(&token) {
            return true;
        }
        if !token.starts_with('-') {
            return false;
        }
    }
    false
}

// ── Non-interactive flags ─────────────────────────────────────────────────────

/// Inject a confirmation flag into a package-manager mutation that lacks
/// one. Returns `None` when nothing needs to change.
pub(crate) fn make_non_interactive(body: &str) -> Option<String> {
    let tokens: Vec<&str> = body.split_whitespace().collect();

    if let Some(m) = PKG_MUTATION.find(body) {
        let clustered_y = |t: &&str| {
            t.starts_with('-') && !t.starts_with("--") && t.len() > 2 && t.contains('y')
        };
        let short_n = tokens
            .first()
            .is_some_and(|manager| SHORT_NON_INTERACTIVE.contains(manager));
        let confirmed = |t: &&str| CONFIRM_FLAGS.contains(t) || (short_n && *t == "-n");
        if tokens.iter().any(confirmed) || tokens.iter().any(clustered_y) {
            return None;
        }
        return Some(format!("{} -y{}", &body[..m.end()], &body[m.end()..]));
    }

    if let Some(m) = PACMAN_MUTATION.find(body) {
        if tokens.contains(&"--noconfirm") {
            return None;
        }
        return Some(format!("{} --noconfirm{}", &body[..m.end()], &body[m.end()..]));
    }

    None
}

// ── Full normalization ────────────────────────────────────────────────────────

/// The result of normalizing one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub command: String,
    pub elevated: bool,
    pub non_interactive_injected: bool,
}

pub(crate) fn normalize(command: &str, elevation: &Elevation, inject: bool) -> Normalized {
    let mut segments = split_segments(command);
    let mut elevated = false;
    let mut injected = false;

    for segment in &mut segments {
        let text = segment.text.trim();
        let rewritten = match sudo_form(text) {
            SudoForm::Opaque => {
                elevated = true;
                text.to_string()
            }
            SudoForm::Simple(body) => {
                elevated = true;
                let body = rewrite_body(body, inject, &mut injected);
                format!("sudo {body}")
            }
            SudoForm::Plain(body) => {
                let needs = elevation.needs_elevation(body);
                let body = rewrite_body(body, inject, &mut injected);
                if needs {
                    elevated = true;
                    format!("sudo {body}")
                } else {
                    body
                }
            }
        };
        segment.text = rewritten;
    }

    Normalized {
        command: join_segments(&segments),
        elevated,
        non_interactive_injected: injected,
    }
}

fn rewrite_body(body: &str, inject: bool, injected: &mut bool) -> String {
    if !inject {
        return body.to_string();
    }
    match make_non_interactive(body) {
        Some(rewritten) => {
            *injected = true;
            rewritten
        }
        None => body.to_string(),
    }
}

// ── Idempotence probes ────────────────────────────────────────────────────────

/// A read-only command whose success means `command` has nothing to do.
///
/// Only simple, single-segment commands get a probe.
pub(crate) fn probe_for(command: &str) -> Option<String> {
    let segments = split_segments(command);
    if segments.len() != 1 || command.contains('|') {
        return None;
    }
    let body = match sudo_form(segments[0].text.trim()) {
        SudoForm::Plain(body) | SudoForm::Simple(body) => body,
        SudoForm::Opaque => return None,
    };
    let tokens: Vec<&str> = body.split_whitespace().collect();
    let (tool, rest) = tokens.split_first()?;
    let args: Vec<&str> = rest.iter().copied().filter(|t| !t.starts_with('-')).collect();

    match *tool {
        "dnf" | "yum" => package_probe("rpm -q", &args, "install"),
        "apt" | "apt-get" => package_probe("dpkg -s", &args, "install"),
        "pacman" if rest.first() == Some(&"-S") => {
            plain_packages(&args).then(|| format!("pacman -Q {}", args.join(" ")))
        }
        "systemctl" => systemctl_probe(rest, &args),
        "mkdir" if rest.contains(&"-p") && !args.is_empty() => Some(
            args.iter()
                .map(|dir| format!("test -d {dir}"))
                .collect::<Vec<_>>()
                .join(" && "),
        ),
        _ => None,
    }
}

fn package_probe(query: &str, args: &[&str], verb: &str) -> Option<String> {
    let (first, packages) = args.split_first()?;
    if *first != verb || packages.is_empty() || !plain_packages(packages) {
        return None;
    }
    Some(format!("{query} {}", packages.join(" ")))
}

fn plain_packages(packages: &[&str]) -> bool {
    !packages.is_empty() && packages.iter().all(|p| PACKAGE_NAME.is_match(p))
}

fn systemctl_probe(rest: &[&str], args: &[&str]) -> Option<String> {
    let (verb, units) = args.split_first()?;
    if units.is_empty() {
        return None;
    }
    let scope = if rest.contains(&"--user") { "systemctl --user" } else { "systemctl" };
    let units = units.join(" ");
    match *verb {
        "enable" if rest.contains(&"--now") => {
            Some(format!("{scope} is-enabled {units} && {scope} is-active {units}"))
        }
        "enable" => Some(format!("{scope} is-enabled {units}")),
        "start" => Some(format!("{scope} is-active {units}")),
        _ => None,
    }
}
