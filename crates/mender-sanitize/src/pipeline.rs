//! The anonymization pipeline.
//!
//! Substitution order, most specific first:
//!
//! 1. HomePath      `/home/jan/...`      → `/home/[USER]/...`
//! 2. Hostname      `workstation`        → `[HOSTNAME]`
//! 3. Username      `jan`                → `[USER]`
//! 4. APIToken      `sk-...`, `Bearer …` → `[API_TOKEN_REDACTED]`
//! 5. Password      `password=hunter2`   → `password=[REDACTED]`
//! 6. UUID                               → `[UUID-REDACTED]`
//! 7. MAC                                → `XX:XX:XX:XX:XX:XX`
//! 8. IPv4          `192.168.1.100`      → `192.168.XXX.XXX`
//! 9. SerialNumber  `S/N: PF1A2B3C`      → `Serial: [SERIAL-REDACTED]`
//!
//! Every step leaves its own output unmatched, which makes the whole
//! pipeline idempotent: a second pass changes nothing and reports zeros.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use mender_contracts::{
    anonymize::{AnonymizationCategory, AnonymizationReport},
    fact::FactSet,
};

use crate::patterns::{
    literal_path, literal_word, API_TOKEN, GENERIC_HOMES, GENERIC_HOSTNAMES, GENERIC_USERS,
    HOME_PATH, HOME_PLACEHOLDER, HOSTNAME_PLACEHOLDER, IPV4, MAC, MAC_PLACEHOLDER,
    SECRET_ASSIGNMENT, SECRET_PLACEHOLDER, SERIAL, SERIAL_PLACEHOLDER, TOKEN_PLACEHOLDER, USER_PLACEHOLDER,
    UUID, UUID_PLACEHOLDER,
};

/// Machine-specific values that are masked literally.
///
/// Discovered by the OS adapter and injected here, so the pipeline itself
/// performs no I/O.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveContext {
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub home: Option<String>,
}

impl SensitiveContext {
    /// No literal values; only the pattern categories apply.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_home(mut self, home: impl Into<String>) -> Self {
        self.home = Some(home.into());
        self
    }
}

/// Sanitized text and what was masked to produce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub text: String,
    pub report: AnonymizationReport,
}

/// The compiled pipeline for one machine.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    home: Option<Regex>,
    hostname: Option<Regex>,
    username: Option<Regex>,
}

impl Sanitizer {
    pub fn new(context: &SensitiveContext) -> Self {
        let present = |v: &Option<String>, generic: &[&str]| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty() && !generic.contains(s))
                .map(str::to_string)
        };

        // Homes under /home are already covered by the generic path pattern.
        let home = present(&context.home, GENERIC_HOMES)
            .filter(|h| !h.contains("/home/"))
            .and_then(|h| literal_path(&h));

        Self {
            home,
            hostname: present(&context.hostname, GENERIC_HOSTNAMES).and_then(|h| literal_word(&h)),
            username: present(&context.username, GENERIC_USERS).and_then(|u| literal_word(&u)),
        }
    }

    /// Render `facts` and sanitize the result.
    pub fn sanitize(&self, facts: &FactSet) -> Sanitized {
        self.sanitize_text(&facts.render())
    }

    /// Run every category over `text` in substitution order.
    pub fn sanitize_text(&self, text: &str) -> Sanitized {
        let mut report = AnonymizationReport::default();
        let mut text = text.to_string();

        // 1. HomePath
        if let Some(re) = &self.home {
            text = pass(&text, re, AnonymizationCategory::HomePath, &mut report, |_, _| {
                Some(HOME_PLACEHOLDER.to_string())
            });
        }
        text = pass(&text, &HOME_PATH, AnonymizationCategory::HomePath, &mut report, |_, _| {
            Some(HOME_PLACEHOLDER.to_string())
        });

        // 2. Hostname
        if let Some(re) = &self.hostname {
            text = pass(&text, re, AnonymizationCategory::Hostname, &mut report, |src, caps| {
                let m = caps.get(0)?;
                (!inside_placeholder(src, m.start(), m.end())).then(|| HOSTNAME_PLACEHOLDER.to_string())
            });
        }

        // 3. Username
        if let Some(re) = &self.username {
            text = pass(&text, re, AnonymizationCategory::Username, &mut report, |src, caps| {
                let m = caps.get(0)?;
                // `--user` style flags are not the account name; `backup-jan` is.
                let lead = src[..m.start()].rsplit(char::is_whitespace).next().unwrap_or("");
                let flag = !lead.is_empty() && lead.chars().all(|c| c == '-');
                (!flag && !inside_placeholder(src, m.start(), m.end()))
                    .then(|| USER_PLACEHOLDER.to_string())
            });
        }

        // 4. APIToken
        text = pass(&text, &API_TOKEN, AnonymizationCategory::ApiToken, &mut report, |src, caps| {
            let m = caps.get(0)?;
            let glued = src[..m.start()]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphanumeric());
            (!glued).then(|| TOKEN_PLACEHOLDER.to_string())
        });

        // 5. Password
        text = pass(&text, &SECRET_ASSIGNMENT, AnonymizationCategory::Password, &mut report, |_, caps| {
            let key = caps.get(1)?.as_str();
            let value = caps.get(2)?.as_str();
            (!is_placeholder(value)).then(|| format!("{key}={SECRET_PLACEHOLDER}"))
        });

        // 6. UUID
        text = pass(&text, &UUID, AnonymizationCategory::Uuid, &mut report, |_, _| {
            Some(UUID_PLACEHOLDER.to_string())
        });

        // 7. MAC
        text = pass(&text, &MAC, AnonymizationCategory::Mac, &mut report, |_, _| {
            Some(MAC_PLACEHOLDER.to_string())
        });

        // 8. IPv4
        text = pass(&text, &IPV4, AnonymizationCategory::Ipv4, &mut report, |_, caps| {
            Some(format!("{}.XXX.XXX", caps.get(1)?.as_str()))
        });

        // 9. SerialNumber: a value without digits is a word, not a serial.
        text = pass(&text, &SERIAL, AnonymizationCategory::SerialNumber, &mut report, |_, caps| {
            let value = caps.get(1)?.as_str();
            value
                .chars()
                .any(|c| c.is_ascii_digit())
                .then(|| SERIAL_PLACEHOLDER.to_string())
        });

        debug!(masked = report.total(), "sanitize pass complete");
        Sanitized { text, report }
    }
}

/// Replace every match of `re` for which `replace` returns `Some`, counting
/// the replacements under `category`.
fn pass(
    src: &str,
    re: &Regex,
    category: AnonymizationCategory,
    report: &mut AnonymizationReport,
    replace: impl Fn(&str, &Captures<'_>) -> Option<String>,
) -> String {
    let mut out = String::with_capacity(src.len());
    let mut last = 0;
    let mut count = 0;

    for caps in re.captures_iter(src) {
        let Some(m) = caps.get(0) else {
            continue;
        };
        if let Some(replacement) = replace(src, &caps) {
            out.push_str(&src[last..m.start()]);
            out.push_str(&replacement);
            last = m.end();
            count += 1;
        }
    }
    out.push_str(&src[last..]);

    if count > 0 {
        report.record(category, count);
    }
    out
}

fn is_placeholder_body(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_uppercase() || c == '_' || c == '-')
}

/// True for values such as `[REDACTED]` produced by an earlier step.
fn is_placeholder(value: &str) -> bool {
    value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .is_some_and(|body| !body.is_empty() && is_placeholder_body(body))
}

/// True when `src[start..end]` sits inside a `[PLACEHOLDER]`.
fn inside_placeholder(src: &str, start: usize, end: usize) -> bool {
    let before = &src[..start];
    let after = &src[end..];
    let opened = before
        .rfind('[')
        .is_some_and(|i| is_placeholder_body(&before[i + 1..]));
    let closed = after.find(']').is_some_and(|i| is_placeholder_body(&after[..i]));
    opened && closed
}
