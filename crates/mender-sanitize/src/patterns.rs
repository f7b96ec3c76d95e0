//! Fixed masking patterns and their placeholders.
//!
//! The `regex` crate has no look-around, so the guards that keep a pass
//! idempotent (never re-mask a placeholder, never match inside a word) live
//! in the replacement closures in `pipeline.rs`, not in these patterns.

use std::sync::LazyLock;

use regex::Regex;

pub(crate) const HOME_PLACEHOLDER: &str = "/home/[USER]";
pub(crate) const HOSTNAME_PLACEHOLDER: &str = "[HOSTNAME]";
pub(crate) const USER_PLACEHOLDER: &str = "[USER]";
pub(crate) const TOKEN_PLACEHOLDER: &str = "[API_TOKEN_REDACTED]";
pub(crate) const SECRET_PLACEHOLDER: &str = "[REDACTED]";
pub(crate) const UUID_PLACEHOLDER: &str = "[UUID-REDACTED]";
pub(crate) const MAC_PLACEHOLDER: &str = "XX:XX:XX:XX:XX:XX";
pub(crate) const SERIAL_PLACEHOLDER: &str = "Serial: [SERIAL-REDACTED]";

/// Hostnames that identify nothing.
pub(crate) const GENERIC_HOSTNAMES: &[&str] = &["localhost", "localhost.localdomain"];

/// Accounts whose name identifies nothing.
pub(crate) const GENERIC_USERS: &[&str] = &["root"];

/// Home directories that are not personal.
pub(crate) const GENERIC_HOMES: &[&str] = &["/", "/root"];

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in masking pattern must compile")
}

/// `/home/<name>`; the name excludes `[` so `/home/[USER]` never matches.
pub(crate) static HOME_PATH: LazyLock<Regex> =
    LazyLock::new(|| compile(r#"/home/[^\s/"':\[\]]+"#));

/// Provider keys and bearer tokens. Group 0 must not follow an alphanumeric.
pub(crate) static API_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?:sk-|xai-|AIzaSy|Bearer\s+)[A-Za-z0-9_.\-]{15,}"));

/// `password=...`, `token: ...`. Group 1 is the key, group 2 the value.
pub(crate) static SECRET_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)(password|passwd|secret|token|api_key|apikey|auth)\s*[=:]\s*(\S+)")
});

pub(crate) static UUID: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b")
});

pub(crate) static MAC: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\b(?:[0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}\b"));

/// Keeps the first two octets in group 1.
pub(crate) static IPV4: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\b(\d{1,3}\.\d{1,3})\.\d{1,3}\.\d{1,3}\b"));

/// Group 1 is the serial value.
pub(crate) static SERIAL: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)\b(?:S/N|Serial|SN)[\s:]+([A-Z0-9]{6,20})\b"));

/// Literal word match for a context value such as the hostname.
///
/// Returns `None` for a value that cannot form a pattern, which only
/// happens for pathological input; the category is then skipped.
pub(crate) fn literal_word(value: &str) -> Option<Regex> {
    Regex::new(&format!(r"\b{}\b", regex::escape(value))).ok()
}

/// Literal path match, bounded so `/srv/jan` does not match `/srv/janet`.
pub(crate) fn literal_path(value: &str) -> Option<Regex> {
    let value = value.trim_end_matches('/');
    Regex::new(&format!(r"{}\b", regex::escape(value))).ok()
}
