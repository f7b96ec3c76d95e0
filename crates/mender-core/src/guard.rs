//! The built-in forbidden-command list.
//!
//! These patterns are compiled into the binary and checked by the executor on
//! every call, in every mode, before and after the configurable policy runs.
//! Configuration can add bans but has no way to remove one of these.
//!
//! Each pattern is tried against the command as written and against its
//! canonical form, where quoting is stripped, long `rm` flags are spelled
//! short and absolute paths are resolved, so `rm --recursive "/usr/.."`
//! reads as `rm -r /`.

use std::sync::LazyLock;

use regex::Regex;

/// One destructive-operation pattern.
#[derive(Debug)]
pub struct ForbiddenPattern {
    pub id: &'static str,
    pub reason: &'static str,
    regex: Regex,
}

impl ForbiddenPattern {
    pub fn is_match(&self, command: &str) -> bool {
        self.regex.is_match(command)
    }
}

/// `rm` with a recursive flag, up to the target path.
const RECURSIVE_RM: &str = r"\brm\s+(?:-\S+\s+)*-[a-zA-Z]*[rR][a-zA-Z]*(?:\s+-\S+)*\s+";
/// What may follow a bare path for it to count as the whole target.
const PATH_END: &str = r"(?:\s|$|[;&|])";

static BUILTIN: LazyLock<Vec<ForbiddenPattern>> = LazyLock::new(|| {
    let table: Vec<(&'static str, String, &'static str)> = vec![
        (
            "rm-root",
            format!(r"{RECURSIVE_RM}/\*?{PATH_END}"),
            "recursive deletion of the root filesystem",
        ),
        (
            "rm-system-dir",
            format!(
                r"{RECURSIVE_RM}/(?:bin|boot|dev|etc|home|lib|lib64|proc|root|sbin|sys|usr|var)/?\*?{PATH_END}"
            ),
            "recursive deletion of a system directory",
        ),
        (
            "rm-home",
            format!(r"{RECURSIVE_RM}(?:~|\$HOME)/?\*?{PATH_END}"),
            "recursive deletion of the home directory",
        ),
        (
            "chown-root",
            format!(
                r"\bchown\s+(?:\S+\s+)*?-[a-zA-Z]*[rR][a-zA-Z]*\s+(?:\S+\s+)*/(?:(?:bin|boot|etc|lib|lib64|sbin|usr|var)/?)?{PATH_END}"
            ),
            "recursive ownership change of the root filesystem",
        ),
        (
            "find-delete-root",
            format!(r"\bfind\s+/{PATH_END}.*(?:-delete\b|-exec\s+rm\b)"),
            "deleting files across the whole filesystem with find",
        ),
        (
            "dd-raw-disk",
            r"\bdd\b.*\bof=/dev/(?:sd|nvme|vd|hd|mmcblk)".to_string(),
            "raw write to a block device",
        ),
        (
            "redirect-raw-disk",
            r">\s*/dev/(?:sd|nvme|vd|hd|mmcblk)".to_string(),
            "shell redirection onto a block device",
        ),
        ("mkfs", r"\bmkfs(?:\.\w+)?\b".to_string(), "filesystem creation"),
        (
            "partition-table",
            r"\b(?:fdisk|sfdisk|parted|gdisk|wipefs)\b".to_string(),
            "partition table modification",
        ),
        (
            "fork-bomb",
            r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:".to_string(),
            "fork bomb",
        ),
        (
            "chmod-777-root",
            r"\bchmod\s+(?:-\S+\s+)*0?777\s+/(?:\s|$|[;&|])".to_string(),
            "world-writable root filesystem",
        ),
        (
            "pipe-to-shell",
            r"\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:ba|z|da)?sh\b".to_string(),
            "piping a download straight into a shell",
        ),
        (
            "firewall-flush",
            r"\biptables\b.*\s(?:-F|--flush)\b".to_string(),
            "flushing all firewall rules",
        ),
        (
            "root-password",
            r"\bpasswd\s+root\b".to_string(),
            "changing the root password",
        ),
        (
            "disable-remote-access",
            r"\bsystemctl\s+(?:disable|mask)\s+(?:--now\s+)?(?:network|NetworkManager|sshd|firewalld)\b"
                .to_string(),
            "disabling networking or remote access",
        ),
    ];

    table
        .into_iter()
        .map(|(id, pattern, reason)| ForbiddenPattern {
            id,
            reason,
            regex: Regex::new(&pattern).expect("built-in forbidden pattern must compile"),
        })
        .collect()
});

pub fn builtin_patterns() -> &'static [ForbiddenPattern] {
    &BUILTIN
}

/// Return the first built-in pattern `command` matches.
pub fn check(command: &str) -> Option<&'static ForbiddenPattern> {
    let canonical = canonical_form(command);
    BUILTIN
        .iter()
        .find(|p| p.is_match(command) || p.is_match(&canonical))
}

/// Rewrite `command` token by token into the shape the patterns expect.
pub fn canonical_form(command: &str) -> String {
    let mut spaced = String::with_capacity(command.len() + 8);
    for c in command.chars() {
        if matches!(c, ';' | '&' | '|') {
            spaced.push(' ');
            spaced.push(c);
            spaced.push(' ');
        } else {
            spaced.push(c);
        }
    }
    spaced
        .split_whitespace()
        .map(canonical_token)
        .collect::<Vec<_>>()
        .join(" ")
}

fn canonical_token(token: &str) -> String {
    let token: String = token.chars().filter(|c| !matches!(c, '\'' | '"' | '\\')).collect();
    match token.as_str() {
        "--recursive" => return "-r".to_string(),
        "--force" => return "-f".to_string(),
        _ => {}
    }
    if let Some(rest) = token.strip_prefix('/') {
        return resolve_absolute(rest);
    }
    for (prefix, home) in [("${HOME}", "$HOME"), ("$HOME", "$HOME"), ("~", "~")] {
        if let Some(rest) = token.strip_prefix(prefix) {
            if rest.is_empty() || rest.starts_with('/') {
                return format!("{home}{}", tidy_relative(rest));
            }
        }
    }
    token
}

/// `..` never climbs above `/`.
fn resolve_absolute(rest: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in rest.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Drops empty and `.` segments under the home directory; `..` is kept as
/// written.
fn tidy_relative(rest: &str) -> String {
    let parts: Vec<&str> = rest.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!("/{}", parts.join("/"))
    }
}
