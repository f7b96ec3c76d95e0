//! Discovery of the machine-identifying values the sanitizer masks.

use sysinfo::System;

use mender_sanitize::SensitiveContext;

/// Read the hostname, user name and home directory of the current session.
pub fn discover_sensitive_context() -> SensitiveContext {
    context_from(
        System::host_name(),
        |key| std::env::var(key).ok(),
    )
}

pub(crate) fn context_from(
    hostname: Option<String>,
    env: impl Fn(&str) -> Option<String>,
) -> SensitiveContext {
    let mut context = SensitiveContext::none();
    if let Some(hostname) = hostname.filter(|h| !h.trim().is_empty() && h != "localhost") {
        context = context.with_hostname(hostname);
    }
    if let Some(user) = ["USER", "LOGNAME"].iter().find_map(|k| env(*k)).filter(|u| !u.is_empty()) {
        context = context.with_username(user);
    }
    if let Some(home) = env("HOME").filter(|h| h.len() > 1) {
        context = context.with_home(home);
    }
    context
}
