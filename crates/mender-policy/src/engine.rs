//! The command policy used by the executor.
//!
//! `SafetyPolicy` loads a `PolicyConfig` from a TOML string or file and
//! implements the `CommandPolicy` trait from mender-core.
//!
//! Evaluation algorithm:
//!
//! 1. Test the raw command against the configured extra forbidden rules, in
//!    declaration order. First match → `Forbidden`.
//! 2. Normalize: per segment, inject non-interactive flags and prefix `sudo`
//!    where the segment needs elevation.
//! 3. Test the normalized command against the extra rules again.
//! 4. Return `Permitted` with the normalized command.
//!
//! The executor checks the built-in forbidden list around this, so a policy
//! loaded from any file is at least as strict as the built-in one.

use std::path::Path;

use regex::Regex;
use tracing::{debug, warn};

use mender_contracts::{
    error::{MenderError, MenderResult},
    execution::PreparedCommand,
};
use mender_core::traits::{CommandPolicy, CommandVerdict};

use crate::{
    normalize::{normalize, probe_for, Elevation},
    rule::PolicyConfig,
};

#[derive(Debug)]
struct CompiledRule {
    id: String,
    reason: String,
    regex: Regex,
}

/// A `CommandPolicy` built from the built-in tables plus optional TOML.
///
/// ```rust,ignore
/// use mender_policy::SafetyPolicy;
///
/// let policy = SafetyPolicy::from_file(Path::new("/etc/mender/policy.toml"))?;
/// ```
#[derive(Debug)]
pub struct SafetyPolicy {
    rules: Vec<CompiledRule>,
    elevation: Elevation,
    inject_non_interactive: bool,
    idempotence_probes: bool,
}

impl SafetyPolicy {
    /// The policy with no configuration: built-in elevation tables,
    /// non-interactive injection and probes on, no extra bans.
    pub fn builtin() -> Self {
        Self {
            rules: Vec::new(),
            elevation: Elevation::builtin(),
            inject_non_interactive: true,
            idempotence_probes: true,
        }
    }

    /// Build a policy from an already-parsed configuration.
    ///
    /// Returns `MenderError::ConfigError` if an extra forbidden pattern is not
    /// a valid regular expression.
    pub fn from_config(config: PolicyConfig) -> MenderResult<Self> {
        let rules = config
            .forbidden
            .iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern).map_err(|e| MenderError::ConfigError {
                    reason: format!("forbidden rule '{}' has an invalid pattern: {}", rule.id, e),
                })?;
                Ok(CompiledRule {
                    id: rule.id.clone(),
                    reason: rule.reason.clone(),
                    regex,
                })
            })
            .collect::<MenderResult<Vec<_>>>()?;

        Ok(Self {
            rules,
            elevation: Elevation::with_config(&config.elevation),
            inject_non_interactive: config.inject_non_interactive,
            idempotence_probes: config.idempotence_probes,
        })
    }

    /// Parse `s` as TOML and build a `SafetyPolicy`.
    pub fn from_toml_str(s: &str) -> MenderResult<Self> {
        let config: PolicyConfig = toml::from_str(s).map_err(|e| MenderError::ConfigError {
            reason: format!("failed to parse policy TOML: {}", e),
        })?;
        Self::from_config(config)
    }

    /// Read the file at `path` and parse it as TOML policy configuration.
    pub fn from_file(path: &Path) -> MenderResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| MenderError::ConfigError {
            reason: format!("failed to read policy file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Number of configured forbidden rules on top of the built-in list.
    pub fn extra_rule_count(&self) -> usize {
        self.rules.len()
    }

    fn first_ban(&self, command: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|rule| rule.regex.is_match(command))
    }
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CommandPolicy for SafetyPolicy {
    fn evaluate(&self, command: &str) -> CommandVerdict {
        if let Some(rule) = self.first_ban(command) {
            warn!(rule_id = %rule.id, command = %command, "configured rule forbids command");
            return CommandVerdict::Forbidden {
                rule_id: rule.id.clone(),
                reason: rule.reason.clone(),
            };
        }

        let normalized = normalize(command, &self.elevation, self.inject_non_interactive);

        if let Some(rule) = self.first_ban(&normalized.command) {
            warn!(rule_id = %rule.id, command = %normalized.command, "configured rule forbids normalized command");
            return CommandVerdict::Forbidden {
                rule_id: rule.id.clone(),
                reason: rule.reason.clone(),
            };
        }

        debug!(
            original = %command,
            normalized = %normalized.command,
            elevated = normalized.elevated,
            "command permitted"
        );

        CommandVerdict::Permitted(PreparedCommand {
            original: command.to_string(),
            command: normalized.command,
            elevated: normalized.elevated,
            non_interactive_injected: normalized.non_interactive_injected,
        })
    }

    fn precheck(&self, command: &str) -> Option<String> {
        if !self.idempotence_probes {
            return None;
        }
        probe_for(command)
    }
}
