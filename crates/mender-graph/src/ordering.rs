//! The ordering rule table.
//!
//! Edges of the problem graph come only from this table: a rule
//! `before = "network", after = "packages"` means every network problem is
//! attempted before any package-manager problem. Categories are problem
//! modules.
//!
//! Example in TOML:
//! ```toml
//! [[rules]]
//! before = "network"
//! after = "packages"
//! reason = "package downloads need a working network"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use mender_contracts::error::{MenderError, MenderResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingRule {
    pub before: String,
    pub after: String,
    pub reason: String,
}

impl OrderingRule {
    fn new(before: &str, after: &str, reason: &str) -> Self {
        Self {
            before: before.to_string(),
            after: after.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingTable {
    #[serde(default)]
    pub rules: Vec<OrderingRule>,
}

impl Default for OrderingTable {
    fn default() -> Self {
        Self {
            rules: vec![
                OrderingRule::new("network", "packages", "package downloads need a working network"),
                OrderingRule::new("disk", "packages", "package transactions need free space"),
                OrderingRule::new("disk", "logs", "log cleanup is judged against the remaining disk pressure"),
                OrderingRule::new("disk", "thumbnails", "cache cleanup is judged against the remaining disk pressure"),
                OrderingRule::new("packages", "services", "a unit may fail until its package is repaired"),
                OrderingRule::new("packages", "audio", "audio fixes often reinstall the sound stack"),
                OrderingRule::new("services", "audio", "the audio server runs as a service"),
                OrderingRule::new("memory", "services", "restarting services under memory pressure fails again"),
            ],
        }
    }
}

impl OrderingTable {
    /// A table with no rules: severity-only ordering.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn from_rules(rules: Vec<OrderingRule>) -> MenderResult<Self> {
        let table = Self { rules };
        table.validate()?;
        Ok(table)
    }

    pub fn from_toml_str(s: &str) -> MenderResult<Self> {
        let table: OrderingTable = toml::from_str(s).map_err(|e| MenderError::ConfigError {
            reason: format!("failed to parse ordering rules TOML: {}", e),
        })?;
        table.validate()?;
        Ok(table)
    }

    pub fn from_file(path: &Path) -> MenderResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| MenderError::ConfigError {
            reason: format!("failed to read ordering rules '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Rules must name two different, non-empty categories. A table whose
    /// rules form a cycle is accepted; the graph falls back to severity
    /// ordering for the affected problems.
    fn validate(&self) -> MenderResult<()> {
        for rule in &self.rules {
            if rule.before.trim().is_empty() || rule.after.trim().is_empty() {
                return Err(MenderError::ConfigError {
                    reason: "ordering rule with an empty category".to_string(),
                });
            }
            if rule.before == rule.after {
                return Err(MenderError::ConfigError {
                    reason: format!("ordering rule orders '{}' before itself", rule.before),
                });
            }
        }
        Ok(())
    }

    /// The rule that puts category `first` ahead of category `second`, if any.
    pub fn requires(&self, first: &str, second: &str) -> Option<&OrderingRule> {
        self.rules.iter().find(|r| r.before == first && r.after == second)
    }
}
