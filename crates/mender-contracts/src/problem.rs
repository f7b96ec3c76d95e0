//! Diagnosed problems and their stable fingerprints.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How bad a problem is. Declared least-to-most severe so that `Ord`
/// puts `Critical` on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic identifier of a problem across diagnosis passes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Derive a fingerprint from the identifying triple.
    ///
    /// Fields are NUL-separated before hashing so `("ab", "c")` and
    /// `("a", "bc")` never collide. The first 16 hex chars are kept.
    pub fn derive(module: &str, check: &str, severity: Severity) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(module.as_bytes());
        hasher.update([0u8]);
        hasher.update(check.as_bytes());
        hasher.update([0u8]);
        hasher.update(severity.as_str().as_bytes());
        let digest = hex::encode(hasher.finalize());
        Fingerprint(digest[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unit of diagnosed trouble.
///
/// Problems are created by inference and never mutated afterwards; progress
/// on a problem is tracked by the graph, not on the problem itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub fingerprint: Fingerprint,
    /// Module the problem was diagnosed in ("disk", "network", ...). Doubles
    /// as the ordering category.
    pub module: String,
    /// Name of the check that fired, unique within the module.
    pub check: String,
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub suggested_commands: Vec<String>,
}

impl Problem {
    pub fn new(
        module: impl Into<String>,
        check: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        let module = module.into();
        let check = check.into();
        Self {
            fingerprint: Fingerprint::derive(&module, &check, severity),
            module,
            check,
            description: description.into(),
            severity,
            suggested_commands: Vec::new(),
        }
    }

    pub fn with_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggested_commands = commands.into_iter().map(Into::into).collect();
        self
    }

    /// The ordering category this problem belongs to.
    pub fn category(&self) -> &str {
        &self.module
    }
}

/// Remediation progress of one graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProblemStatus {
    Pending,
    InProgress,
    Resolved,
    Failed,
    Blocked,
}

impl ProblemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemStatus::Pending => "pending",
            ProblemStatus::InProgress => "in-progress",
            ProblemStatus::Resolved => "resolved",
            ProblemStatus::Failed => "failed",
            ProblemStatus::Blocked => "blocked",
        }
    }
}
