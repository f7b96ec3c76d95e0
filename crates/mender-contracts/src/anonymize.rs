//! Masking categories and the per-pass anonymization report.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The fixed, exhaustive set of things the sanitizer masks.
///
/// Declaration order is the substitution order: most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnonymizationCategory {
    HomePath,
    Hostname,
    Username,
    #[serde(rename = "APIToken")]
    ApiToken,
    Password,
    #[serde(rename = "UUID")]
    Uuid,
    #[serde(rename = "MAC")]
    Mac,
    #[serde(rename = "IPv4")]
    Ipv4,
    SerialNumber,
}

impl AnonymizationCategory {
    pub const ALL: [AnonymizationCategory; 9] = [
        AnonymizationCategory::HomePath,
        AnonymizationCategory::Hostname,
        AnonymizationCategory::Username,
        AnonymizationCategory::ApiToken,
        AnonymizationCategory::Password,
        AnonymizationCategory::Uuid,
        AnonymizationCategory::Mac,
        AnonymizationCategory::Ipv4,
        AnonymizationCategory::SerialNumber,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnonymizationCategory::HomePath => "HomePath",
            AnonymizationCategory::Hostname => "Hostname",
            AnonymizationCategory::Username => "Username",
            AnonymizationCategory::ApiToken => "APIToken",
            AnonymizationCategory::Password => "Password",
            AnonymizationCategory::Uuid => "UUID",
            AnonymizationCategory::Mac => "MAC",
            AnonymizationCategory::Ipv4 => "IPv4",
            AnonymizationCategory::SerialNumber => "SerialNumber",
        }
    }
}

impl fmt::Display for AnonymizationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Occurrence counts per category for one sanitize pass.
///
/// Every category is always present, zero when nothing matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymizationReport {
    counts: BTreeMap<AnonymizationCategory, usize>,
}

impl Default for AnonymizationReport {
    fn default() -> Self {
        Self {
            counts: AnonymizationCategory::ALL.iter().map(|c| (*c, 0)).collect(),
        }
    }
}

impl AnonymizationReport {
    pub fn record(&mut self, category: AnonymizationCategory, occurrences: usize) {
        *self.counts.entry(category).or_insert(0) += occurrences;
    }

    pub fn count(&self, category: AnonymizationCategory) -> usize {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// True when nothing was masked.
    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }

    /// Add another pass's counts into this one.
    pub fn absorb(&mut self, other: &AnonymizationReport) {
        for (category, n) in &other.counts {
            self.record(*category, *n);
        }
    }

    /// Categories with a nonzero count, in substitution order.
    pub fn nonzero(&self) -> impl Iterator<Item = (AnonymizationCategory, usize)> + '_ {
        self.counts
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(c, n)| (*c, *n))
    }
}
