//! Collected facts about the running machine.
//!
//! A `FactSet` is produced once per diagnosis pass and never mutated
//! afterwards: there are no `&mut self` methods on it. A new pass builds a new
//! set through `FactSetBuilder`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single typed fact value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl FactValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FactValue::Number(n) => Some(*n),
            FactValue::Text(s) => s.trim().parse().ok(),
            FactValue::Flag(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FactValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FactValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactValue::Flag(b) => write!(f, "{b}"),
            FactValue::Number(n) => write!(f, "{n}"),
            FactValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for FactValue {
    fn from(b: bool) -> Self {
        FactValue::Flag(b)
    }
}

impl From<f64> for FactValue {
    fn from(n: f64) -> Self {
        FactValue::Number(n)
    }
}

impl From<u64> for FactValue {
    fn from(n: u64) -> Self {
        FactValue::Number(n as f64)
    }
}

impl From<&str> for FactValue {
    fn from(s: &str) -> Self {
        FactValue::Text(s.to_string())
    }
}

impl From<String> for FactValue {
    fn from(s: String) -> Self {
        FactValue::Text(s)
    }
}

/// An immutable snapshot of facts grouped by module name.
///
/// Modules and fact names are kept in `BTreeMap`s so rendering is
/// deterministic, which the sanitizer's determinism guarantee relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactSet {
    modules: BTreeMap<String, BTreeMap<String, FactValue>>,
    collected_at: DateTime<Utc>,
}

impl FactSet {
    pub fn builder() -> FactSetBuilder {
        FactSetBuilder::default()
    }

    pub fn get(&self, module: &str, name: &str) -> Option<&FactValue> {
        self.modules.get(module).and_then(|m| m.get(name))
    }

    pub fn module(&self, module: &str) -> Option<&BTreeMap<String, FactValue>> {
        self.modules.get(module)
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.modules.values().all(BTreeMap::is_empty)
    }

    pub fn collected_at(&self) -> DateTime<Utc> {
        self.collected_at
    }

    /// Return a new set containing only the modules accepted by `keep`.
    pub fn retain_modules(&self, keep: impl Fn(&str) -> bool) -> FactSet {
        FactSet {
            modules: self
                .modules
                .iter()
                .filter(|(name, _)| keep(name))
                .map(|(name, facts)| (name.clone(), facts.clone()))
                .collect(),
            collected_at: self.collected_at,
        }
    }

    /// Render the set as stable, line-oriented text:
    ///
    /// ```text
    /// [disk]
    /// root_used_percent: 93
    /// ```
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (module, facts) in &self.modules {
            out.push('[');
            out.push_str(module);
            out.push_str("]\n");
            for (name, value) in facts {
                out.push_str(name);
                out.push_str(": ");
                out.push_str(&value.to_string());
                out.push('\n');
            }
        }
        out
    }
}

/// Accumulates facts for one diagnosis pass.
#[derive(Debug, Default)]
pub struct FactSetBuilder {
    modules: BTreeMap<String, BTreeMap<String, FactValue>>,
}

impl FactSetBuilder {
    pub fn fact(
        mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<FactValue>,
    ) -> Self {
        self.insert(module, name, value);
        self
    }

    pub fn insert(
        &mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<FactValue>,
    ) {
        self.modules
            .entry(module.into())
            .or_default()
            .insert(name.into(), value.into());
    }

    pub fn build(self) -> FactSet {
        FactSet {
            modules: self.modules,
            collected_at: Utc::now(),
        }
    }
}
