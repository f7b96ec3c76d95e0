//! External knowledge search results.

use serde::{Deserialize, Serialize};

/// One result returned by a knowledge source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Name of the source that produced the hit.
    pub source: String,
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl SearchHit {
    pub fn to_context(&self) -> String {
        format!("- [{}] {} ({})\n  {}\n", self.source, self.title, self.url, self.snippet)
    }
}

/// A search performed during the session and what it returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub query: String,
    pub hits: Vec<SearchHit>,
}
