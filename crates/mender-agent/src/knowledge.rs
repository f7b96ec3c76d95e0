//! Parallel knowledge search.
//!
//! Every source is queried at once on its own task, each under a per-source
//! timeout. Sources are listed in priority order. The answer is the hits of
//! the highest-priority definitive source that returned any, as soon as
//! every source above it has finished; the rest are cancelled. When no
//! definitive source answers, all hits are merged in priority order up to
//! a cap.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use mender_contracts::{
    error::{MenderError, MenderResult},
    knowledge::{SearchHit, SearchRecord},
};
use mender_core::{traits::KnowledgeSource, Deadline};

pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(8);
pub const DEFAULT_MERGE_CAP: usize = 5;

/// A finished search and the sources that failed along the way.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub record: SearchRecord,
    pub failures: Vec<String>,
}

enum Slot {
    Waiting,
    Answered(Vec<SearchHit>),
    Failed,
}

pub struct KnowledgeFanout {
    sources: Vec<Arc<dyn KnowledgeSource>>,
    source_timeout: Duration,
    merge_cap: usize,
}

impl KnowledgeFanout {
    /// `sources` in priority order, highest first.
    pub fn new(sources: Vec<Arc<dyn KnowledgeSource>>) -> Self {
        Self {
            sources,
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
            merge_cap: DEFAULT_MERGE_CAP,
        }
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn with_merge_cap(mut self, cap: usize) -> Self {
        self.merge_cap = cap;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Search every source for `query`, bounded by `deadline`.
    pub async fn search(&self, query: &str, deadline: &Deadline) -> MenderResult<SearchOutcome> {
        deadline.bound(self.fan_out(query)).await
    }

    async fn fan_out(&self, query: &str) -> SearchOutcome {
        let mut outcome = SearchOutcome {
            record: SearchRecord {
                query: query.to_string(),
                hits: Vec::new(),
            },
            failures: Vec::new(),
        };
        if self.sources.is_empty() {
            return outcome;
        }

        // Dropping the set aborts every task still running.
        let mut tasks = JoinSet::new();
        for (index, source) in self.sources.iter().enumerate() {
            let source = Arc::clone(source);
            let query = query.to_string();
            let timeout = self.source_timeout;
            tasks.spawn(async move {
                let result = match tokio::time::timeout(timeout, source.search(&query)).await {
                    Ok(result) => result,
                    Err(_) => Err(MenderError::Knowledge {
                        source_name: source.name().to_string(),
                        reason: format!("no answer within {} s", timeout.as_secs()),
                    }),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Slot> = self.sources.iter().map(|_| Slot::Waiting).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "knowledge task failed to complete");
                    outcome.failures.push(format!("knowledge task failed: {e}"));
                    continue;
                }
            };
            slots[index] = match result {
                Ok(hits) => {
                    debug!(source = %self.sources[index].name(), hits = hits.len(), "knowledge source answered");
                    Slot::Answered(hits)
                }
                Err(e) => {
                    warn!(source = %self.sources[index].name(), error = %e, "knowledge source failed");
                    outcome.failures.push(e.to_string());
                    Slot::Failed
                }
            };

            if let Some(winner) = self.settled_winner(&slots) {
                if let Slot::Answered(hits) = &mut slots[winner] {
                    outcome.record.hits = std::mem::take(hits);
                }
                info!(
                    source = %self.sources[winner].name(),
                    hits = outcome.record.hits.len(),
                    "knowledge search answered"
                );
                return outcome;
            }
        }

        // A panicked task leaves its slot waiting; it is treated as empty.
        outcome.record.hits = slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Answered(hits) => Some(hits),
                _ => None,
            })
            .flatten()
            .take(self.merge_cap)
            .collect();
        info!(hits = outcome.record.hits.len(), "knowledge search merged");
        outcome
    }

    /// The first definitive source with hits, once every source ahead of it
    /// has finished without any.
    fn settled_winner(&self, slots: &[Slot]) -> Option<usize> {
        for (index, slot) in slots.iter().enumerate() {
            match slot {
                Slot::Waiting => return None,
                Slot::Answered(hits) if !hits.is_empty() && self.sources[index].is_definitive() => {
                    return Some(index);
                }
                Slot::Answered(_) | Slot::Failed => {}
            }
        }
        None
    }
}
