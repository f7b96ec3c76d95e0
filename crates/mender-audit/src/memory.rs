//! In-memory implementation of `ExecutionLog`.
//!
//! `InMemoryExecutionLog` keeps the chain in a `Vec` behind a `Mutex`. The
//! executor is its only writer; the agent loop reads it through
//! `export_log()` and `verify_integrity()` when it builds the session
//! summary. Clones share the same chain.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{info, warn};

use mender_contracts::{
    error::{MenderError, MenderResult},
    execution::ExecutionResult,
};
use mender_core::traits::ExecutionLog;

use crate::{
    chain::{hash_entry, verify_chain},
    entry::{LogEntry, SealedLog},
};

pub(crate) struct LogState {
    pub(crate) entries: Vec<LogEntry>,
    pub(crate) last_hash: String,
    pub(crate) sealed: bool,
}

/// An append-only execution log backed by a SHA-256 hash chain.
#[derive(Clone)]
pub struct InMemoryExecutionLog {
    session_id: String,
    pub(crate) state: Arc<Mutex<LogState>>,
}

impl InMemoryExecutionLog {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: Arc::new(Mutex::new(LogState {
                entries: Vec::new(),
                last_hash: LogEntry::GENESIS_HASH.to_string(),
                sealed: false,
            })),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn lock(&self) -> MenderResult<MutexGuard<'_, LogState>> {
        self.state.lock().map_err(|e| MenderError::ExecutionLogFailed {
            reason: format!("execution log lock poisoned: {}", e),
        })
    }

    /// Number of entries appended so far.
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The executed results in append order.
    pub fn results(&self) -> Vec<ExecutionResult> {
        self.lock()
            .map(|s| s.entries.iter().map(|e| e.result.clone()).collect())
            .unwrap_or_default()
    }

    /// `this_hash` of the last entry, or empty before the first append.
    pub fn terminal_hash(&self) -> String {
        self.lock()
            .ok()
            .and_then(|s| s.entries.last().map(|e| e.this_hash.clone()))
            .unwrap_or_default()
    }

    /// Snapshot the whole chain.
    pub fn export_log(&self) -> MenderResult<SealedLog> {
        let state = self.lock()?;
        Ok(SealedLog {
            session_id: self.session_id.clone(),
            entries: state.entries.clone(),
            exported_at: Utc::now(),
            terminal_hash: state
                .entries
                .last()
                .map(|e| e.this_hash.clone())
                .unwrap_or_default(),
            sealed: state.sealed,
        })
    }

    /// Recompute every hash and check the linkage.
    pub fn verify_integrity(&self) -> bool {
        match self.lock() {
            Ok(state) => verify_chain(&state.entries),
            Err(_) => false,
        }
    }
}

impl ExecutionLog for InMemoryExecutionLog {
    /// Append one result to the chain. Fails once the log is sealed.
    fn append(&self, result: &ExecutionResult) -> MenderResult<()> {
        let mut state = self.lock()?;
        if state.sealed {
            return Err(MenderError::ExecutionLogFailed {
                reason: format!("log for session {} is sealed", self.session_id),
            });
        }

        let prev_hash = state.last_hash.clone();
        let sequence = state.entries.len() as u64;
        let this_hash = hash_entry(&self.session_id, sequence, result, &prev_hash)?;

        state.entries.push(LogEntry {
            sequence,
            session_id: self.session_id.clone(),
            result: result.clone(),
            prev_hash,
            this_hash: this_hash.clone(),
        });
        state.last_hash = this_hash;
        Ok(())
    }

    /// Seal the log. Flushing twice is harmless.
    fn flush(&self, session_id: &str) -> MenderResult<()> {
        let mut state = self.lock()?;
        if session_id != self.session_id {
            warn!(expected = %self.session_id, got = %session_id, "flush for a different session id");
        }
        state.sealed = true;

        info!(
            session_id = %self.session_id,
            entry_count = state.entries.len(),
            terminal_hash = %state.last_hash,
            "execution log sealed"
        );
        Ok(())
    }
}
