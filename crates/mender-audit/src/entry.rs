//! Execution log entry and sealed log types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mender_contracts::execution::ExecutionResult;

/// One spawned command in the session's hash chain.
///
/// Changing any field, including those of `result`, invalidates
/// `this_hash` and every later `prev_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the chain, starting at 0.
    pub sequence: u64,

    pub session_id: String,

    pub result: ExecutionResult,

    /// Hash of the previous entry, or `GENESIS_HASH` for the first.
    pub prev_hash: String,

    pub this_hash: String,
}

impl LogEntry {
    /// The `prev_hash` of the first entry: 64 hex zeros.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// A snapshot of the whole log, suitable for export as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedLog {
    pub session_id: String,

    pub entries: Vec<LogEntry>,

    pub exported_at: DateTime<Utc>,

    /// `this_hash` of the last entry; empty when no command ran.
    pub terminal_hash: String,

    /// Whether `flush` had been called when the snapshot was taken.
    pub sealed: bool,
}
