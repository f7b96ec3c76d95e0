//! Hash-chain primitives for the execution log.
//!
//! Hash input layout (bytes, in order):
//!   1. session_id as UTF-8 bytes
//!   2. sequence as 8-byte little-endian
//!   3. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   4. compact JSON of the execution result

use sha2::{Digest, Sha256};

use mender_contracts::{
    error::{MenderError, MenderResult},
    execution::ExecutionResult,
};

use crate::entry::LogEntry;

/// Compute the SHA-256 hash of one log entry as lowercase hex.
pub fn hash_entry(
    session_id: &str,
    sequence: u64,
    result: &ExecutionResult,
    prev_hash: &str,
) -> MenderResult<String> {
    let result_json = serde_json::to_vec(result).map_err(|e| MenderError::ExecutionLogFailed {
        reason: format!("failed to encode execution result: {}", e),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&result_json);

    Ok(hex::encode(hasher.finalize()))
}

/// Verify prev-hash linkage and hash correctness for every entry.
///
/// An empty chain is valid. Sequence numbers must run 0, 1, 2, ...
pub fn verify_chain(entries: &[LogEntry]) -> bool {
    let mut expected_prev = LogEntry::GENESIS_HASH.to_string();

    for (position, entry) in entries.iter().enumerate() {
        if entry.sequence != position as u64 || entry.prev_hash != expected_prev {
            return false;
        }

        match hash_entry(&entry.session_id, entry.sequence, &entry.result, &entry.prev_hash) {
            Ok(recomputed) if recomputed == entry.this_hash => {}
            _ => return false,
        }

        expected_prev = entry.this_hash.clone();
    }

    true
}
