//! # mender-audit
//!
//! Append-only, SHA-256 hash-chained execution log.
//!
//! Every command the executor actually spawns is wrapped in a `LogEntry`
//! linked to the previous entry by hash. Editing any entry breaks the chain,
//! which `verify_chain` detects.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mender_audit::InMemoryExecutionLog;
//!
//! let log = Arc::new(InMemoryExecutionLog::new(session_id.to_string()));
//! // hand `log.clone()` to the CommandExecutor ...
//! assert!(log.verify_integrity());
//! let sealed = log.export_log()?;
//! ```

pub mod chain;
pub mod entry;
pub mod memory;

pub use chain::{hash_entry, verify_chain};
pub use entry::{LogEntry, SealedLog};
pub use memory::InMemoryExecutionLog;

// ── Tests ─────────────────────────────────────────────────────────────────────
