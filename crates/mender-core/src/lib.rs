//! # mender-core
//!
//! The trust boundary of a remediation session: the traits the agent loop is
//! wired from, the session `Deadline`, the built-in forbidden-command list
//! and the `CommandExecutor` that is the only path to a running process.

pub mod deadline;
pub mod executor;
pub mod guard;
pub mod process;
pub mod traits;

pub use deadline::Deadline;
pub use executor::{Authorization, CommandExecutor, ExecutorSettings, SessionConsent};
pub use process::ShellRunner;

// ── Tests ─────────────────────────────────────────────────────────────────────
