//! # mender-verify
//!
//! Verification of the oracle's decision replies.
//!
//! [`DecisionVerifier`] turns a raw model reply into either a valid
//! [`Decision`](mender_contracts::decision::Decision) or an explicit
//! needs-correction result with a reason that can be sent back to the model.
//!
//! ```rust,ignore
//! use mender_verify::{DecisionCheck, DecisionVerifier};
//!
//! let verifier = DecisionVerifier::new()?;
//! match verifier.check(&reply) {
//!     DecisionCheck::Valid(decision) => { /* act on it */ }
//!     DecisionCheck::NeedsCorrection { reason } => { /* re-prompt once */ }
//! }
//! ```

pub mod engine;
pub mod extract;
pub mod schema;

pub use engine::{DecisionCheck, DecisionVerifier};
pub use extract::extract_object;
pub use schema::decision_schema;
