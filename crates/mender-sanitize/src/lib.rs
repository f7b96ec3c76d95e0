//! # mender-sanitize
//!
//! Masks personally and operationally sensitive substrings in collected
//! facts before anything is sent off the machine.
//!
//! `Sanitizer::sanitize` is a pure function of its input and the injected
//! [`SensitiveContext`]: no network, no disk. It is deterministic and
//! idempotent, and always returns an `AnonymizationReport` alongside the
//! text, with every category present.
//!
//! ```rust,ignore
//! let sanitizer = Sanitizer::new(&SensitiveContext::none().with_username("jan"));
//! let out = sanitizer.sanitize(&facts);
//! println!("{}", out.report.total());
//! ```

mod patterns;
pub mod pipeline;

pub use pipeline::{Sanitized, Sanitizer, SensitiveContext};

// ── Tests ─────────────────────────────────────────────────────────────────────
