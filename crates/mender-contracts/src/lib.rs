//! # mender-contracts
//!
//! Shared types, wire formats, and error contracts for the mender
//! remediation runtime.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate, only data definitions and error types.

pub mod anonymize;
pub mod decision;
pub mod error;
pub mod execution;
pub mod fact;
pub mod knowledge;
pub mod problem;
pub mod session;
