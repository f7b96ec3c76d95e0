//! Decision verifier for the autonomous loop.
//!
//! Verification runs in three phases:
//!
//! 1. **Extraction**: find the JSON object in the raw model reply.
//! 2. **Structural**: validate it against `decision_schema()` with the
//!    `jsonschema` crate. All violations are collected.
//! 3. **Semantic**: an EXEC command must be non-blank after trimming; the
//!    command of any other action is dropped.
//!
//! A reply that fails any phase yields `DecisionCheck::NeedsCorrection`
//! carrying the reason, which the agent loop feeds back in its single
//! corrective re-prompt.

use tracing::{debug, warn};

use mender_contracts::{
    decision::{Decision, DecisionAction},
    error::{MenderError, MenderResult},
};

use crate::{extract::extract_object, schema::decision_schema};

/// The result of checking one model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionCheck {
    Valid(Decision),
    NeedsCorrection { reason: String },
}

impl DecisionCheck {
    fn correction(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!(%reason, "decision needs correction");
        DecisionCheck::NeedsCorrection { reason }
    }
}

/// Validates raw model replies against the decision wire format.
pub struct DecisionVerifier {
    validator: jsonschema::Validator,
}

impl DecisionVerifier {
    /// Compile the decision schema.
    ///
    /// Returns `MenderError::SchemaValidation` if the built-in schema does
    /// not compile.
    pub fn new() -> MenderResult<Self> {
        let validator = jsonschema::validator_for(&decision_schema()).map_err(|e| {
            MenderError::SchemaValidation {
                reason: format!("invalid decision schema: {e}"),
            }
        })?;
        Ok(Self { validator })
    }

    /// Check one raw model reply.
    pub fn check(&self, reply: &str) -> DecisionCheck {
        // ── Phase 1: extraction ───────────────────────────────────────────────
        let Some(payload) = extract_object(reply) else {
            return DecisionCheck::correction("the reply did not contain a JSON object");
        };

        // ── Phase 2: JSON Schema ──────────────────────────────────────────────
        let violations: Vec<String> = self
            .validator
            .iter_errors(&payload)
            .map(|error| {
                let path = error.instance_path.to_string();
                if path.is_empty() {
                    error.to_string()
                } else {
                    format!("at {path}: {error}")
                }
            })
            .collect();
        if !violations.is_empty() {
            return DecisionCheck::correction(format!(
                "the JSON does not match the decision format: {}",
                violations.join("; ")
            ));
        }

        let mut decision: Decision = match serde_json::from_value(payload) {
            Ok(d) => d,
            Err(e) => return DecisionCheck::correction(format!("the JSON could not be read as a decision: {e}")),
        };

        // ── Phase 3: semantic rules ───────────────────────────────────────────
        if decision.action == DecisionAction::Exec {
            let command = decision.command.as_deref().map(str::trim).unwrap_or_default();
            if command.is_empty() {
                return DecisionCheck::correction("action EXEC requires a non-empty command");
            }
            decision.command = Some(command.to_string());
        } else {
            decision.command = None;
        }

        debug!(action = %decision.action, "decision verified");
        DecisionCheck::Valid(decision)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
