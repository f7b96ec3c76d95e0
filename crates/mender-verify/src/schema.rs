//! The decision wire format as a JSON Schema document.

use serde_json::{json, Value};

/// Schema for one autonomous decision.
///
/// Extra keys (`analysis`, `next_step`, ...) are tolerated; models add them.
pub fn decision_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "action": { "enum": ["EXEC", "SEARCH", "SKIP", "DONE"] },
            "command": { "type": ["string", "null"] },
            "reason": { "type": "string" },
            "query": { "type": ["string", "null"] },
            "search_query": { "type": ["string", "null"] }
        },
        "required": ["action", "reason"],
        "if": {
            "properties": { "action": { "const": "EXEC" } }
        },
        "then": {
            "required": ["command"],
            "properties": { "command": { "type": "string", "minLength": 1 } }
        }
    })
}
