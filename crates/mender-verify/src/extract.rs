//! Pull the JSON object out of a model reply.
//!
//! Models wrap the object in prose or a fenced block often enough that a
//! strict `serde_json::from_str` on the whole reply is not useful.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static FENCED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced block pattern must compile")
});

/// Find the decision object in `reply`.
///
/// Tried in order: a fenced code block, the whole reply, and the span from
/// the first `{` to the last `}`. Only JSON objects are returned.
pub fn extract_object(reply: &str) -> Option<Value> {
    let fenced = FENCED
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str());

    let braces = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&reply[start..=end]),
        _ => None,
    };

    [fenced, Some(reply.trim()), braces]
        .into_iter()
        .flatten()
        .filter_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .find(Value::is_object)
}
