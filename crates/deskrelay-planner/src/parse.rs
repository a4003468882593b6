//! Turning a model reply into raw actions.

use deskrelay_core::{DecompositionError, RawAction};
use serde_json::Value;

const FENCE: &str = "```";
const JSON_FENCE: &str = "```json";

/// Remove a surrounding Markdown code fence, if any.
///
/// A ```` ```json ```` fence wins over a bare one. Text outside the first
/// fenced block is discarded.
#[must_use]
pub fn strip_fence(reply: &str) -> &str {
    let reply = reply.trim();
    let inner = if let Some((_, rest)) = reply.split_once(JSON_FENCE) {
        rest
    } else if let Some((_, rest)) = reply.split_once(FENCE) {
        rest
    } else {
        return reply;
    };

    inner.split_once(FENCE).map_or(inner, |(body, _)| body).trim()
}

/// Parse a model reply into an ordered action list.
///
/// A single object is a one-step sequence. Elements only need the
/// `{"type": string, "params": object}` shape here; kinds and parameters are
/// checked when each step runs.
///
/// # Errors
/// Returns [`DecompositionError::Malformed`] if the reply is not JSON of the
/// expected shape and [`DecompositionError::Empty`] for an empty list.
pub fn parse_actions(reply: &str) -> Result<Vec<RawAction>, DecompositionError> {
    let body = strip_fence(reply);
    let value: Value =
        serde_json::from_str(body).map_err(|e| DecompositionError::Malformed(e.to_string()))?;

    let items = match value {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        other => {
            return Err(DecompositionError::Malformed(format!(
                "expected an action object or a list of actions, got {}",
                kind_of(&other)
            )));
        }
    };

    if items.is_empty() {
        return Err(DecompositionError::Empty);
    }

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value::<RawAction>(item)
                .map_err(|e| DecompositionError::Malformed(format!("action {}: {e}", index + 1)))
        })
        .collect()
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
