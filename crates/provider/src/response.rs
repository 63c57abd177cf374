//! Structured-output extraction from service responses
//!
//! The model is asked for JSON but frequently wraps it in Markdown code
//! fences. `parse_structured` strips the fences and parses; anything that
//! still fails is `MalformedOutput`, which the worker persists verbatim for
//! manual follow-up instead of retrying.

use serde_json::Value;

/// Response text that could not be parsed into a JSON object or array.
#[derive(Debug, thiserror::Error)]
#[error("malformed output: {reason}")]
pub struct MalformedOutput {
    /// Fence-stripped response with carriage returns removed.
    pub raw: String,
    pub reason: String,
}

/// Strip surrounding whitespace and a Markdown code fence, if present.
///
/// Handles both tagged (```` ```json ````) and bare fences. Text without a
/// fence is returned trimmed.
pub fn clean_response_text(text: &str) -> &str {
    let mut cleaned = text.trim();
    if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = match rest.split_once('\n') {
            // First line is the fence's language tag (possibly empty).
            Some((_tag, body)) => body,
            None => rest.trim_start_matches("json"),
        };
    }
    cleaned = cleaned.trim_end();
    if let Some(body) = cleaned.strip_suffix("```") {
        cleaned = body;
    }
    cleaned.trim()
}

/// Parse a response into a structured JSON result.
///
/// Only objects and arrays count as structured; a bare scalar means the
/// model ignored the output format.
pub fn parse_structured(text: &str) -> Result<Value, MalformedOutput> {
    let cleaned = clean_response_text(text);
    let malformed = |reason: String| MalformedOutput {
        raw: cleaned.replace('\r', ""),
        reason,
    };

    match serde_json::from_str::<Value>(cleaned) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Ok(value),
        Ok(other) => Err(malformed(format!(
            "expected a JSON object or array, got {}",
            json_type(&other)
        ))),
        Err(e) => Err(malformed(e.to_string())),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
