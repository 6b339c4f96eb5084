//! Generic value handling shared by configuration, templates, and transports.
//!
//! `serde_json::Value` (with insertion-ordered maps) is the interchange
//! representation for JSON text, XML imports, template output, and inline
//! configuration literals. Integral literals decode as integers, so numbers
//! without a fractional part survive a text round-trip unchanged.

pub use serde_json::Value;

/// Strict JSON parse, `None` on any syntax error.
pub fn try_parse(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

/// Parse text as JSON, falling back to a plain string value.
///
/// The fallback is an expected branch (raw-text messages, XML payloads),
/// not an error path.
pub fn parse_or_string(text: &str) -> Value {
    try_parse(text).unwrap_or_else(|| Value::String(text.to_string()))
}

/// Whether a string leaf looks like embedded JSON worth reparsing.
pub fn looks_structured(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with('{') || trimmed.starts_with('[')
}

/// Serialize a rendered value for the wire.
///
/// String values are written byte-for-byte so XML and plain-text payloads
/// are not JSON-quoted; everything else is JSON-encoded.
pub fn to_wire_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
