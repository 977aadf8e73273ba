//! Conversion between notification bodies and JSON values.

use serde_json::Value;

/// Decode a received body.
///
/// Bodies that parse as JSON become structured values; anything else is kept
/// as (lossy) UTF-8 text. Decoding never fails.
pub fn decode_payload(body: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => value,
        Err(_) => Value::String(String::from_utf8_lossy(body).into_owned()),
    }
}

/// Encode content for publishing.
///
/// Strings are sent as their raw text, everything else as JSON.
pub fn encode_content(content: &Value) -> Vec<u8> {
    match content {
        Value::String(text) => text.as_bytes().to_vec(),
        other => other.to_string().into_bytes(),
    }
}

/// Parse a command-line or config supplied value: JSON when it parses,
/// otherwise the raw text.
pub fn parse_content_arg(raw: &str) -> Value {
    decode_payload(raw.as_bytes())
}
