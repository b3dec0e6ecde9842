//! Uniform `{code, data}` response envelope.
//!
//! Every reply leaving the API surface, successful or not, is wrapped as
//!
//! ```text
//! {"code": <code>, "data": <payload>}
//! ```
//!
//! Payloads that already look like a JSON object or array are embedded
//! verbatim; anything else is emitted as a JSON string. The spacing after the
//! colons is part of the format clients compare against.

/// Envelope code used by [`not_found`].
pub const NOT_FOUND_CODE: u16 = 404;

/// Payload used by [`not_found`].
pub const NOT_FOUND_MESSAGE: &str = "not found";

/// Encode `payload` under `code`.
///
/// # Examples
///
/// ```
/// use switchyard::envelope::encode;
///
/// assert_eq!(encode(200, "hello"), r#"{"code": 200, "data": "hello"}"#);
/// assert_eq!(encode(200, r#"{"x":1}"#), r#"{"code": 200, "data": {"x":1}}"#);
/// ```
pub fn encode(code: u16, payload: &str) -> String {
    if is_raw_json(payload) {
        format!("{{\"code\": {code}, \"data\": {payload}}}")
    } else {
        format!("{{\"code\": {code}, \"data\": {}}}", quote(payload))
    }
}

/// The uniform body returned for every unresolvable or denied request.
pub fn not_found() -> String {
    encode(NOT_FOUND_CODE, NOT_FOUND_MESSAGE)
}

fn is_raw_json(payload: &str) -> bool {
    let trimmed = payload.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
}

fn quote(payload: &str) -> String {
    // Serializing a &str cannot fail.
    serde_json::to_string(payload).unwrap_or_else(|_| format!("\"{payload}\""))
}
