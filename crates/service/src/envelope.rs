//! Wire envelope.
//!
//! Every HTTP response body is `{code, message, request_id, timestamp,
//! data?, details?}`; the error code is mirrored into the `X-Error-Code`
//! header by the HTTP layer via [`Error::code`].

use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use serde_json::Value;

use tokmesh_core::config::encode_hex;
use tokmesh_core::error::Error;
use tokmesh_core::time::now_millis;

/// Response envelope shared by every endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    /// `"OK"` or a taxonomy code
    pub code: String,
    /// Human-readable outcome
    pub message: String,
    /// Correlation ID echoed from the request (or generated)
    pub request_id: String,
    /// Server time, ms since epoch
    pub timestamp: i64,
    /// Endpoint payload on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Structured error context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl<T: Serialize> Envelope<T> {
    /// Success envelope wrapping `data`.
    pub fn ok(request_id: impl Into<String>, data: T) -> Self {
        Envelope {
            code: "OK".into(),
            message: "success".into(),
            request_id: request_id.into(),
            timestamp: now_millis(),
            data: Some(data),
            details: None,
        }
    }
}

impl Envelope<Value> {
    /// Error envelope for `error`, carrying its taxonomy code.
    pub fn error(request_id: impl Into<String>, error: &Error) -> Self {
        Envelope {
            code: error.code().into(),
            message: error.to_string(),
            request_id: request_id.into(),
            timestamp: now_millis(),
            data: None,
            details: None,
        }
    }
}

/// Fresh correlation ID for requests that arrived without one.
pub fn new_request_id() -> String {
    let mut raw = [0u8; 8];
    // A weak correlation ID is harmless; fall back to the clock if the
    // CSPRNG is unavailable rather than failing the request.
    if OsRng.try_fill_bytes(&mut raw).is_err() {
        return format!("req-{:016x}", now_millis());
    }
    format!("req-{}", encode_hex(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_shape() {
        let envelope = Envelope::ok("req-1", serde_json::json!({"n": 1}));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["code"], "OK");
        assert_eq!(json["request_id"], "req-1");
        assert_eq!(json["data"]["n"], 1);
        assert!(json.get("details").is_none());
    }

    #[test]
    fn error_envelope_carries_taxonomy_code() {
        let error = Error::SessionNotFound("tmss-x".into());
        let envelope = Envelope::error("req-2", &error);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["code"], "SESSION_NOT_FOUND");
        assert!(json.get("data").is_none());
        assert_eq!(error.http_status(), 404);
    }

    #[test]
    fn request_ids_are_unique() {
        let a = new_request_id();
        let b = new_request_id();
        assert!(a.starts_with("req-"));
        assert_ne!(a, b);
    }
}
