//! Success/error payloads and route handler replies.
//!
//! A [`Payload`] is the unit a handler, middleware or store hands back to
//! the engine: a success or error marker, a status code, a content value
//! and a `transform` flag. Transformed payloads are serialized as a JSON
//! envelope by the response normalizer; untransformed payloads are written
//! to the wire as-is, which is the escape path for plain-text and binary
//! bodies.

use crate::body::ResponseBody;
use bytes::Bytes;
use http::{Response, StatusCode};
use serde_json::{Value, json};
use std::fmt;

/// Content carried by a [`Payload`].
#[derive(Debug, Clone)]
pub enum PayloadBody {
    Json(Value),
    Bytes(Bytes),
}

/// A success or error value produced by a chain link.
#[derive(Debug, Clone)]
pub struct Payload {
    pub success: bool,
    pub status: StatusCode,
    pub transform: bool,
    pub body: PayloadBody,
}

/// Builds a success payload with status 200.
pub fn success(content: impl Into<Value>) -> Payload {
    Payload { success: true, status: StatusCode::OK, transform: true, body: PayloadBody::Json(content.into()) }
}

/// Builds an error payload with status 400.
pub fn error(content: impl Into<Value>) -> Payload {
    Payload { success: false, status: StatusCode::BAD_REQUEST, transform: true, body: PayloadBody::Json(content.into()) }
}

impl Payload {
    /// A plain-text success payload, written to the wire untransformed.
    pub fn text(content: impl Into<String>) -> Payload {
        success(Value::String(content.into())).untransformed()
    }

    /// A raw-bytes success payload, written to the wire untransformed.
    pub fn bytes(content: impl Into<Bytes>) -> Payload {
        Payload {
            success: true,
            status: StatusCode::OK,
            transform: false,
            body: PayloadBody::Bytes(content.into()),
        }
    }

    #[must_use]
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Suppresses the JSON envelope; the content becomes the response body.
    #[must_use]
    pub fn untransformed(mut self) -> Self {
        self.transform = false;
        self
    }

    /// The JSON envelope emitted for transformed payloads: every payload
    /// field except the transform flag itself.
    pub(crate) fn envelope(&self) -> Value {
        let content = match &self.body {
            PayloadBody::Json(value) => value.clone(),
            PayloadBody::Bytes(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        };

        json!({
            "content": content,
            "status": self.status.as_u16(),
            "success": self.success,
        })
    }

    /// The untransformed wire body.
    pub(crate) fn raw_bytes(&self) -> Bytes {
        match &self.body {
            PayloadBody::Bytes(bytes) => bytes.clone(),
            PayloadBody::Json(Value::Null) => Bytes::new(),
            PayloadBody::Json(Value::String(text)) => Bytes::from(text.clone()),
            PayloadBody::Json(other) => Bytes::from(other.to_string()),
        }
    }
}

/// What a plain route handler returns: a payload for the accumulator, or a
/// fully-formed response passed through the normalizer unchanged.
pub enum Reply {
    Payload(Payload),
    Native(Response<ResponseBody>),
}

impl From<Payload> for Reply {
    fn from(payload: Payload) -> Self {
        Reply::Payload(payload)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Payload(payload) => f.debug_tuple("Payload").field(payload).finish(),
            Reply::Native(response) => f.debug_tuple("Native").field(&response.status()).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_defaults() {
        let payload = success(json!({"ok": true}));
        assert!(payload.success);
        assert!(payload.transform);
        assert_eq!(payload.status, StatusCode::OK);
    }

    #[test]
    fn error_defaults() {
        let payload = error(json!("nope")).status(StatusCode::FORBIDDEN);
        assert!(!payload.success);
        assert_eq!(payload.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn envelope_drops_the_transform_flag() {
        let payload = success(json!({"a": 1}));
        let envelope = payload.envelope();

        assert_eq!(envelope["content"]["a"], 1);
        assert_eq!(envelope["status"], 200);
        assert_eq!(envelope["success"], true);
        assert!(envelope.get("transform").is_none());
    }

    #[test]
    fn raw_bytes_of_text_payload_is_the_text() {
        let payload = Payload::text("world");
        assert!(!payload.transform);
        assert_eq!(payload.raw_bytes(), Bytes::from("world"));
    }
}
