//! Wattpilot JSON message framing
//!
//! Every frame is a JSON object distinguished by its `type` field:
//! - charger → client: `hello`, `authRequired`, `authSuccess`, `authError`,
//!   `response`, `fullStatus`, `deltaStatus`
//! - client → charger: `auth`, `securedMsg`
//!
//! Any incoming frame may additionally carry a `status` object.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::WattpilotError;

/// Text frame sent before closing a session on shutdown
pub const DISCONNECT_FRAME: &str = "disconnect";

/// Suffix that marks a request id as belonging to a secured message
pub const SECURED_REQUEST_SUFFIX: &str = "sm";

/// Incoming frame types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameType {
    Hello,
    AuthRequired,
    AuthSuccess,
    AuthError,
    Response,
    FullStatus,
    DeltaStatus,
    /// Anything else, kept verbatim (empty when the frame had no `type`)
    Other(String),
}

impl FrameType {
    fn from_wire(s: &str) -> Self {
        match s {
            "hello" => FrameType::Hello,
            "authRequired" => FrameType::AuthRequired,
            "authSuccess" => FrameType::AuthSuccess,
            "authError" => FrameType::AuthError,
            "response" => FrameType::Response,
            "fullStatus" => FrameType::FullStatus,
            "deltaStatus" => FrameType::DeltaStatus,
            other => FrameType::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameType::Other(s) => write!(f, "{}", s),
            known => write!(f, "{:?}", known),
        }
    }
}

/// A parsed incoming frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_type: FrameType,
    pub body: Map<String, Value>,
}

impl Frame {
    /// Parse a text frame; anything but a JSON object is rejected
    pub fn parse(text: &str) -> Result<Self, WattpilotError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(body) = value else {
            return Err(WattpilotError::InvalidFrame("frame is not a JSON object".into()));
        };

        let frame_type = FrameType::from_wire(body.get("type").and_then(Value::as_str).unwrap_or(""));

        Ok(Self { frame_type, body })
    }

    /// The `status` payload, if this frame carries one
    pub fn status(&self) -> Option<&Map<String, Value>> {
        self.body.get("status").and_then(Value::as_object)
    }

    /// A string field, required by the frame type
    pub fn require_str(&self, key: &str) -> Result<&str, WattpilotError> {
        self.body
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| WattpilotError::InvalidFrame(format!("{} frame without {}", self.frame_type, key)))
    }
}

/// Handshake reply: `{type:"auth", token3, hash}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthReply {
    #[serde(rename = "type")]
    msg_type: &'static str,
    pub token3: String,
    pub hash: String,
}

impl AuthReply {
    pub fn new(token3: String, hash: String) -> Self {
        Self {
            msg_type: "auth",
            token3,
            hash,
        }
    }

    pub fn to_text(&self) -> Result<String, WattpilotError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inner command: `{type:"setValue", requestId, key, value}`
///
/// Field order is part of the signature; serde emits fields in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetValue {
    #[serde(rename = "type")]
    msg_type: &'static str,
    pub request_id: u64,
    pub key: String,
    pub value: Value,
}

impl SetValue {
    pub fn new(request_id: u64, key: impl Into<String>, value: Value) -> Self {
        Self {
            msg_type: "setValue",
            request_id,
            key: key.into(),
            value,
        }
    }

    /// Canonical compact JSON, the exact bytes the HMAC covers
    pub fn to_canonical(&self) -> Result<String, WattpilotError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Signed envelope: `{type:"securedMsg", data, requestId:"<n>sm", hmac}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuredMsg {
    #[serde(rename = "type")]
    msg_type: &'static str,
    pub data: String,
    pub request_id: String,
    pub hmac: String,
}

impl SecuredMsg {
    pub(crate) fn new(data: String, request_id: u64, hmac: String) -> Self {
        Self {
            msg_type: "securedMsg",
            data,
            request_id: format!("{}{}", request_id, SECURED_REQUEST_SUFFIX),
            hmac,
        }
    }

    pub fn to_text(&self) -> Result<String, WattpilotError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_parsing() {
        let frame = Frame::parse(r#"{"type":"hello","serial":"S1","version":"1.2"}"#).unwrap();
        assert_eq!(frame.frame_type, FrameType::Hello);
        assert_eq!(frame.require_str("serial").unwrap(), "S1");
        assert!(frame.status().is_none());
    }

    #[test]
    fn test_frame_with_status() {
        let frame = Frame::parse(r#"{"type":"deltaStatus","status":{"acs":0,"amp":16}}"#).unwrap();
        assert_eq!(frame.frame_type, FrameType::DeltaStatus);
        assert_eq!(frame.status().unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_and_untyped_frames() {
        let frame = Frame::parse(r#"{"type":"clearInverters"}"#).unwrap();
        assert_eq!(frame.frame_type, FrameType::Other("clearInverters".into()));

        let frame = Frame::parse(r#"{"status":{"amp":6}}"#).unwrap();
        assert_eq!(frame.frame_type, FrameType::Other(String::new()));
        assert!(frame.status().is_some());
    }

    #[test]
    fn test_malformed_frames_rejected() {
        assert!(Frame::parse("not json").is_err());
        assert!(Frame::parse("[1,2,3]").is_err());

        let frame = Frame::parse(r#"{"type":"authRequired","token1":"A"}"#).unwrap();
        assert!(frame.require_str("token2").is_err());
    }

    #[test]
    fn test_set_value_canonical_order() {
        let cmd = SetValue::new(1, "amp", json!(16));
        assert_eq!(
            cmd.to_canonical().unwrap(),
            r#"{"type":"setValue","requestId":1,"key":"amp","value":16}"#
        );
    }

    #[test]
    fn test_secured_msg_request_id() {
        let msg = SecuredMsg::new("{}".into(), 42, "ab".into());
        assert_eq!(msg.request_id, "42sm");

        let text = msg.to_text().unwrap();
        assert!(text.starts_with(r#"{"type":"securedMsg","data":"{}","requestId":"42sm""#));
    }

    #[test]
    fn test_auth_reply_serialization() {
        let reply = AuthReply::new("123".into(), "abc".into());
        assert_eq!(
            reply.to_text().unwrap(),
            r#"{"type":"auth","token3":"123","hash":"abc"}"#
        );
    }
}
