//! SRPC envelope framing
//!
//! Every frame on the wire is a JSON array whose first element is the
//! message type:
//! - CALL: [2, callId, action, payload]
//! - CALLRESULT: [3, callId, payload]
//! - CALLERROR: [4, callId, errorCode, errorDescription, errorDetails]

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::{ErrorCode, SrpcError};

/// Message type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl MessageType {
    fn from_discriminator(n: u64) -> Option<Self> {
        match n {
            2 => Some(MessageType::Call),
            3 => Some(MessageType::CallResult),
            4 => Some(MessageType::CallError),
            _ => None,
        }
    }

    fn arity(&self) -> usize {
        match self {
            MessageType::Call => 4,
            MessageType::CallResult => 3,
            MessageType::CallError => 5,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Call => write!(f, "CALL"),
            MessageType::CallResult => write!(f, "CALLRESULT"),
            MessageType::CallError => write!(f, "CALLERROR"),
        }
    }
}

/// A frame that could not be parsed into an [`Envelope`]
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON array")]
    NotAnArray,

    #[error("frame has no integer message type")]
    MissingMessageType,

    #[error("unknown message type {message_type}")]
    UnknownMessageType {
        message_type: u64,
        id: Option<String>,
    },

    #[error("{message_type} frame has no string call id")]
    InvalidId { message_type: MessageType },

    #[error("malformed {message_type} frame {id}: {reason}")]
    Malformed {
        message_type: MessageType,
        id: String,
        reason: String,
    },
}

impl FrameError {
    /// Call id and error code to answer this frame with, if it deserves an answer.
    ///
    /// Only attempted calls are answered. Broken responses are dropped: there is
    /// nobody waiting for an answer to an answer.
    pub fn reply(&self) -> Option<(&str, ErrorCode)> {
        match self {
            FrameError::Malformed {
                message_type: MessageType::Call,
                id,
                ..
            } => Some((id, ErrorCode::FormationViolation)),
            FrameError::UnknownMessageType { id: Some(id), .. } => {
                Some((id, ErrorCode::ProtocolError))
            }
            _ => None,
        }
    }

    /// Call id of a CALLRESULT / CALLERROR that arrived broken
    ///
    /// The outgoing call it answers, if any, fails instead of waiting for a
    /// response that will never parse.
    pub fn response_id(&self) -> Option<&str> {
        match self {
            FrameError::Malformed {
                message_type: MessageType::CallResult | MessageType::CallError,
                id,
                ..
            } => Some(id),
            _ => None,
        }
    }
}

/// CALL frame (request)
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub id: String,
    pub action: String,
    pub payload: Value,
}

impl Call {
    pub fn new(id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            payload,
        }
    }

    /// Decode the payload as a specific request type
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// CALLRESULT frame (success response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub id: String,
    pub payload: Value,
}

impl CallResult {
    pub fn new(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// Decode the payload as a specific response type
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, SrpcError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// CALLERROR frame (error response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub id: String,
    pub code: ErrorCode,
    pub description: String,
    pub details: Value,
}

impl CallError {
    /// Create a CALLERROR with empty details
    pub fn new(id: impl Into<String>, code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code,
            description: description.into(),
            details: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Convert into the error an outgoing call resolves with
    pub fn into_error(self) -> SrpcError {
        SrpcError::Remote {
            code: self.code,
            description: self.description,
            details: self.details,
        }
    }
}

/// Any SRPC frame
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Call(Call),
    Result(CallResult),
    Error(CallError),
}

impl Envelope {
    /// Parse a frame from WebSocket text
    pub fn from_text(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        Self::parse(&value)
    }

    /// Parse a frame from a JSON value
    pub fn parse(value: &Value) -> Result<Self, FrameError> {
        let array = value.as_array().ok_or(FrameError::NotAnArray)?;

        let discriminator = array
            .first()
            .and_then(Value::as_u64)
            .ok_or(FrameError::MissingMessageType)?;

        let message_type = match MessageType::from_discriminator(discriminator) {
            Some(t) => t,
            None => {
                return Err(FrameError::UnknownMessageType {
                    message_type: discriminator,
                    id: array.get(1).and_then(Value::as_str).map(str::to_string),
                })
            }
        };

        let id = array
            .get(1)
            .and_then(Value::as_str)
            .ok_or(FrameError::InvalidId { message_type })?
            .to_string();

        let malformed = |reason: &str| FrameError::Malformed {
            message_type,
            id: id.clone(),
            reason: reason.to_string(),
        };

        if array.len() != message_type.arity() {
            return Err(malformed(&format!(
                "expected {} elements, got {}",
                message_type.arity(),
                array.len()
            )));
        }

        match message_type {
            MessageType::Call => {
                let action = array[2]
                    .as_str()
                    .ok_or_else(|| malformed("action is not a string"))?;

                Ok(Envelope::Call(Call {
                    id: id.clone(),
                    action: action.to_string(),
                    payload: array[3].clone(),
                }))
            }
            MessageType::CallResult => Ok(Envelope::Result(CallResult {
                id,
                payload: array[2].clone(),
            })),
            MessageType::CallError => {
                let code = array[2]
                    .as_str()
                    .ok_or_else(|| malformed("error code is not a string"))?
                    .parse::<ErrorCode>()
                    .map_err(|e| malformed(&e.to_string()))?;

                let description = array[3]
                    .as_str()
                    .ok_or_else(|| malformed("error description is not a string"))?
                    .to_string();

                Ok(Envelope::Error(CallError {
                    id,
                    code,
                    description,
                    details: array[4].clone(),
                }))
            }
        }
    }

    /// Serialize to the wire array
    pub fn to_value(&self) -> Value {
        match self {
            Envelope::Call(c) => json!([MessageType::Call as u8, c.id, c.action, c.payload]),
            Envelope::Result(r) => json!([MessageType::CallResult as u8, r.id, r.payload]),
            Envelope::Error(e) => json!([
                MessageType::CallError as u8,
                e.id,
                e.code.as_str(),
                e.description,
                e.details
            ]),
        }
    }

    /// Serialize to WebSocket text
    pub fn to_text(&self) -> String {
        self.to_value().to_string()
    }

    /// The call id this frame carries
    pub fn id(&self) -> &str {
        match self {
            Envelope::Call(c) => &c.id,
            Envelope::Result(r) => &r.id,
            Envelope::Error(e) => &e.id,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Envelope::Call(_) => MessageType::Call,
            Envelope::Result(_) => MessageType::CallResult,
            Envelope::Error(_) => MessageType::CallError,
        }
    }
}

impl From<Call> for Envelope {
    fn from(c: Call) -> Self {
        Envelope::Call(c)
    }
}

impl From<CallResult> for Envelope {
    fn from(r: CallResult) -> Self {
        Envelope::Result(r)
    }
}

impl From<CallError> for Envelope {
    fn from(e: CallError) -> Self {
        Envelope::Error(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_parsing() {
        let json = r#"[2, "callid1", "FireMissiles", {"aargh": 42}]"#;
        let msg = Envelope::from_text(json).unwrap();

        match msg {
            Envelope::Call(call) => {
                assert_eq!(call.id, "callid1");
                assert_eq!(call.action, "FireMissiles");
                assert_eq!(call.payload, json!({"aargh": 42}));
            }
            _ => panic!("Expected Call"),
        }
    }

    #[test]
    fn test_call_result_parsing() {
        let json = r#"[3, "msg-123", {"currentTime": "2026-01-20T12:00:00Z"}]"#;
        let msg = Envelope::from_text(json).unwrap();

        match msg {
            Envelope::Result(result) => {
                assert_eq!(result.id, "msg-123");
                assert_eq!(result.payload["currentTime"], "2026-01-20T12:00:00Z");
            }
            _ => panic!("Expected CallResult"),
        }
    }

    #[test]
    fn test_call_error_parsing() {
        let json = r#"[4, "msg-123", "NotImplemented", "Action not supported", {"hint": 1}]"#;
        let msg = Envelope::from_text(json).unwrap();

        match msg {
            Envelope::Error(error) => {
                assert_eq!(error.id, "msg-123");
                assert_eq!(error.code, ErrorCode::NotImplemented);
                assert_eq!(error.description, "Action not supported");
                assert_eq!(error.details, json!({"hint": 1}));
            }
            _ => panic!("Expected CallError"),
        }
    }

    #[test]
    fn test_wire_text_is_preserved() {
        let frames = [
            json!([2, "a", "Heartbeat", {}]),
            json!([3, "b", {"status": "Accepted", "interval": 300}]),
            json!([4, "c", "GenericError", "boom", {"nested": [1, 2]}]),
            json!([3, "d", null]),
        ];

        for frame in frames {
            let envelope = Envelope::parse(&frame).unwrap();
            assert_eq!(envelope.to_value(), frame);
        }
    }

    #[test]
    fn test_envelopes_survive_the_wire() {
        let mut envelopes = vec![
            Envelope::from(Call::new("a", "BootNotification", json!({"chargePointVendor": "EK"}))),
            Envelope::from(Call::new("b", "Heartbeat", json!({}))),
            Envelope::from(CallResult::new("c", json!({"status": "Accepted", "interval": 300}))),
            Envelope::from(CallResult::new("d", Value::Null)),
        ];
        for code in ErrorCode::ALL {
            envelopes.push(CallError::new(format!("e-{code}"), code, "").into());
            envelopes.push(
                CallError::new(format!("f-{code}"), code, format!("{code} happened"))
                    .with_details(json!({"connectorId": 1, "trace": ["x", "y"]}))
                    .into(),
            );
        }

        for envelope in envelopes {
            assert_eq!(Envelope::parse(&envelope.to_value()).unwrap(), envelope);
            assert_eq!(Envelope::from_text(&envelope.to_text()).unwrap(), envelope);
        }
    }

    #[test]
    fn test_broken_responses_name_their_call() {
        let err = Envelope::from_text(r#"[4, "id-1", "FormatViolation", "bad", {}]"#).unwrap_err();
        assert_eq!(err.response_id(), Some("id-1"));
        assert!(err.reply().is_none());

        let err = Envelope::from_text(r#"[3, "id-2", {}, "extra"]"#).unwrap_err();
        assert_eq!(err.response_id(), Some("id-2"));

        let err = Envelope::from_text(r#"[2, "id-3", "Heartbeat"]"#).unwrap_err();
        assert_eq!(err.response_id(), None);

        let err = Envelope::from_text(r#"[3, 17, {}]"#).unwrap_err();
        assert_eq!(err.response_id(), None);
    }

    #[test]
    fn test_serialization_field_order() {
        let error = CallError::new("callid1", ErrorCode::InternalError, "it broke");
        assert_eq!(
            Envelope::from(error).to_text(),
            r#"[4,"callid1","InternalError","it broke",{}]"#
        );

        let call = Call::new("x", "Heartbeat", json!({}));
        assert_eq!(Envelope::from(call).to_text(), r#"[2,"x","Heartbeat",{}]"#);
    }

    #[test]
    fn test_unattributable_frames_get_no_reply() {
        let cases = [
            "not json",
            r#"{"type": 2}"#,
            "[]",
            r#"["2", "id", "Heartbeat", {}]"#,
            r#"[2, 17, "Heartbeat", {}]"#,
            r#"[3, "id"]"#,
            r#"[4, "id", "NoSuchCode", "desc", {}]"#,
            r#"[4, "id", "GenericError", 5, {}]"#,
            r#"[9]"#,
        ];

        for case in cases {
            let err = Envelope::from_text(case).unwrap_err();
            assert!(err.reply().is_none(), "{case} should not be answered, got {err}");
        }
    }

    #[test]
    fn test_malformed_call_is_formation_violation() {
        let err = Envelope::from_text(r#"[2, "id-1", "Heartbeat"]"#).unwrap_err();
        assert_eq!(err.reply(), Some(("id-1", ErrorCode::FormationViolation)));

        let err = Envelope::from_text(r#"[2, "id-2", 12, {}]"#).unwrap_err();
        assert_eq!(err.reply(), Some(("id-2", ErrorCode::FormationViolation)));
    }

    #[test]
    fn test_unknown_message_type_is_protocol_error() {
        let err = Envelope::from_text(r#"[5, "id-1", "Heartbeat", {}]"#).unwrap_err();
        assert!(matches!(err, FrameError::UnknownMessageType { message_type: 5, .. }));
        assert_eq!(err.reply(), Some(("id-1", ErrorCode::ProtocolError)));
    }

    #[test]
    fn test_parse_result_payload() {
        #[derive(serde::Deserialize)]
        struct Urgh {
            urgh: u32,
        }

        let result = CallResult::new("x", json!({"urgh": 2}));
        let urgh: Urgh = result.parse_payload().unwrap();
        assert_eq!(urgh.urgh, 2);
        assert!(result.parse_payload::<Vec<u8>>().is_err());
    }
}
