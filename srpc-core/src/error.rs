//! Error taxonomy for SRPC connections
//!
//! - `ErrorCode`: the closed set of codes carried by CALLERROR frames
//! - `SrpcError`: why an outgoing call or connection operation failed
//! - `TransportError`: failures reported by the transport capability
//! - `HandlerError`: failures reported by the incoming-call handler

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::connection::ConnectionState;

/// Error codes of the CALLERROR frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurrenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 10] = [
        ErrorCode::NotImplemented,
        ErrorCode::NotSupported,
        ErrorCode::InternalError,
        ErrorCode::ProtocolError,
        ErrorCode::SecurityError,
        ErrorCode::FormationViolation,
        ErrorCode::PropertyConstraintViolation,
        ErrorCode::OccurrenceConstraintViolation,
        ErrorCode::TypeConstraintViolation,
        ErrorCode::GenericError,
    ];

    /// Wire name of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotImplemented => "NotImplemented",
            ErrorCode::NotSupported => "NotSupported",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::ProtocolError => "ProtocolError",
            ErrorCode::SecurityError => "SecurityError",
            ErrorCode::FormationViolation => "FormationViolation",
            ErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            ErrorCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            ErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            ErrorCode::GenericError => "GenericError",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorCode {
    type Err = UnknownErrorCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCode::ALL
            .iter()
            .find(|code| code.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownErrorCode(s.to_string()))
    }
}

/// A string that is not one of the known error codes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown error code: {0}")]
pub struct UnknownErrorCode(pub String);

/// Failures of the transport capability
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Failure of an outgoing call or a connection operation
#[derive(Debug, Error)]
pub enum SrpcError {
    #[error("connection is {0}, no new calls accepted")]
    InvalidState(ConnectionState),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{code} from peer: {description}")]
    Remote {
        code: ErrorCode,
        description: String,
        details: Value,
    },

    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    #[error("peer sent a malformed response: {0}")]
    MalformedResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SrpcError {
    /// Error code, if the peer answered with a CALLERROR
    pub fn remote_code(&self) -> Option<ErrorCode> {
        match self {
            SrpcError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Failure reported by a [`CallHandler`](crate::CallHandler)
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Already shaped as a protocol error; sent to the peer as-is
    #[error("{code}: {description}")]
    Call {
        code: ErrorCode,
        description: String,
        details: Value,
    },

    /// Anything else; answered with `InternalError`
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn call(code: ErrorCode, description: impl Into<String>) -> Self {
        HandlerError::Call {
            code,
            description: description.into(),
            details: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn failed(reason: impl std::fmt::Display) -> Self {
        HandlerError::Failed(reason.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::call(ErrorCode::FormationViolation, e.to_string())
    }
}
