//! # SRPC Core
//!
//! Framing and call correlation for OCPP-J: the "simple RPC" layer that
//! carries OCPP procedure calls between a charging station and its CSMS over
//! a message transport such as a WebSocket.
//!
//! ## Architecture
//!
//! ```text
//!   application                        peer
//!       │ send_call / close               ▲
//!       ▼                                 │ JSON arrays
//! ┌───────────────────────┐        ┌──────┴──────┐
//! │      Connection       │──────► │  Transport  │
//! │  pending registry     │ ◄──────│ (WebSocket) │
//! │  in-flight tracking   │ on_message           │
//! │  Open/Closing/Closed  │        └─────────────┘
//! └──────────┬────────────┘
//!            │ incoming CALL
//!            ▼
//!      CallHandler
//! ```
//!
//! ## Wire format
//!
//! | Frame | Shape |
//! |-------|-------|
//! | CALL | `[2, id, action, payload]` |
//! | CALLRESULT | `[3, id, payload]` |
//! | CALLERROR | `[4, id, code, description, details]` |
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use srpc_core::{handler_fn, Connection, ConnectionConfig, ErrorCode, HandlerError, Transport};
//!
//! async fn run(transport: Arc<dyn Transport>) -> Result<(), srpc_core::SrpcError> {
//!     let handler = handler_fn(|call| async move {
//!         Err(HandlerError::call(ErrorCode::NotImplemented, call.action))
//!     });
//!
//!     let conn = Connection::builder(transport, Arc::new(handler))
//!         .config(ConnectionConfig::new("CS001"))
//!         .build();
//!
//!     let response = conn.send_call("Heartbeat", json!({})).await?;
//!     println!("CSMS time: {}", response["currentTime"]);
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod transport;

mod registry;

#[cfg(test)]
mod test_support;

pub use config::{AbandonPolicy, ConnectionConfig};
pub use connection::{Connection, ConnectionBuilder, ConnectionState};
pub use envelope::{Call, CallError, CallResult, Envelope, FrameError, MessageType};
pub use error::{ErrorCode, HandlerError, SrpcError, TransportError, UnknownErrorCode};
pub use transport::{handler_fn, CallHandler, HandlerFn, Transport};
