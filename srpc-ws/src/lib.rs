//! # SRPC over WebSocket
//!
//! Runs an [`srpc_core::Connection`] over a `tokio-tungstenite` WebSocket,
//! the way an OCPP-J charge point talks to its CSMS.
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use srpc_core::{handler_fn, ErrorCode, HandlerError};
//! use srpc_ws::{ClientConfig, Connector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("ws://localhost:8180/steve/websocket/CentralSystemService", "CS001");
//!     let handler = handler_fn(|call| async move {
//!         Err(HandlerError::call(ErrorCode::NotImplemented, call.action))
//!     });
//!
//!     let client = Connector::new(config, Arc::new(handler)).connect().await?;
//!     let boot = client
//!         .connection()
//!         .send_call("BootNotification", json!({"chargePointVendor": "EK", "chargePointModel": "EK3"}))
//!         .await?;
//!     println!("{boot}");
//!
//!     client.connection().close().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;

pub use client::{connect, Client, ClientError, Connector, WsTransport};
pub use config::{build_ocpp_url, ClientConfig, OCPP16_SUBPROTOCOL};
