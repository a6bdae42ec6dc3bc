//! SRPC Node - CLI charge point
//!
//! Connects to an OCPP-J backend over WebSocket, optionally sends one call,
//! and answers calls from the backend until Ctrl-C.
//!
//! # Usage
//!
//! ```bash
//! # Connect and idle
//! srpc-node --station CS001
//!
//! # Send a call and print the response
//! srpc-node --station CS001 --action Heartbeat
//!
//! # Custom backend and payload
//! srpc-node --station CS001 \
//!     --url ws://localhost:8180/steve/websocket/CentralSystemService \
//!     --action BootNotification \
//!     --payload '{"chargePointVendor":"EK","chargePointModel":"EK3"}'
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use serde_json::Value;
use srpc_core::{Call, CallHandler, ErrorCode, HandlerError};
use srpc_ws::{ClientConfig, Connector};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// OCPP-J charge point speaking SRPC over WebSocket
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Charge point identity
    #[arg(short, long, default_value = "EK3-001")]
    station: String,

    /// Backend WebSocket URL (station id is appended)
    #[arg(long, default_value = "ws://localhost:8180/steve/websocket/CentralSystemService")]
    url: String,

    /// WebSocket subprotocol to offer (can be repeated)
    #[arg(long, default_value = "ocpp1.6")]
    subprotocol: Vec<String>,

    /// Action of a call to send after connecting
    #[arg(short, long)]
    action: Option<String>,

    /// JSON payload for --action
    #[arg(short, long, default_value = "{}")]
    payload: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Answers every backend call with NotImplemented
struct NotImplementedHandler;

#[async_trait]
impl CallHandler for NotImplementedHandler {
    async fn handle(&self, call: Call) -> Result<Value, HandlerError> {
        info!("Backend called {} ({}): {}", call.action, call.id, call.payload);
        Err(HandlerError::call(
            ErrorCode::NotImplemented,
            format!("{} is not implemented by this node", call.action),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let payload: Value = serde_json::from_str(&args.payload)?;

    let config = ClientConfig::new(&args.url, &args.station).with_subprotocols(args.subprotocol.clone());
    info!("Connecting {} to {}", args.station, config.url());

    let client = Connector::new(config, Arc::new(NotImplementedHandler))
        .on_disconnect(|| warn!("Backend closed the connection"))
        .connect()
        .await?;
    let connection = client.connection().clone();

    if let Some(action) = args.action {
        match connection.send_call(action.as_str(), payload).await {
            Ok(response) => println!("{}", serde_json::to_string_pretty(&response)?),
            Err(e) => error!("{} failed: {}", action, e),
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, closing");
            connection.close().await;
        }
        _ = connection.closed() => {}
    }

    if tokio::time::timeout(Duration::from_secs(5), client.closed()).await.is_err() {
        warn!("Backend did not finish the WebSocket close handshake");
    }
    info!("Connection closed");

    Ok(())
}
