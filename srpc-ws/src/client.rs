//! WebSocket client for SRPC
//!
//! Handles:
//! - WebSocket connection with the OCPP subprotocol
//! - A writer task owning the sink half; [`WsTransport`] feeds it
//! - A reader task pumping text frames into the [`Connection`] and reporting
//!   peer disconnects

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use srpc_core::{CallHandler, Connection, Transport, TransportError};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{header, HeaderValue},
        protocol::WebSocketConfig,
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors establishing the WebSocket connection
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid CSMS URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("WebSocket handshake with {url} failed: {source}")]
    Handshake {
        url: String,
        #[source]
        source: Box<tungstenite::Error>,
    },
}

/// How long the writer tries to send a close frame before giving up
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Text frame for the writer task, acknowledged once written
struct Outgoing {
    text: String,
    ack: oneshot::Sender<Result<(), TransportError>>,
}

/// Stops the writer task. Raised by [`WsTransport::close`] and by the
/// reader when the server goes away.
#[derive(Clone)]
struct Shutdown {
    requested: Arc<watch::Sender<bool>>,
    stopped: watch::Receiver<bool>,
}

impl Shutdown {
    fn request(&self) {
        self.requested.send_replace(true);
    }

    async fn stopped(&self) {
        let mut stopped = self.stopped.clone();
        // An aborted writer drops the sender, which counts as stopped
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }
}

/// [`Transport`] writing to a WebSocket through the writer task
pub struct WsTransport {
    outgoing_tx: mpsc::Sender<Outgoing>,
    shutdown: Shutdown,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, frame: Value) -> Result<(), TransportError> {
        let (ack, ack_rx) = oneshot::channel();

        self.outgoing_tx
            .send(Outgoing {
                text: frame.to_string(),
                ack,
            })
            .await
            .map_err(|_| TransportError::Closed)?;

        ack_rx.await.map_err(|_| TransportError::Closed)?
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown.request();
        self.shutdown.stopped().await;
        Ok(())
    }
}

/// Owns the sink half until shutdown is requested or the transport is dropped
async fn write_loop(
    mut ws_tx: SplitSink<WsStream, Message>,
    mut outgoing_rx: mpsc::Receiver<Outgoing>,
    mut shutdown_rx: watch::Receiver<bool>,
    stopped_tx: watch::Sender<bool>,
) {
    loop {
        let outgoing = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            outgoing = outgoing_rx.recv() => match outgoing {
                Some(outgoing) => outgoing,
                None => break,
            },
        };

        // A write blocked on a peer that stopped reading must not hold up shutdown
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                let _ = outgoing.ack.send(Err(TransportError::Closed));
                break;
            }
            result = ws_tx.send(Message::Text(outgoing.text.into())) => {
                let result = result.map_err(|e| {
                    error!("Failed to send WebSocket message: {}", e);
                    TransportError::Other(Box::new(e))
                });
                let _ = outgoing.ack.send(result);
            }
        }
    }

    match tokio::time::timeout(CLOSE_TIMEOUT, ws_tx.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("WebSocket close frame not sent: {}", e),
        Err(_) => warn!("Timed out sending WebSocket close frame"),
    }

    stopped_tx.send_replace(true);
    debug!("WebSocket writer stopped");
}

/// Feed incoming frames to the connection until the socket goes away
async fn read_loop(mut ws_rx: SplitStream<WsStream>, connection: Connection, shutdown: Shutdown) {
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                debug!("Received: {}", text);
                connection.on_message(&text).await;
            }
            Ok(Message::Binary(data)) => {
                warn!("Ignoring binary frame of {} bytes", data.len());
            }
            Ok(Message::Close(frame)) => {
                info!("WebSocket closed by server: {:?}", frame);
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
                // Pongs are answered by tungstenite
            }
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
        }
    }

    // The socket is gone either way; release the sink half
    shutdown.request();
    connection.on_transport_disconnect().await;
}

/// Running WebSocket client
pub struct Client {
    connection: Connection,
    subprotocol: Option<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Client {
    /// The SRPC connection running over the socket
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Subprotocol the server accepted, if any
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    /// Wait until the server side of the socket has gone away and the
    /// writer has let go of it
    pub async fn closed(self) {
        if let Err(e) = self.reader.await {
            error!("WebSocket reader task failed: {}", e);
        }
        self.connection.closed().await;
        if let Err(e) = self.writer.await {
            error!("WebSocket writer task failed: {}", e);
        }
    }
}

/// Builds a [`Client`]
pub struct Connector {
    config: ClientConfig,
    handler: Arc<dyn CallHandler>,
    on_disconnect: Option<Box<dyn FnOnce() + Send>>,
}

impl Connector {
    pub fn new(config: ClientConfig, handler: Arc<dyn CallHandler>) -> Self {
        Self {
            config,
            handler,
            on_disconnect: None,
        }
    }

    /// Called once when the server drops the socket
    pub fn on_disconnect(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_disconnect = Some(Box::new(callback));
        self
    }

    /// Connect and start the reader and writer tasks
    pub async fn connect(self) -> Result<Client, ClientError> {
        let url = self.config.url();
        let invalid_url = |reason: String| ClientError::InvalidUrl {
            url: url.clone(),
            reason,
        };

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| invalid_url(e.to_string()))?;

        if !self.config.subprotocols.is_empty() {
            let offered = HeaderValue::from_str(&self.config.subprotocols.join(", "))
                .map_err(|e| invalid_url(e.to_string()))?;
            request
                .headers_mut()
                .insert(header::SEC_WEBSOCKET_PROTOCOL, offered);
        }

        let ws_config = WebSocketConfig {
            max_message_size: Some(self.config.max_message_size),
            max_frame_size: Some(self.config.max_frame_size),
            ..Default::default()
        };

        let (ws_stream, response) = connect_async_with_config(request, Some(ws_config), false)
            .await
            .map_err(|e| {
                error!("WebSocket connection failed: {}", e);
                ClientError::Handshake {
                    url: url.clone(),
                    source: Box::new(e),
                }
            })?;

        // Verify subprotocol
        let subprotocol = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match &subprotocol {
            Some(accepted) if self.config.subprotocols.iter().any(|p| p == accepted) => {}
            _ if self.config.subprotocols.is_empty() => {}
            other => {
                warn!(
                    "CSMS did not accept any of {:?}, got: {:?}",
                    self.config.subprotocols, other
                );
            }
        }

        info!("WebSocket connected to {}", url);

        let (ws_tx, ws_rx) = ws_stream.split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(64);
        let (requested_tx, requested_rx) = watch::channel(false);
        let (stopped_tx, stopped_rx) = watch::channel(false);
        let shutdown = Shutdown {
            requested: Arc::new(requested_tx),
            stopped: stopped_rx,
        };
        let writer = tokio::spawn(write_loop(ws_tx, outgoing_rx, requested_rx, stopped_tx));

        let transport = WsTransport {
            outgoing_tx,
            shutdown: shutdown.clone(),
        };
        let mut builder = Connection::builder(Arc::new(transport), self.handler)
            .config(self.config.connection.clone());
        if let Some(callback) = self.on_disconnect {
            builder = builder.on_disconnect(callback);
        }
        let connection = builder.build();

        let reader = tokio::spawn(read_loop(ws_rx, connection.clone(), shutdown));

        Ok(Client {
            connection,
            subprotocol,
            reader,
            writer,
        })
    }
}

/// Connect with no disconnect callback
pub async fn connect(config: ClientConfig, handler: Arc<dyn CallHandler>) -> Result<Client, ClientError> {
    Connector::new(config, handler).connect().await
}
