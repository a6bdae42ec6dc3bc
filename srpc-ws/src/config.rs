//! WebSocket client configuration

use srpc_core::{AbandonPolicy, ConnectionConfig};

/// OCPP 1.6 JSON WebSocket subprotocol
pub const OCPP16_SUBPROTOCOL: &str = "ocpp1.6";

/// Configuration for the WebSocket client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// CSMS WebSocket URL (without station ID)
    pub csms_url: String,

    /// Charge point identity, appended to the URL path
    pub station_id: String,

    /// Subprotocols offered in `Sec-WebSocket-Protocol`, most preferred first
    pub subprotocols: Vec<String>,

    /// Largest accepted message
    pub max_message_size: usize,

    /// Largest accepted frame
    pub max_frame_size: usize,

    /// Settings for the SRPC connection running over the socket
    pub connection: ConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            csms_url: "ws://localhost:8180/steve/websocket/CentralSystemService".to_string(),
            station_id: "EK3-001".to_string(),
            subprotocols: vec![OCPP16_SUBPROTOCOL.to_string()],
            max_message_size: 64 * 1024,
            max_frame_size: 16 * 1024,
            connection: ConnectionConfig::new("EK3-001"),
        }
    }
}

impl ClientConfig {
    /// Create config for one charge point
    pub fn new(csms_url: impl Into<String>, station_id: impl Into<String>) -> Self {
        let station_id = station_id.into();

        Self {
            csms_url: csms_url.into(),
            connection: ConnectionConfig::new(station_id.clone()),
            station_id,
            ..Default::default()
        }
    }

    /// Replace the offered subprotocols
    pub fn with_subprotocols<I, S>(mut self, subprotocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subprotocols = subprotocols.into_iter().map(Into::into).collect();
        self
    }

    /// Set message size limit
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Set treatment of unanswered calls on close
    pub fn with_abandon_policy(mut self, policy: AbandonPolicy) -> Self {
        self.connection = self.connection.with_abandon_policy(policy);
        self
    }

    /// Full WebSocket URL including the station ID
    pub fn url(&self) -> String {
        build_ocpp_url(&self.csms_url, &self.station_id)
    }
}

/// Build the full OCPP WebSocket URL
pub fn build_ocpp_url(base_url: &str, station_id: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), station_id)
}
