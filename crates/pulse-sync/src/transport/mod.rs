//! # Transport Layer
//!
//! A transport turns a [`ConnectRequest`] into a pair of channels carrying
//! decoded [`Envelope`]s. Framing, handshakes and socket I/O stay behind
//! this seam.
//!
//! ```text
//! ┌───────────────────┐   outgoing: mpsc::Sender<Envelope>    ┌───────────┐
//! │ ConnectionManager │ ────────────────────────────────────► │ Transport │
//! │                   │ ◄──────────────────────────────────── │   task    │
//! └───────────────────┘   incoming: Receiver<TransportEvent>  └───────────┘
//! ```
//!
//! Dropping the outgoing sender closes the link from the client side.

mod mock;
mod websocket;

pub use mock::MockTransport;
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use pulse_core::protocol::PROTOCOL_VERSION;
use pulse_core::Envelope;
use tokio::sync::mpsc;
use url::Url;

use crate::error::SyncResult;

/// Buffer size for both directions of a link.
pub const CHANNEL_CAPACITY: usize = 256;

/// Everything a transport needs to open a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Base URL with the endpoint path applied.
    pub endpoint: Url,
    pub token: String,
    /// Transport preference, most preferred first.
    pub transports: Vec<String>,
}

impl ConnectRequest {
    /// Endpoint with the auth token and protocol version as query
    /// parameters.
    pub fn handshake_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("token", &self.token)
            .append_pair("v", &PROTOCOL_VERSION.to_string());
        url
    }

    pub fn allows(&self, transport: &str) -> bool {
        self.transports.iter().any(|t| t == transport)
    }
}

/// Why a link went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client asked to close. Never triggers a reconnect.
    ClientInitiated,
    ServerClosed,
    Error(String),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ClientInitiated => write!(f, "client disconnect"),
            DisconnectReason::ServerClosed => write!(f, "server closed connection"),
            DisconnectReason::Error(e) => write!(f, "transport error: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(Envelope),
    /// Last event on a link.
    Closed(DisconnectReason),
}

/// An open link.
#[derive(Debug)]
pub struct TransportLink {
    pub outgoing: mpsc::Sender<Envelope>,
    pub incoming: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Opens a link. The caller applies the connect timeout.
    async fn connect(&self, request: ConnectRequest) -> SyncResult<TransportLink>;
}
