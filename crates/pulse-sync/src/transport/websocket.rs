//! WebSocket transport over tokio-tungstenite.
//!
//! One JSON text frame per [`Envelope`]. Protocol-level WebSocket pings
//! are answered here; application pings travel as envelopes.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use pulse_core::Envelope;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::{
    ConnectRequest, DisconnectReason, Transport, TransportEvent, TransportLink, CHANNEL_CAPACITY,
};
use crate::error::{SyncError, SyncResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        WebSocketTransport
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn connect(&self, request: ConnectRequest) -> SyncResult<TransportLink> {
        if !request.allows("websocket") {
            return Err(SyncError::Transport(format!(
                "no supported transport in {:?}",
                request.transports
            )));
        }
        for other in request.transports.iter().filter(|t| *t != "websocket") {
            debug!(transport = %other, "Transport not available, skipping");
        }

        info!(endpoint = %request.endpoint, "Opening WebSocket");
        let (ws_stream, response) = connect_async(request.handshake_url().as_str()).await?;
        debug!(status = ?response.status(), "WebSocket handshake complete");

        let (outgoing_tx, outgoing_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let reason = connection_loop(ws_stream, outgoing_rx, &incoming_tx).await;
            if reason != DisconnectReason::ClientInitiated {
                let _ = incoming_tx.send(TransportEvent::Closed(reason)).await;
            }
        });

        Ok(TransportLink {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }
}

/// Pumps frames both ways until either side closes.
async fn connection_loop(
    ws_stream: WsStream,
    mut outgoing_rx: mpsc::Receiver<Envelope>,
    incoming_tx: &mpsc::Sender<TransportEvent>,
) -> DisconnectReason {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => {
                let Some(envelope) = outgoing else {
                    debug!("Client closed link, sending close frame");
                    let _ = write.send(WsMessage::Close(None)).await;
                    return DisconnectReason::ClientInitiated;
                };
                let json = match envelope.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(?e, msg_type = envelope.type_name(), "Failed to encode message");
                        continue;
                    }
                };
                debug!(msg_type = envelope.type_name(), "Sending message");
                if let Err(e) = write.send(WsMessage::Text(json.into())).await {
                    error!(?e, "WebSocket send failed");
                    return DisconnectReason::Error(e.to_string());
                }
            }

            incoming = read.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => match Envelope::from_json(&text) {
                        Ok(envelope) => {
                            debug!(msg_type = envelope.type_name(), "Received message");
                            if incoming_tx.send(TransportEvent::Message(envelope)).await.is_err() {
                                let _ = write.send(WsMessage::Close(None)).await;
                                return DisconnectReason::ClientInitiated;
                            }
                        }
                        Err(e) => warn!(?e, "Failed to parse message"),
                    },
                    Some(Ok(WsMessage::Ping(data))) => {
                        if let Err(e) = write.send(WsMessage::Pong(data)).await {
                            return DisconnectReason::Error(e.to_string());
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(?frame, "Received close frame");
                        return DisconnectReason::ServerClosed;
                    }
                    Some(Ok(WsMessage::Binary(_))) => warn!("Received unexpected binary message"),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(?e, "WebSocket error");
                        return DisconnectReason::Error(e.to_string());
                    }
                    None => return DisconnectReason::ServerClosed,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[tokio::test]
    async fn test_rejects_request_without_websocket() {
        let request = ConnectRequest {
            endpoint: Url::parse("ws://127.0.0.1:9/socket").unwrap(),
            token: "t".into(),
            transports: vec!["polling".into()],
        };
        let err = WebSocketTransport::new().connect(request).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails() {
        // Port 9 (discard) is closed on test machines.
        let request = ConnectRequest {
            endpoint: Url::parse("ws://127.0.0.1:9/socket").unwrap(),
            token: "t".into(),
            transports: vec!["websocket".into()],
        };
        assert!(WebSocketTransport::new().connect(request).await.is_err());
    }
}
